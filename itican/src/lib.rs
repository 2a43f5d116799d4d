//! **`itican`**, ITI-CAN channel sessions over the vendor library or an in-memory bus.

mod api;
mod config;
pub use config::*;
mod constants;
mod library;
pub use library::*;
mod session;
pub use session::*;
mod simulator;
pub use simulator::*;

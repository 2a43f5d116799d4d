//! **`itican-core`**, the driver independent part of the ITI-CAN channel stack:
//! frames, identifiers, the bit-timing codec and the controller capability set.

mod constants;
pub use constants::*;
mod device;
pub use device::*;
mod frame;
pub use frame::*;

pub mod error;
pub mod timing;
pub mod utils;

pub(crate) const ITICAN_ENV: &str = "itican.env";
pub(crate) const ITICAN_VAR: &str = "ITICAN_LIBRARY";
pub(crate) const ITICAN_PATH_DEFAULT: &str = "library";
pub(crate) const CHANNEL_CFG_FILENAME: &str = "channel.cfg.yaml";

#[cfg(target_os = "linux")]
pub(crate) const LIB_NAME: &str = "libitican.so";
#[cfg(target_os = "windows")]
pub(crate) const LIB_NAME: &str = "itican.dll";
#[cfg(not(any(target_os = "linux", target_os = "windows")))]
pub(crate) const LIB_NAME: &str = "libitican.dylib";

/// Buffer sizes fixed by the native header.
pub(crate) const MAX_CHANNELS_LEN: usize = 2000;
pub(crate) const MAX_ERROR_LEN: usize = 100;
pub(crate) const MAX_NAME_LEN: usize = 100;
pub(crate) const MAX_BITRATE_LEN: usize = 128;

pub(crate) const STATUS_OK: i32 = 0;

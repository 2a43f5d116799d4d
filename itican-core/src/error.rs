/// Local error codes, kept apart from the native library's range so every
/// error is resolvable through [`describe`] or the library's own lookup.
pub const CODE_CHANNEL_NOT_FOUND: i32 = -2001;
pub const CODE_CHANNEL_BUSY: i32 = -2002;
pub const CODE_INVALID_CHANNEL_STATE: i32 = -2003;
pub const CODE_UNSUPPORTED_MODE: i32 = -2004;
pub const CODE_UNSUPPORTED_FEATURE: i32 = -2005;
pub const CODE_INVALID_TIMING: i32 = -2006;
pub const CODE_DATA_OUT_OF_RANGE: i32 = -2007;
pub const CODE_DEVICE_CONFIG: i32 = -2008;
pub const CODE_TIMEOUT: i32 = -2009;
pub const CODE_OTHER: i32 = -2010;

#[derive(thiserror::Error, Debug, Clone, Eq, PartialEq)]
pub enum CanError {
    #[error("ITICAN - channel: {0} not found")]
    ChannelNotFound(String),
    #[error("ITICAN - channel: {0} is bound by another session")]
    ChannelBusy(String),
    #[error("ITICAN - channel: {channel} is {state}, operation `{operation}` not allowed")]
    InvalidChannelState {
        channel: String,
        state: String,
        operation: &'static str,
    },

    #[error("ITICAN - mode: {0} not supported")]
    UnsupportedMode(String),
    #[error("ITICAN - feature: {0} not supported")]
    UnsupportedFeature(String),

    #[error("ITICAN - invalid timing parameter: {0}")]
    InvalidTimingParameter(String),
    #[error("ITICAN - data length: {0} is too large")]
    DataOutOfRange(usize),

    #[error("ITICAN - channel: {channel} timeout error")]
    TimeoutError { channel: String, code: i32 },
    #[error("ITICAN - native call failed with code {code}: {reason}")]
    IoFailure { code: i32, reason: String },

    #[error("ITICAN - device configuration error {0}")]
    DeviceConfigError(String),
    #[error("ITICAN - other error: {0}")]
    OtherError(String),
}

impl CanError {
    #[inline]
    pub fn channel_not_found<T: Into<String>>(channel: T) -> Self {
        Self::ChannelNotFound(channel.into())
    }

    #[inline]
    pub fn channel_busy<T: Into<String>>(channel: T) -> Self {
        Self::ChannelBusy(channel.into())
    }

    #[inline]
    pub fn invalid_state<T: Into<String>, S: ToString>(
        channel: T,
        state: S,
        operation: &'static str,
    ) -> Self {
        Self::InvalidChannelState {
            channel: channel.into(),
            state: state.to_string(),
            operation,
        }
    }

    #[inline]
    pub fn unsupported_feature<T: Into<String>>(feature: T) -> Self {
        Self::UnsupportedFeature(feature.into())
    }

    #[inline]
    pub fn invalid_timing<T: Into<String>>(reason: T) -> Self {
        Self::InvalidTimingParameter(reason.into())
    }

    #[inline]
    pub fn channel_timeout<T: Into<String>>(channel: T) -> Self {
        Self::TimeoutError { channel: channel.into(), code: CODE_TIMEOUT }
    }

    #[inline]
    pub fn other_error<T: Into<String>>(reason: T) -> Self {
        Self::OtherError(reason.into())
    }

    /// Timeouts are an expected outcome of a bounded receive, not a failure of the channel.
    #[inline]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::TimeoutError { .. })
    }

    #[inline]
    pub fn is_unsupported(&self) -> bool {
        matches!(self, Self::UnsupportedFeature(_) | Self::UnsupportedMode(_))
    }

    /// The numeric code of this error. Errors raised by the controller keep the
    /// native code verbatim.
    pub fn code(&self) -> i32 {
        match self {
            Self::ChannelNotFound(_) => CODE_CHANNEL_NOT_FOUND,
            Self::ChannelBusy(_) => CODE_CHANNEL_BUSY,
            Self::InvalidChannelState { .. } => CODE_INVALID_CHANNEL_STATE,
            Self::UnsupportedMode(_) => CODE_UNSUPPORTED_MODE,
            Self::UnsupportedFeature(_) => CODE_UNSUPPORTED_FEATURE,
            Self::InvalidTimingParameter(_) => CODE_INVALID_TIMING,
            Self::DataOutOfRange(_) => CODE_DATA_OUT_OF_RANGE,
            Self::TimeoutError { code, .. } => *code,
            Self::IoFailure { code, .. } => *code,
            Self::DeviceConfigError(_) => CODE_DEVICE_CONFIG,
            Self::OtherError(_) => CODE_OTHER,
        }
    }
}

/// Describe one of the local error codes. Returns `None` for codes owned by the native library.
pub fn describe(code: i32) -> Option<&'static str> {
    match code {
        0 => Some("success"),
        CODE_CHANNEL_NOT_FOUND => Some("channel name is not present in the enumeration result"),
        CODE_CHANNEL_BUSY => Some("channel is already bound by another session"),
        CODE_INVALID_CHANNEL_STATE => Some("operation is not valid in the current channel state"),
        CODE_UNSUPPORTED_MODE => Some("requested open mode is not supported by the hardware"),
        CODE_UNSUPPORTED_FEATURE => Some("requested feature is not supported by the hardware"),
        CODE_INVALID_TIMING => Some("timing parameter is out of its encodable range"),
        CODE_DATA_OUT_OF_RANGE => Some("frame payload is too long for its frame type"),
        CODE_DEVICE_CONFIG => Some("driver library or configuration could not be loaded"),
        CODE_TIMEOUT => Some("operation timed out"),
        CODE_OTHER => Some("unclassified error"),
        _ => None,
    }
}

use std::fmt::{Display, Formatter};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use crate::error::CanError;
use crate::frame::CanMessage;
use crate::timing::{format_custom, ArbitrationTiming, DataTiming};

/// Opaque identity of a bound channel, an index into the controller's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelHandle(pub(crate) u32);

impl ChannelHandle {
    #[inline]
    pub fn new(index: u32) -> Self {
        Self(index)
    }

    #[inline]
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl Display for ChannelHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[allow(non_camel_case_types)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum OpenType {
    #[default]
    Classic_CAN = 0,
    FD_CAN = 1,
    FD_CAN_BRS = 2,
    /// non-ISO CAN-FD, rejected by the hardware.
    FD_CAN_NO_ISO = 3,
}

impl TryFrom<u8> for OpenType {
    type Error = CanError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Classic_CAN),
            1 => Ok(Self::FD_CAN),
            2 => Ok(Self::FD_CAN_BRS),
            3 => Ok(Self::FD_CAN_NO_ISO),
            _ => Err(CanError::other_error("parameter not supported")),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum OpenMode {
    #[default]
    Normal = 0,
    /// defined by the API, not supported by the hardware.
    Listen = 1,
    /// defined by the API, not supported by the hardware.
    Loopback = 2,
}

impl TryFrom<u8> for OpenMode {
    type Error = CanError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Normal),
            1 => Ok(Self::Listen),
            2 => Ok(Self::Loopback),
            _ => Err(CanError::other_error("parameter not supported")),
        }
    }
}

#[allow(non_camel_case_types)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum TxMode {
    #[default]
    Normal = 0,
    AUTO_SEND = 1,
    QUEUE_SEND = 2,
}

/// Which timing register a read or write targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Arbitration,
    Data,
}

impl Display for Phase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Arbitration => f.write_str("arbitration"),
            Self::Data => f.write_str("data"),
        }
    }
}

/// Where `apply_settings` commits the staged configuration.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
pub enum SettingsScope {
    /// Active until the channel is released, nothing written to the device.
    #[default]
    Temporary,
    /// Written to the device's non-volatile storage.
    Persistent,
}

/// Optional hardware features a controller may report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Termination,
    EchoMessage,
    Blink,
    BusErrorReport,
    TxMode(TxMode),
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Termination => f.write_str("termination"),
            Self::EchoMessage => f.write_str("echo message"),
            Self::Blink => f.write_str("blink"),
            Self::BusErrorReport => f.write_str("bus error report"),
            Self::TxMode(mode) => write!(f, "tx mode {:?}", mode),
        }
    }
}

/// The capability set a CAN controller backend offers to a channel session.
///
/// Calls on one handle are never issued concurrently by a session; a backend
/// shared between sessions must tolerate calls on different handles from
/// different threads.
#[allow(unused_variables)]
pub trait Controller: Send + Sync {
    /// Names of all channels currently present.
    fn enumerate_channels(&self) -> Result<Vec<String>, CanError>;
    /// Acquire a handle for the named channel, `ChannelNotFound` if unknown.
    fn bind(&self, name: &str) -> Result<ChannelHandle, CanError>;
    /// Release a handle acquired by [`Controller::bind`].
    fn unbind(&self, handle: ChannelHandle);
    fn open(&self, handle: ChannelHandle, open_type: OpenType, mode: OpenMode) -> Result<(), CanError>;
    fn close(&self, handle: ChannelHandle) -> Result<(), CanError>;
    fn write_timing_register(&self, handle: ChannelHandle, phase: Phase, value: u64) -> Result<(), CanError>;
    fn read_timing_register(&self, handle: ChannelHandle, phase: Phase) -> Result<u64, CanError>;
    /// Both timing registers in the `ARB[,DATA]` text form, data omitted when unreadable.
    fn read_custom_timing(&self, handle: ChannelHandle) -> Result<String, CanError> {
        let arbitration = self.read_timing_register(handle, Phase::Arbitration)?;
        let data = self.read_timing_register(handle, Phase::Data).ok();
        Ok(format_custom(arbitration, data))
    }
    fn apply_settings(&self, handle: ChannelHandle, scope: SettingsScope) -> Result<(), CanError>;
    /// Queue one frame. The timeout is a hint, queueing transports may ignore it.
    fn transmit(&self, handle: ChannelHandle, frame: &CanMessage, timeout: Option<u32>) -> Result<(), CanError>;
    /// Wait for one frame, `None` blocks forever and `Some(0)` polls.
    fn receive(&self, handle: ChannelHandle, timeout: Option<u32>) -> Result<CanMessage, CanError>;
    fn pending_frames(&self, handle: ChannelHandle) -> Result<usize, CanError> {
        Err(CanError::unsupported_feature("message count"))
    }
    fn query_capability(&self, handle: ChannelHandle, capability: Capability) -> Result<bool, CanError> {
        Err(CanError::unsupported_feature(capability.to_string()))
    }
    fn capability_enabled(&self, handle: ChannelHandle, capability: Capability) -> Result<bool, CanError> {
        Err(CanError::unsupported_feature(capability.to_string()))
    }
    fn set_capability(&self, handle: ChannelHandle, capability: Capability, enable: bool) -> Result<(), CanError> {
        Err(CanError::unsupported_feature(capability.to_string()))
    }
    fn set_tx_timing(&self, handle: ChannelHandle, id: u32, period_ms: u32) -> Result<(), CanError> {
        Err(CanError::unsupported_feature("tx timing"))
    }
    /// Describe a native status code, independent of any channel.
    fn last_error_text(&self, code: i32) -> String;
}

/// Per channel configuration, usually read from `channel.cfg.yaml`.
#[derive(Debug, Default, Clone, Deserialize, Serialize, Getters)]
pub struct ChannelConfig {
    #[serde(default)]
    #[getter(copy)]
    open_type: OpenType,
    #[serde(default)]
    #[getter(copy)]
    open_mode: OpenMode,
    #[getter(copy)]
    arbitration: Option<ArbitrationTiming>,
    #[getter(copy)]
    data: Option<DataTiming>,
    #[serde(default)]
    #[getter(copy)]
    scope: SettingsScope,
}

impl ChannelConfig {
    pub fn new(open_type: OpenType) -> Self {
        Self {
            open_type,
            ..Default::default()
        }
    }

    pub fn set_open_mode(&mut self, mode: OpenMode) -> &mut Self {
        self.open_mode = mode;
        self
    }

    pub fn set_arbitration(&mut self, timing: ArbitrationTiming) -> &mut Self {
        self.arbitration = Some(timing);
        self
    }

    pub fn set_data(&mut self, timing: DataTiming) -> &mut Self {
        self.data = Some(timing);
        self
    }

    pub fn set_scope(&mut self, scope: SettingsScope) -> &mut Self {
        self.scope = scope;
        self
    }
}

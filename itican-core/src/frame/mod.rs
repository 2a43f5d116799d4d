mod identifier;
pub use identifier::*;

use std::fmt::{Display, Formatter, Write};
use crate::constants::{MAX_FD_FRAME_SIZE, MAX_FRAME_SIZE};
use crate::error::CanError;
use crate::utils::can_dlc;

/// Frame type as the controller encodes it on the wire API.
#[repr(u8)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MessageType {
    #[default]
    Classic = 0,
    Remote = 1,
    /// CAN-FD frame without bit rate switch.
    Fd = 16,
    /// CAN-FD frame, data phase at the data bit rate.
    FdBrs = 24,
}

impl MessageType {
    #[inline]
    pub fn is_fd(&self) -> bool {
        matches!(self, Self::Fd | Self::FdBrs)
    }

    #[inline]
    pub fn max_length(&self) -> usize {
        if self.is_fd() { MAX_FD_FRAME_SIZE } else { MAX_FRAME_SIZE }
    }
}

impl TryFrom<u8> for MessageType {
    type Error = CanError;
    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Classic),
            1 => Ok(Self::Remote),
            16 => Ok(Self::Fd),
            24 => Ok(Self::FdBrs),
            v => Err(CanError::other_error(format!("message type {} not supported", v))),
        }
    }
}

#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Direct {
    #[default]
    Transmit,
    Receive,
}

impl Display for Direct {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transmit => f.write_str("Tx"),
            Self::Receive => f.write_str("Rx"),
        }
    }
}

/// One CAN or CAN-FD frame.
///
/// Classic and remote frames carry at most 8 bytes, FD frames at most 64;
/// constructors refuse anything longer.
#[derive(Debug, Clone)]
pub struct CanMessage {
    pub(crate) timestamp: u64,
    pub(crate) id: Id,
    pub(crate) msg_type: MessageType,
    pub(crate) channel: String,
    pub(crate) length: usize,
    pub(crate) data: Vec<u8>,
    pub(crate) direct: Direct,
    pub(crate) transmitted: bool,
}

impl CanMessage {
    /// Build a data frame; payloads above 8 bytes become FD frames.
    #[inline]
    pub fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let msg_type = match data.len() {
            ..=MAX_FRAME_SIZE => MessageType::Classic,
            ..=MAX_FD_FRAME_SIZE => MessageType::Fd,
            _ => return None,
        };

        Self::with_type(id, msg_type, data).ok()
    }

    #[inline]
    pub fn new_fd(id: impl Into<Id>, data: &[u8], bitrate_switch: bool) -> Option<Self> {
        let msg_type = if bitrate_switch { MessageType::FdBrs } else { MessageType::Fd };
        Self::with_type(id, msg_type, data).ok()
    }

    #[inline]
    pub fn new_remote(id: impl Into<Id>, len: usize) -> Option<Self> {
        if len > MAX_FRAME_SIZE {
            return None;
        }

        Some(Self {
            timestamp: 0,
            id: id.into(),
            msg_type: MessageType::Remote,
            channel: Default::default(),
            length: len,
            data: Default::default(),
            direct: Default::default(),
            transmitted: false,
        })
    }

    /// Build a frame of an explicit type, checking the payload against its limit.
    pub fn with_type(id: impl Into<Id>, msg_type: MessageType, data: &[u8]) -> Result<Self, CanError> {
        let length = data.len();
        if length > msg_type.max_length() {
            return Err(CanError::DataOutOfRange(length));
        }

        Ok(Self {
            timestamp: 0,
            id: id.into(),
            msg_type,
            channel: Default::default(),
            length,
            data: match msg_type {
                MessageType::Remote => Default::default(),
                _ => data.to_vec(),
            },
            direct: Default::default(),
            transmitted: false,
        })
    }

    #[inline]
    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    #[inline]
    pub fn set_timestamp(&mut self, value: Option<u64>) -> &mut Self {
        self.timestamp = value.unwrap_or_default();
        self
    }

    #[inline]
    pub fn id(&self) -> Id {
        self.id
    }

    #[inline]
    pub fn msg_type(&self) -> MessageType {
        self.msg_type
    }

    #[inline]
    pub fn is_can_fd(&self) -> bool {
        self.msg_type.is_fd()
    }

    #[inline]
    pub fn is_bitrate_switch(&self) -> bool {
        self.msg_type == MessageType::FdBrs
    }

    #[inline]
    pub fn is_remote(&self) -> bool {
        self.msg_type == MessageType::Remote
    }

    #[inline]
    pub fn is_extended(&self) -> bool {
        self.id.is_extended()
    }

    #[inline]
    pub fn direct(&self) -> Direct {
        self.direct
    }

    #[inline]
    pub fn set_direct(&mut self, direct: Direct) -> &mut Self {
        self.direct = direct;
        self
    }

    /// Reserved by the controller API, never set by the hardware today.
    #[inline]
    pub fn is_transmitted(&self) -> bool {
        self.transmitted
    }

    #[inline]
    pub fn set_transmitted(&mut self, value: bool) -> &mut Self {
        self.transmitted = value;
        self
    }

    #[inline]
    pub fn channel(&self) -> &str {
        self.channel.as_str()
    }

    #[inline]
    pub fn set_channel<S: Into<String>>(&mut self, value: S) -> &mut Self {
        self.channel = value.into();
        self
    }

    /// ensure return the actual length of data.
    #[inline]
    pub fn data(&self) -> &[u8] {
        self.data.as_slice()
    }

    #[inline]
    pub fn length(&self) -> usize {
        self.length
    }

    #[inline]
    pub fn dlc(&self) -> Option<usize> {
        can_dlc(self.length, self.is_can_fd())
    }
}

impl PartialEq for CanMessage {
    fn eq(&self, other: &Self) -> bool {
        if self.length != other.length {
            return false;
        }

        if self.is_remote() {
            other.is_remote() && (self.id == other.id)
        }
        else {
            (self.id == other.id) &&
                (self.msg_type == other.msg_type) &&
                (self.data == other.data)
        }
    }
}

impl Display for CanMessage {
    /// Output Frame as `asc` String.
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let data_str = if self.is_remote() {
            " ".to_owned()
        } else {
            self.data()
                .iter()
                .fold(String::new(), |mut out, &b| {
                    let _ = write!(out, "{b:02x} ");
                    out
                })
        };

        if self.is_can_fd() {
            let mut flags = 1 << 12;
            if self.is_bitrate_switch() {
                flags |= 1 << 13;
            }
            write!(f, "{:.3} CANFD {} {} {: >8x} {} 0 {: >2} {: >2} {}{: >8x}",
                   self.timestamp() as f64 / 1000.,
                   self.channel(),
                   self.direct(),
                   self.id().into_bits(),
                   if self.is_bitrate_switch() { 1 } else { 0 },
                   self.dlc().unwrap_or_default(),
                   self.length(),
                   data_str,
                   flags,
            )
        }
        else {
            write!(f, "{:.3} {} {: >8x}{: <4} {} {} {: >2} {}",
                   self.timestamp() as f64 / 1000.,
                   self.channel(),
                   self.id().into_bits(),
                   if self.is_extended() { "x" } else { "" },
                   self.direct(),
                   if self.is_remote() { "r" } else { "d" },
                   self.length(),
                   data_str,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classic_payload_is_bounded() {
        let data = [0u8; 9];
        assert!(CanMessage::with_type(0x123, MessageType::Classic, &data).is_err());
        assert!(CanMessage::new_remote(0x123, 9).is_none());

        let msg = CanMessage::new(0x123, &data).unwrap();
        assert_eq!(msg.msg_type(), MessageType::Fd);
        assert_eq!(msg.dlc(), Some(12));

        assert!(CanMessage::new(0x123, &[0u8; 65]).is_none());
    }

    #[test]
    fn remote_frame_carries_length_only() {
        let msg = CanMessage::new_remote(0x7DF, 8).unwrap();
        assert!(msg.is_remote());
        assert_eq!(msg.length(), 8);
        assert!(msg.data().is_empty());
    }

    #[test]
    fn message_type_codes() {
        assert_eq!(MessageType::try_from(24).unwrap(), MessageType::FdBrs);
        assert_eq!(MessageType::FdBrs as u8, 24);
        assert!(MessageType::try_from(2).is_err());
    }

    #[test]
    fn display_as_asc() {
        let mut msg = CanMessage::new(0x7DF, &[0x02, 0x10, 0x01]).unwrap();
        msg.set_channel("CAN0").set_direct(Direct::Receive);
        let text = msg.to_string();
        assert!(text.contains("CAN0"));
        assert!(text.contains("Rx d"));
        assert!(text.ends_with("02 10 01 "));
    }
}

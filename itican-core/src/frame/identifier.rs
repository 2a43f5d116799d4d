use std::fmt::{Display, Formatter};
use bitflags::bitflags;
use crate::constants::{EFF_MASK, SFF_MASK};

bitflags! {
    /// Format marker accepted in the top bit of a raw identifier.
    #[repr(transparent)]
    #[derive(Debug, Copy, Clone, Eq, PartialEq)]
    pub struct IdentifierFlags: u32 {
        const EXTENDED = 0x8000_0000;
    }
}

/// 11-bit or 29-bit CAN identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Id {
    Standard(u16),
    Extended(u32),
}

/// A raw value is extended when flagged or when it does not fit in 11 bits.
impl From<u32> for Id {
    fn from(raw: u32) -> Self {
        let flagged = IdentifierFlags::from_bits_truncate(raw).contains(IdentifierFlags::EXTENDED);
        Self::from_bits(raw, flagged || (raw & EFF_MASK) > SFF_MASK)
    }
}

impl From<Id> for u32 {
    fn from(id: Id) -> Self {
        id.into_bits()
    }
}

impl Id {
    /// Identifier in the format the native message reports, masked to its width.
    #[inline]
    pub fn from_bits(raw: u32, extended: bool) -> Self {
        match extended {
            true => Self::Extended(raw & EFF_MASK),
            false => Self::Standard((raw & SFF_MASK) as u16),
        }
    }

    #[inline]
    pub fn into_bits(self) -> u32 {
        match self {
            Self::Standard(v) => v as u32,
            Self::Extended(v) => v,
        }
    }

    #[inline]
    pub fn is_extended(&self) -> bool {
        matches!(self, Self::Extended(_))
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Standard(v) => write!(f, "{:03X}", v),
            Self::Extended(v) => write!(f, "{:08X}x", v),
        }
    }
}

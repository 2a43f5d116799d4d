/// Mask for standard identifiers.
pub const SFF_MASK: u32 = 0x0000_07FF;
/// Mask for extended identifiers.
pub const EFF_MASK: u32 = 0x1FFF_FFFF;
/// The max sizeof can-frame's data.
pub const MAX_FRAME_SIZE: usize = 8;
/// The max sizeof canfd-frame's data.
pub const MAX_FD_FRAME_SIZE: usize = 64;

/// CAN controller clock of the ITI-CAN hardware family.
pub const CAN_CLOCK_MHZ: u64 = 80;
/// Marker the controller expects in every custom timing register.
pub const TIMING_BASE: u64 = 0xA000_0000;

pub(crate) const ARB_TSEG2_SHIFT: u32 = 0;
pub(crate) const ARB_TSEG1_SHIFT: u32 = 8;
pub(crate) const ARB_SJW_SHIFT: u32 = 16;
pub(crate) const ARB_TQ_SHIFT: u32 = 32;
pub(crate) const ARB_SEG_MASK: u64 = 0xFF;
pub(crate) const ARB_TQ_MASK: u64 = 0xFFFF_FFFF;

pub(crate) const FD_SJW_SHIFT: u32 = 0;
pub(crate) const FD_TSEG2_SHIFT: u32 = 4;
pub(crate) const FD_TSEG1_SHIFT: u32 = 8;
pub(crate) const FD_TQ_SHIFT: u32 = 13;
pub(crate) const FD_TDCO_SHIFT: u32 = 40;
pub(crate) const FD_TDC_ENABLE: u64 = 1 << 55;
pub(crate) const FD_SJW_MASK: u64 = 0x0F;
pub(crate) const FD_TSEG2_MASK: u64 = 0x0F;
pub(crate) const FD_TSEG1_MASK: u64 = 0x1F;
pub(crate) const FD_TQ_MASK: u64 = 0xFFFF;
pub(crate) const FD_TDCO_MASK: u64 = 0x7F;

/// Largest prescaler accepted by either phase (13-bit field on the controller).
pub const MAX_PRESCALER: u32 = 0x1FFF;

use std::time::{SystemTime, UNIX_EPOCH};
use crate::constants::MAX_FRAME_SIZE;

/// Payload sizes a CAN-FD frame longer than 8 bytes is padded to.
const FD_LENGTHS: [usize; 7] = [12, 16, 20, 24, 32, 48, 64];

/// Length a payload of `length` bytes occupies on the bus, `None` when it does not fit.
#[inline]
pub fn can_dlc(length: usize, fd: bool) -> Option<usize> {
    match (length, fd) {
        (..=MAX_FRAME_SIZE, _) => Some(length),
        (_, true) => FD_LENGTHS.iter().copied().find(|&v| length <= v),
        (_, false) => None,
    }
}

/// Native timeout argument: `None` blocks forever (-1), `Some(0)` polls.
#[inline]
pub fn native_timeout(timeout: Option<u32>) -> i32 {
    match timeout {
        Some(v) => i32::try_from(v).unwrap_or(i32::MAX),
        None => -1,
    }
}

/// Milliseconds since the Unix epoch, the unit received frames are stamped in.
pub fn system_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|v| u64::try_from(v.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or_else(|e| {
            log::warn!("ITICAN - system clock is before the epoch: {}", e);
            0
        })
}

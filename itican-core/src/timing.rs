//! Bit-timing codec for the controller's packed 64-bit timing registers.
//!
//! Both phases are described with arithmetic values (no minus-one) and a
//! prescaler. The controller does not store the prescaler itself but a time
//! quantum in nanoseconds, `prescaler * 1000 / clock_mhz` truncated toward
//! zero, so the prescaler can only be re-derived approximately from a decoded
//! register.
//!
//! Arbitration register:
//!
//! ```text
//! 63          32 31  29        23     16 15     8 7      0
//! |     tq     | 1 0 1 | ...  |  sjw   | tseg1-1 | tseg2-1 |
//! ```
//!
//! Data-phase register:
//!
//! ```text
//! 55   46    40      31  29 28     13 12     8 7      4 3     0
//! |tdc| tdco-1 | ... |1 0 1|   tq    | tseg1-1 | tseg2-1 | sjw-1 |
//! ```

use std::fmt::{Display, Formatter};
use derive_getters::Getters;
use serde::{Deserialize, Serialize};
use crate::constants::*;
use crate::error::CanError;

/// Arbitration phase timing, arithmetic values.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Getters)]
pub struct ArbitrationTiming {
    #[getter(copy)]
    prescaler: u32,
    #[getter(copy)]
    tseg1: u32,
    #[getter(copy)]
    tseg2: u32,
    #[getter(copy)]
    sjw: u32,
}

impl ArbitrationTiming {
    pub fn new(prescaler: u32, tseg1: u32, tseg2: u32, sjw: u32) -> Self {
        Self { prescaler, tseg1, tseg2, sjw }
    }
}

/// Data phase timing, arithmetic values. A `tdc_offset` of zero disables
/// transmitter delay compensation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Getters)]
pub struct DataTiming {
    #[getter(copy)]
    prescaler: u32,
    #[getter(copy)]
    tseg1: u32,
    #[getter(copy)]
    tseg2: u32,
    #[getter(copy)]
    sjw: u32,
    #[serde(default)]
    #[getter(copy)]
    tdc_offset: u32,
}

impl DataTiming {
    pub fn new(prescaler: u32, tseg1: u32, tseg2: u32, sjw: u32, tdc_offset: u32) -> Self {
        Self { prescaler, tseg1, tseg2, sjw, tdc_offset }
    }

    #[inline]
    pub fn tdc_enabled(&self) -> bool {
        self.tdc_offset > 0
    }
}

/// Timing fields recovered from a register value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Getters)]
pub struct DecodedTiming {
    /// time quantum in nanoseconds
    #[getter(copy)]
    time_quantum: u64,
    #[getter(copy)]
    tseg1: u32,
    #[getter(copy)]
    tseg2: u32,
    #[getter(copy)]
    sjw: u32,
    /// `Some` for data-phase registers only; `Some(0)` means TDC disabled.
    #[getter(copy)]
    tdc_offset: Option<u32>,
}

impl DecodedTiming {
    /// Best-effort prescaler, rounded up. Exact whenever the clock is below 1 GHz,
    /// but the truncation in the quantum makes this a lossy inverse in general.
    #[inline]
    pub fn approx_prescaler(&self, clock_mhz: u64) -> u64 {
        (self.time_quantum * clock_mhz).div_ceil(1000)
    }

    #[inline]
    pub fn bit_time_ns(&self) -> u64 {
        self.time_quantum * (1 + self.tseg1 as u64 + self.tseg2 as u64)
    }

    /// Nominal bit rate in bit/s derived from the truncated quantum.
    #[inline]
    pub fn bitrate(&self) -> u64 {
        match self.bit_time_ns() {
            0 => 0,
            ns => 1_000_000_000 / ns,
        }
    }
}

impl Display for DecodedTiming {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "tq={} tseg1={} tseg2={} sjw={}", self.time_quantum, self.tseg1, self.tseg2, self.sjw)?;
        if let Some(offset) = self.tdc_offset {
            write!(f, " tdco={}", offset)?;
        }
        Ok(())
    }
}

/// Stateless encoder/decoder bound to one controller clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimingCodec {
    clock_mhz: u64,
}

impl Default for TimingCodec {
    fn default() -> Self {
        Self { clock_mhz: CAN_CLOCK_MHZ }
    }
}

impl TimingCodec {
    pub fn new(clock_mhz: u64) -> Result<Self, CanError> {
        if clock_mhz == 0 {
            return Err(CanError::invalid_timing("clock frequency must be positive"));
        }
        Ok(Self { clock_mhz })
    }

    #[inline]
    pub fn clock_mhz(&self) -> u64 {
        self.clock_mhz
    }

    /// `prescaler * 1000 / clock`, truncated.
    pub fn time_quantum(&self, prescaler: u32) -> Result<u64, CanError> {
        check_range("prescaler", prescaler, 1, MAX_PRESCALER)?;
        match prescaler as u64 * 1000 / self.clock_mhz {
            0 => Err(CanError::invalid_timing(format!(
                "prescaler {} yields a zero time quantum at {} MHz", prescaler, self.clock_mhz
            ))),
            tq => Ok(tq),
        }
    }

    pub fn encode_arbitration(&self, timing: &ArbitrationTiming) -> Result<u64, CanError> {
        check_range("tseg1", timing.tseg1, 1, ARB_SEG_MASK as u32 + 1)?;
        check_range("tseg2", timing.tseg2, 1, ARB_SEG_MASK as u32 + 1)?;
        check_range("sjw", timing.sjw, 1, ARB_SEG_MASK as u32)?;
        let tq = self.time_quantum(timing.prescaler)?;
        if tq > ARB_TQ_MASK {
            return Err(CanError::invalid_timing(format!("time quantum {} exceeds 32 bits", tq)));
        }

        Ok(TIMING_BASE
            | tq << ARB_TQ_SHIFT
            | (timing.sjw as u64) << ARB_SJW_SHIFT
            | (timing.tseg1 as u64 - 1) << ARB_TSEG1_SHIFT
            | (timing.tseg2 as u64 - 1) << ARB_TSEG2_SHIFT)
    }

    pub fn encode_fd(&self, timing: &DataTiming) -> Result<u64, CanError> {
        check_range("data tseg1", timing.tseg1, 1, FD_TSEG1_MASK as u32 + 1)?;
        check_range("data tseg2", timing.tseg2, 1, FD_TSEG2_MASK as u32 + 1)?;
        check_range("data sjw", timing.sjw, 1, FD_SJW_MASK as u32 + 1)?;
        check_range("tdc offset", timing.tdc_offset, 0, FD_TDCO_MASK as u32 + 1)?;
        let tq = self.time_quantum(timing.prescaler)?;
        if tq > FD_TQ_MASK {
            return Err(CanError::invalid_timing(format!("data time quantum {} exceeds 16 bits", tq)));
        }

        let tdc = match timing.tdc_offset {
            0 => 0,
            offset => FD_TDC_ENABLE | (offset as u64 - 1) << FD_TDCO_SHIFT,
        };

        Ok(TIMING_BASE
            | tdc
            | tq << FD_TQ_SHIFT
            | (timing.tseg1 as u64 - 1) << FD_TSEG1_SHIFT
            | (timing.tseg2 as u64 - 1) << FD_TSEG2_SHIFT
            | (timing.sjw as u64 - 1) << FD_SJW_SHIFT)
    }

    pub fn decode_arbitration(&self, value: u64) -> Result<DecodedTiming, CanError> {
        check_base(value)?;
        Ok(DecodedTiming {
            time_quantum: (value >> ARB_TQ_SHIFT) & ARB_TQ_MASK,
            tseg1: ((value >> ARB_TSEG1_SHIFT) & ARB_SEG_MASK) as u32 + 1,
            tseg2: ((value >> ARB_TSEG2_SHIFT) & ARB_SEG_MASK) as u32 + 1,
            sjw: ((value >> ARB_SJW_SHIFT) & ARB_SEG_MASK) as u32,
            tdc_offset: None,
        })
    }

    pub fn decode_fd(&self, value: u64) -> Result<DecodedTiming, CanError> {
        check_base(value)?;
        let tdc_offset = match value & FD_TDC_ENABLE {
            0 => 0,
            _ => ((value >> FD_TDCO_SHIFT) & FD_TDCO_MASK) as u32 + 1,
        };

        Ok(DecodedTiming {
            time_quantum: (value >> FD_TQ_SHIFT) & FD_TQ_MASK,
            tseg1: ((value >> FD_TSEG1_SHIFT) & FD_TSEG1_MASK) as u32 + 1,
            tseg2: ((value >> FD_TSEG2_SHIFT) & FD_TSEG2_MASK) as u32 + 1,
            sjw: ((value >> FD_SJW_SHIFT) & FD_SJW_MASK) as u32 + 1,
            tdc_offset: Some(tdc_offset),
        })
    }
}

/// Render register values the way the controller reports custom bit rates: `ARB[,DATA]` in upper hex.
pub fn format_custom(arbitration: u64, data: Option<u64>) -> String {
    match data {
        Some(data) => format!("{:X},{:X}", arbitration, data),
        None => format!("{:X}", arbitration),
    }
}

pub fn parse_custom(value: &str) -> Result<(u64, Option<u64>), CanError> {
    let parse = |s: &str| {
        let s = s.trim();
        let s = s.strip_prefix("0x")
            .or_else(|| s.strip_prefix("0X"))
            .unwrap_or(s);
        u64::from_str_radix(s, 16)
            .map_err(|e| CanError::invalid_timing(format!("`{}`: {}", s, e)))
    };

    match value.split_once(',') {
        Some((arb, data)) => Ok((parse(arb)?, Some(parse(data)?))),
        None => Ok((parse(value)?, None)),
    }
}

#[inline]
fn check_range(name: &str, value: u32, min: u32, max: u32) -> Result<(), CanError> {
    if value < min || value > max {
        return Err(CanError::invalid_timing(format!(
            "{} = {} out of range {}..={}", name, value, min, max
        )));
    }
    Ok(())
}

#[inline]
fn check_base(value: u64) -> Result<(), CanError> {
    // bits 29..=31 hold the marker in both layouts
    if value & 0xE000_0000 != TIMING_BASE {
        return Err(CanError::invalid_timing(format!("{:#X} is not a custom timing register", value)));
    }
    Ok(())
}

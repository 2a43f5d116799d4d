use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use itican_core::{Capability, CanMessage, ChannelHandle, Controller, Direct, OpenMode, OpenType, Phase, SettingsScope, TxMode};
use itican_core::error::CanError;
use itican_core::utils::system_timestamp;

/// 500 kbit/s, prescaler 4, tseg1 34, tseg2 5, sjw 4.
pub const DEFAULT_ARBITRATION: u64 = 0x32_A004_2104;
/// 2 Mbit/s, prescaler 2, tseg1 15, tseg2 4, sjw 4, tdc offset 16.
pub const DEFAULT_DATA: u64 = (1 << 55) | (15 << 40) | 0xA000_0000 | (25 << 13) | (14 << 8) | (3 << 4) | 3;

pub const ERR_NOT_OPEN: i32 = -1;
pub const ERR_ALREADY_OPEN: i32 = -2;
pub const ERR_TIMEOUT: i32 = -3;
pub const ERR_FRAME_TYPE: i32 = -4;
pub const ERR_BAD_HANDLE: i32 = -5;

#[derive(Debug, Default)]
struct VirtualChannel {
    open: Option<OpenType>,
    written: HashMap<Phase, u64>,
    active: HashMap<Phase, u64>,
    persistent: HashMap<Phase, u64>,
    rx: VecDeque<CanMessage>,
    echo: bool,
    termination: bool,
    blinking: bool,
    bus_error_report: bool,
    tx_mode: TxMode,
    tx_timing: HashMap<u32, u32>,
}

impl VirtualChannel {
    fn new() -> Self {
        let registers = HashMap::from([
            (Phase::Arbitration, DEFAULT_ARBITRATION),
            (Phase::Data, DEFAULT_DATA),
        ]);
        Self {
            written: registers.clone(),
            active: registers.clone(),
            persistent: registers,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct VirtualBus {
    channels: HashMap<String, VirtualChannel>,
    order: Vec<String>,
    handles: Vec<Option<String>>,
}

impl VirtualBus {
    fn name(&self, handle: ChannelHandle) -> Result<String, CanError> {
        self.handles.get(handle.index() as usize)
            .and_then(|v| v.clone())
            .ok_or_else(|| io_failure(ERR_BAD_HANDLE))
    }

    fn channel(&mut self, handle: ChannelHandle) -> Result<(String, &mut VirtualChannel), CanError> {
        let name = self.name(handle)?;
        match self.channels.get_mut(&name) {
            Some(channel) => Ok((name, channel)),
            None => Err(io_failure(ERR_BAD_HANDLE)),
        }
    }
}

/// In-memory CAN bus shared by a fixed set of channels.
///
/// A frame sent on one open channel is delivered to every other open channel,
/// and to the sender too when echo is enabled. Registers written through
/// [`Controller::write_timing_register`] only become active on apply.
#[derive(Debug)]
pub struct VirtualController {
    bus: Mutex<VirtualBus>,
    arrived: Condvar,
    capabilities: HashSet<Capability>,
}

impl Default for VirtualController {
    fn default() -> Self {
        Self::new(["VCAN0", "VCAN1"])
    }
}

impl VirtualController {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut bus = VirtualBus::default();
        for name in names {
            let name = name.into();
            bus.channels.insert(name.clone(), VirtualChannel::new());
            bus.order.push(name);
        }

        Self {
            bus: Mutex::new(bus),
            arrived: Condvar::new(),
            capabilities: HashSet::from([
                Capability::EchoMessage,
                Capability::Blink,
                Capability::TxMode(TxMode::Normal),
            ]),
        }
    }

    pub fn with_capability(mut self, capability: Capability) -> Self {
        self.capabilities.insert(capability);
        self
    }

    pub fn without_capability(mut self, capability: Capability) -> Self {
        self.capabilities.remove(&capability);
        self
    }

    /// Register value stored in the simulated non-volatile memory.
    pub fn persistent_register(&self, name: &str, phase: Phase) -> Option<u64> {
        self.bus().ok()?
            .channels.get(name)
            .and_then(|c| c.persistent.get(&phase).copied())
    }

    /// Register value the simulated controller currently runs with.
    pub fn active_register(&self, name: &str, phase: Phase) -> Option<u64> {
        self.bus().ok()?
            .channels.get(name)
            .and_then(|c| c.active.get(&phase).copied())
    }

    pub fn tx_timing(&self, name: &str, id: u32) -> Option<u32> {
        self.bus().ok()?
            .channels.get(name)
            .and_then(|c| c.tx_timing.get(&id).copied())
    }

    /// Put a frame on the bus as if another node had sent it.
    pub fn inject(&self, name: &str, frame: CanMessage) -> Result<(), CanError> {
        let mut bus = self.bus()?;
        let channel = bus.channels.get_mut(name)
            .ok_or_else(|| CanError::channel_not_found(name))?;
        channel.rx.push_back(frame);
        self.arrived.notify_all();
        Ok(())
    }

    #[inline]
    fn bus(&self) -> Result<MutexGuard<'_, VirtualBus>, CanError> {
        self.bus.lock()
            .map_err(|e| CanError::OtherError(e.to_string()))
    }

    #[inline]
    fn supports(&self, capability: Capability) -> Result<(), CanError> {
        if self.capabilities.contains(&capability) {
            Ok(())
        }
        else {
            Err(CanError::unsupported_feature(capability.to_string()))
        }
    }
}

impl Controller for VirtualController {
    fn enumerate_channels(&self) -> Result<Vec<String>, CanError> {
        Ok(self.bus()?.order.clone())
    }

    fn bind(&self, name: &str) -> Result<ChannelHandle, CanError> {
        let mut bus = self.bus()?;
        if !bus.channels.contains_key(name) {
            return Err(CanError::channel_not_found(name));
        }
        if bus.handles.iter().flatten().any(|v| v == name) {
            return Err(CanError::channel_busy(name));
        }

        let index = match bus.handles.iter().position(Option::is_none) {
            Some(index) => {
                bus.handles[index] = Some(name.to_owned());
                index
            },
            None => {
                bus.handles.push(Some(name.to_owned()));
                bus.handles.len() - 1
            }
        };
        Ok(ChannelHandle::new(index as u32))
    }

    fn unbind(&self, handle: ChannelHandle) {
        match self.bus() {
            Ok(mut bus) => {
                if let Some(slot) = bus.handles.get_mut(handle.index() as usize) {
                    slot.take();
                }
            },
            Err(e) => log::warn!("{}", e),
        }
    }

    fn open(&self, handle: ChannelHandle, open_type: OpenType, mode: OpenMode) -> Result<(), CanError> {
        if mode != OpenMode::Normal {
            return Err(CanError::UnsupportedMode(format!("{:?}", mode)));
        }
        let mut bus = self.bus()?;
        let (_, channel) = bus.channel(handle)?;
        if channel.open.is_some() {
            return Err(io_failure(ERR_ALREADY_OPEN));
        }
        channel.open = Some(open_type);
        channel.rx.clear();
        Ok(())
    }

    fn close(&self, handle: ChannelHandle) -> Result<(), CanError> {
        let mut bus = self.bus()?;
        let (_, channel) = bus.channel(handle)?;
        match channel.open.take() {
            Some(_) => {
                // the written registers fall back to what the device runs with
                channel.written = channel.active.clone();
                Ok(())
            },
            None => Err(io_failure(ERR_NOT_OPEN)),
        }
    }

    fn write_timing_register(&self, handle: ChannelHandle, phase: Phase, value: u64) -> Result<(), CanError> {
        let mut bus = self.bus()?;
        let (_, channel) = bus.channel(handle)?;
        channel.written.insert(phase, value);
        Ok(())
    }

    fn read_timing_register(&self, handle: ChannelHandle, phase: Phase) -> Result<u64, CanError> {
        let mut bus = self.bus()?;
        let (_, channel) = bus.channel(handle)?;
        channel.written.get(&phase)
            .copied()
            .ok_or_else(|| io_failure(ERR_BAD_HANDLE))
    }

    fn apply_settings(&self, handle: ChannelHandle, scope: SettingsScope) -> Result<(), CanError> {
        let mut bus = self.bus()?;
        let (_, channel) = bus.channel(handle)?;
        channel.active = channel.written.clone();
        if scope == SettingsScope::Persistent {
            channel.persistent = channel.written.clone();
        }
        Ok(())
    }

    fn transmit(&self, handle: ChannelHandle, frame: &CanMessage, _: Option<u32>) -> Result<(), CanError> {
        let mut bus = self.bus()?;
        let (name, channel) = bus.channel(handle)?;
        let open_type = channel.open.ok_or_else(|| io_failure(ERR_NOT_OPEN))?;
        if frame.is_can_fd() && open_type == OpenType::Classic_CAN {
            return Err(io_failure(ERR_FRAME_TYPE));
        }
        let echo = channel.echo;

        let timestamp = system_timestamp();
        let VirtualBus { channels, .. } = &mut *bus;
        for (target, channel) in channels.iter_mut() {
            let own = *target == name;
            let accepts = match channel.open {
                Some(t) => !frame.is_can_fd() || t != OpenType::Classic_CAN,
                None => false,
            };
            if !accepts || (own && !echo) {
                continue;
            }

            let mut frame = frame.clone();
            frame.set_timestamp(Some(timestamp))
                .set_direct(Direct::Receive)
                .set_transmitted(own)
                .set_channel(target.as_str());
            channel.rx.push_back(frame);
        }

        self.arrived.notify_all();
        Ok(())
    }

    fn receive(&self, handle: ChannelHandle, timeout: Option<u32>) -> Result<CanMessage, CanError> {
        let deadline = timeout.map(|ms| Instant::now() + Duration::from_millis(ms as u64));
        let mut bus = self.bus()?;
        loop {
            let (name, channel) = bus.channel(handle)?;
            if channel.open.is_none() {
                return Err(io_failure(ERR_NOT_OPEN));
            }
            if let Some(frame) = channel.rx.pop_front() {
                return Ok(frame);
            }

            bus = match deadline {
                None => self.arrived.wait(bus)
                    .map_err(|e| CanError::OtherError(e.to_string()))?,
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return Err(CanError::TimeoutError { channel: name, code: ERR_TIMEOUT });
                    }
                    self.arrived.wait_timeout(bus, deadline - now)
                        .map_err(|e| CanError::OtherError(e.to_string()))?
                        .0
                },
            };
        }
    }

    fn pending_frames(&self, handle: ChannelHandle) -> Result<usize, CanError> {
        let mut bus = self.bus()?;
        let (_, channel) = bus.channel(handle)?;
        Ok(channel.rx.len())
    }

    fn query_capability(&self, handle: ChannelHandle, capability: Capability) -> Result<bool, CanError> {
        self.bus()?.name(handle)?;
        Ok(self.capabilities.contains(&capability))
    }

    fn capability_enabled(&self, handle: ChannelHandle, capability: Capability) -> Result<bool, CanError> {
        self.supports(capability)?;
        let mut bus = self.bus()?;
        let (_, channel) = bus.channel(handle)?;
        match capability {
            Capability::Termination => Ok(channel.termination),
            Capability::EchoMessage => Ok(channel.echo),
            Capability::Blink => Ok(channel.blinking),
            Capability::BusErrorReport => Ok(channel.bus_error_report),
            Capability::TxMode(mode) => Ok(channel.tx_mode == mode),
        }
    }

    fn set_capability(&self, handle: ChannelHandle, capability: Capability, enable: bool) -> Result<(), CanError> {
        self.supports(capability)?;
        let mut bus = self.bus()?;
        let (_, channel) = bus.channel(handle)?;
        match capability {
            Capability::Termination => channel.termination = enable,
            Capability::EchoMessage => channel.echo = enable,
            Capability::Blink => channel.blinking = enable,
            Capability::BusErrorReport => channel.bus_error_report = enable,
            Capability::TxMode(mode) => channel.tx_mode = if enable { mode } else { TxMode::Normal },
        }
        Ok(())
    }

    fn set_tx_timing(&self, handle: ChannelHandle, id: u32, period_ms: u32) -> Result<(), CanError> {
        let mut bus = self.bus()?;
        let (_, channel) = bus.channel(handle)?;
        if channel.tx_mode == TxMode::Normal {
            return Err(CanError::unsupported_feature("tx timing in normal tx mode"));
        }
        channel.tx_timing.insert(id, period_ms);
        Ok(())
    }

    fn last_error_text(&self, code: i32) -> String {
        error_text(code).to_owned()
    }
}

fn error_text(code: i32) -> &'static str {
    match code {
        0 => "success",
        ERR_NOT_OPEN => "channel is not open",
        ERR_ALREADY_OPEN => "channel is already open",
        ERR_TIMEOUT => "receive timeout",
        ERR_FRAME_TYPE => "frame type is not enabled on this channel",
        ERR_BAD_HANDLE => "invalid channel handle",
        _ => "unknown error",
    }
}

#[inline]
fn io_failure(code: i32) -> CanError {
    CanError::IoFailure { code, reason: error_text(code).to_owned() }
}

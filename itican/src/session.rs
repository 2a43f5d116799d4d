use std::collections::{HashMap, HashSet};
use std::fmt::{Display, Formatter};
use std::sync::{Arc, Mutex, MutexGuard};
use itican_core::{Capability, CanMessage, ChannelConfig, ChannelHandle, Controller, Direct, OpenMode, OpenType, Phase, SettingsScope, TxMode};
use itican_core::error::{describe, CanError};
use itican_core::timing::{ArbitrationTiming, DataTiming, DecodedTiming, TimingCodec};
use itican_core::utils::system_timestamp;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelState {
    #[default]
    Unbound,
    Discovered,
    Open,
    /// terminal, the binding is released.
    Closed,
}

impl Display for ChannelState {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unbound => f.write_str("Unbound"),
            Self::Discovered => f.write_str("Discovered"),
            Self::Open => f.write_str("Open"),
            Self::Closed => f.write_str("Closed"),
        }
    }
}

#[derive(Debug, Default)]
struct Registry {
    bound: HashSet<String>,
    /// dropped while open, still bound until [`ItiCan::close_abandoned`].
    abandoned: HashMap<String, ChannelHandle>,
}

type SharedRegistry = Arc<Mutex<Registry>>;

#[inline]
fn lock_registry(registry: &SharedRegistry) -> Result<MutexGuard<'_, Registry>, CanError> {
    registry.lock()
        .map_err(|e| CanError::OtherError(e.to_string()))
}

/// Entry point: channel discovery, session creation and stateless error lookup.
pub struct ItiCan<C: Controller> {
    controller: Arc<C>,
    registry: SharedRegistry,
    codec: TimingCodec,
}

impl<C: Controller> Clone for ItiCan<C> {
    fn clone(&self) -> Self {
        Self {
            controller: Arc::clone(&self.controller),
            registry: Arc::clone(&self.registry),
            codec: self.codec,
        }
    }
}

impl<C: Controller> ItiCan<C> {
    pub fn new(controller: C) -> Self {
        Self::with_codec(controller, Default::default())
    }

    pub fn with_codec(controller: C, codec: TimingCodec) -> Self {
        Self {
            controller: Arc::new(controller),
            registry: Default::default(),
            codec,
        }
    }

    #[inline]
    pub fn controller(&self) -> &C {
        &self.controller
    }

    #[inline]
    pub fn codec(&self) -> TimingCodec {
        self.codec
    }

    pub fn find_all_channels(&self) -> Result<Vec<String>, CanError> {
        self.controller.enumerate_channels()
    }

    /// A fresh session in `Unbound` state.
    pub fn session(&self) -> ChannelSession<C> {
        ChannelSession {
            controller: Arc::clone(&self.controller),
            registry: Arc::clone(&self.registry),
            codec: self.codec,
            context: Default::default(),
        }
    }

    /// A session already bound to `name`.
    pub fn get_channel(&self, name: &str) -> Result<ChannelSession<C>, CanError> {
        let session = self.session();
        session.discover(name)?;
        Ok(session)
    }

    /// Discover `name`, apply its configuration and open it.
    pub fn open_configured(&self, name: &str, cfg: &ChannelConfig) -> Result<ChannelSession<C>, CanError> {
        let session = self.get_channel(name)?;
        session.init_with(cfg)?;
        Ok(session)
    }

    /// Describe any error code: local codes first, then the controller's own table.
    pub fn error_text(&self, code: i32) -> String {
        match describe(code) {
            Some(v) => v.to_owned(),
            None => self.controller.last_error_text(code),
        }
    }

    /// Names currently bound by a session of this hub, abandoned ones included.
    pub fn bound_channels(&self) -> Vec<String> {
        match self.registry.lock() {
            Ok(registry) => {
                let mut names: Vec<_> = registry.bound.iter().cloned().collect();
                names.sort();
                names
            },
            Err(e) => {
                log::warn!("ITICAN - {}", e);
                Default::default()
            }
        }
    }

    /// Channels whose session was dropped while open.
    pub fn abandoned_channels(&self) -> Vec<String> {
        match self.registry.lock() {
            Ok(registry) => {
                let mut names: Vec<_> = registry.abandoned.keys().cloned().collect();
                names.sort();
                names
            },
            Err(e) => {
                log::warn!("ITICAN - {}", e);
                Default::default()
            }
        }
    }

    /// Close a channel left open by a dropped session and release its name.
    pub fn close_abandoned(&self, name: &str) -> Result<(), CanError> {
        let handle = {
            let mut registry = lock_registry(&self.registry)?;
            match registry.abandoned.remove(name) {
                Some(handle) => handle,
                None if registry.bound.contains(name) => return Err(CanError::channel_busy(name)),
                None => return Err(CanError::invalid_state(name, ChannelState::Unbound, "close_abandoned")),
            }
        };

        if let Err(e) = self.controller.close(handle) {
            // still open, keep it held for another attempt
            lock_registry(&self.registry)?.abandoned.insert(name.to_owned(), handle);
            return Err(e);
        }

        log::info!("ITICAN - closing abandoned CAN channel: {}", name);
        self.controller.unbind(handle);
        lock_registry(&self.registry)?.bound.remove(name);
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ChannelContext {
    state: ChannelState,
    handle: Option<ChannelHandle>,
    name: String,
    open_type: OpenType,
    open_mode: OpenMode,
    arbitration: Option<u64>,
    data: Option<u64>,
    last_error: i32,
}

impl ChannelContext {
    #[inline]
    fn record<T>(&mut self, result: Result<T, CanError>) -> Result<T, CanError> {
        if let Err(e) = &result {
            self.last_error = e.code();
        }
        result
    }

    fn expect_state(&mut self, allowed: &[ChannelState], operation: &'static str) -> Result<ChannelHandle, CanError> {
        let result = match self.handle {
            Some(handle) if allowed.contains(&self.state) => Ok(handle),
            _ => Err(CanError::invalid_state(self.name.as_str(), self.state, operation)),
        };
        self.record(result)
    }

    #[inline]
    fn expect_open(&mut self, operation: &'static str) -> Result<ChannelHandle, CanError> {
        self.expect_state(&[ChannelState::Open], operation)
    }

    #[inline]
    fn expect_bound(&mut self, operation: &'static str) -> Result<ChannelHandle, CanError> {
        self.expect_state(&[ChannelState::Discovered, ChannelState::Open], operation)
    }
}

/// One hardware channel.
///
/// Every controller call is issued with the session lock held, so a channel
/// never has more than one send, receive or configuration call in flight.
/// Dropping a session releases its binding, unless the channel is still open:
/// an open channel is not closed and stays held until [`ItiCan::close_abandoned`].
pub struct ChannelSession<C: Controller> {
    controller: Arc<C>,
    registry: SharedRegistry,
    codec: TimingCodec,
    context: Mutex<ChannelContext>,
}

impl<C: Controller> ChannelSession<C> {
    #[inline]
    fn context(&self) -> Result<MutexGuard<'_, ChannelContext>, CanError> {
        self.context.lock()
            .map_err(|e| CanError::OtherError(e.to_string()))
    }

    fn release_name(&self, name: &str) {
        match self.registry.lock() {
            Ok(mut registry) => { registry.bound.remove(name); },
            Err(e) => log::warn!("ITICAN - {}", e),
        }
    }

    pub fn state(&self) -> ChannelState {
        match self.context.lock() {
            Ok(ctx) => ctx.state,
            Err(e) => e.get_ref().state,
        }
    }

    pub fn name(&self) -> Option<String> {
        match self.context.lock() {
            Ok(ctx) if !ctx.name.is_empty() => Some(ctx.name.clone()),
            _ => None,
        }
    }

    pub fn handle(&self) -> Option<ChannelHandle> {
        self.context.lock().ok().and_then(|ctx| ctx.handle)
    }

    pub fn open_type(&self) -> Option<OpenType> {
        match self.context.lock() {
            Ok(ctx) if ctx.state == ChannelState::Open => Some(ctx.open_type),
            _ => None,
        }
    }

    /// Code of the last failed operation, `0` if nothing failed yet.
    pub fn last_error_code(&self) -> i32 {
        match self.context.lock() {
            Ok(ctx) => ctx.last_error,
            Err(e) => e.get_ref().last_error,
        }
    }

    /// Bind the session to the channel called `name`.
    pub fn discover(&self, name: &str) -> Result<(), CanError> {
        let mut ctx = self.context()?;
        if ctx.state != ChannelState::Unbound {
            let result = Err(CanError::invalid_state(ctx.name.as_str(), ctx.state, "discover"));
            return ctx.record(result);
        }

        let channels = ctx.record(self.controller.enumerate_channels())?;
        if !channels.iter().any(|v| v == name) {
            return ctx.record(Err(CanError::channel_not_found(name)));
        }

        let claimed = lock_registry(&self.registry)
            .map(|mut registry| registry.bound.insert(name.to_owned()));
        if !ctx.record(claimed)? {
            return ctx.record(Err(CanError::channel_busy(name)));
        }

        match self.controller.bind(name) {
            Ok(handle) => {
                log::info!("ITICAN - channel: {} discovered, handle {}", name, handle);
                ctx.handle = Some(handle);
                ctx.name = name.to_owned();
                ctx.state = ChannelState::Discovered;
                Ok(())
            },
            Err(e) => {
                self.release_name(name);
                ctx.record(Err(e))
            }
        }
    }

    pub fn open(&self, open_type: OpenType, mode: OpenMode) -> Result<(), CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_state(&[ChannelState::Discovered], "open")?;
        match mode {
            OpenMode::Normal => {},
            OpenMode::Listen | OpenMode::Loopback => {
                return ctx.record(Err(CanError::UnsupportedMode(format!("{:?}", mode))));
            },
        }
        if open_type == OpenType::FD_CAN_NO_ISO {
            return ctx.record(Err(CanError::unsupported_feature("non-ISO CAN-FD")));
        }

        ctx.record(self.controller.open(handle, open_type, mode))?;
        log::info!("ITICAN - channel: {} opened as {:?}", ctx.name, open_type);
        ctx.open_type = open_type;
        ctx.open_mode = mode;
        ctx.state = ChannelState::Open;
        Ok(())
    }

    /// Close the channel and release its binding; the session is terminal afterwards.
    pub fn close(&self) -> Result<(), CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_open("close")?;
        ctx.record(self.controller.close(handle))?;

        log::info!("ITICAN - closing CAN channel: {}", ctx.name);
        self.controller.unbind(handle);
        self.release_name(&ctx.name);
        ctx.handle = None;
        ctx.state = ChannelState::Closed;
        Ok(())
    }

    /// Stage a raw arbitration value: a nominal bit rate or a custom timing register.
    pub fn set_baud_rate(&self, value: u64) -> Result<(), CanError> {
        let mut ctx = self.context()?;
        ctx.expect_bound("set_baud_rate")?;
        let result = self.check_raw(value, Phase::Arbitration);
        ctx.record(result)?;
        log::debug!("ITICAN - channel: {} staged arbitration {:#X}", ctx.name, value);
        ctx.arbitration = Some(value);
        Ok(())
    }

    pub fn set_custom_baud_rate(&self, timing: &ArbitrationTiming) -> Result<(), CanError> {
        let mut ctx = self.context()?;
        ctx.expect_bound("set_custom_baud_rate")?;
        let value = ctx.record(self.codec.encode_arbitration(timing))?;
        log::debug!("ITICAN - channel: {} staged arbitration {:?} as {:#X}", ctx.name, timing, value);
        ctx.arbitration = Some(value);
        Ok(())
    }

    /// Stage a raw data phase value: a nominal bit rate or a custom timing register.
    pub fn set_fd_baud_rate(&self, value: u64) -> Result<(), CanError> {
        let mut ctx = self.context()?;
        ctx.expect_bound("set_fd_baud_rate")?;
        let result = self.check_raw(value, Phase::Data);
        ctx.record(result)?;
        log::debug!("ITICAN - channel: {} staged data phase {:#X}", ctx.name, value);
        ctx.data = Some(value);
        Ok(())
    }

    pub fn set_custom_fd_baud_rate(&self, timing: &DataTiming) -> Result<(), CanError> {
        let mut ctx = self.context()?;
        ctx.expect_bound("set_custom_fd_baud_rate")?;
        let value = ctx.record(self.codec.encode_fd(timing))?;
        log::debug!("ITICAN - channel: {} staged data phase {:?} as {:#X}", ctx.name, timing, value);
        ctx.data = Some(value);
        Ok(())
    }

    /// Register values waiting for [`ChannelSession::apply_settings`].
    pub fn staged_timing(&self) -> (Option<u64>, Option<u64>) {
        match self.context.lock() {
            Ok(ctx) => (ctx.arbitration, ctx.data),
            Err(_) => (None, None),
        }
    }

    /// Write the staged registers and commit them.
    ///
    /// The staged values are kept, so applying twice writes the same registers twice.
    pub fn apply_settings(&self, scope: SettingsScope) -> Result<(), CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_bound("apply_settings")?;

        if let Some(value) = ctx.arbitration {
            ctx.record(self.controller.write_timing_register(handle, Phase::Arbitration, value))?;
        }
        if let Some(value) = ctx.data {
            ctx.record(self.controller.write_timing_register(handle, Phase::Data, value))?;
        }
        ctx.record(self.controller.apply_settings(handle, scope))?;

        log::info!("ITICAN - channel: {} settings applied ({:?})", ctx.name, scope);
        Ok(())
    }

    pub fn baud_rate(&self) -> Result<u64, CanError> {
        self.read_register(Phase::Arbitration, "baud_rate")
    }

    pub fn fd_baud_rate(&self) -> Result<u64, CanError> {
        self.read_register(Phase::Data, "fd_baud_rate")
    }

    /// Both registers in `ARB[,DATA]` upper hex.
    pub fn custom_baud_rate(&self) -> Result<String, CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_bound("custom_baud_rate")?;
        ctx.record(self.controller.read_custom_timing(handle))
    }

    /// Read a timing register back and decode it.
    pub fn decoded_timing(&self, phase: Phase) -> Result<DecodedTiming, CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_bound("decoded_timing")?;
        let value = ctx.record(self.controller.read_timing_register(handle, phase))?;
        let result = match phase {
            Phase::Arbitration => self.codec.decode_arbitration(value),
            Phase::Data => self.codec.decode_fd(value),
        };
        ctx.record(result)
    }

    /// Stage the timings of `cfg`, apply them if any, then open.
    pub fn init_with(&self, cfg: &ChannelConfig) -> Result<(), CanError> {
        if let Some(timing) = cfg.arbitration() {
            self.set_custom_baud_rate(&timing)?;
        }
        if let Some(timing) = cfg.data() {
            self.set_custom_fd_baud_rate(&timing)?;
        }
        if cfg.arbitration().is_some() || cfg.data().is_some() {
            self.apply_settings(cfg.scope())?;
        }
        self.open(cfg.open_type(), cfg.open_mode())
    }

    /// Queue one frame. The timeout is advisory, the native transport queues frames.
    pub fn send_frame(&self, frame: &CanMessage, timeout: Option<u32>) -> Result<(), CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_open("send_frame")?;
        self.send_locked(&mut ctx, handle, frame, timeout)
    }

    /// Send in order, stopping at the first failure.
    ///
    /// Returns the number of frames queued before the failure together with it;
    /// queued frames are not rolled back.
    pub fn send_frames(&self, frames: &[CanMessage], timeout: Option<u32>) -> (usize, Result<(), CanError>) {
        let mut ctx = match self.context() {
            Ok(v) => v,
            Err(e) => return (0, Err(e)),
        };
        let handle = match ctx.expect_open("send_frames") {
            Ok(v) => v,
            Err(e) => return (0, Err(e)),
        };

        for (count, frame) in frames.iter().enumerate() {
            if let Err(e) = self.send_locked(&mut ctx, handle, frame, timeout) {
                return (count, Err(e));
            }
        }

        (frames.len(), Ok(()))
    }

    /// Wait for one frame, `None` blocks indefinitely and `Some(0)` polls.
    pub fn receive_frame(&self, timeout: Option<u32>) -> Result<CanMessage, CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_open("receive_frame")?;
        self.receive_locked(&mut ctx, handle, timeout)
    }

    /// Receive up to `count` frames in arrival order, stopping at the first failure.
    /// A timeout ends the batch like any other error; the frames already read are kept.
    pub fn receive_frames(&self, count: usize, timeout: Option<u32>) -> (Vec<CanMessage>, Result<(), CanError>) {
        let mut ctx = match self.context() {
            Ok(v) => v,
            Err(e) => return (Vec::new(), Err(e)),
        };
        let handle = match ctx.expect_open("receive_frames") {
            Ok(v) => v,
            Err(e) => return (Vec::new(), Err(e)),
        };

        let mut frames = Vec::with_capacity(count);
        for _ in 0..count {
            match self.receive_locked(&mut ctx, handle, timeout) {
                Ok(frame) => frames.push(frame),
                Err(e) => return (frames, Err(e)),
            }
        }

        (frames, Ok(()))
    }

    /// Frames waiting in the receive queue.
    pub fn pending_frames(&self) -> Result<usize, CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_open("pending_frames")?;
        ctx.record(self.controller.pending_frames(handle))
    }

    pub fn is_termination_supported(&self) -> Result<bool, CanError> {
        self.probe(Capability::Termination)
    }

    pub fn is_echo_supported(&self) -> Result<bool, CanError> {
        self.probe(Capability::EchoMessage)
    }

    pub fn is_blink_supported(&self) -> Result<bool, CanError> {
        self.probe(Capability::Blink)
    }

    pub fn is_tx_mode_supported(&self, mode: TxMode) -> Result<bool, CanError> {
        self.probe(Capability::TxMode(mode))
    }

    pub fn set_termination(&self, enable: bool) -> Result<(), CanError> {
        self.switch(Capability::Termination, enable)
    }

    pub fn is_termination_enabled(&self) -> Result<bool, CanError> {
        self.enabled(Capability::Termination)
    }

    /// Receive the frames this channel sends itself.
    pub fn set_echo_message(&self, enable: bool) -> Result<(), CanError> {
        self.switch(Capability::EchoMessage, enable)
    }

    pub fn is_echo_enabled(&self) -> Result<bool, CanError> {
        self.enabled(Capability::EchoMessage)
    }

    pub fn set_channel_blink(&self, enable: bool) -> Result<(), CanError> {
        self.switch(Capability::Blink, enable)
    }

    pub fn is_channel_blinking(&self) -> Result<bool, CanError> {
        self.enabled(Capability::Blink)
    }

    pub fn set_bus_error_report(&self, enable: bool) -> Result<(), CanError> {
        self.switch(Capability::BusErrorReport, enable)
    }

    pub fn set_tx_mode(&self, mode: TxMode) -> Result<(), CanError> {
        self.switch(Capability::TxMode(mode), true)
    }

    /// Period of an automatically sent frame, used in auto-send and queue modes.
    pub fn set_tx_timing(&self, id: u32, period_ms: u32) -> Result<(), CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_bound("set_tx_timing")?;
        match self.controller.set_tx_timing(handle, id, period_ms) {
            Err(e) if e.is_unsupported() => {
                log::warn!("ITICAN - channel: {} {}, ignored", ctx.name, e);
                Ok(())
            },
            result => ctx.record(result),
        }
    }

    fn check_raw(&self, value: u64, phase: Phase) -> Result<(), CanError> {
        if value == 0 {
            return Err(CanError::invalid_timing(format!("{} bit rate must be positive", phase)));
        }
        // register values carry the marker, anything else is a nominal bit rate
        if value & 0xE000_0000 == itican_core::TIMING_BASE {
            match phase {
                Phase::Arbitration => self.codec.decode_arbitration(value)?,
                Phase::Data => self.codec.decode_fd(value)?,
            };
        }
        Ok(())
    }

    fn read_register(&self, phase: Phase, operation: &'static str) -> Result<u64, CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_bound(operation)?;
        ctx.record(self.controller.read_timing_register(handle, phase))
    }

    fn send_locked(
        &self,
        ctx: &mut ChannelContext,
        handle: ChannelHandle,
        frame: &CanMessage,
        timeout: Option<u32>,
    ) -> Result<(), CanError> {
        if frame.is_can_fd() && ctx.open_type == OpenType::Classic_CAN {
            return ctx.record(Err(CanError::unsupported_feature("CAN-FD frame on a classic channel")));
        }

        log::trace!("ITICAN - channel: {} transmit {:08X} [{}]",
            ctx.name, frame.id().into_bits(), hex::encode(frame.data()));
        ctx.record(self.controller.transmit(handle, frame, timeout))
    }

    fn receive_locked(
        &self,
        ctx: &mut ChannelContext,
        handle: ChannelHandle,
        timeout: Option<u32>,
    ) -> Result<CanMessage, CanError> {
        let mut frame = ctx.record(self.controller.receive(handle, timeout))?;
        if frame.timestamp() == 0 {
            frame.set_timestamp(Some(system_timestamp()));
        }
        if frame.channel().is_empty() {
            frame.set_channel(ctx.name.as_str());
        }
        frame.set_direct(Direct::Receive);

        log::trace!("ITICAN - channel: {} received {:08X} [{}]",
            ctx.name, frame.id().into_bits(), hex::encode(frame.data()));
        Ok(frame)
    }

    fn probe_locked(&self, ctx: &mut ChannelContext, handle: ChannelHandle, capability: Capability) -> Result<bool, CanError> {
        match self.controller.query_capability(handle, capability) {
            Err(e) if e.is_unsupported() => Ok(false),
            result => ctx.record(result),
        }
    }

    fn probe(&self, capability: Capability) -> Result<bool, CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_bound("query_capability")?;
        self.probe_locked(&mut ctx, handle, capability)
    }

    fn enabled(&self, capability: Capability) -> Result<bool, CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_bound("capability_enabled")?;
        if !self.probe_locked(&mut ctx, handle, capability)? {
            return Ok(false);
        }
        match self.controller.capability_enabled(handle, capability) {
            Err(e) if e.is_unsupported() => Ok(false),
            result => ctx.record(result),
        }
    }

    fn switch(&self, capability: Capability, enable: bool) -> Result<(), CanError> {
        let mut ctx = self.context()?;
        let handle = ctx.expect_bound("set_capability")?;
        if !self.probe_locked(&mut ctx, handle, capability)? {
            log::warn!("ITICAN - channel: {} {} not supported, ignored", ctx.name, capability);
            return Ok(());
        }

        match self.controller.set_capability(handle, capability, enable) {
            Err(e) if e.is_unsupported() => {
                log::warn!("ITICAN - channel: {} {}, ignored", ctx.name, e);
                Ok(())
            },
            result => ctx.record(result),
        }
    }
}

impl<C: Controller> Drop for ChannelSession<C> {
    fn drop(&mut self) {
        let ctx = match self.context.get_mut() {
            Ok(v) => v,
            Err(e) => e.into_inner(),
        };
        let Some(handle) = ctx.handle.take() else {
            return;
        };
        let name = std::mem::take(&mut ctx.name);

        if ctx.state == ChannelState::Open {
            log::warn!("ITICAN - channel: {} dropped while open, it stays open and held", name);
            match self.registry.lock() {
                Ok(mut registry) => { registry.abandoned.insert(name, handle); },
                Err(e) => log::warn!("ITICAN - {}", e),
            }
            return;
        }

        self.controller.unbind(handle);
        match self.registry.lock() {
            Ok(mut registry) => { registry.bound.remove(&name); },
            Err(e) => log::warn!("ITICAN - {}", e),
        }
    }
}

use std::sync::{Arc, Mutex};
use dlopen2::symbor::Container;
use itican_core::{Capability, ChannelHandle, Controller, CanMessage, Direct, Id, MessageType, OpenMode, OpenType, Phase, SettingsScope, TxMode};
use itican_core::error::CanError;
use itican_core::utils::native_timeout;
use crate::api::{FlagFunc, ItiCanApi, RawChannel, SwitchFunc};
use crate::constants::{ITICAN_ENV, ITICAN_PATH_DEFAULT, ITICAN_VAR, LIB_NAME};

#[derive(Debug, Clone)]
struct Slot {
    name: String,
    channel: RawChannel,
}

/// Controller backed by the vendor's native library, loaded at runtime.
#[derive(Clone)]
pub struct ItiCanLibrary {
    api: Arc<Container<ItiCanApi<'static>>>,
    slots: Arc<Mutex<Vec<Option<Slot>>>>,
}

impl ItiCanLibrary {
    /// Load the library from the directory named by `ITICAN_LIBRARY` in `itican.env`,
    /// `library/` when unset.
    pub fn new() -> Result<Self, CanError> {
        let libpath = match dotenvy::from_filename(ITICAN_ENV) {
            Ok(_) => match std::env::var(ITICAN_VAR) {
                Ok(v) => format!("{}/{}", v, LIB_NAME),
                Err(_) => format!("{}/{}", ITICAN_PATH_DEFAULT, LIB_NAME),
            },
            Err(_) => format!("{}/{}", ITICAN_PATH_DEFAULT, LIB_NAME),
        };

        Self::load(libpath)
    }

    pub fn load<S: AsRef<str>>(libpath: S) -> Result<Self, CanError> {
        let libpath = libpath.as_ref();
        log::info!("ITICAN - loading library: {}", libpath);
        let api = unsafe { Container::load(libpath) }
            .map_err(|e| CanError::DeviceConfigError(format!("`{}`: {}", libpath, e)))?;

        Ok(Self {
            api: Arc::new(api),
            slots: Default::default(),
        })
    }

    fn slot(&self, handle: ChannelHandle) -> Result<Slot, CanError> {
        match self.slots.lock() {
            Ok(slots) => slots.get(handle.index() as usize)
                .and_then(|v| v.clone())
                .ok_or_else(|| CanError::other_error(format!("channel handle {} is not bound", handle))),
            Err(e) => Err(CanError::OtherError(e.to_string())),
        }
    }

    /// The library only reports a timeout through its error text.
    fn classify(&self, slot: &Slot, func: &str, code: i32) -> CanError {
        let reason = self.api.last_error(code);
        if reason.to_lowercase().contains("timeout") {
            CanError::TimeoutError { channel: slot.name.clone(), code }
        }
        else {
            CanError::IoFailure { code, reason: format!("`{}`: {}", func, reason) }
        }
    }
}

/// A live slot already holds `name`, whichever clone of the library bound it.
fn is_bound(slots: &[Option<Slot>], name: &str) -> bool {
    slots.iter().flatten().any(|v| v.name == name)
}

fn claim(slots: &mut Vec<Option<Slot>>, slot: Slot) -> usize {
    match slots.iter().position(Option::is_none) {
        Some(index) => {
            slots[index] = Some(slot);
            index
        },
        None => {
            slots.push(Some(slot));
            slots.len() - 1
        }
    }
}

/// Without a probe, a native failure of the setter is how the device says "not supported".
fn unsupported_on_failure(capability: Capability, error: CanError) -> CanError {
    match error {
        CanError::IoFailure { code, reason } => {
            log::debug!("ITICAN - {} rejected ({}): {}", capability, code, reason);
            CanError::unsupported_feature(capability.to_string())
        },
        e => e,
    }
}

impl Controller for ItiCanLibrary {
    fn enumerate_channels(&self) -> Result<Vec<String>, CanError> {
        self.api.find_all_channels()
    }

    fn bind(&self, name: &str) -> Result<ChannelHandle, CanError> {
        let mut slots = self.slots.lock()
            .map_err(|e| CanError::OtherError(e.to_string()))?;
        if is_bound(&slots, name) {
            return Err(CanError::channel_busy(name));
        }

        let channel = self.api.get_channel(name)?;
        match self.api.channel_name(channel) {
            Ok(v) => log::debug!("ITICAN - channel {} bound as `{}`", name, v),
            Err(e) => log::warn!("{}", e),
        }

        let index = claim(&mut slots, Slot { name: name.to_owned(), channel });
        Ok(ChannelHandle::new(index as u32))
    }

    fn unbind(&self, handle: ChannelHandle) {
        match self.slots.lock() {
            Ok(mut slots) => {
                if let Some(slot) = slots.get_mut(handle.index() as usize) {
                    slot.take();
                }
            },
            Err(e) => log::warn!("ITICAN - {}", e),
        }
    }

    fn open(&self, handle: ChannelHandle, open_type: OpenType, mode: OpenMode) -> Result<(), CanError> {
        let slot = self.slot(handle)?;
        self.api.open_channel(slot.channel, open_type as i32, mode as i32)
    }

    fn close(&self, handle: ChannelHandle) -> Result<(), CanError> {
        let slot = self.slot(handle)?;
        self.api.close_channel(slot.channel)
    }

    fn write_timing_register(&self, handle: ChannelHandle, phase: Phase, value: u64) -> Result<(), CanError> {
        let slot = self.slot(handle)?;
        self.api.set_baud_rate(slot.channel, phase == Phase::Data, value)
    }

    fn read_timing_register(&self, handle: ChannelHandle, phase: Phase) -> Result<u64, CanError> {
        let slot = self.slot(handle)?;
        self.api.get_baud_rate(slot.channel, phase == Phase::Data)
    }

    fn read_custom_timing(&self, handle: ChannelHandle) -> Result<String, CanError> {
        let slot = self.slot(handle)?;
        self.api.get_custom_baud_rate(slot.channel)
    }

    fn apply_settings(&self, handle: ChannelHandle, scope: SettingsScope) -> Result<(), CanError> {
        let slot = self.slot(handle)?;
        self.api.apply_settings(slot.channel, scope == SettingsScope::Temporary)
    }

    fn transmit(&self, handle: ChannelHandle, frame: &CanMessage, timeout: Option<u32>) -> Result<(), CanError> {
        let slot = self.slot(handle)?;
        let mut data = frame.data().to_vec();
        data.resize(frame.length(), Default::default());

        let ret = self.api.set_message(
            slot.channel,
            frame.id().into_bits(),
            frame.msg_type() as u8,
            frame.is_extended(),
            &data,
            frame.length() as u8,
            native_timeout(timeout),
        );
        match ret {
            0 => Ok(()),
            c if c > 0 => self.api.check_status("setMessage", c),
            c => Err(self.classify(&slot, "setMessage", c)),
        }
    }

    fn receive(&self, handle: ChannelHandle, timeout: Option<u32>) -> Result<CanMessage, CanError> {
        let slot = self.slot(handle)?;
        let (ret, raw) = self.api.get_message(slot.channel, native_timeout(timeout));
        match ret {
            0 => {},
            c if c > 0 => self.api.check_status("getMessage", c)?,
            c => return Err(self.classify(&slot, "getMessage", c)),
        }

        let id = Id::from_bits(raw.id, raw.extended);
        let mut message = CanMessage::with_type(id, MessageType::try_from(raw.msg_type)?, &raw.data)?;
        message.set_timestamp(Some(raw.timestamp))
            .set_transmitted(raw.transmitted)
            .set_direct(Direct::Receive)
            .set_channel(slot.name);

        Ok(message)
    }

    fn pending_frames(&self, handle: ChannelHandle) -> Result<usize, CanError> {
        let slot = self.slot(handle)?;
        self.api.get_message_count(slot.channel)
    }

    fn query_capability(&self, handle: ChannelHandle, capability: Capability) -> Result<bool, CanError> {
        let slot = self.slot(handle)?;
        match capability {
            Capability::Termination => self.api.get_flag(slot.channel, FlagFunc::TerminationSupported),
            Capability::EchoMessage => self.api.get_flag(slot.channel, FlagFunc::EchoSupported),
            Capability::Blink => self.api.get_flag(slot.channel, FlagFunc::BlinkSupported),
            Capability::TxMode(mode) => self.api.is_tx_mode_supported(slot.channel, mode as u8),
            // no probe exported, a failing setter reads as unsupported
            Capability::BusErrorReport => Ok(true),
        }
    }

    fn capability_enabled(&self, handle: ChannelHandle, capability: Capability) -> Result<bool, CanError> {
        let slot = self.slot(handle)?;
        match capability {
            Capability::Termination => self.api.get_flag(slot.channel, FlagFunc::TerminationEnabled),
            Capability::EchoMessage => self.api.get_flag(slot.channel, FlagFunc::EchoEnabled),
            Capability::Blink => self.api.get_flag(slot.channel, FlagFunc::Blinking),
            _ => Err(CanError::unsupported_feature(format!("reading {}", capability))),
        }
    }

    fn set_capability(&self, handle: ChannelHandle, capability: Capability, enable: bool) -> Result<(), CanError> {
        let slot = self.slot(handle)?;
        match capability {
            Capability::Termination => self.api.set_switch(slot.channel, SwitchFunc::Termination, enable),
            Capability::EchoMessage => self.api.set_switch(slot.channel, SwitchFunc::Echo, enable),
            Capability::Blink => self.api.set_switch(slot.channel, SwitchFunc::Blink, enable),
            Capability::BusErrorReport => self.api.set_switch(slot.channel, SwitchFunc::BusErrorReport, enable)
                .map_err(|e| unsupported_on_failure(capability, e)),
            Capability::TxMode(mode) => {
                let mode = if enable { mode } else { TxMode::Normal };
                self.api.set_tx_mode(slot.channel, mode as u8)
            },
        }
    }

    fn set_tx_timing(&self, handle: ChannelHandle, id: u32, period_ms: u32) -> Result<(), CanError> {
        let slot = self.slot(handle)?;
        let period = i32::try_from(period_ms)
            .map_err(|_| CanError::other_error(format!("tx period {} ms is too large", period_ms)))?;
        self.api.set_tx_timing(slot.channel, id, period)
    }

    fn last_error_text(&self, code: i32) -> String {
        self.api.last_error(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_library_is_a_config_error() {
        match ItiCanLibrary::load("no-such-dir/libitican.so") {
            Err(e) => assert!(matches!(e, CanError::DeviceConfigError(_))),
            Ok(_) => panic!("library should not load"),
        }
    }

    #[test]
    fn bound_names_are_exclusive() {
        let slot = |name: &str| Slot { name: name.into(), channel: RawChannel(std::ptr::null_mut()) };
        let mut slots = Vec::new();
        assert_eq!(claim(&mut slots, slot("CAN0")), 0);
        assert_eq!(claim(&mut slots, slot("CAN1")), 1);
        assert!(is_bound(&slots, "CAN0"));
        assert!(!is_bound(&slots, "CAN2"));

        slots[0].take();
        assert!(!is_bound(&slots, "CAN0"));
        assert_eq!(claim(&mut slots, slot("CAN2")), 0);
        assert_eq!(slots.len(), 2);
    }

    #[test]
    fn bus_error_report_failure_is_unsupported() {
        let failure = CanError::IoFailure { code: -1, reason: "`setBusErrorReport`: not implemented".into() };
        let e = unsupported_on_failure(Capability::BusErrorReport, failure);
        assert!(e.is_unsupported());

        let timeout = CanError::TimeoutError { channel: "CAN0".into(), code: -3 };
        assert_eq!(unsupported_on_failure(Capability::BusErrorReport, timeout.clone()), timeout);
    }

    #[test]
    #[ignore] // device required
    fn enumerate_native_channels() -> anyhow::Result<()> {
        let library = ItiCanLibrary::new()?;
        let channels = library.enumerate_channels()?;
        println!("{:?}", channels);
        Ok(())
    }
}

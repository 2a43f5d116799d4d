#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use itican_core::{Capability, CanMessage, ChannelHandle, Controller, OpenMode, OpenType, Phase, SettingsScope};
use itican_core::error::CanError;

pub const NATIVE_FAILURE: i32 = -42;
pub const NATIVE_TIMEOUT: i32 = -77;

/// Controller double counting every call and injecting failures.
#[derive(Debug, Default)]
pub struct MockController {
    pub channels: Vec<String>,
    pub capabilities: HashSet<Capability>,
    /// 1-based transmit attempt that fails.
    pub fail_transmit_at: Option<usize>,
    /// 1-based receive call that times out.
    pub timeout_receive_at: Option<usize>,
    /// Time spent inside transmit and receive.
    pub io_delay: Option<Duration>,

    pub calls: AtomicUsize,
    pub transmits: AtomicUsize,
    pub receives: AtomicUsize,
    pub busy: AtomicBool,
    pub overlapped: AtomicBool,

    pub sent: Mutex<Vec<CanMessage>>,
    pub inbox: Mutex<VecDeque<CanMessage>>,
    pub registers: Mutex<HashMap<Phase, u64>>,
    pub applied: Mutex<Vec<(SettingsScope, HashMap<Phase, u64>)>>,
    pub enabled: Mutex<HashSet<Capability>>,
}

impl MockController {
    pub fn new<S: Into<String>>(names: impl IntoIterator<Item = S>) -> Self {
        Self {
            channels: names.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }

    pub fn with_inbox(self, frames: Vec<CanMessage>) -> Self {
        *self.inbox.lock().unwrap() = frames.into();
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn transmits(&self) -> usize {
        self.transmits.load(Ordering::SeqCst)
    }

    pub fn receives(&self) -> usize {
        self.receives.load(Ordering::SeqCst)
    }

    pub fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    fn enter(&self) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlapped.store(true, Ordering::SeqCst);
        }
    }

    fn leave(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }

    fn io<T>(&self, f: impl FnOnce() -> Result<T, CanError>) -> Result<T, CanError> {
        self.enter();
        if let Some(delay) = self.io_delay {
            std::thread::sleep(delay);
        }
        let result = f();
        self.leave();
        result
    }
}

impl Controller for MockController {
    fn enumerate_channels(&self) -> Result<Vec<String>, CanError> {
        self.io(|| Ok(self.channels.clone()))
    }

    fn bind(&self, name: &str) -> Result<ChannelHandle, CanError> {
        self.io(|| match self.channels.iter().position(|v| v == name) {
            Some(index) => Ok(ChannelHandle::new(index as u32)),
            None => Err(CanError::channel_not_found(name)),
        })
    }

    fn unbind(&self, _: ChannelHandle) {}

    fn open(&self, _: ChannelHandle, _: OpenType, _: OpenMode) -> Result<(), CanError> {
        self.io(|| Ok(()))
    }

    fn close(&self, _: ChannelHandle) -> Result<(), CanError> {
        self.io(|| Ok(()))
    }

    fn write_timing_register(&self, _: ChannelHandle, phase: Phase, value: u64) -> Result<(), CanError> {
        self.io(|| {
            self.registers.lock().unwrap().insert(phase, value);
            Ok(())
        })
    }

    fn read_timing_register(&self, _: ChannelHandle, phase: Phase) -> Result<u64, CanError> {
        self.io(|| self.registers.lock().unwrap()
            .get(&phase)
            .copied()
            .ok_or(CanError::IoFailure { code: NATIVE_FAILURE, reason: "register never written".into() }))
    }

    fn apply_settings(&self, _: ChannelHandle, scope: SettingsScope) -> Result<(), CanError> {
        self.io(|| {
            let registers = self.registers.lock().unwrap().clone();
            self.applied.lock().unwrap().push((scope, registers));
            Ok(())
        })
    }

    fn transmit(&self, _: ChannelHandle, frame: &CanMessage, _: Option<u32>) -> Result<(), CanError> {
        self.io(|| {
            let attempt = self.transmits.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fail_transmit_at == Some(attempt) {
                return Err(CanError::IoFailure { code: NATIVE_FAILURE, reason: "bus off".into() });
            }
            self.sent.lock().unwrap().push(frame.clone());
            Ok(())
        })
    }

    fn receive(&self, _: ChannelHandle, _: Option<u32>) -> Result<CanMessage, CanError> {
        self.io(|| {
            let call = self.receives.fetch_add(1, Ordering::SeqCst) + 1;
            if self.timeout_receive_at == Some(call) {
                return Err(CanError::TimeoutError { channel: "mock".into(), code: NATIVE_TIMEOUT });
            }
            match self.inbox.lock().unwrap().pop_front() {
                Some(frame) => Ok(frame),
                None => Err(CanError::TimeoutError { channel: "mock".into(), code: NATIVE_TIMEOUT }),
            }
        })
    }

    fn pending_frames(&self, _: ChannelHandle) -> Result<usize, CanError> {
        self.io(|| Ok(self.inbox.lock().unwrap().len()))
    }

    fn query_capability(&self, _: ChannelHandle, capability: Capability) -> Result<bool, CanError> {
        self.io(|| match self.capabilities.contains(&capability) {
            true => Ok(true),
            false => Err(CanError::unsupported_feature(capability.to_string())),
        })
    }

    fn capability_enabled(&self, _: ChannelHandle, capability: Capability) -> Result<bool, CanError> {
        self.io(|| Ok(self.enabled.lock().unwrap().contains(&capability)))
    }

    fn set_capability(&self, _: ChannelHandle, capability: Capability, enable: bool) -> Result<(), CanError> {
        self.io(|| {
            let mut enabled = self.enabled.lock().unwrap();
            if enable { enabled.insert(capability); } else { enabled.remove(&capability); }
            Ok(())
        })
    }

    fn last_error_text(&self, code: i32) -> String {
        match code {
            NATIVE_FAILURE => "bus off".into(),
            NATIVE_TIMEOUT => "receive timeout".into(),
            _ => format!("unknown error {}", code),
        }
    }
}

pub fn frames(count: usize) -> Vec<CanMessage> {
    (0..count)
        .map(|i| CanMessage::new(0x100 + i as u32, &[i as u8; 8]).unwrap())
        .collect()
}

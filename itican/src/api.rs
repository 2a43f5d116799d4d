use std::ffi::{c_char, c_void, CString};
use dlopen2::symbor::{Symbol, SymBorApi};
use itican_core::error::CanError;
use crate::constants::{MAX_BITRATE_LEN, MAX_CHANNELS_LEN, MAX_ERROR_LEN, MAX_NAME_LEN, STATUS_OK};

/// Native channel handle, only ever dereferenced by the library itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RawChannel(pub(crate) *mut c_void);

unsafe impl Send for RawChannel {}
unsafe impl Sync for RawChannel {}

/// One received frame as the library hands it out.
#[derive(Debug, Default, Clone)]
pub(crate) struct RawMessage {
    pub(crate) id: u32,
    pub(crate) msg_type: u8,
    pub(crate) extended: bool,
    pub(crate) transmitted: bool,
    pub(crate) timestamp: u64,
    pub(crate) data: Vec<u8>,
}

#[allow(non_snake_case)]
#[derive(Debug, Clone, SymBorApi)]
pub(crate) struct ItiCanApi<'a> {
    /// int32_t findAllChannels(char *str, int32_t *chnCount);
    findAllChannels: Symbol<'a, unsafe extern "C" fn(names: *mut c_char, count: *mut i32) -> i32>,
    /// int32_t getLastError(char *error, int32_t *eventNum);
    getLastError: Symbol<'a, unsafe extern "C" fn(error: *mut c_char, code: *mut i32) -> i32>,
    /// int32_t getChannel(void **channel, char *device, int32_t chnIndex);
    getChannel: Symbol<'a, unsafe extern "C" fn(channel: *mut *mut c_void, device: *const c_char, index: i32) -> i32>,
    /// int32_t openChannel(void *channel, int32_t type, int32_t mode);
    openChannel: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, open_type: i32, mode: i32) -> i32>,
    /// int32_t closeChannel(void *channel);
    closeChannel: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void) -> i32>,
    /// int32_t getChannelName(void *channel, char *name);
    getChannelName: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, name: *mut c_char) -> i32>,
    /// int32_t setBaudRate(void *channel, uint64_t baudRate);
    setBaudRate: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: u64) -> i32>,
    /// int32_t getBaudRate(void *channel, uint64_t *baudRate);
    getBaudRate: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: *mut u64) -> i32>,
    /// int32_t setFdBaudRate(void *channel, uint64_t baudRate);
    setFdBaudRate: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: u64) -> i32>,
    /// int32_t getFdBaudRate(void *channel, uint64_t *baudRate);
    getFdBaudRate: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: *mut u64) -> i32>,
    /// int32_t getCustomBaudRate(void *channel, char *baudRate);
    getCustomBaudRate: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: *mut c_char) -> i32>,
    /// int32_t setMessage(void *channel, uint32_t id, uint8_t type, uint8_t extended, uint8_t *data, uint8_t dataLength, int32_t timeout);
    setMessage: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, id: u32, msg_type: u8, extended: u8, data: *mut u8, length: u8, timeout: i32) -> i32>,
    /// int32_t getMessageCount(void *channel, int32_t *count);
    getMessageCount: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, count: *mut i32) -> i32>,
    /// int32_t getMessage(void *channel, uint32_t *id, uint8_t *type, uint8_t *extended, uint8_t *transmitted, uint64_t *timestamp, uint8_t *data, uint8_t *dataLength, int32_t timeout);
    getMessage: Symbol<'a, unsafe extern "C" fn(
        channel: *mut c_void,
        id: *mut u32,
        msg_type: *mut u8,
        extended: *mut u8,
        transmitted: *mut u8,
        timestamp: *mut u64,
        data: *mut u8,
        length: *mut u8,
        timeout: i32,
    ) -> i32>,
    /// int32_t isTerminationSupported(void *channel, uint8_t *supported);
    isTerminationSupported: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: *mut u8) -> i32>,
    /// int32_t setTermination(void *channel, uint8_t enabled);
    setTermination: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: u8) -> i32>,
    /// int32_t isTerminationEnabled(void *channel, uint8_t *enabled);
    isTerminationEnabled: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: *mut u8) -> i32>,
    /// int32_t isEchoMessageSupported(void *channel, uint8_t *supported);
    isEchoMessageSupported: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: *mut u8) -> i32>,
    /// int32_t setEchoMessage(void *channel, uint8_t echo);
    setEchoMessage: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: u8) -> i32>,
    /// int32_t isEchoMessageEnabled(void *channel, uint8_t *echo);
    isEchoMessageEnabled: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: *mut u8) -> i32>,
    /// int32_t setBusErrorReport(void *channel, uint8_t enabled);
    setBusErrorReport: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: u8) -> i32>,
    /// int32_t applySettings(void *channel, uint8_t temporary);
    applySettings: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, temporary: u8) -> i32>,
    /// int32_t isTxModeSupported(void *channel, uint8_t mode, uint8_t *supported);
    isTxModeSupported: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, mode: u8, value: *mut u8) -> i32>,
    /// int32_t setTxMode(void *channel, uint8_t mode);
    setTxMode: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, mode: u8) -> i32>,
    /// int32_t setTxTiming(void *channel, uint32_t id, int32_t time);
    setTxTiming: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, id: u32, time: i32) -> i32>,
    /// int32_t isBlinkSupported(void *channel, uint8_t *supported);
    isBlinkSupported: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: *mut u8) -> i32>,
    /// int32_t blinkChannel(void *channel, uint8_t blink);
    blinkChannel: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: u8) -> i32>,
    /// int32_t isChannelBlinking(void *channel, uint8_t *blinking);
    isChannelBlinking: Symbol<'a, unsafe extern "C" fn(channel: *mut c_void, value: *mut u8) -> i32>,
}

/// Flag getters and setters sharing the `(void *, uint8_t[*])` shape.
#[derive(Debug, Clone, Copy)]
pub(crate) enum FlagFunc {
    TerminationSupported,
    TerminationEnabled,
    EchoSupported,
    EchoEnabled,
    BlinkSupported,
    Blinking,
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum SwitchFunc {
    Termination,
    Echo,
    BusErrorReport,
    Blink,
}

impl ItiCanApi<'_> {
    /// Zero is success, positive codes are warnings, negative codes are failures.
    pub(crate) fn check_status(&self, func: &str, code: i32) -> Result<(), CanError> {
        match code {
            STATUS_OK => Ok(()),
            c if c > 0 => {
                log::warn!("ITICAN - `{}` warning {}: {}", func, c, self.last_error(c));
                Ok(())
            },
            c => Err(CanError::IoFailure { code: c, reason: format!("`{}`: {}", func, self.last_error(c)) }),
        }
    }

    pub(crate) fn last_error(&self, code: i32) -> String {
        let mut buffer = [0 as c_char; MAX_ERROR_LEN];
        let mut code_ = code;
        match unsafe { (self.getLastError)(buffer.as_mut_ptr(), &mut code_) } {
            STATUS_OK => {
                let text = c_buffer_to_string(&buffer);
                if text.is_empty() { format!("unknown error {}", code) } else { text }
            },
            ret => format!("unknown error {} (`getLastError` ret: {})", code, ret),
        }
    }

    pub(crate) fn find_all_channels(&self) -> Result<Vec<String>, CanError> {
        let mut buffer = [0 as c_char; MAX_CHANNELS_LEN];
        let mut count = 0;
        let ret = unsafe { (self.findAllChannels)(buffer.as_mut_ptr(), &mut count) };
        self.check_status("findAllChannels", ret)?;

        let names = c_buffer_to_string(&buffer);
        Ok(names.split('\t')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .take(count.max(0) as usize)
            .map(String::from)
            .collect())
    }

    pub(crate) fn get_channel(&self, name: &str) -> Result<RawChannel, CanError> {
        let device = CString::new(name)
            .map_err(|e| CanError::OtherError(e.to_string()))?;
        let mut channel = std::ptr::null_mut();
        let ret = unsafe { (self.getChannel)(&mut channel, device.as_ptr(), 0) };
        if ret < STATUS_OK || channel.is_null() {
            log::debug!("ITICAN - `getChannel` for {} ret: {}", name, ret);
            return Err(CanError::channel_not_found(name));
        }
        self.check_status("getChannel", ret)?;

        Ok(RawChannel(channel))
    }

    pub(crate) fn channel_name(&self, channel: RawChannel) -> Result<String, CanError> {
        let mut buffer = [0 as c_char; MAX_NAME_LEN];
        let ret = unsafe { (self.getChannelName)(channel.0, buffer.as_mut_ptr()) };
        self.check_status("getChannelName", ret)?;
        Ok(c_buffer_to_string(&buffer))
    }

    pub(crate) fn open_channel(&self, channel: RawChannel, open_type: i32, mode: i32) -> Result<(), CanError> {
        let ret = unsafe { (self.openChannel)(channel.0, open_type, mode) };
        self.check_status("openChannel", ret)
    }

    pub(crate) fn close_channel(&self, channel: RawChannel) -> Result<(), CanError> {
        let ret = unsafe { (self.closeChannel)(channel.0) };
        self.check_status("closeChannel", ret)
    }

    pub(crate) fn set_baud_rate(&self, channel: RawChannel, fd: bool, value: u64) -> Result<(), CanError> {
        let (func, ret) = if fd {
            ("setFdBaudRate", unsafe { (self.setFdBaudRate)(channel.0, value) })
        }
        else {
            ("setBaudRate", unsafe { (self.setBaudRate)(channel.0, value) })
        };
        self.check_status(func, ret)
    }

    pub(crate) fn get_baud_rate(&self, channel: RawChannel, fd: bool) -> Result<u64, CanError> {
        let mut value = 0;
        let (func, ret) = if fd {
            ("getFdBaudRate", unsafe { (self.getFdBaudRate)(channel.0, &mut value) })
        }
        else {
            ("getBaudRate", unsafe { (self.getBaudRate)(channel.0, &mut value) })
        };
        self.check_status(func, ret)?;
        Ok(value)
    }

    pub(crate) fn get_custom_baud_rate(&self, channel: RawChannel) -> Result<String, CanError> {
        let mut buffer = [0 as c_char; MAX_BITRATE_LEN];
        let ret = unsafe { (self.getCustomBaudRate)(channel.0, buffer.as_mut_ptr()) };
        self.check_status("getCustomBaudRate", ret)?;
        Ok(c_buffer_to_string(&buffer))
    }

    pub(crate) fn apply_settings(&self, channel: RawChannel, temporary: bool) -> Result<(), CanError> {
        let ret = unsafe { (self.applySettings)(channel.0, if temporary { 1 } else { 0 }) };
        self.check_status("applySettings", ret)
    }

    /// Raw status is returned so the caller can classify timeouts.
    pub(crate) fn set_message(
        &self,
        channel: RawChannel,
        id: u32,
        msg_type: u8,
        extended: bool,
        data: &[u8],
        length: u8,
        timeout: i32,
    ) -> i32 {
        let mut buffer = data.to_vec();
        unsafe {
            (self.setMessage)(
                channel.0,
                id,
                msg_type,
                extended as u8,
                buffer.as_mut_ptr(),
                length,
                timeout,
            )
        }
    }

    /// Raw status is returned so the caller can classify timeouts.
    pub(crate) fn get_message(&self, channel: RawChannel, timeout: i32) -> (i32, RawMessage) {
        let mut id = 0;
        let mut msg_type = 0;
        let mut extended = 0;
        let mut transmitted = 0;
        let mut timestamp = 0;
        let mut data = [0u8; itican_core::MAX_FD_FRAME_SIZE];
        let mut length = 0u8;

        let ret = unsafe {
            (self.getMessage)(
                channel.0,
                &mut id,
                &mut msg_type,
                &mut extended,
                &mut transmitted,
                &mut timestamp,
                data.as_mut_ptr(),
                &mut length,
                timeout,
            )
        };

        let length = (length as usize).min(data.len());
        (ret, RawMessage {
            id,
            msg_type,
            extended: extended != 0,
            transmitted: transmitted != 0,
            timestamp,
            data: data[..length].to_vec(),
        })
    }

    pub(crate) fn get_message_count(&self, channel: RawChannel) -> Result<usize, CanError> {
        let mut count = 0;
        let ret = unsafe { (self.getMessageCount)(channel.0, &mut count) };
        self.check_status("getMessageCount", ret)?;
        Ok(count.max(0) as usize)
    }

    pub(crate) fn get_flag(&self, channel: RawChannel, func: FlagFunc) -> Result<bool, CanError> {
        let mut value = 0;
        let (name, ret) = unsafe {
            match func {
                FlagFunc::TerminationSupported => ("isTerminationSupported", (self.isTerminationSupported)(channel.0, &mut value)),
                FlagFunc::TerminationEnabled => ("isTerminationEnabled", (self.isTerminationEnabled)(channel.0, &mut value)),
                FlagFunc::EchoSupported => ("isEchoMessageSupported", (self.isEchoMessageSupported)(channel.0, &mut value)),
                FlagFunc::EchoEnabled => ("isEchoMessageEnabled", (self.isEchoMessageEnabled)(channel.0, &mut value)),
                FlagFunc::BlinkSupported => ("isBlinkSupported", (self.isBlinkSupported)(channel.0, &mut value)),
                FlagFunc::Blinking => ("isChannelBlinking", (self.isChannelBlinking)(channel.0, &mut value)),
            }
        };
        self.check_status(name, ret)?;
        Ok(value != 0)
    }

    pub(crate) fn set_switch(&self, channel: RawChannel, func: SwitchFunc, enable: bool) -> Result<(), CanError> {
        let value = enable as u8;
        let (name, ret) = unsafe {
            match func {
                SwitchFunc::Termination => ("setTermination", (self.setTermination)(channel.0, value)),
                SwitchFunc::Echo => ("setEchoMessage", (self.setEchoMessage)(channel.0, value)),
                SwitchFunc::BusErrorReport => ("setBusErrorReport", (self.setBusErrorReport)(channel.0, value)),
                SwitchFunc::Blink => ("blinkChannel", (self.blinkChannel)(channel.0, value)),
            }
        };
        self.check_status(name, ret)
    }

    pub(crate) fn is_tx_mode_supported(&self, channel: RawChannel, mode: u8) -> Result<bool, CanError> {
        let mut value = 0;
        let ret = unsafe { (self.isTxModeSupported)(channel.0, mode, &mut value) };
        self.check_status("isTxModeSupported", ret)?;
        Ok(value != 0)
    }

    pub(crate) fn set_tx_mode(&self, channel: RawChannel, mode: u8) -> Result<(), CanError> {
        let ret = unsafe { (self.setTxMode)(channel.0, mode) };
        self.check_status("setTxMode", ret)
    }

    pub(crate) fn set_tx_timing(&self, channel: RawChannel, id: u32, period_ms: i32) -> Result<(), CanError> {
        let ret = unsafe { (self.setTxTiming)(channel.0, id, period_ms) };
        self.check_status("setTxTiming", ret)
    }
}

#[inline]
fn c_buffer_to_string(buffer: &[c_char]) -> String {
    // the library may fill the whole buffer without a terminator
    let bytes: Vec<u8> = buffer.iter()
        .map(|&c| c as u8)
        .take_while(|&b| b != 0)
        .collect();
    String::from_utf8_lossy(&bytes).into_owned()
}

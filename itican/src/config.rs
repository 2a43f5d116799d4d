use std::{collections::HashMap, fs::read_to_string, path::Path, str::FromStr};
use serde::Deserialize;
use itican_core::{ChannelConfig, CAN_CLOCK_MHZ};
use itican_core::error::CanError;
use itican_core::timing::TimingCodec;
use crate::constants::{CHANNEL_CFG_FILENAME, ITICAN_ENV, ITICAN_VAR};

/// The deserialize object mapped to configuration file context.
#[derive(Debug, Default, Deserialize)]
struct ChannelCfg {
    clock: Option<u64>,
    #[serde(default)]
    channels: HashMap<String, ChannelConfig>,
}

/// Contents of `channel.cfg.yaml`:
///
/// ```yaml
/// clock: 80
/// channels:
///   CAN0:
///     open_type: FD_CAN_BRS
///     arbitration: { prescaler: 4, tseg1: 34, tseg2: 5, sjw: 4 }
///     data: { prescaler: 2, tseg1: 15, tseg2: 4, sjw: 4, tdc_offset: 16 }
///     scope: Temporary
/// ```
#[derive(Debug, Default)]
pub struct ChannelCfgContext(ChannelCfg);

impl ChannelCfgContext {
    /// Read `channel.cfg.yaml` from the `ITICAN_LIBRARY` directory, or the working directory.
    pub fn new() -> Result<Self, CanError> {
        let path = match dotenvy::from_filename(ITICAN_ENV) {
            Ok(_) => match std::env::var(ITICAN_VAR) {
                Ok(v) => format!("{}/{}", v, CHANNEL_CFG_FILENAME),
                Err(_) => CHANNEL_CFG_FILENAME.into(),
            },
            Err(_) => CHANNEL_CFG_FILENAME.into(),
        };

        Self::from_file(path)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, CanError> {
        let path = path.as_ref();
        let data = read_to_string(path)
            .map_err(|e| CanError::DeviceConfigError(format!("Unable to read `{}`: {:?}", path.display(), e)))?;
        data.parse()
    }

    pub fn clock_mhz(&self) -> u64 {
        self.0.clock.unwrap_or(CAN_CLOCK_MHZ)
    }

    pub fn codec(&self) -> Result<TimingCodec, CanError> {
        TimingCodec::new(self.clock_mhz())
    }

    pub fn channel(&self, name: &str) -> Option<&ChannelConfig> {
        self.0.channels.get(name)
    }

    pub fn channel_names(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.0.channels.keys().map(String::as_str).collect();
        names.sort();
        names
    }
}

impl FromStr for ChannelCfgContext {
    type Err = CanError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let result = serde_yaml::from_str(s)
            .map_err(|e| CanError::DeviceConfigError(format!("Error parsing YAML: {:?}", e)))?;
        Ok(Self(result))
    }
}

use crate::channel::ChannelSetting;
use crate::driver::TriggerDirection;
use crate::session::{AcquisitionConfig, ChannelConfig};
use confique::Config;
use serde::Deserialize;
use std::path::PathBuf;

/// Settings for one acquisition run, read from a TOML file.
#[derive(Config, Debug, Clone)]
pub struct RunConfig {
    #[config(nested)]
    pub device: DeviceSettings,
    #[config(nested)]
    pub acquisition: AcquisitionSettings,
    #[config(nested)]
    pub channels: ChannelSettings,
    #[config(nested)]
    pub logging: LogSettings,
}

#[derive(Config, Debug, Clone)]
pub struct DeviceSettings {
    /// Serial number of the unit to open, e.g. "IW098/0028". The first unit found is used
    /// when left out.
    #[config(env = "PICO_DAQ_SERIAL")]
    pub serial: Option<String>,
}

#[derive(Config, Debug, Clone)]
pub struct AcquisitionSettings {
    /// Device timebase code (sampling clock divider).
    pub timebase: u32,
    /// Number of waveforms captured in one rapid block run.
    pub waveforms: u32,
    /// Samples kept before the trigger point, shared by all channels.
    pub pre_trigger: u16,
    /// Aux input trigger level in mV; 0 disables the aux trigger.
    #[config(default = 0)]
    pub aux_trigger_mv: i16,
    #[config(default = "rising")]
    pub trigger_direction: TriggerDirection,
    /// Fire a trigger after this many ms without one; 0 waits forever.
    #[config(default = 0)]
    pub auto_trigger_ms: i32,
}

/// Channels without a table are disabled.
#[derive(Config, Debug, Clone)]
pub struct ChannelSettings {
    pub a: Option<ChannelEntry>,
    pub b: Option<ChannelEntry>,
    pub c: Option<ChannelEntry>,
    pub d: Option<ChannelEntry>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelEntry {
    /// "10mV" .. "50V", or "disabled".
    pub range: ChannelSetting,
    #[serde(default)]
    pub trigger_mv: i16,
    #[serde(default)]
    pub post_trigger: u16,
}

#[derive(Config, Debug, Clone)]
pub struct LogSettings {
    /// One of "off", "error", "warn", "info", "debug", "trace".
    #[config(env = "PICO_DAQ_LOG", default = "info")]
    pub level: String,
    /// Also append log lines to this file.
    pub file: Option<PathBuf>,
}

impl RunConfig {
    pub fn acquisition(&self) -> AcquisitionConfig {
        let entries = [
            self.channels.a,
            self.channels.b,
            self.channels.c,
            self.channels.d,
        ];
        AcquisitionConfig {
            channels: entries.map(|entry| {
                entry.map_or_else(ChannelConfig::default, |entry| ChannelConfig {
                    setting: entry.range,
                    trigger_mv: entry.trigger_mv,
                    post_trigger: entry.post_trigger,
                })
            }),
            aux_trigger_mv: self.acquisition.aux_trigger_mv,
            timebase: self.acquisition.timebase,
            waveforms: self.acquisition.waveforms,
            pre_trigger: self.acquisition.pre_trigger,
            serial: self.device.serial.clone(),
            direction: self.acquisition.trigger_direction,
            auto_trigger_ms: self.acquisition.auto_trigger_ms,
        }
    }
}

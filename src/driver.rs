//! The seam between the recorder and whatever actually talks to the scope.

use crate::channel::{self, Channel, ChannelSetting, VoltageRange};
use crate::PicoStatus;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerDirection {
    #[default]
    Rising,
    Falling,
}

/// Trigger sources, OR-ed together. `None` leaves a source out of the condition list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerSettings {
    pub channels: [Option<i16>; 4],
    pub aux: Option<i16>,
    pub direction: TriggerDirection,
    /// 0 waits for a real trigger forever.
    pub auto_trigger_ms: i32,
}

impl TriggerSettings {
    pub fn sources(&self) -> usize {
        self.channels.iter().flatten().count() + usize::from(self.aux.is_some())
    }
}

/// Per-channel buffer lengths for every segment; `None` means the channel is not read back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferLayout {
    pub waveforms: u32,
    pub lengths: [Option<u32>; 4],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockCapture {
    pub pre_trigger: u32,
    pub post_trigger: u32,
    pub timebase: u32,
    pub waveforms: u32,
}

/// Filled sample buffers handed over by the unit, indexed by channel then waveform.
#[derive(Debug, Default)]
pub struct Captures {
    channels: [Vec<Vec<i16>>; 4],
}

impl Captures {
    pub fn insert(&mut self, channel: Channel, waveforms: Vec<Vec<i16>>) {
        self.channels[channel.index()] = waveforms;
    }

    pub fn take(&mut self, channel: Channel) -> Vec<Vec<i16>> {
        std::mem::take(&mut self.channels[channel.index()])
    }

    pub fn waveforms(&self, channel: Channel) -> &[Vec<i16>] {
        &self.channels[channel.index()]
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enumeration {
    pub count: u16,
    pub listing: String,
    /// Length the driver reported for the full listing.
    pub required: usize,
}

pub trait Unit {
    fn model(&self) -> &str;
    fn serial(&self) -> &str;

    fn set_channel(&mut self, channel: Channel, setting: ChannelSetting) -> Result<(), PicoStatus>;
    fn set_triggers(&mut self, triggers: &TriggerSettings) -> Result<(), PicoStatus>;
    fn allocate_buffers(&mut self, layout: &BufferLayout) -> Result<(), PicoStatus>;

    /// Arms the unit, blocks until every segment is filled and hands the buffers over.
    fn run_rapid_block(&mut self, capture: &BlockCapture) -> Result<Captures, PicoStatus>;

    fn close(&mut self) -> Result<(), PicoStatus>;

    fn mv_to_adc(&self, millivolts: i16, range: VoltageRange) -> i16 {
        channel::mv_to_adc(millivolts, range)
    }
}

pub trait Driver {
    type Unit: Unit;

    fn open_unit(&self, serial: Option<&str>) -> Result<Self::Unit, PicoStatus>;
    fn enumerate_units(&self, capacity: usize) -> Result<Enumeration, PicoStatus>;
}

//! A software stand-in for a 6000-series unit.
//!
//! Produces a noisy baseline with a decaying negative pulse at the trigger point, which is
//! enough to exercise the whole recording path without hardware attached. Every call is
//! recorded in a shared [`SimLog`], and any call can be made to fail with a chosen status.

use crate::channel::{Channel, ChannelSetting};
use crate::driver::{BlockCapture, BufferLayout, Captures, Driver, Enumeration, TriggerSettings, Unit};
use crate::PicoStatus;
use log::debug;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub const SIM_MODEL: &str = "6404D";
pub const SIM_SERIAL: &str = "SIM00/0001";

const BASELINE_NOISE: i16 = 3;
const PULSE_HEIGHT: f64 = 2000.0;
const PULSE_DECAY: f64 = 20.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SimCall {
    Open,
    Enumerate,
    SetChannel,
    SetTriggers,
    AllocateBuffers,
    RunRapidBlock,
    Close,
}

/// What the simulated units were asked to do.
#[derive(Debug, Default, Clone)]
pub struct SimLog {
    pub opened: Option<String>,
    pub channels: [Option<ChannelSetting>; 4],
    pub triggers: Option<TriggerSettings>,
    pub layout: Option<BufferLayout>,
    pub capture: Option<BlockCapture>,
    pub closed: u32,
}

#[derive(Debug, Clone)]
pub struct SimDriver {
    units: Vec<(String, String)>,
    fault: Option<(SimCall, PicoStatus)>,
    seed: u64,
    log: Arc<Mutex<SimLog>>,
}

impl Default for SimDriver {
    fn default() -> Self {
        Self::with_units([(SIM_SERIAL, SIM_MODEL)])
    }
}

impl SimDriver {
    pub fn new() -> Self {
        Default::default()
    }

    /// `(serial, model)` pairs, reported in this order.
    pub fn with_units<'a>(units: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        Self {
            units: units
                .into_iter()
                .map(|(serial, model)| (serial.to_owned(), model.to_owned()))
                .collect(),
            fault: None,
            seed: 0x5eed,
            log: Default::default(),
        }
    }

    pub fn fail_on(mut self, call: SimCall, status: PicoStatus) -> Self {
        self.fault = Some((call, status));
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn log(&self) -> MutexGuard<'_, SimLog> {
        lock(&self.log)
    }

    fn check(&self, call: SimCall) -> Result<(), PicoStatus> {
        check(self.fault, call)
    }
}

impl Driver for SimDriver {
    type Unit = SimUnit;

    fn open_unit(&self, serial: Option<&str>) -> Result<SimUnit, PicoStatus> {
        self.check(SimCall::Open)?;
        let (serial, model) = self
            .units
            .iter()
            .find(|(s, _)| serial.map_or(true, |wanted| wanted == s.as_str()))
            .ok_or(PicoStatus::NotFound)?;
        debug!("sim: opened {model} {serial}");
        lock(&self.log).opened = Some(serial.clone());
        Ok(SimUnit {
            serial: serial.clone(),
            model: model.clone(),
            fault: self.fault,
            rng: StdRng::seed_from_u64(self.seed),
            layout: None,
            log: Arc::clone(&self.log),
        })
    }

    fn enumerate_units(&self, capacity: usize) -> Result<Enumeration, PicoStatus> {
        self.check(SimCall::Enumerate)?;
        let full = self
            .units
            .iter()
            .map(|(serial, _)| serial.as_str())
            .collect::<Vec<_>>()
            .join(",");
        let required = full.len();
        // cut at a byte count like the driver does, never inside a character
        let mut cut = capacity.min(full.len());
        while !full.is_char_boundary(cut) {
            cut -= 1;
        }
        let listing = full[..cut].to_owned();
        Ok(Enumeration {
            count: self.units.len() as u16,
            listing,
            required,
        })
    }
}

#[derive(Debug)]
pub struct SimUnit {
    serial: String,
    model: String,
    fault: Option<(SimCall, PicoStatus)>,
    rng: StdRng,
    layout: Option<BufferLayout>,
    log: Arc<Mutex<SimLog>>,
}

impl SimUnit {
    fn waveform(&mut self, len: usize, pre_trigger: usize) -> Vec<i16> {
        (0..len)
            .map(|i| {
                let noise = self.rng.random_range(-BASELINE_NOISE..=BASELINE_NOISE);
                let pulse = if i >= pre_trigger {
                    -PULSE_HEIGHT * (-((i - pre_trigger) as f64) / PULSE_DECAY).exp()
                } else {
                    0.0
                };
                pulse as i16 + noise
            })
            .collect()
    }
}

impl Unit for SimUnit {
    fn model(&self) -> &str {
        &self.model
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn set_channel(&mut self, channel: Channel, setting: ChannelSetting) -> Result<(), PicoStatus> {
        check(self.fault, SimCall::SetChannel)?;
        lock(&self.log).channels[channel.index()] = Some(setting);
        Ok(())
    }

    fn set_triggers(&mut self, triggers: &TriggerSettings) -> Result<(), PicoStatus> {
        check(self.fault, SimCall::SetTriggers)?;
        lock(&self.log).triggers = Some(*triggers);
        Ok(())
    }

    fn allocate_buffers(&mut self, layout: &BufferLayout) -> Result<(), PicoStatus> {
        check(self.fault, SimCall::AllocateBuffers)?;
        self.layout = Some(*layout);
        lock(&self.log).layout = Some(*layout);
        Ok(())
    }

    fn run_rapid_block(&mut self, capture: &BlockCapture) -> Result<Captures, PicoStatus> {
        check(self.fault, SimCall::RunRapidBlock)?;
        let layout = self.layout.ok_or(PicoStatus::NoSamplesAvailable)?;
        if capture.waveforms != layout.waveforms {
            return Err(PicoStatus::SegmentOutOfRange);
        }
        lock(&self.log).capture = Some(*capture);

        let captured = (capture.pre_trigger + capture.post_trigger) as usize;
        let mut captures = Captures::default();
        for ch in Channel::ALL {
            if let Some(len) = layout.lengths[ch.index()] {
                let len = (len as usize).min(captured);
                let waveforms = (0..capture.waveforms)
                    .map(|_| self.waveform(len, capture.pre_trigger as usize))
                    .collect();
                captures.insert(ch, waveforms);
            }
        }
        Ok(captures)
    }

    fn close(&mut self) -> Result<(), PicoStatus> {
        lock(&self.log).closed += 1;
        check(self.fault, SimCall::Close)
    }
}

fn check(fault: Option<(SimCall, PicoStatus)>, call: SimCall) -> Result<(), PicoStatus> {
    match fault {
        Some((failing, status)) if failing == call => Err(status),
        _ => Ok(()),
    }
}

fn lock(log: &Mutex<SimLog>) -> MutexGuard<'_, SimLog> {
    log.lock().unwrap_or_else(PoisonError::into_inner)
}

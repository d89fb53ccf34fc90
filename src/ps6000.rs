//! `libps6000` backed driver. Bindings are generated at build time from the PicoSDK headers
//! (see `build.rs`; set `PICOSDK_DIR` if the SDK is not under `/opt/picoscope`).

use crate::channel::{Channel, ChannelSetting, VoltageRange};
use crate::driver::{
    BlockCapture, BufferLayout, Captures, Driver, Enumeration, TriggerDirection, TriggerSettings,
    Unit,
};
use crate::PicoStatus;
use libc::c_char;
use log::{debug, warn};
use std::{ffi::CString, mem, ptr, thread::sleep, time::Duration};

#[allow(non_upper_case_globals, non_camel_case_types, non_snake_case, dead_code)]
mod sys {
    include!(concat!(env!("OUT_DIR"), "/bindings.rs"));
}

const INFO_LEN: i16 = 32;
const OVERSAMPLE: i16 = 1;
const HYSTERESIS: u16 = 256;
const POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Default, Clone, Copy)]
pub struct Ps6000Driver;

impl Driver for Ps6000Driver {
    type Unit = Ps6000Unit;

    fn open_unit(&self, serial: Option<&str>) -> Result<Ps6000Unit, PicoStatus> {
        let serial = serial
            .map(CString::new)
            .transpose()
            .map_err(|_| PicoStatus::InvalidParameter)?;
        let serial_ptr = serial
            .as_ref()
            .map_or(ptr::null_mut(), |s| s.as_ptr() as *mut c_char);

        let mut handle = 0;
        PicoStatus::check(unsafe { sys::ps6000OpenUnit(&mut handle, serial_ptr) })?;

        // from here on the handle is closed by Drop if anything fails
        let mut unit = Ps6000Unit {
            handle,
            model: String::new(),
            serial: String::new(),
            buffers: Default::default(),
            closed: false,
        };
        unit.model = unit_info(handle, sys::PICO_VARIANT_INFO)?;
        unit.serial = unit_info(handle, sys::PICO_BATCH_AND_SERIAL)?;
        debug!("opened {} {} (handle {handle})", unit.model, unit.serial);
        Ok(unit)
    }

    fn enumerate_units(&self, capacity: usize) -> Result<Enumeration, PicoStatus> {
        let mut count = 0;
        let mut listing = vec![0u8; capacity];
        let mut len = i16::try_from(capacity).unwrap_or(i16::MAX);
        PicoStatus::check(unsafe {
            sys::ps6000EnumerateUnits(&mut count, listing.as_mut_ptr() as *mut c_char, &mut len)
        })?;
        listing.retain(|&b| b != 0);

        // the driver never reports more than it was given, so a full buffer means the
        // listing was probably cut short
        let len = usize::try_from(len).unwrap_or(0);
        let required = if len >= capacity { capacity + 1 } else { len };
        Ok(Enumeration {
            count: u16::try_from(count).unwrap_or(0),
            listing: String::from_utf8_lossy(&listing).into_owned(),
            required,
        })
    }
}

#[derive(Debug)]
pub struct Ps6000Unit {
    handle: i16,
    model: String,
    serial: String,
    /// Registered with the driver by `allocate_buffers`, filled by `run_rapid_block`.
    buffers: [Vec<Vec<i16>>; 4],
    closed: bool,
}

impl Unit for Ps6000Unit {
    fn model(&self) -> &str {
        &self.model
    }

    fn serial(&self) -> &str {
        &self.serial
    }

    fn set_channel(&mut self, channel: Channel, setting: ChannelSetting) -> Result<(), PicoStatus> {
        let (enabled, range) = match setting {
            ChannelSetting::Disabled => (0, VoltageRange::V1),
            ChannelSetting::Enabled(range) => (1, range),
        };
        PicoStatus::check(unsafe {
            sys::ps6000SetChannel(
                self.handle,
                sdk_channel(channel),
                enabled,
                sys::PS6000_DC_1M,
                range.code() as sys::PS6000_RANGE,
                0.0,
                sys::PS6000_BW_FULL,
            )
        })
    }

    fn set_triggers(&mut self, triggers: &TriggerSettings) -> Result<(), PicoStatus> {
        let mut sources = Vec::with_capacity(triggers.sources());
        for ch in Channel::ALL {
            if let Some(threshold) = triggers.channels[ch.index()] {
                sources.push((sdk_channel(ch), threshold));
            }
        }
        if let Some(threshold) = triggers.aux {
            sources.push((sys::PS6000_TRIGGER_AUX, threshold));
        }

        // one condition per source, so any of them fires the trigger
        let mut conditions: Vec<sys::PS6000_TRIGGER_CONDITIONS> = sources
            .iter()
            .map(|&(source, _)| condition_on(source))
            .collect();
        let mut properties: Vec<sys::PS6000_TRIGGER_CHANNEL_PROPERTIES> = sources
            .iter()
            .map(|&(source, threshold)| sys::PS6000_TRIGGER_CHANNEL_PROPERTIES {
                thresholdUpper: threshold,
                hysteresisUpper: HYSTERESIS,
                thresholdLower: threshold,
                hysteresisLower: HYSTERESIS,
                channel: source,
                thresholdMode: sys::PS6000_LEVEL,
            })
            .collect();

        let edge = match triggers.direction {
            TriggerDirection::Rising => sys::PS6000_RISING,
            TriggerDirection::Falling => sys::PS6000_FALLING,
        };
        let direction = |active: bool| if active { edge } else { sys::PS6000_NONE };

        PicoStatus::check(unsafe {
            sys::ps6000SetTriggerChannelConditions(
                self.handle,
                conditions.as_mut_ptr(),
                conditions.len() as i16,
            )
        })?;
        PicoStatus::check(unsafe {
            sys::ps6000SetTriggerChannelDirections(
                self.handle,
                direction(triggers.channels[0].is_some()),
                direction(triggers.channels[1].is_some()),
                direction(triggers.channels[2].is_some()),
                direction(triggers.channels[3].is_some()),
                sys::PS6000_NONE,
                direction(triggers.aux.is_some()),
            )
        })?;
        PicoStatus::check(unsafe {
            sys::ps6000SetTriggerChannelProperties(
                self.handle,
                properties.as_mut_ptr(),
                properties.len() as i16,
                0,
                triggers.auto_trigger_ms,
            )
        })
    }

    fn allocate_buffers(&mut self, layout: &BufferLayout) -> Result<(), PicoStatus> {
        let mut max_samples = 0;
        PicoStatus::check(unsafe {
            sys::ps6000MemorySegments(self.handle, layout.waveforms, &mut max_samples)
        })?;
        PicoStatus::check(unsafe { sys::ps6000SetNoOfCaptures(self.handle, layout.waveforms) })?;
        debug!("{} segments of up to {max_samples} samples", layout.waveforms);

        for ch in Channel::ALL {
            let Some(len) = layout.lengths[ch.index()] else {
                self.buffers[ch.index()].clear();
                continue;
            };
            let mut waveforms = Vec::with_capacity(layout.waveforms as usize);
            for segment in 0..layout.waveforms {
                let mut buffer = vec![0i16; len as usize];
                PicoStatus::check(unsafe {
                    sys::ps6000SetDataBufferBulk(
                        self.handle,
                        sdk_channel(ch),
                        buffer.as_mut_ptr(),
                        len,
                        segment,
                        sys::PS6000_RATIO_MODE_NONE,
                    )
                })?;
                // moving the Vec keeps its heap allocation where the driver expects it
                waveforms.push(buffer);
            }
            self.buffers[ch.index()] = waveforms;
        }
        Ok(())
    }

    fn run_rapid_block(&mut self, capture: &BlockCapture) -> Result<Captures, PicoStatus> {
        let mut indisposed_ms = 0;
        PicoStatus::check(unsafe {
            sys::ps6000RunBlock(
                self.handle,
                capture.pre_trigger,
                capture.post_trigger,
                capture.timebase,
                OVERSAMPLE,
                &mut indisposed_ms,
                0,
                None,
                ptr::null_mut(),
            )
        })?;

        let mut ready = 0;
        loop {
            PicoStatus::check(unsafe { sys::ps6000IsReady(self.handle, &mut ready) })?;
            if ready != 0 {
                break;
            }
            sleep(POLL_INTERVAL);
        }

        let mut samples = capture.pre_trigger + capture.post_trigger;
        let mut overflow = vec![0i16; capture.waveforms as usize];
        PicoStatus::check(unsafe {
            sys::ps6000GetValuesBulk(
                self.handle,
                &mut samples,
                0,
                capture.waveforms.saturating_sub(1),
                1,
                sys::PS6000_RATIO_MODE_NONE,
                overflow.as_mut_ptr(),
            )
        })?;
        PicoStatus::check(unsafe { sys::ps6000Stop(self.handle) })?;

        if let Some(segment) = overflow.iter().position(|&flags| flags != 0) {
            warn!("input over range in segment {segment} (flags {:#06b})", overflow[segment]);
        }

        let mut captures = Captures::default();
        for ch in Channel::ALL {
            let waveforms = mem::take(&mut self.buffers[ch.index()]);
            if !waveforms.is_empty() {
                captures.insert(ch, waveforms);
            }
        }
        Ok(captures)
    }

    fn close(&mut self) -> Result<(), PicoStatus> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        PicoStatus::check(unsafe { sys::ps6000CloseUnit(self.handle) })
    }
}

impl Drop for Ps6000Unit {
    fn drop(&mut self) {
        if !self.closed {
            if let Err(status) = self.close() {
                warn!("closing handle {} failed: {status}", self.handle);
            }
        }
    }
}

fn unit_info(handle: i16, info: sys::PICO_INFO) -> Result<String, PicoStatus> {
    let mut buffer = vec![0u8; INFO_LEN as usize];
    let mut required = 0;
    PicoStatus::check(unsafe {
        sys::ps6000GetUnitInfo(
            handle,
            buffer.as_mut_ptr() as *mut c_char,
            INFO_LEN,
            &mut required,
            info,
        )
    })?;
    buffer.retain(|&b| b != 0);
    Ok(String::from_utf8_lossy(&buffer).into_owned())
}

fn sdk_channel(channel: Channel) -> sys::PS6000_CHANNEL {
    match channel {
        Channel::A => sys::PS6000_CHANNEL_A,
        Channel::B => sys::PS6000_CHANNEL_B,
        Channel::C => sys::PS6000_CHANNEL_C,
        Channel::D => sys::PS6000_CHANNEL_D,
    }
}

fn condition_on(source: sys::PS6000_CHANNEL) -> sys::PS6000_TRIGGER_CONDITIONS {
    let state = |channel| {
        if channel == source {
            sys::PS6000_CONDITION_TRUE
        } else {
            sys::PS6000_CONDITION_DONT_CARE
        }
    };
    sys::PS6000_TRIGGER_CONDITIONS {
        channelA: state(sys::PS6000_CHANNEL_A),
        channelB: state(sys::PS6000_CHANNEL_B),
        channelC: state(sys::PS6000_CHANNEL_C),
        channelD: state(sys::PS6000_CHANNEL_D),
        external: sys::PS6000_CONDITION_DONT_CARE,
        aux: state(sys::PS6000_TRIGGER_AUX),
        pulseWidthQualifier: sys::PS6000_CONDITION_DONT_CARE,
    }
}

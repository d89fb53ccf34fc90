use crate::channel::{Channel, ChannelMask, ChannelSetting, TriggerMask, VoltageRange};
use crate::driver::{BlockCapture, BufferLayout, Captures, TriggerDirection, TriggerSettings, Unit};
use crate::header::FileHeader;
use crate::{Error, Result};
use log::{debug, info};
use std::{
    fs::File,
    io::{self, BufWriter, Write},
    path::Path,
};

/// Largest timebase code the file header can hold.
pub const MAX_TIMEBASE: u32 = 0x0F;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelConfig {
    pub setting: ChannelSetting,
    /// Trigger level; 0 leaves the channel out of the trigger.
    pub trigger_mv: i16,
    /// Samples kept after the trigger point, excluding pre-trigger samples.
    pub post_trigger: u16,
}

/// Everything one acquisition run needs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AcquisitionConfig {
    pub channels: [ChannelConfig; 4],
    pub aux_trigger_mv: i16,
    pub timebase: u32,
    pub waveforms: u32,
    pub pre_trigger: u16,
    /// Empty or `None` opens the first unit found.
    pub serial: Option<String>,
    pub direction: TriggerDirection,
    pub auto_trigger_ms: i32,
}

impl AcquisitionConfig {
    pub fn validate(&self) -> Result<()> {
        if self.waveforms == 0 {
            return Err(Error::Config("at least one waveform is required".into()));
        }
        for ch in Channel::ALL {
            let post = self.channels[ch.index()].post_trigger;
            if u32::from(self.pre_trigger) + u32::from(post) > u32::from(u16::MAX) {
                return Err(Error::Config(format!(
                    "channel {ch}: {} pre + {post} post trigger samples do not fit the header",
                    self.pre_trigger
                )));
            }
        }
        if self.timebase > MAX_TIMEBASE {
            return Err(Error::Config(format!(
                "timebase {} does not fit the 4 bit header field (0..={MAX_TIMEBASE})",
                self.timebase
            )));
        }
        Ok(())
    }

    pub fn settings(&self) -> [ChannelSetting; 4] {
        self.channels.map(|ch| ch.setting)
    }

    pub fn trigger_levels(&self) -> [i16; 4] {
        self.channels.map(|ch| ch.trigger_mv)
    }

    pub fn post_trigger(&self) -> [u16; 4] {
        self.channels.map(|ch| ch.post_trigger)
    }

    /// Size of the file a successful run produces.
    pub fn expected_file_len(&self) -> u64 {
        let data: u64 = Channel::ALL
            .iter()
            .filter(|ch| self.channels[ch.index()].setting.is_enabled())
            .map(|ch| {
                let samples =
                    u64::from(self.pre_trigger) + u64::from(self.channels[ch.index()].post_trigger);
                u64::from(self.waveforms) * samples * 2
            })
            .sum();
        crate::header::HEADER_LEN as u64 + data
    }
}

/// Configuration state and captured buffers of one run on one unit.
pub struct Session<U: Unit> {
    unit: U,
    active_channels: ChannelMask,
    ranges: [Option<VoltageRange>; 4],
    active_triggers: TriggerMask,
    thresholds: [i16; 4],
    aux_threshold: i16,
    timebase: u32,
    pre_trigger: u16,
    post_trigger: [u16; 4],
    waveforms: u32,
    captures: Option<Captures>,
}

impl<U: Unit> Session<U> {
    pub fn new(unit: U) -> Self {
        Self {
            unit,
            active_channels: ChannelMask::empty(),
            ranges: [None; 4],
            active_triggers: TriggerMask::empty(),
            thresholds: [0; 4],
            aux_threshold: 0,
            timebase: 0,
            pre_trigger: 0,
            post_trigger: [0; 4],
            waveforms: 0,
            captures: None,
        }
    }

    pub fn unit(&self) -> &U {
        &self.unit
    }

    pub fn active_channels(&self) -> ChannelMask {
        self.active_channels
    }

    pub fn active_triggers(&self) -> TriggerMask {
        self.active_triggers
    }

    pub fn configure_channels(&mut self, settings: [ChannelSetting; 4]) -> Result<()> {
        let mut active = ChannelMask::empty();
        for ch in Channel::ALL {
            let setting = settings[ch.index()];
            if setting.is_enabled() {
                active |= ch.mask();
            }
            self.unit
                .set_channel(ch, setting)
                .map_err(Error::driver("set channel"))?;
            debug!("channel {ch}: {setting:?}");
        }
        self.active_channels = active;
        self.ranges = settings.map(ChannelSetting::range);
        Ok(())
    }

    /// Needs the channel ranges, so runs after [`Session::configure_channels`].
    pub fn configure_triggers(
        &mut self,
        trigger_mv: [i16; 4],
        aux_mv: i16,
        direction: TriggerDirection,
        auto_trigger_ms: i32,
    ) -> Result<()> {
        let mut active = TriggerMask::empty();
        let mut settings = TriggerSettings {
            direction,
            auto_trigger_ms,
            ..Default::default()
        };

        for ch in Channel::ALL {
            let mv = trigger_mv[ch.index()];
            let threshold = match self.ranges[ch.index()] {
                Some(range) if mv != 0 && self.active_channels.contains(ch.mask()) => {
                    active |= ch.trigger();
                    let adc = self.unit.mv_to_adc(mv, range);
                    settings.channels[ch.index()] = Some(adc);
                    debug!("trigger {ch}: {mv} mV -> {adc} ADC");
                    adc
                }
                _ => 0,
            };
            self.thresholds[ch.index()] = threshold;
        }

        // aux has no data channel, so a non-zero level is enough to enable it
        self.aux_threshold = if aux_mv != 0 {
            active |= TriggerMask::AUX;
            let adc = self.unit.mv_to_adc(aux_mv, VoltageRange::AUX);
            settings.aux = Some(adc);
            debug!("trigger aux: {aux_mv} mV -> {adc} ADC");
            adc
        } else {
            0
        };

        self.active_triggers = active;
        self.unit
            .set_triggers(&settings)
            .map_err(Error::driver("set triggers"))
    }

    pub fn configure_acquisition(
        &mut self,
        timebase: u32,
        waveforms: u32,
        pre_trigger: u16,
        post_trigger: [u16; 4],
    ) -> Result<()> {
        self.timebase = timebase;
        self.waveforms = waveforms;
        self.pre_trigger = pre_trigger;
        self.post_trigger = post_trigger;

        let mut lengths = [None; 4];
        for ch in self.active_channels.channels() {
            lengths[ch.index()] = Some(self.samples_per_waveform(ch));
        }
        let layout = BufferLayout { waveforms, lengths };
        debug!("allocating buffers: {layout:?}");
        self.unit
            .allocate_buffers(&layout)
            .map_err(Error::driver("allocate buffers"))
    }

    /// Arms the unit and blocks until every waveform is captured.
    pub fn run(&mut self) -> Result<()> {
        // one post-trigger window for all channels; shorter channels are cut when written
        let post_trigger = self.post_trigger.iter().copied().max().unwrap_or(0);
        let capture = BlockCapture {
            pre_trigger: u32::from(self.pre_trigger),
            post_trigger: u32::from(post_trigger),
            timebase: self.timebase,
            waveforms: self.waveforms,
        };
        info!(
            "capturing {} waveforms ({} pre + {} post samples, timebase {})",
            capture.waveforms, capture.pre_trigger, capture.post_trigger, capture.timebase
        );
        let captures = self
            .unit
            .run_rapid_block(&capture)
            .map_err(Error::Capture)?;
        self.captures = Some(captures);
        Ok(())
    }

    pub fn header(&self) -> FileHeader {
        FileHeader {
            timebase: (self.timebase & MAX_TIMEBASE) as u8,
            active_channels: self.active_channels,
            active_triggers: self.active_triggers,
            aux_threshold: self.aux_threshold,
            thresholds: self.thresholds,
            ranges: self.ranges,
            total_samples: self.post_trigger.map(|post| self.pre_trigger.saturating_add(post)),
            pre_trigger: self.pre_trigger,
            waveforms: self.waveforms,
            model: self.unit.model().to_owned(),
            serial: self.unit.serial().to_owned(),
        }
    }

    pub fn write_header<W: Write>(&self, writer: &mut W) -> io::Result<()> {
        self.header().write_to(writer)
    }

    /// Streams every captured buffer, channel-major, dropping each one once written.
    pub fn write_data<W: Write>(&mut self, writer: &mut W) -> io::Result<u64> {
        let mut captures = self
            .captures
            .take()
            .ok_or_else(|| io::Error::other("no completed capture to write"))?;

        let mut written = 0;
        let mut bytes = Vec::new();
        for ch in self.active_channels.channels() {
            let samples = self.samples_per_waveform(ch) as usize;
            let buffers = captures.take(ch);
            if buffers.len() != self.waveforms as usize {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    format!(
                        "channel {ch}: {} buffers captured, {} expected",
                        buffers.len(),
                        self.waveforms
                    ),
                ));
            }
            for buffer in buffers {
                if buffer.len() < samples {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidData,
                        format!("channel {ch}: buffer of {} samples, {samples} expected", buffer.len()),
                    ));
                }
                bytes.clear();
                bytes.extend(buffer[..samples].iter().flat_map(|s| s.to_le_bytes()));
                writer.write_all(&bytes)?;
                written += bytes.len() as u64;
            }
            debug!("channel {ch}: wrote {} waveforms", self.waveforms);
        }
        Ok(written)
    }

    /// Runs the whole sequence: configure, capture, then write `output`.
    pub fn record(&mut self, config: &AcquisitionConfig, output: &Path) -> Result<()> {
        config.validate()?;
        self.configure_channels(config.settings())?;
        self.configure_triggers(
            config.trigger_levels(),
            config.aux_trigger_mv,
            config.direction,
            config.auto_trigger_ms,
        )?;
        self.configure_acquisition(
            config.timebase,
            config.waveforms,
            config.pre_trigger,
            config.post_trigger(),
        )?;
        self.run()?;
        info!("collected data");

        let file = File::create(output).map_err(Error::io(output))?;
        let mut writer = BufWriter::new(file);
        self.write_header(&mut writer).map_err(Error::io(output))?;
        let data = self.write_data(&mut writer).map_err(Error::io(output))?;
        writer.flush().map_err(Error::io(output))?;
        info!("wrote {data} bytes of samples to {}", output.display());
        Ok(())
    }

    pub fn close(mut self) -> Result<()> {
        self.captures = None;
        self.unit.close().map_err(Error::driver("close unit"))
    }

    fn samples_per_waveform(&self, channel: Channel) -> u32 {
        u32::from(self.pre_trigger) + u32::from(self.post_trigger[channel.index()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::mv_to_adc;
    use crate::driver::Driver;
    use crate::header::HEADER_LEN;
    use crate::sim::{SimDriver, SimUnit};

    fn session(driver: &SimDriver) -> Session<SimUnit> {
        Session::new(driver.open_unit(None).unwrap())
    }

    const A_B_ENABLED: [ChannelSetting; 4] = [
        ChannelSetting::Enabled(VoltageRange::MV50),
        ChannelSetting::Enabled(VoltageRange::V2),
        ChannelSetting::Disabled,
        ChannelSetting::Disabled,
    ];

    #[test]
    fn enabled_channels_become_active() {
        let driver = SimDriver::new();
        let mut session = session(&driver);
        session.configure_channels(A_B_ENABLED).unwrap();

        assert_eq!(session.active_channels(), ChannelMask::A | ChannelMask::B);
        assert_eq!(driver.log().channels, A_B_ENABLED.map(Some));
    }

    #[test]
    fn trigger_needs_level_and_active_channel() {
        let driver = SimDriver::new();
        let mut session = session(&driver);
        session.configure_channels(A_B_ENABLED).unwrap();
        session
            .configure_triggers([20, 0, 30, 0], 0, TriggerDirection::Falling, 0)
            .unwrap();

        assert_eq!(session.active_triggers(), TriggerMask::A);
        let header = session.header();
        assert_eq!(header.thresholds, [mv_to_adc(20, VoltageRange::MV50), 0, 0, 0]);
        assert_eq!(header.aux_threshold, 0);

        let triggers = driver.log().triggers.unwrap();
        assert_eq!(triggers.channels, [Some(13004), None, None, None]);
        assert_eq!(triggers.aux, None);
        assert_eq!(triggers.direction, TriggerDirection::Falling);
    }

    #[test]
    fn aux_trigger_ignores_channel_state() {
        let driver = SimDriver::new();
        let mut session = session(&driver);
        session
            .configure_channels([ChannelSetting::Disabled; 4])
            .unwrap();
        session
            .configure_triggers([10, 10, 10, 10], -250, TriggerDirection::Rising, 100)
            .unwrap();

        assert_eq!(session.active_triggers(), TriggerMask::AUX);
        assert_eq!(session.header().aux_threshold, -8128);
        assert_eq!(session.header().thresholds, [0; 4]);
        let triggers = driver.log().triggers.unwrap();
        assert_eq!(triggers.sources(), 1);
        assert_eq!(triggers.auto_trigger_ms, 100);
    }

    #[test]
    fn buffers_sized_per_channel_and_window_uses_longest() {
        let driver = SimDriver::new();
        let mut session = session(&driver);
        session.configure_channels(A_B_ENABLED).unwrap();
        session
            .configure_triggers([0; 4], 0, TriggerDirection::Rising, 0)
            .unwrap();
        session
            .configure_acquisition(3, 4, 50, [100, 20, 700, 0])
            .unwrap();
        session.run().unwrap();

        let log = driver.log();
        assert_eq!(
            log.layout.unwrap(),
            BufferLayout {
                waveforms: 4,
                lengths: [Some(150), Some(70), None, None],
            }
        );
        // disabled C still takes part in the capture window
        assert_eq!(
            log.capture.unwrap(),
            BlockCapture {
                pre_trigger: 50,
                post_trigger: 700,
                timebase: 3,
                waveforms: 4,
            }
        );
        assert_eq!(session.header().total_samples, [150, 70, 750, 50]);
    }

    #[test]
    fn data_is_channel_then_waveform_major() {
        let driver = SimDriver::new();
        let mut session = session(&driver);
        session.configure_channels(A_B_ENABLED).unwrap();
        session
            .configure_triggers([0; 4], 0, TriggerDirection::Rising, 0)
            .unwrap();
        session.configure_acquisition(1, 2, 5, [10, 3, 0, 0]).unwrap();
        session.run().unwrap();

        let expected: Vec<u8> = {
            let captures = session.captures.as_ref().unwrap();
            [Channel::A, Channel::B]
                .iter()
                .flat_map(|&ch| captures.waveforms(ch).iter().flatten())
                .flat_map(|s| s.to_le_bytes())
                .collect()
        };

        let mut out = Vec::new();
        session.write_header(&mut out).unwrap();
        let written = session.write_data(&mut out).unwrap();

        assert_eq!(written, (2 * 15 + 2 * 8) * 2);
        assert_eq!(&out[HEADER_LEN..], &expected[..]);
        // buffers are gone once written
        assert!(session.captures.is_none());
        assert!(session.write_data(&mut Vec::new()).is_err());
    }

    #[test]
    fn short_buffer_is_rejected() {
        let driver = SimDriver::new();
        let mut session = session(&driver);
        session.configure_channels(A_B_ENABLED).unwrap();
        session.configure_acquisition(1, 1, 5, [10, 3, 0, 0]).unwrap();

        let mut captures = Captures::default();
        captures.insert(Channel::A, vec![vec![0; 15]]);
        captures.insert(Channel::B, vec![vec![0; 4]]);
        session.captures = Some(captures);

        let err = session.write_data(&mut Vec::new()).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn oversized_window_is_rejected() {
        let config = AcquisitionConfig {
            waveforms: 1,
            pre_trigger: 60_000,
            channels: [
                ChannelConfig {
                    post_trigger: 6_000,
                    ..Default::default()
                },
                ChannelConfig::default(),
                ChannelConfig::default(),
                ChannelConfig::default(),
            ],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn timebase_must_fit_header() {
        let mut config = AcquisitionConfig {
            waveforms: 1,
            timebase: MAX_TIMEBASE,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
        config.timebase = 18;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}

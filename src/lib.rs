mod channel;
mod config;
mod driver;
mod error;
mod header;
#[cfg(feature = "ps6000")]
mod ps6000;
#[cfg(feature = "python")]
mod python;
mod reader;
mod session;
pub mod sim;
mod status;

pub use channel::{
    adc_to_mv, mv_to_adc, Channel, ChannelMask, ChannelSetting, TriggerMask, VoltageRange,
    DISABLED_RANGE_CODE, MAX_ADC_VALUE,
};
pub use config::{
    AcquisitionSettings, ChannelEntry, ChannelSettings, DeviceSettings, LogSettings, RunConfig,
};
pub use driver::{
    BlockCapture, BufferLayout, Captures, Driver, Enumeration, TriggerDirection, TriggerSettings,
    Unit,
};
pub use error::{Error, Result};
pub use header::{FileHeader, HEADER_LEN, MODEL_LEN, SERIAL_LEN};
#[cfg(feature = "ps6000")]
pub use ps6000::{Ps6000Driver, Ps6000Unit};
pub use reader::{moving_average, read_file, read_header, ChannelSummary, DataFile, Peak};
pub use session::{AcquisitionConfig, ChannelConfig, Session, MAX_TIMEBASE};
pub use status::PicoStatus;

use log::{info, warn};
use std::path::Path;

/// Size of the buffer the driver writes the serial listing into.
pub const SERIAL_BUFFER_LEN: usize = 128;

/// Connected units as reported by the driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialList {
    pub count: u16,
    /// Comma separated serial numbers.
    pub raw: String,
}

impl SerialList {
    pub fn serials(&self) -> impl Iterator<Item = &str> {
        self.raw.split(',').map(str::trim).filter(|s| !s.is_empty())
    }
}

/// Opens a unit, records one rapid block run into `output` and closes the unit again.
///
/// The unit is closed on every path; when the run itself failed, a failure to close is only
/// logged so the original error reaches the caller.
pub fn run_daq<D: Driver>(
    driver: &D,
    output: impl AsRef<Path>,
    config: &AcquisitionConfig,
) -> Result<()> {
    let output = output.as_ref();
    config.validate()?;

    let serial = config.serial.as_deref().filter(|s| !s.is_empty());
    let unit = driver.open_unit(serial).map_err(|status| Error::Open {
        serial: serial.map(str::to_owned),
        status,
    })?;
    info!("opened {} {}", unit.model(), unit.serial());

    let mut session = Session::new(unit);
    let result = session.record(config, output);
    let closed = session.close();
    match (result, closed) {
        (Ok(()), closed) => {
            closed?;
            info!("run complete: {}", output.display());
            Ok(())
        }
        (Err(e), Ok(())) => Err(e),
        (Err(e), Err(close_err)) => {
            warn!("{close_err} while handling: {e}");
            Err(e)
        }
    }
}

/// Lists connected units. A listing that does not fit [`SERIAL_BUFFER_LEN`] is an error
/// rather than a silently shortened list.
pub fn get_serials<D: Driver>(driver: &D) -> Result<SerialList> {
    let found = driver
        .enumerate_units(SERIAL_BUFFER_LEN)
        .map_err(Error::driver("enumerate units"))?;
    if found.required > SERIAL_BUFFER_LEN {
        return Err(Error::SerialListOverflow {
            capacity: SERIAL_BUFFER_LEN,
            required: found.required,
        });
    }
    Ok(SerialList {
        count: found.count,
        raw: found.listing,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::{SimCall, SimDriver, SIM_MODEL, SIM_SERIAL};

    fn channel(range: VoltageRange, trigger_mv: i16, post_trigger: u16) -> ChannelConfig {
        ChannelConfig {
            setting: ChannelSetting::Enabled(range),
            trigger_mv,
            post_trigger,
        }
    }

    /// A and B active, C and D disabled.
    fn two_channel_config() -> AcquisitionConfig {
        AcquisitionConfig {
            channels: [
                channel(VoltageRange::MV50, 10, 400),
                channel(VoltageRange::MV200, 0, 200),
                ChannelConfig {
                    post_trigger: 300,
                    ..Default::default()
                },
                ChannelConfig::default(),
            ],
            aux_trigger_mv: 0,
            timebase: 2,
            waveforms: 10,
            pre_trigger: 100,
            ..Default::default()
        }
    }

    #[test]
    fn two_channel_run_has_expected_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.dat");
        let driver = SimDriver::new();
        let config = two_channel_config();

        run_daq(&driver, &path, &config).unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 16052);
        assert_eq!(config.expected_file_len(), 16052);
        assert_eq!(driver.log().closed, 1);
    }

    #[test]
    fn header_reads_back_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.dat");
        let mut config = two_channel_config();
        config.aux_trigger_mv = 500;
        config.channels[3].trigger_mv = 20;

        run_daq(&SimDriver::new(), &path, &config).unwrap();

        let data = read_file(&path).unwrap();
        let header = &data.header;
        assert_eq!(header.timebase, 2);
        assert_eq!(header.active_channels, ChannelMask::A | ChannelMask::B);
        assert_eq!(header.active_triggers, TriggerMask::A | TriggerMask::AUX);
        assert_eq!(header.thresholds, [mv_to_adc(10, VoltageRange::MV50), 0, 0, 0]);
        assert_eq!(header.aux_threshold, mv_to_adc(500, VoltageRange::AUX));
        assert_eq!(
            header.ranges,
            [Some(VoltageRange::MV50), Some(VoltageRange::MV200), None, None]
        );
        assert_eq!(header.total_samples, [500, 300, 400, 100]);
        assert_eq!(header.pre_trigger, 100);
        assert_eq!(header.waveforms, 10);
        assert_eq!(header.model, SIM_MODEL);
        assert_eq!(header.serial, SIM_SERIAL);

        assert_eq!(data.waveforms(Channel::A).len(), 10);
        assert!(data.waveforms(Channel::A).iter().all(|wf| wf.len() == 500));
        assert!(data.waveforms(Channel::B).iter().all(|wf| wf.len() == 300));
        assert!(data.waveforms(Channel::C).is_empty());
    }

    #[test]
    fn all_channels_disabled_writes_header_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.dat");
        let config = AcquisitionConfig {
            waveforms: 5,
            pre_trigger: 10,
            aux_trigger_mv: 100,
            ..Default::default()
        };

        run_daq(&SimDriver::new(), &path, &config).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(bytes[0] & 0x0F, 0);
        // aux still triggers without any active channel
        assert_eq!(bytes[1], TriggerMask::AUX.bits());
    }

    #[test]
    fn open_failure_names_serial() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = two_channel_config();
        config.serial = Some("ZZ999/0009".into());
        let driver = SimDriver::new();

        let err = run_daq(&driver, dir.path().join("x.dat"), &config).unwrap_err();
        assert!(matches!(
            err,
            Error::Open {
                status: PicoStatus::NotFound,
                ..
            }
        ));
        assert!(err.to_string().contains("ZZ999/0009"));
        assert_eq!(driver.log().closed, 0);
    }

    #[test]
    fn empty_serial_opens_first_unit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = two_channel_config();
        config.serial = Some(String::new());
        let driver = SimDriver::new();

        run_daq(&driver, dir.path().join("x.dat"), &config).unwrap();
        assert_eq!(driver.log().opened.as_deref(), Some(SIM_SERIAL));
    }

    #[test]
    fn every_failure_closes_the_unit_once() {
        let failing = [
            (SimCall::SetChannel, PicoStatus::InvalidVoltageRange),
            (SimCall::SetTriggers, PicoStatus::InvalidTriggerChannel),
            (SimCall::AllocateBuffers, PicoStatus::TooManySegments),
            (SimCall::RunRapidBlock, PicoStatus::InvalidTimebase),
        ];
        for (call, status) in failing {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("fail.dat");
            let driver = SimDriver::new().fail_on(call, status);

            let err = run_daq(&driver, &path, &two_channel_config()).unwrap_err();
            match (call, err) {
                (SimCall::RunRapidBlock, Error::Capture(s)) => assert_eq!(s, status),
                (_, Error::Driver { status: s, .. }) => assert_eq!(s, status),
                (call, err) => panic!("{call:?} produced {err:?}"),
            }
            assert_eq!(driver.log().closed, 1, "{call:?}");
            // nothing is written before the capture completes
            assert!(!path.exists());
        }
    }

    #[test]
    fn unwritable_output_closes_the_unit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("run.dat");
        let driver = SimDriver::new();

        let err = run_daq(&driver, &path, &two_channel_config()).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
        assert_eq!(driver.log().closed, 1);
    }

    #[test]
    fn close_failure_after_success_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let driver = SimDriver::new().fail_on(SimCall::Close, PicoStatus::InvalidHandle);

        let err = run_daq(&driver, dir.path().join("run.dat"), &two_channel_config()).unwrap_err();
        assert!(matches!(
            err,
            Error::Driver {
                call: "close unit",
                status: PicoStatus::InvalidHandle
            }
        ));
    }

    #[test]
    fn invalid_config_never_opens() {
        let dir = tempfile::tempdir().unwrap();
        let driver = SimDriver::new();
        let mut config = two_channel_config();
        config.waveforms = 0;

        assert!(matches!(
            run_daq(&driver, dir.path().join("x.dat"), &config),
            Err(Error::Config(_))
        ));
        assert_eq!(driver.log().opened, None);
    }

    #[test]
    fn oversized_timebase_never_opens() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tb.dat");
        let driver = SimDriver::new();
        let mut config = two_channel_config();
        config.timebase = 18;

        assert!(matches!(
            run_daq(&driver, &path, &config),
            Err(Error::Config(_))
        ));
        assert_eq!(driver.log().opened, None);
        assert_eq!(driver.log().capture, None);
        assert!(!path.exists());
    }

    #[test]
    fn header_timebase_matches_capture() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tb.dat");
        let driver = SimDriver::new();
        let mut config = two_channel_config();
        config.timebase = MAX_TIMEBASE;

        run_daq(&driver, &path, &config).unwrap();
        let captured = driver.log().capture.map(|c| c.timebase);
        assert_eq!(captured, Some(MAX_TIMEBASE));
        assert_eq!(u32::from(read_header(&path).unwrap().timebase), MAX_TIMEBASE);
    }

    #[test]
    fn serials_are_listed() {
        let driver = SimDriver::with_units([("AA111/0001", "6402"), ("BB222/0002", "6404D")]);
        let list = get_serials(&driver).unwrap();
        assert_eq!(list.count, 2);
        assert_eq!(list.raw, "AA111/0001,BB222/0002");
        assert_eq!(
            list.serials().collect::<Vec<_>>(),
            vec!["AA111/0001", "BB222/0002"]
        );
    }

    #[test]
    fn serial_overflow_is_an_error() {
        let serials: Vec<String> = (0..12).map(|i| format!("AB{i:03}/{i:04}")).collect();
        let driver = SimDriver::with_units(serials.iter().map(|s| (s.as_str(), "6404D")));

        let err = get_serials(&driver).unwrap_err();
        assert!(matches!(
            err,
            Error::SerialListOverflow {
                capacity: SERIAL_BUFFER_LEN,
                required: 131
            }
        ));
    }

    #[test]
    fn no_units_gives_empty_list() {
        let driver = SimDriver::with_units(Vec::<(&str, &str)>::new());
        let list = get_serials(&driver).unwrap();
        assert_eq!(list.count, 0);
        assert_eq!(list.serials().count(), 0);
    }
}

use std::fmt;

/// Status code returned by every `libps6000` call.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum PicoStatus {
    Ok,
    MaxUnitsOpened,
    MemoryFail,
    NotFound,
    FirmwareFail,
    OpenOperationInProgress,
    OperationFailed,
    NotResponding,
    ConfigFail,
    KernelDriverTooOld,
    EepromCorrupt,
    OsNotSupported,
    InvalidHandle,
    InvalidParameter,
    InvalidTimebase,
    InvalidVoltageRange,
    InvalidChannel,
    InvalidTriggerChannel,
    InvalidConditionChannel,
    NoSignalGenerator,
    StreamingFailed,
    BlockModeFailed,
    NullParameter,
    EtsModeSet,
    DataNotAvailable,
    StringBufferTooSmall,
    EtsNotSupported,
    AutoTriggerTimeTooShort,
    BufferStall,
    TooManySamples,
    TooManySegments,
    PulseWidthQualifier,
    Delay,
    SourceDetails,
    Conditions,
    UserCallback,
    DeviceSampling,
    NoSamplesAvailable,
    SegmentOutOfRange,
    Busy,
    Other(u32),
}

impl From<u32> for PicoStatus {
    fn from(value: u32) -> Self {
        match value {
            0x00 => Self::Ok,
            0x01 => Self::MaxUnitsOpened,
            0x02 => Self::MemoryFail,
            0x03 => Self::NotFound,
            0x04 => Self::FirmwareFail,
            0x05 => Self::OpenOperationInProgress,
            0x06 => Self::OperationFailed,
            0x07 => Self::NotResponding,
            0x08 => Self::ConfigFail,
            0x09 => Self::KernelDriverTooOld,
            0x0A => Self::EepromCorrupt,
            0x0B => Self::OsNotSupported,
            0x0C => Self::InvalidHandle,
            0x0D => Self::InvalidParameter,
            0x0E => Self::InvalidTimebase,
            0x0F => Self::InvalidVoltageRange,
            0x10 => Self::InvalidChannel,
            0x11 => Self::InvalidTriggerChannel,
            0x12 => Self::InvalidConditionChannel,
            0x13 => Self::NoSignalGenerator,
            0x14 => Self::StreamingFailed,
            0x15 => Self::BlockModeFailed,
            0x16 => Self::NullParameter,
            0x17 => Self::EtsModeSet,
            0x18 => Self::DataNotAvailable,
            0x19 => Self::StringBufferTooSmall,
            0x1A => Self::EtsNotSupported,
            0x1B => Self::AutoTriggerTimeTooShort,
            0x1C => Self::BufferStall,
            0x1D => Self::TooManySamples,
            0x1E => Self::TooManySegments,
            0x1F => Self::PulseWidthQualifier,
            0x20 => Self::Delay,
            0x21 => Self::SourceDetails,
            0x22 => Self::Conditions,
            0x23 => Self::UserCallback,
            0x24 => Self::DeviceSampling,
            0x25 => Self::NoSamplesAvailable,
            0x26 => Self::SegmentOutOfRange,
            0x27 => Self::Busy,
            other => Self::Other(other),
        }
    }
}

impl PicoStatus {
    /// Turns a raw return code into `Ok(())` or the failing status.
    pub fn check(code: u32) -> Result<(), PicoStatus> {
        match PicoStatus::from(code) {
            PicoStatus::Ok => Ok(()),
            status => Err(status),
        }
    }
}

impl fmt::Display for PicoStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Other(code) => write!(f, "PICO status 0x{code:08X}"),
            status => write!(f, "{status:?}"),
        }
    }
}

impl std::error::Error for PicoStatus {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_codes_map_to_names() {
        assert_eq!(PicoStatus::from(0), PicoStatus::Ok);
        assert_eq!(PicoStatus::from(3), PicoStatus::NotFound);
        assert_eq!(PicoStatus::from(0x0E), PicoStatus::InvalidTimebase);
        assert_eq!(PicoStatus::from(0x27), PicoStatus::Busy);
    }

    #[test]
    fn unknown_codes_keep_their_value() {
        let status = PicoStatus::from(0x1234);
        assert_eq!(status, PicoStatus::Other(0x1234));
        assert_eq!(status.to_string(), "PICO status 0x00001234");
    }

    #[test]
    fn check_passes_only_ok() {
        assert!(PicoStatus::check(0).is_ok());
        assert_eq!(PicoStatus::check(0x0F), Err(PicoStatus::InvalidVoltageRange));
    }
}

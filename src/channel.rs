//! Channels, input ranges and the masks that describe which of them are in use.

use bitflags::bitflags;
use serde::Deserialize;
use std::fmt;

/// Full-scale ADC code of the 6000 series (8-bit ADC scaled to 16 bits).
pub const MAX_ADC_VALUE: i16 = 32512;

/// Range code host scripts use for a disabled channel.
pub const DISABLED_RANGE_CODE: u16 = 99;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    A,
    B,
    C,
    D,
}

impl Channel {
    pub const ALL: [Channel; 4] = [Channel::A, Channel::B, Channel::C, Channel::D];

    pub fn index(self) -> usize {
        match self {
            Self::A => 0,
            Self::B => 1,
            Self::C => 2,
            Self::D => 3,
        }
    }

    pub fn mask(self) -> ChannelMask {
        match self {
            Self::A => ChannelMask::A,
            Self::B => ChannelMask::B,
            Self::C => ChannelMask::C,
            Self::D => ChannelMask::D,
        }
    }

    pub fn trigger(self) -> TriggerMask {
        match self {
            Self::A => TriggerMask::A,
            Self::B => TriggerMask::B,
            Self::C => TriggerMask::C,
            Self::D => TriggerMask::D,
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let letter = match self {
            Self::A => 'A',
            Self::B => 'B',
            Self::C => 'C',
            Self::D => 'D',
        };
        write!(f, "{letter}")
    }
}

bitflags! {
    /// Active channels as stored in the low nibble of the first header byte.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ChannelMask: u8 {
        const A = 0b1000;
        const B = 0b0100;
        const C = 0b0010;
        const D = 0b0001;
    }
}

impl ChannelMask {
    /// Active channels in file order.
    pub fn channels(self) -> impl Iterator<Item = Channel> {
        Channel::ALL
            .into_iter()
            .filter(move |ch| self.contains(ch.mask()))
    }
}

bitflags! {
    /// Active trigger sources; the aux input occupies the lowest bit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct TriggerMask: u8 {
        const A = 0b1_0000;
        const B = 0b0_1000;
        const C = 0b0_0100;
        const D = 0b0_0010;
        const AUX = 0b0_0001;
    }
}

/// Input range codes as understood by `ps6000SetChannel`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum VoltageRange {
    #[serde(rename = "10mV")]
    MV10,
    #[serde(rename = "20mV")]
    MV20,
    #[serde(rename = "50mV")]
    MV50,
    #[serde(rename = "100mV")]
    MV100,
    #[serde(rename = "200mV")]
    MV200,
    #[serde(rename = "500mV")]
    MV500,
    #[serde(rename = "1V")]
    V1,
    #[serde(rename = "2V")]
    V2,
    #[serde(rename = "5V")]
    V5,
    #[serde(rename = "10V")]
    V10,
    #[serde(rename = "20V")]
    V20,
    #[serde(rename = "50V")]
    V50,
}

impl VoltageRange {
    /// The aux trigger input is fixed at +/-1 V.
    pub const AUX: VoltageRange = VoltageRange::V1;

    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::MV10,
            1 => Self::MV20,
            2 => Self::MV50,
            3 => Self::MV100,
            4 => Self::MV200,
            5 => Self::MV500,
            6 => Self::V1,
            7 => Self::V2,
            8 => Self::V5,
            9 => Self::V10,
            10 => Self::V20,
            11 => Self::V50,
            _ => return None,
        })
    }

    /// Full-scale value in millivolts.
    pub fn millivolts(self) -> u32 {
        match self {
            Self::MV10 => 10,
            Self::MV20 => 20,
            Self::MV50 => 50,
            Self::MV100 => 100,
            Self::MV200 => 200,
            Self::MV500 => 500,
            Self::V1 => 1_000,
            Self::V2 => 2_000,
            Self::V5 => 5_000,
            Self::V10 => 10_000,
            Self::V20 => 20_000,
            Self::V50 => 50_000,
        }
    }
}

impl fmt::Display for VoltageRange {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mv = self.millivolts();
        if mv >= 1_000 {
            write!(f, "{}V", mv / 1_000)
        } else {
            write!(f, "{mv}mV")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelSetting {
    #[default]
    Disabled,
    #[serde(untagged)]
    Enabled(VoltageRange),
}

impl ChannelSetting {
    pub fn range(self) -> Option<VoltageRange> {
        match self {
            Self::Disabled => None,
            Self::Enabled(range) => Some(range),
        }
    }

    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Enabled(_))
    }

    /// Decodes the range codes host scripts pass: a device range code, or
    /// [`DISABLED_RANGE_CODE`] for a channel that stays off.
    pub fn from_host_code(code: u16) -> Option<Self> {
        if code == DISABLED_RANGE_CODE {
            return Some(Self::Disabled);
        }
        u8::try_from(code)
            .ok()
            .and_then(VoltageRange::from_code)
            .map(Self::Enabled)
    }
}

/// Converts a level in millivolts to the ADC code for `range`, saturating at the i16 limits.
pub fn mv_to_adc(millivolts: i16, range: VoltageRange) -> i16 {
    let code = i64::from(millivolts) * i64::from(MAX_ADC_VALUE) / i64::from(range.millivolts());
    code.clamp(i64::from(i16::MIN), i64::from(i16::MAX)) as i16
}

pub fn adc_to_mv(code: i16, range: VoltageRange) -> f64 {
    f64::from(code) * f64::from(range.millivolts()) / f64::from(MAX_ADC_VALUE)
}

//! Fixed 52 byte header written in front of the sample data.
//!
//! All multi-byte fields are little-endian and packed:
//!
//! | offset | size | field |
//! |-------:|-----:|-------|
//! | 0  | 1  | timebase (low nibble) << 4, active channel mask |
//! | 1  | 1  | active trigger mask |
//! | 2  | 2  | aux trigger threshold (ADC) |
//! | 4  | 8  | trigger thresholds A..D (ADC) |
//! | 12 | 2  | voltage range codes, one nibble each, A in the top nibble |
//! | 14 | 8  | samples per waveform A..D (pre + post trigger) |
//! | 22 | 2  | pre-trigger samples |
//! | 24 | 4  | number of waveforms |
//! | 28 | 8  | model string |
//! | 36 | 16 | serial string |

use crate::channel::{Channel, ChannelMask, TriggerMask, VoltageRange};
use crate::{Error, Result};
use std::io::{Read, Write};

pub const HEADER_LEN: usize = 52;
pub const MODEL_LEN: usize = 8;
pub const SERIAL_LEN: usize = 16;

const MODEL_OFFSET: usize = 28;
const SERIAL_OFFSET: usize = MODEL_OFFSET + MODEL_LEN;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileHeader {
    /// Only the low nibble is stored.
    pub timebase: u8,
    pub active_channels: ChannelMask,
    pub active_triggers: TriggerMask,
    pub aux_threshold: i16,
    pub thresholds: [i16; 4],
    /// `None` for channels that were not enabled.
    pub ranges: [Option<VoltageRange>; 4],
    pub total_samples: [u16; 4],
    pub pre_trigger: u16,
    pub waveforms: u32,
    pub model: String,
    pub serial: String,
}

impl FileHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut buf = [0u8; HEADER_LEN];
        buf[0] = (self.timebase & 0x0F) << 4 | self.active_channels.bits();
        buf[1] = self.active_triggers.bits();
        buf[2..4].copy_from_slice(&self.aux_threshold.to_le_bytes());
        for (i, threshold) in self.thresholds.iter().enumerate() {
            buf[4 + 2 * i..6 + 2 * i].copy_from_slice(&threshold.to_le_bytes());
        }
        buf[12..14].copy_from_slice(&pack_ranges(&self.ranges).to_le_bytes());
        for (i, total) in self.total_samples.iter().enumerate() {
            buf[14 + 2 * i..16 + 2 * i].copy_from_slice(&total.to_le_bytes());
        }
        buf[22..24].copy_from_slice(&self.pre_trigger.to_le_bytes());
        buf[24..28].copy_from_slice(&self.waveforms.to_le_bytes());
        put_str(&mut buf[MODEL_OFFSET..SERIAL_OFFSET], &self.model);
        put_str(&mut buf[SERIAL_OFFSET..], &self.serial);
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_LEN]) -> Result<Self> {
        let active_channels = ChannelMask::from_bits(buf[0] & 0x0F)
            .ok_or_else(|| Error::Format(format!("bad channel mask {:#04x}", buf[0])))?;
        let active_triggers = TriggerMask::from_bits(buf[1])
            .ok_or_else(|| Error::Format(format!("bad trigger mask {:#04x}", buf[1])))?;

        let packed = u16::from_le_bytes([buf[12], buf[13]]);
        let mut ranges = [None; 4];
        for ch in active_channels.channels() {
            let code = nibble(packed, ch);
            ranges[ch.index()] = Some(VoltageRange::from_code(code).ok_or_else(|| {
                Error::Format(format!("channel {ch} has unknown range code {code}"))
            })?);
        }

        Ok(Self {
            timebase: buf[0] >> 4,
            active_channels,
            active_triggers,
            aux_threshold: i16::from_le_bytes([buf[2], buf[3]]),
            thresholds: std::array::from_fn(|i| i16::from_le_bytes([buf[4 + 2 * i], buf[5 + 2 * i]])),
            ranges,
            total_samples: std::array::from_fn(|i| {
                u16::from_le_bytes([buf[14 + 2 * i], buf[15 + 2 * i]])
            }),
            pre_trigger: u16::from_le_bytes([buf[22], buf[23]]),
            waveforms: u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]),
            model: get_str(&buf[MODEL_OFFSET..SERIAL_OFFSET]),
            serial: get_str(&buf[SERIAL_OFFSET..]),
        })
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> std::io::Result<()> {
        writer.write_all(&self.to_bytes())
    }

    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_LEN];
        reader
            .read_exact(&mut buf)
            .map_err(|e| Error::Format(format!("short header: {e}")))?;
        Self::from_bytes(&buf)
    }

    /// Bytes of sample data that follow the header.
    pub fn data_len(&self) -> u64 {
        self.active_channels
            .channels()
            .map(|ch| u64::from(self.waveforms) * u64::from(self.total_samples[ch.index()]) * 2)
            .sum()
    }

    pub fn post_trigger(&self, channel: Channel) -> u16 {
        self.total_samples[channel.index()].saturating_sub(self.pre_trigger)
    }
}

fn pack_ranges(ranges: &[Option<VoltageRange>; 4]) -> u16 {
    Channel::ALL.iter().fold(0, |packed, &ch| {
        let code = ranges[ch.index()].map_or(0, VoltageRange::code);
        packed | u16::from(code & 0x0F) << nibble_shift(ch)
    })
}

fn nibble(packed: u16, channel: Channel) -> u8 {
    (packed >> nibble_shift(channel) & 0x0F) as u8
}

fn nibble_shift(channel: Channel) -> u32 {
    12 - 4 * channel.index() as u32
}

fn put_str(field: &mut [u8], value: &str) {
    let bytes = value.as_bytes();
    let len = bytes.len().min(field.len());
    field[..len].copy_from_slice(&bytes[..len]);
}

fn get_str(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> FileHeader {
        FileHeader {
            timebase: 2,
            active_channels: ChannelMask::A | ChannelMask::B,
            active_triggers: TriggerMask::A | TriggerMask::AUX,
            aux_threshold: 1625,
            thresholds: [6502, 0, 0, 0],
            ranges: [Some(VoltageRange::MV50), Some(VoltageRange::MV200), None, None],
            total_samples: [500, 300, 100, 100],
            pre_trigger: 100,
            waveforms: 10,
            model: "6404D".into(),
            serial: "IW098/0028".into(),
        }
    }

    #[test]
    fn layout_matches_documented_offsets() {
        let bytes = sample_header().to_bytes();
        assert_eq!(bytes[0], 0x2C);
        assert_eq!(bytes[1], 0b1_0001);
        assert_eq!(&bytes[2..4], &1625i16.to_le_bytes());
        assert_eq!(&bytes[4..6], &6502i16.to_le_bytes());
        assert_eq!(&bytes[6..12], &[0; 6]);
        // A = 50mV (2), B = 200mV (4)
        assert_eq!(&bytes[12..14], &0x2400u16.to_le_bytes());
        assert_eq!(&bytes[14..16], &500u16.to_le_bytes());
        assert_eq!(&bytes[16..18], &300u16.to_le_bytes());
        assert_eq!(&bytes[22..24], &100u16.to_le_bytes());
        assert_eq!(&bytes[24..28], &10u32.to_le_bytes());
        assert_eq!(&bytes[28..33], b"6404D");
        assert_eq!(&bytes[33..36], &[0; 3]);
        assert_eq!(&bytes[36..46], b"IW098/0028");
        assert_eq!(&bytes[46..52], &[0; 6]);
    }

    #[test]
    fn decodes_what_it_encodes() {
        let header = sample_header();
        assert_eq!(FileHeader::from_bytes(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn long_strings_are_truncated() {
        let header = FileHeader {
            model: "6404D-extra-long".into(),
            serial: "0123456789abcdefXYZ".into(),
            ..sample_header()
        };
        let decoded = FileHeader::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(decoded.model, "6404D-ex");
        assert_eq!(decoded.serial, "0123456789abcdef");
    }

    #[test]
    fn data_len_counts_active_channels_only() {
        let header = sample_header();
        assert_eq!(header.data_len(), 10 * 500 * 2 + 10 * 300 * 2);
        assert_eq!(header.post_trigger(Channel::A), 400);
        assert_eq!(header.post_trigger(Channel::B), 200);
    }

    #[test]
    fn unknown_range_code_is_rejected() {
        let mut bytes = sample_header().to_bytes();
        bytes[12..14].copy_from_slice(&0xF000u16.to_le_bytes());
        assert!(matches!(FileHeader::from_bytes(&bytes), Err(Error::Format(_))));
    }

    #[test]
    fn short_input_is_a_format_error() {
        let mut short = &[0u8; 20][..];
        assert!(matches!(FileHeader::read_from(&mut short), Err(Error::Format(_))));
    }
}

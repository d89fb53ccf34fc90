use crate::channel::{adc_to_mv, Channel};
use crate::header::{FileHeader, HEADER_LEN};
use crate::{Error, Result};
use std::{
    fs::File,
    io::{BufReader, Read},
    path::Path,
};

/// A recorded run read back from disk.
#[derive(Debug, Clone, PartialEq)]
pub struct DataFile {
    pub header: FileHeader,
    /// Waveforms per channel, empty for channels that were not recorded.
    pub channels: [Vec<Vec<i16>>; 4],
}

impl DataFile {
    pub fn waveforms(&self, channel: Channel) -> &[Vec<i16>] {
        &self.channels[channel.index()]
    }

    /// One waveform converted to millivolts using the channel's recorded range.
    pub fn millivolts(&self, channel: Channel, waveform: usize) -> Option<Vec<f64>> {
        let range = self.header.ranges[channel.index()]?;
        let samples = self.waveforms(channel).get(waveform)?;
        Some(samples.iter().map(|&s| adc_to_mv(s, range)).collect())
    }

    /// Minimum of every waveform of `channel`, optionally after a centred moving average
    /// of `2 * smooth + 1` samples. Pulses are negative going, so this is the pulse height.
    pub fn peaks(&self, channel: Channel, smooth: usize) -> Vec<Peak> {
        (0..self.waveforms(channel).len())
            .filter_map(|wf| self.millivolts(channel, wf))
            .filter_map(|mv| {
                if smooth == 0 {
                    Peak::of(&mv)
                } else {
                    let averaged = moving_average(&mv, smooth);
                    // keep indices relative to the unsmoothed waveform
                    Peak::of(&averaged).map(|p| Peak {
                        index: p.index + smooth,
                        ..p
                    })
                }
            })
            .collect()
    }

    pub fn summary(&self, channel: Channel, smooth: usize) -> Option<ChannelSummary> {
        let peaks = self.peaks(channel, smooth);
        let (deepest_waveform, deepest) = peaks
            .iter()
            .copied()
            .enumerate()
            .min_by(|(_, a), (_, b)| a.millivolts.total_cmp(&b.millivolts))?;
        let n = peaks.len() as f64;
        Some(ChannelSummary {
            waveforms: peaks.len(),
            deepest,
            deepest_waveform,
            mean_minimum_mv: peaks.iter().map(|p| p.millivolts).sum::<f64>() / n,
            mean_peak_index: peaks.iter().map(|p| p.index as f64).sum::<f64>() / n,
        })
    }
}

/// Lowest sample of a waveform and where it sits; ties go to the first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Peak {
    pub index: usize,
    pub millivolts: f64,
}

impl Peak {
    fn of(samples: &[f64]) -> Option<Peak> {
        samples
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best: Option<Peak>, (index, millivolts)| match best {
                Some(b) if b.millivolts <= millivolts => Some(b),
                _ => Some(Peak { index, millivolts }),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSummary {
    pub waveforms: usize,
    pub deepest: Peak,
    pub deepest_waveform: usize,
    pub mean_minimum_mv: f64,
    pub mean_peak_index: f64,
}

/// Centred mean over `2 * half_width + 1` samples. The output starts at input index
/// `half_width` and is empty when the input is shorter than one window.
pub fn moving_average(samples: &[f64], half_width: usize) -> Vec<f64> {
    let window = 2 * half_width + 1;
    samples
        .windows(window)
        .map(|w| w.iter().sum::<f64>() / window as f64)
        .collect()
}

pub fn read_header(path: impl AsRef<Path>) -> Result<FileHeader> {
    let path = path.as_ref();
    let mut reader = BufReader::new(File::open(path).map_err(Error::io(path))?);
    FileHeader::read_from(&mut reader)
}

pub fn read_file(path: impl AsRef<Path>) -> Result<DataFile> {
    let path = path.as_ref();
    let file = File::open(path).map_err(Error::io(path))?;
    let len = file.metadata().map_err(Error::io(path))?.len();
    let mut reader = BufReader::new(file);

    let header = FileHeader::read_from(&mut reader)?;
    let expected = HEADER_LEN as u64 + header.data_len();
    if len != expected {
        return Err(Error::Format(format!(
            "{} is {len} bytes, header describes {expected}",
            path.display()
        )));
    }

    let mut channels: [Vec<Vec<i16>>; 4] = Default::default();
    let mut bytes = Vec::new();
    for ch in header.active_channels.channels() {
        let samples = usize::from(header.total_samples[ch.index()]);
        bytes.resize(samples * 2, 0);
        let mut waveforms = Vec::with_capacity(header.waveforms as usize);
        for _ in 0..header.waveforms {
            reader.read_exact(&mut bytes).map_err(Error::io(path))?;
            waveforms.push(
                bytes
                    .chunks_exact(2)
                    .map(|b| i16::from_le_bytes([b[0], b[1]]))
                    .collect(),
            );
        }
        channels[ch.index()] = waveforms;
    }

    Ok(DataFile { header, channels })
}

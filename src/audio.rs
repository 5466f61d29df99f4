//! WAV loading for feeding recognition streams.
//!
//! Streams take mono f32 samples in [-1.0, 1.0] at the model's sample rate.
//! [`WavClip`] reads 16-bit PCM WAV data, downmixes and resamples it into
//! that shape, and hands it out in fixed-size chunks the way live capture
//! would.

use crate::error::{Result, VoxholdError};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Mono audio ready to be fed to a stream.
#[derive(Debug, Clone)]
pub struct WavClip {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl WavClip {
    /// Decode WAV data from any reader and convert it to mono at `target_rate`.
    pub fn from_reader(reader: impl Read, target_rate: u32) -> Result<Self> {
        let mut wav_reader = hound::WavReader::new(reader).map_err(|e| VoxholdError::Audio {
            message: format!("Failed to parse WAV file: {}", e),
        })?;

        let spec = wav_reader.spec();
        if spec.channels == 0 {
            return Err(VoxholdError::Audio {
                message: "WAV file declares zero channels".to_string(),
            });
        }

        let raw: Vec<i16> = wav_reader
            .samples::<i16>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| VoxholdError::Audio {
                message: format!("Failed to read WAV samples: {}", e),
            })?;

        let mono = downmix(&pcm16_to_f32(&raw), spec.channels as usize);
        let samples = resample(&mono, spec.sample_rate, target_rate);

        Ok(Self {
            samples,
            sample_rate: target_rate,
        })
    }

    pub fn open(path: &Path, target_rate: u32) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file), target_rate)
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Split into chunks of `chunk_ms` milliseconds (the last may be shorter).
    pub fn chunks(&self, chunk_ms: u32) -> impl Iterator<Item = &[f32]> {
        let chunk_len = ((self.sample_rate as u64 * chunk_ms as u64) / 1000).max(1) as usize;
        self.samples.chunks(chunk_len)
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }
}

/// Convert i16 PCM to f32 normalized to [-1.0, 1.0].
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples
        .iter()
        .map(|&sample| sample as f32 / 32768.0)
        .collect()
}

/// Average interleaved channels into one.
fn downmix(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Simple linear interpolation resampling.
fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = (source_pos - source_idx as f64) as f32;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx];
                let right = samples[source_idx + 1];
                left + (right - left) * fraction
            }
        })
        .collect()
}

//! Sample sources feeding the chunker

use std::path::Path;
use tracing::info;

use crate::error::{AudioError, Result};

/// A continuous mono `f32` sample stream.
///
/// `next_block` may block until samples are available. `None` ends the
/// stream; an empty block means "nothing yet" and lets the caller check for
/// cancellation.
pub trait SampleSource: Send {
    /// Rate of the samples this source yields
    fn sample_rate(&self) -> u32;

    fn next_block(&mut self) -> Option<Vec<f32>>;

    /// Live sources cannot be paused, so a saturated pipeline sheds chunks;
    /// recorded sources are throttled instead.
    fn is_live(&self) -> bool {
        true
    }
}

/// In-memory stream handed out in fixed-size blocks
pub struct MemorySource {
    samples: Vec<f32>,
    position: usize,
    block_size: usize,
    sample_rate: u32,
}

impl MemorySource {
    pub fn new(samples: Vec<f32>, sample_rate: u32, block_size: usize) -> Self {
        Self {
            samples,
            position: 0,
            block_size: block_size.max(1),
            sample_rate,
        }
    }

    /// Read a WAV file, downmixing to mono and scaling integers to [-1, 1]
    pub fn from_wav(path: &Path) -> Result<Self> {
        let mut reader =
            hound::WavReader::open(path).map_err(|e| AudioError::Wav(e.to_string()))?;
        let spec = reader.spec();
        info!(
            "WAV format: {} channels, {} Hz, {} bits",
            spec.channels, spec.sample_rate, spec.bits_per_sample
        );

        let samples: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => reader
                .samples::<f32>()
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| AudioError::Wav(e.to_string()))?,
            hound::SampleFormat::Int => {
                let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / max_val))
                    .collect::<std::result::Result<_, _>>()
                    .map_err(|e| AudioError::Wav(e.to_string()))?
            }
        };

        let channels = spec.channels.max(1) as usize;
        let mono = if channels > 1 {
            samples
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        } else {
            samples
        };

        // 100 ms blocks, like a capture callback would deliver
        let block = (spec.sample_rate as usize / 10).max(1);
        Ok(Self::new(mono, spec.sample_rate, block))
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

impl SampleSource for MemorySource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn next_block(&mut self) -> Option<Vec<f32>> {
        if self.position >= self.samples.len() {
            return None;
        }
        let end = (self.position + self.block_size).min(self.samples.len());
        let block = self.samples[self.position..end].to_vec();
        self.position = end;
        Some(block)
    }

    fn is_live(&self) -> bool {
        false
    }
}

//! Input conditioning: resampling to the pipeline rate and high-pass filtering

use biquad::{Biquad, Coefficients, DirectForm1, ToHertz, Type, Q_BUTTERWORTH_F32};
use rubato::{FftFixedIn, Resampler};
use tracing::{debug, error};

use crate::audio::source::SampleSource;
use crate::error::{AudioError, Result};

const RESAMPLER_CHUNK: usize = 1024;

/// Brings foreign-rate input to the pipeline sample rate and strips DC/rumble.
pub struct AudioConditioner {
    resampler: Option<FftFixedIn<f32>>,
    high_pass_filter: Option<DirectForm1<f32>>,
    source_sample_rate: u32,
    target_sample_rate: u32,
    resample_buffer: Vec<f32>,
}

impl AudioConditioner {
    pub fn new(source_sample_rate: u32, target_sample_rate: u32, high_pass_cutoff: f32) -> Result<Self> {
        let resampler = if source_sample_rate != target_sample_rate {
            debug!(
                "Initializing resampler: {} Hz -> {} Hz",
                source_sample_rate, target_sample_rate
            );
            Some(
                FftFixedIn::<f32>::new(
                    source_sample_rate as usize,
                    target_sample_rate as usize,
                    RESAMPLER_CHUNK,
                    1, // sub-chunks
                    1, // channels
                )
                .map_err(|e| AudioError::Resampling(e.to_string()))?,
            )
        } else {
            None
        };

        let high_pass_filter = if high_pass_cutoff > 0.0 {
            let coeffs = Coefficients::<f32>::from_params(
                Type::HighPass,
                target_sample_rate.hz(),
                high_pass_cutoff.hz(),
                Q_BUTTERWORTH_F32,
            )
            .map_err(|e| AudioError::Filter(format!("High-pass filter error: {:?}", e)))?;
            debug!("High-pass filter: {} Hz", high_pass_cutoff);
            Some(DirectForm1::<f32>::new(coeffs))
        } else {
            None
        };

        Ok(Self {
            resampler,
            high_pass_filter,
            source_sample_rate,
            target_sample_rate,
            resample_buffer: Vec::new(),
        })
    }

    /// Condition a block of samples at the source rate
    pub fn process(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let mut output = if self.resampler.is_some() {
            self.resample(samples)?
        } else {
            samples.to_vec()
        };

        if let Some(ref mut filter) = self.high_pass_filter {
            for sample in output.iter_mut() {
                *sample = filter.run(*sample);
            }
        }

        Ok(output)
    }

    /// Push out samples still held by the resampler at end of stream
    pub fn flush(&mut self) -> Result<Vec<f32>> {
        let Some(resampler) = self.resampler.as_mut() else {
            return Ok(Vec::new());
        };
        if self.resample_buffer.is_empty() {
            return Ok(Vec::new());
        }

        let remaining = self.resample_buffer.len();
        let needed = resampler.input_frames_next();
        self.resample_buffer.resize(needed.max(remaining), 0.0);
        let mut output = self.resample(&[])?;

        // Keep only what the real input accounts for
        let expected = (remaining as u64 * self.target_sample_rate as u64
            / self.source_sample_rate as u64) as usize;
        output.truncate(expected);
        self.resample_buffer.clear();

        if let Some(ref mut filter) = self.high_pass_filter {
            for sample in output.iter_mut() {
                *sample = filter.run(*sample);
            }
        }
        Ok(output)
    }

    fn resample(&mut self, samples: &[f32]) -> Result<Vec<f32>> {
        let resampler = self
            .resampler
            .as_mut()
            .ok_or_else(|| AudioError::Resampling("Resampler not initialized".to_string()))?;

        self.resample_buffer.extend_from_slice(samples);

        let input_frames_needed = resampler.input_frames_next();
        let mut output = Vec::new();

        while self.resample_buffer.len() >= input_frames_needed {
            let chunk: Vec<f32> = self.resample_buffer.drain(..input_frames_needed).collect();

            let result = resampler
                .process(&[chunk], None)
                .map_err(|e| AudioError::Resampling(e.to_string()))?;

            if let Some(resampled) = result.into_iter().next() {
                output.extend(resampled);
            }
        }

        Ok(output)
    }

    pub fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    /// Reset filter state and drop buffered input
    pub fn reset(&mut self) {
        if let Some(ref mut filter) = self.high_pass_filter {
            filter.reset_state();
        }
        self.resample_buffer.clear();
    }
}

/// A [`SampleSource`] passed through an [`AudioConditioner`]
pub struct ConditionedSource<S: SampleSource> {
    inner: S,
    conditioner: AudioConditioner,
    drained: bool,
}

impl<S: SampleSource> ConditionedSource<S> {
    pub fn new(inner: S, target_sample_rate: u32, high_pass_cutoff: f32) -> Result<Self> {
        let conditioner =
            AudioConditioner::new(inner.sample_rate(), target_sample_rate, high_pass_cutoff)?;
        Ok(Self {
            inner,
            conditioner,
            drained: false,
        })
    }
}

impl<S: SampleSource> SampleSource for ConditionedSource<S> {
    fn sample_rate(&self) -> u32 {
        self.conditioner.target_sample_rate()
    }

    fn is_live(&self) -> bool {
        self.inner.is_live()
    }

    fn next_block(&mut self) -> Option<Vec<f32>> {
        if self.drained {
            return None;
        }
        let result = match self.inner.next_block() {
            Some(block) => self.conditioner.process(&block),
            None => {
                self.drained = true;
                self.conditioner.flush()
            }
        };
        match result {
            Ok(block) => Some(block),
            Err(e) => {
                // A broken resampler cannot recover mid-stream; end it
                error!("Conditioning error, ending stream: {}", e);
                self.drained = true;
                None
            }
        }
    }
}

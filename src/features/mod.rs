//! MFCC feature extraction for the acoustic classifier

pub mod mel;

use rustfft::num_complex::Complex32;
use rustfft::{Fft, FftPlanner};
use std::sync::Arc;

use crate::audio::AudioChunk;
use crate::config::FeatureConfig;
use crate::error::FeatureExtractionError;

/// Turns a chunk into a fixed-length vector: the per-coefficient mean of the
/// chunk's MFCC frames.
///
/// All tables are built once in [`FeatureExtractor::new`]; `extract` only reads
/// them, so the same chunk always yields the same vector and one extractor can
/// be shared across threads.
pub struct FeatureExtractor {
    n_fft: usize,
    hop_length: usize,
    n_mfcc: usize,
    fft: Arc<dyn Fft<f32>>,
    window: Vec<f32>,
    filter_bank: Vec<Vec<f32>>,
    dct: Vec<Vec<f32>>,
}

impl FeatureExtractor {
    pub fn new(config: &FeatureConfig, sample_rate: u32) -> Self {
        let mut planner = FftPlanner::<f32>::new();
        let fft = planner.plan_fft_forward(config.n_fft);

        Self {
            n_fft: config.n_fft,
            hop_length: config.hop_length,
            n_mfcc: config.n_mfcc,
            fft,
            window: mel::hann_window(config.n_fft),
            filter_bank: mel::mel_filter_bank(config.n_mels, config.n_fft, sample_rate, config.fmax),
            dct: mel::dct_matrix(config.n_mfcc, config.n_mels),
        }
    }

    /// Length of every vector [`FeatureExtractor::extract`] returns
    pub fn dimension(&self) -> usize {
        self.n_mfcc
    }

    pub fn extract(&self, chunk: &AudioChunk) -> Result<Vec<f32>, FeatureExtractionError> {
        let samples = chunk.valid();
        if samples.is_empty() {
            return Err(FeatureExtractionError::EmptyBuffer {
                chunk_id: chunk.sequence_id,
            });
        }
        if let Some(index) = samples.iter().position(|s| !s.is_finite()) {
            return Err(FeatureExtractionError::NonFinite {
                chunk_id: chunk.sequence_id,
                index,
            });
        }

        // Short buffers still get one zero-padded frame
        let frames = 1 + samples.len().saturating_sub(self.n_fft) / self.hop_length;
        let mut buffer = vec![Complex32::new(0.0, 0.0); self.n_fft];
        let mut power = vec![0.0f32; self.n_fft / 2 + 1];
        let mut log_mel = vec![0.0f32; self.filter_bank.len()];
        let mut sums = vec![0.0f32; self.n_mfcc];

        for frame in 0..frames {
            let start = frame * self.hop_length;
            for (i, slot) in buffer.iter_mut().enumerate() {
                let sample = samples.get(start + i).copied().unwrap_or(0.0);
                *slot = Complex32::new(sample * self.window[i], 0.0);
            }
            self.fft.process(&mut buffer);

            for (p, c) in power.iter_mut().zip(buffer.iter()) {
                *p = c.norm_sqr();
            }

            for (out, filter) in log_mel.iter_mut().zip(&self.filter_bank) {
                let energy: f32 = filter.iter().zip(&power).map(|(w, p)| w * p).sum();
                *out = 10.0 * energy.max(1e-10).log10();
            }

            for (sum, row) in sums.iter_mut().zip(&self.dct) {
                *sum += row.iter().zip(&log_mel).map(|(d, e)| d * e).sum::<f32>();
            }
        }

        let n = frames as f32;
        Ok(sums.into_iter().map(|s| s / n).collect())
    }
}

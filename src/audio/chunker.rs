//! Overlapping fixed-duration windows over a continuous sample stream

use std::sync::Arc;
use std::time::Instant;

use crate::audio::source::SampleSource;
use crate::config::{AudioConfig, PartialPolicy};
use crate::error::{AudioError, Result};

/// One window of audio, the unit every later stage works on.
///
/// Chunks are immutable once produced and travel through the pipeline as
/// `Arc<AudioChunk>`. Consecutive chunks overlap in sample range only.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    /// Strictly increasing within a stream, starting at 0
    pub sequence_id: u64,
    /// Stream time of the first sample (seconds)
    pub start_time: f64,
    /// Stream time just after the last real sample (seconds)
    pub end_time: f64,
    /// Samples, possibly zero-padded when `partial`
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    /// True for a trailing window cut short by the end of the stream
    pub partial: bool,
    /// Number of real (non-padding) samples at the front of `samples`
    pub valid_samples: usize,
    /// Length of a full chunk for this stream
    pub nominal_samples: usize,
    /// When the chunker had every sample up to `end_time`
    pub produced_at: Instant,
}

impl AudioChunk {
    /// The real samples, without padding
    pub fn valid(&self) -> &[f32] {
        &self.samples[..self.valid_samples]
    }

    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }

    /// RMS energy of the real samples
    pub fn rms(&self) -> f32 {
        let valid = self.valid();
        if valid.is_empty() {
            return 0.0;
        }
        (valid.iter().map(|s| s * s).sum::<f32>() / valid.len() as f32).sqrt()
    }

    /// Fraction of a full chunk that holds real audio; partial chunks get
    /// proportionally less trust downstream.
    pub fn coverage(&self) -> f32 {
        if self.nominal_samples == 0 {
            return 0.0;
        }
        (self.valid_samples as f32 / self.nominal_samples as f32).min(1.0)
    }
}

/// Incremental chunker: push samples in, pull chunks out.
pub struct Chunker {
    chunk_samples: usize,
    hop_samples: usize,
    sample_rate: u32,
    policy: PartialPolicy,
    /// Samples starting at the next chunk's first sample
    pending: Vec<f32>,
    /// Absolute index of `pending[0]` in the stream
    pending_start: u64,
    next_sequence: u64,
    finished: bool,
}

impl Chunker {
    pub fn new(config: &AudioConfig) -> Self {
        let chunk_samples = config.chunk_samples().max(1);
        let hop_samples = config.hop_samples().clamp(1, chunk_samples);

        Self {
            chunk_samples,
            hop_samples,
            sample_rate: config.sample_rate,
            policy: config.partial_policy,
            pending: Vec::with_capacity(chunk_samples * 2),
            pending_start: 0,
            next_sequence: 0,
            finished: false,
        }
    }

    /// Append samples from the stream
    pub fn push(&mut self, samples: &[f32]) {
        self.pending.extend_from_slice(samples);
    }

    /// Next complete chunk, if enough samples are buffered
    pub fn next_chunk(&mut self) -> Option<AudioChunk> {
        if self.pending.len() < self.chunk_samples {
            return None;
        }

        let samples = self.pending[..self.chunk_samples].to_vec();
        let chunk = self.make_chunk(samples, self.chunk_samples, false);

        // Advance by hop; the overlap stays buffered for the next window
        self.pending.drain(..self.hop_samples);
        self.pending_start += self.hop_samples as u64;

        Some(chunk)
    }

    /// Signal the end of the stream and collect the trailing partial chunk.
    ///
    /// Call after draining [`Chunker::next_chunk`]. Fails with
    /// `InsufficientSamples` when no chunk was ever produced and the policy is
    /// [`PartialPolicy::Drop`].
    pub fn finish(&mut self) -> Result<Option<AudioChunk>> {
        if self.finished {
            return Ok(None);
        }
        self.finished = true;

        if self.next_sequence == 0 {
            if self.policy == PartialPolicy::Drop {
                return Err(AudioError::InsufficientSamples {
                    needed: self.chunk_samples,
                    available: self.pending.len(),
                }
                .into());
            }
            if self.pending.is_empty() {
                return Ok(None);
            }
            return Ok(Some(self.take_partial()));
        }

        // The first (chunk - hop) buffered samples were already covered by the last chunk
        let covered = self.chunk_samples - self.hop_samples;
        if self.pending.len() <= covered || self.policy == PartialPolicy::Drop {
            self.pending.clear();
            return Ok(None);
        }

        Ok(Some(self.take_partial()))
    }

    fn take_partial(&mut self) -> AudioChunk {
        let mut samples = std::mem::take(&mut self.pending);
        let valid = samples.len();
        if self.policy == PartialPolicy::ZeroPad {
            samples.resize(self.chunk_samples, 0.0);
        }
        self.make_chunk(samples, valid, true)
    }

    fn make_chunk(&mut self, samples: Vec<f32>, valid_samples: usize, partial: bool) -> AudioChunk {
        let rate = self.sample_rate as f64;
        let start_time = self.pending_start as f64 / rate;
        let end_time = (self.pending_start + valid_samples as u64) as f64 / rate;

        let chunk = AudioChunk {
            sequence_id: self.next_sequence,
            start_time,
            end_time,
            samples,
            sample_rate: self.sample_rate,
            partial,
            valid_samples,
            nominal_samples: self.chunk_samples,
            produced_at: Instant::now(),
        };
        self.next_sequence += 1;
        chunk
    }

    /// Number of chunks produced so far
    pub fn produced(&self) -> u64 {
        self.next_sequence
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_samples
    }

    pub fn hop_samples(&self) -> usize {
        self.hop_samples
    }
}

/// Lazy chunk sequence over a [`SampleSource`].
///
/// Yields chunks in order until the source ends, then the trailing partial
/// chunk (if any). Blocks inside `next` while the source blocks.
pub struct ChunkStream<S: SampleSource> {
    source: S,
    chunker: Chunker,
    exhausted: bool,
}

impl<S: SampleSource> ChunkStream<S> {
    pub fn new(source: S, config: &AudioConfig) -> Self {
        Self {
            source,
            chunker: Chunker::new(config),
            exhausted: false,
        }
    }
}

impl<S: SampleSource> Iterator for ChunkStream<S> {
    type Item = Result<Arc<AudioChunk>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(chunk) = self.chunker.next_chunk() {
                return Some(Ok(Arc::new(chunk)));
            }
            if self.exhausted {
                return None;
            }
            match self.source.next_block() {
                Some(block) => self.chunker.push(&block),
                None => {
                    self.exhausted = true;
                    return self.chunker.finish().transpose().map(|r| r.map(Arc::new));
                }
            }
        }
    }
}

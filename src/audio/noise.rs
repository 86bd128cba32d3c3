//! Ambient noise floor tracking and adaptive detection threshold
//!
//! The profiler keeps an exponentially smoothed RMS estimate of ambient audio.
//! Observations accumulate cheaply and are folded into a new [`NoiseProfile`]
//! snapshot on a timer. Readers clone the current `Arc` snapshot and never see
//! a half-applied update.

use crossbeam_channel::{select, tick, Receiver};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

use crate::audio::chunker::AudioChunk;
use crate::config::NoiseConfig;

/// Published state of the noise floor estimate
#[derive(Debug, Clone, PartialEq)]
pub struct NoiseProfile {
    /// Smoothed ambient RMS level
    pub floor_estimate: f32,
    /// Ambient observations folded in so far
    pub sample_count: u64,
    pub last_updated: Option<Instant>,
    pub is_warmed_up: bool,
}

impl NoiseProfile {
    fn empty() -> Self {
        Self {
            floor_estimate: 0.0,
            sample_count: 0,
            last_updated: None,
            is_warmed_up: false,
        }
    }

    /// Floor level in dBFS
    pub fn floor_db(&self) -> f32 {
        to_db(self.floor_estimate)
    }
}

fn to_db(rms: f32) -> f32 {
    20.0 * rms.max(1e-10).log10()
}

/// Rolling noise floor estimator
pub struct NoiseProfiler {
    config: NoiseConfig,
    static_threshold: f32,
    snapshot: RwLock<Arc<NoiseProfile>>,
    /// Observations waiting for the next publish
    pending: Mutex<Vec<f32>>,
}

impl NoiseProfiler {
    pub fn new(config: &NoiseConfig, static_threshold: f32) -> Self {
        Self {
            config: config.clone(),
            static_threshold,
            snapshot: RwLock::new(Arc::new(NoiseProfile::empty())),
            pending: Mutex::new(Vec::new()),
        }
    }

    /// Current immutable profile
    pub fn snapshot(&self) -> Arc<NoiseProfile> {
        Arc::clone(&self.snapshot.read())
    }

    /// Queue an ambient RMS observation.
    ///
    /// Returns true when this observation completes warm-up, in which case the
    /// caller should publish right away instead of waiting for the timer.
    pub fn observe(&self, rms: f32) -> bool {
        if !rms.is_finite() {
            return false;
        }
        let mut pending = self.pending.lock();
        pending.push(rms);

        let current = self.snapshot();
        !current.is_warmed_up
            && current.sample_count + pending.len() as u64 >= self.config.warmup_samples
    }

    /// Fold queued observations into a new snapshot and install it
    pub fn publish(&self) -> Arc<NoiseProfile> {
        // Holding `pending` serializes publishers
        let mut pending = self.pending.lock();
        let current = self.snapshot();
        if pending.is_empty() {
            return current;
        }

        let alpha = self.config.smoothing;
        let mut floor = current.floor_estimate;
        let mut count = current.sample_count;
        for rms in pending.drain(..) {
            floor = if count == 0 {
                rms
            } else {
                alpha * rms + (1.0 - alpha) * floor
            };
            count += 1;
        }

        let next = Arc::new(NoiseProfile {
            floor_estimate: floor,
            sample_count: count,
            last_updated: Some(Instant::now()),
            is_warmed_up: count >= self.config.warmup_samples,
        });

        if next.is_warmed_up && !current.is_warmed_up {
            info!(
                "Noise profile warmed up after {} observations (floor {:.1} dBFS)",
                count,
                next.floor_db()
            );
        }
        trace!("Noise floor {:.1} dBFS over {} observations", next.floor_db(), count);

        *self.snapshot.write() = Arc::clone(&next);
        next
    }

    /// Acoustic detection threshold for the current snapshot
    pub fn current_threshold(&self) -> f32 {
        self.threshold_for(&self.snapshot())
    }

    /// Static fallback before warm-up; afterwards the static threshold raised
    /// in proportion to how loud the ambient floor is.
    pub fn threshold_for(&self, profile: &NoiseProfile) -> f32 {
        if !self.config.adaptive_threshold || !profile.is_warmed_up {
            return self.static_threshold;
        }
        let span = self.config.loud_floor_db - self.config.quiet_floor_db;
        let loudness = ((profile.floor_db() - self.config.quiet_floor_db) / span).clamp(0.0, 1.0);
        (self.static_threshold + self.config.adaptation_gain * loudness).min(1.0)
    }

    /// SNR of a chunk against the current floor, in dB
    pub fn signal_to_noise(&self, chunk: &AudioChunk) -> Option<f32> {
        self.snr_for(&self.snapshot(), chunk.rms())
    }

    /// None until the floor is warmed up and non-zero
    pub fn snr_for(&self, profile: &NoiseProfile, rms: f32) -> Option<f32> {
        if !profile.is_warmed_up || profile.floor_estimate <= 1e-10 {
            return None;
        }
        Some(to_db(rms) - profile.floor_db())
    }

    /// Confidence multiplier for a chunk at the given SNR
    pub fn snr_weight(&self, snr_db: Option<f32>) -> f32 {
        match snr_db {
            Some(snr) if snr < self.config.min_snr_db => self.config.low_snr_weight,
            _ => 1.0,
        }
    }

    /// Run the background updater: drain observations as they arrive and
    /// publish on every `interval` tick (and immediately on warm-up). Exits
    /// once every observation sender is gone.
    pub fn spawn_updater(
        self: &Arc<Self>,
        observations: Receiver<f32>,
        interval: Duration,
    ) -> std::io::Result<JoinHandle<()>> {
        let profiler = Arc::clone(self);
        std::thread::Builder::new()
            .name("noise-profiler".into())
            .spawn(move || {
                let ticker = tick(interval);
                loop {
                    select! {
                        recv(observations) -> msg => match msg {
                            Ok(rms) => {
                                if profiler.observe(rms) {
                                    profiler.publish();
                                }
                            }
                            Err(_) => break,
                        },
                        recv(ticker) -> _ => {
                            profiler.publish();
                        }
                    }
                }
                profiler.publish();
                debug!("Noise profiler stopped");
            })
    }
}

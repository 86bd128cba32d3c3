//! Fusion decision rule and alert state machine

use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tracing::{debug, trace, warn};

use crate::audio::NoiseProfiler;
use crate::classify::{Label, Source};
use crate::config::{EmitMode, FusionConfig};
use crate::fusion::reorder::ChunkVerdicts;
use crate::fusion::AlertEvent;
use crate::speech::Severity;

/// Alerting state. Cooldown ends at a stream time, not a wall clock time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FusionState {
    Idle,
    Armed,
    Alerting,
    Cooldown { until: f64 },
}

/// Running decision counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FusionStats {
    pub decided: u64,
    pub alerts: u64,
    pub suppressed: u64,
    pub degraded: u64,
    pub latency_violations: u64,
}

/// Result of fusing one chunk
#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub event: AlertEvent,
    /// Whether the event passes the emit policy
    pub emit: bool,
    /// RMS to feed the noise profiler when the chunk was judged ambient
    pub ambient_energy: Option<f32>,
}

pub struct FusionEngine {
    config: FusionConfig,
    profiler: Arc<NoiseProfiler>,
    state: FusionState,
    stats: FusionStats,
}

impl FusionEngine {
    pub fn new(config: &FusionConfig, profiler: Arc<NoiseProfiler>) -> Self {
        Self {
            config: config.clone(),
            profiler,
            state: FusionState::Idle,
            stats: FusionStats::default(),
        }
    }

    pub fn state(&self) -> FusionState {
        self.state
    }

    pub fn stats(&self) -> FusionStats {
        self.stats
    }

    fn transition(&mut self, next: FusionState) {
        if self.state != next {
            trace!("Fusion state {:?} -> {:?}", self.state, next);
            self.state = next;
        }
    }

    /// Decide one chunk. Chunks must arrive in sequence order.
    pub fn process(&mut self, verdicts: ChunkVerdicts, now: Instant) -> FusionOutcome {
        let chunk = Arc::clone(&verdicts.chunk);
        let profile = self.profiler.snapshot();
        let threshold = self.profiler.threshold_for(&profile);
        self.stats.decided += 1;

        // A partial chunk is the end of the stream, so the warm-up window has elapsed
        if self.state == FusionState::Idle
            && (profile.is_warmed_up
                || chunk.partial
                || chunk.end_time >= self.config.arm_after_secs as f64)
        {
            self.transition(FusionState::Armed);
        }
        if let FusionState::Cooldown { until } = self.state {
            if chunk.start_time >= until {
                self.transition(FusionState::Armed);
            }
        }

        // Acoustic confidence discounted for low SNR and for padding
        let (acoustic_label, acoustic_conf) = match &verdicts.acoustic {
            Some(result) => {
                let snr = self.profiler.snr_for(&profile, chunk.rms());
                let weight = self.profiler.snr_weight(snr) * chunk.coverage();
                (result.label, result.confidence * weight)
            }
            None => (Label::Unknown, 0.0),
        };
        let acoustic_event = acoustic_label.is_acoustic_event();
        let acoustic_hit = acoustic_event && acoustic_conf >= threshold;
        let co_occurring = acoustic_event && acoustic_conf >= self.config.co_occurrence_threshold;

        let speech = verdicts.speech.as_ref();
        let threat_match = speech.is_some_and(|v| v.has_threat());
        let profanity_match = speech.is_some_and(|v| v.has_profanity());
        let speech_conf = speech.map_or(0.0, |v| v.classification.confidence);

        let mut drivers = BTreeSet::new();
        if acoustic_hit {
            drivers.insert(Source::NonSpeech);
        }
        if threat_match {
            drivers.insert(Source::Speech);
        }
        if profanity_match && co_occurring {
            drivers.insert(Source::NonSpeech);
            drivers.insert(Source::Speech);
        }
        let positive = !drivers.is_empty();

        let severity = match (positive, threat_match || acoustic_hit) {
            (false, _) => None,
            (true, true) => Some(Severity::Threat),
            (true, false) => Some(Severity::Profanity),
        };
        let label = if drivers.contains(&Source::NonSpeech) {
            acoustic_label
        } else if positive {
            Label::ThreatSpeech
        } else if verdicts.acoustic.is_some() {
            acoustic_label
        } else {
            speech.map_or(Label::Unknown, |v| v.classification.label)
        };
        let confidence = if positive {
            drivers
                .iter()
                .map(|s| match s {
                    Source::NonSpeech => acoustic_conf,
                    Source::Speech => speech_conf,
                })
                .fold(0.0f32, f32::max)
        } else if verdicts.acoustic.is_some() {
            acoustic_conf
        } else {
            speech_conf
        };

        let latency = now.saturating_duration_since(chunk.produced_at);
        let late = latency > self.config.max_latency();
        if late {
            self.stats.latency_violations += 1;
            warn!(
                "Chunk {} decided after {:.0} ms (budget {:.0} ms)",
                chunk.sequence_id,
                latency.as_secs_f64() * 1000.0,
                self.config.max_latency_secs * 1000.0
            );
        }
        let degraded = late || verdicts.is_incomplete();
        if degraded {
            self.stats.degraded += 1;
        }

        let suppressed = positive && !self.admit_alert(chunk.end_time);
        if suppressed {
            self.stats.suppressed += 1;
        }
        let threat_detected = positive && !suppressed;

        let contributing_sources = if positive {
            drivers
        } else {
            verdicts.completed()
        };

        let event = AlertEvent {
            chunk_id: chunk.sequence_id,
            timestamp: unix_millis(),
            start_time: chunk.start_time,
            end_time: chunk.end_time,
            threat_detected,
            severity,
            confidence: confidence.clamp(0.0, 1.0),
            contributing_sources,
            latency_ms: duration_millis(latency),
            degraded,
            suppressed,
            label,
            matched_terms: speech.map(|v| v.matched_terms()).unwrap_or_default(),
        };

        debug!(
            "Chunk {} [{:.2}s-{:.2}s]: {} label={} conf={:.2} threshold={:.2} state={:?}{}{}",
            event.chunk_id,
            event.start_time,
            event.end_time,
            if threat_detected { "THREAT" } else { "no threat" },
            event.label,
            event.confidence,
            threshold,
            self.state,
            if suppressed { " (suppressed)" } else { "" },
            if degraded { " (degraded)" } else { "" },
        );

        let emit = match self.config.emit {
            EmitMode::All => true,
            EmitMode::Positive => threat_detected,
        };
        // Only chunks the acoustic path actually scored as normal feed the floor
        let ambient = verdicts
            .acoustic
            .as_ref()
            .is_some_and(|result| result.label == Label::Normal);
        let ambient_energy = (!positive && ambient).then(|| chunk.rms());

        FusionOutcome {
            event,
            emit,
            ambient_energy,
        }
    }

    /// Apply a positive decision to the state machine; false when it must be
    /// suppressed.
    fn admit_alert(&mut self, end_time: f64) -> bool {
        let cooldown = self.config.cooldown_secs as f64;
        match self.state {
            FusionState::Idle => false,
            FusionState::Armed | FusionState::Alerting => {
                self.transition(FusionState::Alerting);
                self.stats.alerts += 1;
                self.transition(FusionState::Cooldown {
                    until: end_time + cooldown,
                });
                true
            }
            FusionState::Cooldown { until } => {
                let extended = until.max(end_time + cooldown);
                self.state = FusionState::Cooldown { until: extended };
                false
            }
        }
    }
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(duration_millis)
        .unwrap_or(0)
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

//! Fusion of the acoustic and speech verdicts into alert events

pub mod engine;
pub mod reorder;

use serde::Serialize;
use std::collections::BTreeSet;

use crate::classify::{Label, Source};
use crate::speech::Severity;

pub use engine::{FusionEngine, FusionOutcome, FusionState, FusionStats};
pub use reorder::{ChunkVerdicts, PathResult, PendingChunks};

/// The fused decision for one chunk
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlertEvent {
    pub chunk_id: u64,
    /// Wall clock time of the decision (Unix milliseconds)
    pub timestamp: u64,
    /// Stream time span of the chunk (seconds)
    pub start_time: f64,
    pub end_time: f64,
    pub threat_detected: bool,
    pub severity: Option<Severity>,
    pub confidence: f32,
    pub contributing_sources: BTreeSet<Source>,
    /// Time from chunk availability to decision
    pub latency_ms: u64,
    /// Decided without every path, or past the latency budget
    pub degraded: bool,
    /// A positive decision withheld by the arming or cooldown rules
    pub suppressed: bool,
    pub label: Label,
    pub matched_terms: BTreeSet<String>,
}

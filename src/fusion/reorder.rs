//! Join point for the two classification paths.
//!
//! Chunks are held by sequence id until every expected path has reported or
//! the chunk's deadline passes. Only the oldest chunk is ever released, so
//! decisions leave in sequence order even when paths finish out of order.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::trace;

use crate::audio::AudioChunk;
use crate::classify::{ClassificationResult, Source};
use crate::speech::SpeechVerdict;

/// A finished classification from one path
#[derive(Debug, Clone)]
pub enum PathResult {
    Acoustic(ClassificationResult),
    Speech(SpeechVerdict),
}

impl PathResult {
    pub fn chunk_id(&self) -> u64 {
        match self {
            PathResult::Acoustic(r) => r.chunk_id,
            PathResult::Speech(v) => v.chunk_id(),
        }
    }

    pub fn source(&self) -> Source {
        match self {
            PathResult::Acoustic(_) => Source::NonSpeech,
            PathResult::Speech(_) => Source::Speech,
        }
    }
}

/// Everything known about a chunk when it is released for fusion
#[derive(Debug, Clone)]
pub struct ChunkVerdicts {
    pub chunk: Arc<AudioChunk>,
    /// Paths the chunk was meant to go through
    pub expected: BTreeSet<Source>,
    pub acoustic: Option<ClassificationResult>,
    pub speech: Option<SpeechVerdict>,
}

impl ChunkVerdicts {
    pub fn new(chunk: Arc<AudioChunk>, expected: BTreeSet<Source>) -> Self {
        Self {
            chunk,
            expected,
            acoustic: None,
            speech: None,
        }
    }

    /// Paths that delivered a result
    pub fn completed(&self) -> BTreeSet<Source> {
        let mut done = BTreeSet::new();
        if self.acoustic.is_some() {
            done.insert(Source::NonSpeech);
        }
        if self.speech.is_some() {
            done.insert(Source::Speech);
        }
        done
    }

    /// True when some expected path has no result
    pub fn is_incomplete(&self) -> bool {
        !self.expected.is_subset(&self.completed())
    }
}

struct Pending {
    verdicts: ChunkVerdicts,
    deadline: Instant,
    /// Expected paths known never to report for this chunk
    missed: BTreeSet<Source>,
}

impl Pending {
    fn settled(&self) -> bool {
        let completed = self.verdicts.completed();
        self.verdicts
            .expected
            .iter()
            .all(|s| completed.contains(s) || self.missed.contains(s))
    }
}

/// Sequence-ordered buffer of chunks awaiting their path results
pub struct PendingChunks {
    entries: BTreeMap<u64, Pending>,
    max_latency: Duration,
}

impl PendingChunks {
    pub fn new(max_latency: Duration) -> Self {
        Self {
            entries: BTreeMap::new(),
            max_latency,
        }
    }

    /// Start tracking a chunk; returns its decision deadline
    pub fn insert(&mut self, chunk: Arc<AudioChunk>, expected: BTreeSet<Source>) -> Instant {
        let deadline = chunk.produced_at + self.max_latency;
        let id = chunk.sequence_id;
        self.entries.insert(
            id,
            Pending {
                verdicts: ChunkVerdicts::new(chunk, expected),
                deadline,
                missed: BTreeSet::new(),
            },
        );
        deadline
    }

    /// Record that a path will never report for a chunk
    pub fn mark_missed(&mut self, chunk_id: u64, source: Source) {
        if let Some(pending) = self.entries.get_mut(&chunk_id) {
            pending.missed.insert(source);
        }
    }

    /// Attach a path result. Returns false for results of chunks that were
    /// already released (late) or never tracked.
    pub fn record(&mut self, result: PathResult) -> bool {
        let id = result.chunk_id();
        let Some(pending) = self.entries.get_mut(&id) else {
            trace!("Discarding late {:?} result for chunk {}", result.source(), id);
            return false;
        };
        match result {
            PathResult::Acoustic(r) => pending.verdicts.acoustic = Some(r),
            PathResult::Speech(v) => pending.verdicts.speech = Some(v),
        }
        true
    }

    /// Release the oldest chunk once it is settled or past its deadline
    pub fn pop_ready(&mut self, now: Instant) -> Option<ChunkVerdicts> {
        let mut head = self.entries.first_entry()?;
        let pending = head.get();
        if pending.settled() || now >= pending.deadline {
            Some(head.remove().verdicts)
        } else {
            None
        }
    }

    /// Deadline of the oldest chunk, the next time a release may be forced
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries.values().next().map(|p| p.deadline)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

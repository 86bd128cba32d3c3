//! Streaming detection session
//!
//! Thread layout:
//!
//! - producer: pulls sample blocks, chunks them, pushes chunks onto a bounded
//!   work queue (dropping the oldest queued chunk when full)
//! - acoustic worker: features + model scoring
//! - speech worker: transcription + keyword matching
//! - coordinator: dispatches chunks to both workers, joins their results in
//!   sequence order, runs fusion and emits events
//! - noise profiler: folds ambient levels into the published noise profile
//!
//! Workers share nothing but the immutable `Arc<AudioChunk>`.

use crossbeam_channel::{at, bounded, never, select, Receiver, SendTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::audio::{AudioChunk, Chunker, NoiseProfiler, SampleSource};
use crate::classify::{AcousticClassifier, ClassificationResult, ModelLoader, ScoringFunction, Source};
use crate::config::{AudioConfig, Config};
use crate::error::{AudioError, ModelError, Result, ThreatError};
use crate::features::FeatureExtractor;
use crate::fusion::{FusionEngine, FusionStats, PathResult, PendingChunks};
use crate::output::AlertSink;
use crate::speech::{SpeechThreatDetector, SpeechVerdict, Transcriber};

/// How often blocked threads re-check the running flag
const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Ambient observations buffered for the profiler before new ones are dropped
const AMBIENT_QUEUE: usize = 256;

#[derive(Clone)]
struct SpeechPath {
    transcriber: Arc<dyn Transcriber>,
    detector: Arc<SpeechThreatDetector>,
}

#[derive(Clone)]
struct Job {
    chunk: Arc<AudioChunk>,
    deadline: Instant,
}

/// A configured detector, ready to run over one or more audio streams.
///
/// Construction performs every fatal check (configuration, model, label set);
/// nothing that happens per chunk can end a session.
pub struct Session {
    config: Arc<Config>,
    extractor: Arc<FeatureExtractor>,
    classifier: Arc<AcousticClassifier>,
    speech: Option<SpeechPath>,
    profiler: Arc<NoiseProfiler>,
}

impl Session {
    pub fn new(
        config: Config,
        model: Arc<dyn ScoringFunction>,
        transcriber: Option<Arc<dyn Transcriber>>,
    ) -> Result<Self> {
        config.validate()?;

        if let Some(dim) = model.dimension() {
            if dim != config.features.n_mfcc {
                return Err(ModelError::DimensionMismatch {
                    expected: dim,
                    got: config.features.n_mfcc,
                }
                .into());
            }
        }
        let classifier = AcousticClassifier::new(model, &config.acoustic)?;
        let extractor = FeatureExtractor::new(&config.features, config.audio.sample_rate);

        let speech = match (config.speech.enabled, transcriber) {
            (true, Some(transcriber)) => Some(SpeechPath {
                transcriber,
                detector: Arc::new(SpeechThreatDetector::from_config(&config)),
            }),
            (true, None) => {
                info!("Speech path disabled: no transcriber available");
                None
            }
            (false, _) => None,
        };

        let profiler = Arc::new(NoiseProfiler::new(
            &config.noise,
            config.acoustic.non_speech_threshold,
        ));

        Ok(Self {
            config: Arc::new(config),
            extractor: Arc::new(extractor),
            classifier: Arc::new(classifier),
            speech,
            profiler,
        })
    }

    /// Load the acoustic model named by the configuration, then build the session
    pub fn load(
        config: Config,
        loader: &dyn ModelLoader,
        transcriber: Option<Arc<dyn Transcriber>>,
    ) -> Result<Self> {
        let model = loader.load(&config.acoustic.model_path)?;
        Self::new(config, model, transcriber)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Noise profile shared by every stream this session runs
    pub fn profiler(&self) -> &Arc<NoiseProfiler> {
        &self.profiler
    }

    pub fn speech_enabled(&self) -> bool {
        self.speech.is_some()
    }

    /// Paths every chunk goes through
    fn expected_sources(&self) -> BTreeSet<Source> {
        let mut sources = BTreeSet::from([Source::NonSpeech]);
        if self.speech.is_some() {
            sources.insert(Source::Speech);
        }
        sources
    }

    /// Spawn the pipeline threads over `source`, sending events to `sink`.
    ///
    /// The source must already deliver samples at the configured rate (wrap
    /// it in `ConditionedSource` otherwise).
    pub fn start<S, K>(&self, source: S, sink: K) -> Result<SessionHandle>
    where
        S: SampleSource + 'static,
        K: AlertSink + 'static,
    {
        if source.sample_rate() != self.config.audio.sample_rate {
            return Err(AudioError::Resampling(format!(
                "source delivers {} Hz, session expects {} Hz",
                source.sample_rate(),
                self.config.audio.sample_rate
            ))
            .into());
        }

        let fusion = &self.config.fusion;
        let running = Arc::new(AtomicBool::new(true));
        let stats = Arc::new(SessionStats::new());

        let (work_tx, work_rx) = bounded::<Arc<AudioChunk>>(fusion.queue_depth);
        let (acoustic_tx, acoustic_rx) = bounded::<Job>(fusion.queue_depth);
        let (results_tx, results_rx) = bounded::<PathResult>(fusion.queue_depth * 2);
        let (ambient_tx, ambient_rx) = bounded::<f32>(AMBIENT_QUEUE);

        let mut threads = Vec::new();

        threads.push(self.profiler.spawn_updater(
            ambient_rx,
            Duration::from_secs_f32(self.config.noise.update_interval_secs),
        )?);

        {
            let extractor = Arc::clone(&self.extractor);
            let classifier = Arc::clone(&self.classifier);
            let results = results_tx.clone();
            threads.push(
                std::thread::Builder::new()
                    .name("acoustic-worker".into())
                    .spawn(move || run_acoustic_worker(acoustic_rx, results, &extractor, &classifier))?,
            );
        }

        let speech_tx = match &self.speech {
            Some(path) => {
                let (tx, rx) = bounded::<Job>(fusion.queue_depth);
                let path = path.clone();
                let results = results_tx.clone();
                threads.push(
                    std::thread::Builder::new()
                        .name("speech-worker".into())
                        .spawn(move || run_speech_worker(rx, results, &path))?,
                );
                Some(tx)
            }
            None => None,
        };
        // Only workers hold result senders
        drop(results_tx);

        let coordinator = Coordinator {
            engine: FusionEngine::new(fusion, Arc::clone(&self.profiler)),
            pending: PendingChunks::new(fusion.max_latency()),
            expected: self.expected_sources(),
            acoustic_tx,
            speech_tx,
            ambient_tx,
            sink,
            stats: Arc::clone(&stats),
            max_in_flight: fusion.max_in_flight,
        };
        // The producer keeps a receiver to evict the oldest chunk when full
        let evict_rx = work_rx.clone();
        {
            let running = Arc::clone(&running);
            threads.push(
                std::thread::Builder::new()
                    .name("fusion-coordinator".into())
                    .spawn(move || coordinator.run(work_rx, results_rx, &running))?,
            );
        }

        let producer = {
            let audio = self.config.audio.clone();
            let running = Arc::clone(&running);
            let stats = Arc::clone(&stats);
            std::thread::Builder::new()
                .name("chunk-producer".into())
                .spawn(move || run_producer(source, &audio, work_tx, evict_rx, &running, &stats))?
        };

        info!(
            "Session started: {:.1}s chunks, {:.0}% overlap, paths: {}",
            self.config.audio.chunk_duration,
            self.config.audio.overlap_fraction * 100.0,
            self.expected_sources()
                .iter()
                .map(|s| s.to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );

        Ok(SessionHandle {
            running,
            stats,
            producer: Some(producer),
            threads,
        })
    }

    /// Run over a finite source to completion
    pub fn run<S, K>(&self, source: S, sink: K) -> Result<SessionSummary>
    where
        S: SampleSource + 'static,
        K: AlertSink + 'static,
    {
        self.start(source, sink)?.join()
    }
}

/// Counters shared by the session threads
pub struct SessionStats {
    started: Instant,
    chunks_produced: AtomicU64,
    chunks_dropped: AtomicU64,
    path_misses: AtomicU64,
    fusion: Mutex<FusionStats>,
}

impl SessionStats {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            chunks_produced: AtomicU64::new(0),
            chunks_dropped: AtomicU64::new(0),
            path_misses: AtomicU64::new(0),
            fusion: Mutex::new(FusionStats::default()),
        }
    }

    pub fn summary(&self) -> SessionSummary {
        let fusion = *self.fusion.lock();
        let dropped = self.chunks_dropped.load(Ordering::Relaxed);
        SessionSummary {
            chunks_produced: self.chunks_produced.load(Ordering::Relaxed),
            chunks_dropped: dropped,
            chunks_decided: fusion.decided,
            path_misses: self.path_misses.load(Ordering::Relaxed),
            alerts: fusion.alerts,
            suppressed: fusion.suppressed,
            degraded: fusion.degraded,
            latency_violations: fusion.latency_violations + dropped,
            elapsed: self.started.elapsed(),
        }
    }
}

/// Point-in-time copy of the session counters
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub chunks_produced: u64,
    /// Evicted from a full work queue, never decided
    pub chunks_dropped: u64,
    pub chunks_decided: u64,
    /// Chunks a classifier path could not accept
    pub path_misses: u64,
    pub alerts: u64,
    pub suppressed: u64,
    pub degraded: u64,
    /// Late decisions plus dropped chunks
    pub latency_violations: u64,
    pub elapsed: Duration,
}

impl SessionSummary {
    pub fn log_summary(&self) {
        info!(
            "Session complete: {} chunks produced, {} decided, {} dropped, {} alerts, {} suppressed, {} degraded, {} latency violations, duration: {:.1}s",
            self.chunks_produced,
            self.chunks_decided,
            self.chunks_dropped,
            self.alerts,
            self.suppressed,
            self.degraded,
            self.latency_violations,
            self.elapsed.as_secs_f32()
        );
    }
}

/// Running session. Dropping the handle without joining cancels it.
pub struct SessionHandle {
    running: Arc<AtomicBool>,
    stats: Arc<SessionStats>,
    producer: Option<JoinHandle<Result<()>>>,
    threads: Vec<JoinHandle<()>>,
}

impl SessionHandle {
    /// Cancel the session. In-flight chunks are abandoned.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Flag that cancels the session when cleared (for signal handlers)
    pub fn running_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// True once every session thread has exited
    pub fn is_finished(&self) -> bool {
        self.producer.as_ref().map_or(true, |p| p.is_finished())
            && self.threads.iter().all(|t| t.is_finished())
    }

    pub fn stats(&self) -> SessionSummary {
        self.stats.summary()
    }

    /// Wait for every thread. Fails when the stream itself failed (for
    /// example ending before a full chunk under the `drop` policy).
    pub fn join(mut self) -> Result<SessionSummary> {
        let produced = match self.producer.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| ThreatError::Channel("producer thread panicked".into()))?,
            None => Ok(()),
        };
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                error!("Session thread panicked");
            }
        }
        produced?;
        Ok(self.stats.summary())
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if self.producer.is_some() {
            self.stop();
        }
    }
}

fn run_producer<S: SampleSource>(
    mut source: S,
    audio: &AudioConfig,
    work: Sender<Arc<AudioChunk>>,
    evict: Receiver<Arc<AudioChunk>>,
    running: &AtomicBool,
    stats: &SessionStats,
) -> Result<()> {
    let mut chunker = Chunker::new(audio);
    let live = source.is_live();
    debug!(
        "Producer started: {} samples per chunk, hop {}",
        chunker.chunk_samples(),
        chunker.hop_samples()
    );

    while running.load(Ordering::SeqCst) {
        match source.next_block() {
            Some(block) => {
                chunker.push(&block);
                while let Some(chunk) = chunker.next_chunk() {
                    enqueue(chunk, live, &work, &evict, running, stats);
                }
            }
            None => {
                if let Some(chunk) = chunker.finish()? {
                    enqueue(chunk, live, &work, &evict, running, stats);
                }
                info!("Audio stream ended after {} chunks", chunker.produced());
                return Ok(());
            }
        }
    }

    debug!("Producer cancelled after {} chunks", chunker.produced());
    Ok(())
}

/// Push a chunk. A live stream evicts the oldest queued chunk while the
/// queue is full; a recorded one waits for room.
fn enqueue(
    chunk: AudioChunk,
    live: bool,
    work: &Sender<Arc<AudioChunk>>,
    evict: &Receiver<Arc<AudioChunk>>,
    running: &AtomicBool,
    stats: &SessionStats,
) {
    stats.chunks_produced.fetch_add(1, Ordering::Relaxed);
    let mut item = Arc::new(chunk);

    if !live {
        loop {
            match work.send_timeout(item, POLL_INTERVAL) {
                Ok(()) => return,
                Err(SendTimeoutError::Timeout(back)) => {
                    if !running.load(Ordering::SeqCst) {
                        return;
                    }
                    item = back;
                }
                Err(SendTimeoutError::Disconnected(_)) => return,
            }
        }
    }

    loop {
        match work.try_send(item) {
            Ok(()) => return,
            Err(TrySendError::Full(back)) => {
                if !running.load(Ordering::SeqCst) {
                    return;
                }
                item = back;
                if let Ok(oldest) = evict.try_recv() {
                    stats.chunks_dropped.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        "Work queue full, dropped chunk {} (latency violation)",
                        oldest.sequence_id
                    );
                }
            }
            Err(TrySendError::Disconnected(_)) => return,
        }
    }
}

fn run_acoustic_worker(
    jobs: Receiver<Job>,
    results: Sender<PathResult>,
    extractor: &FeatureExtractor,
    classifier: &AcousticClassifier,
) {
    for job in jobs.iter() {
        let id = job.chunk.sequence_id;
        if Instant::now() >= job.deadline {
            debug!("Chunk {}: acoustic path skipped, deadline passed", id);
            continue;
        }

        let result = match extractor.extract(&job.chunk) {
            Ok(features) => classifier.classify(id, &features),
            Err(e) => {
                warn!("Chunk {}: {}", id, e);
                ClassificationResult::unknown(Source::NonSpeech, id)
            }
        };

        if results.send(PathResult::Acoustic(result)).is_err() {
            break;
        }
    }
    debug!("Acoustic worker stopped");
}

fn run_speech_worker(jobs: Receiver<Job>, results: Sender<PathResult>, path: &SpeechPath) {
    for job in jobs.iter() {
        let id = job.chunk.sequence_id;
        if Instant::now() >= job.deadline {
            debug!("Chunk {}: speech path skipped, deadline passed", id);
            continue;
        }

        let verdict = match path.transcriber.transcribe(&job.chunk) {
            Ok(transcript) => path.detector.evaluate(id, transcript.as_ref()),
            Err(e) => {
                warn!("Chunk {}: transcription failed: {}", id, e);
                SpeechVerdict::unknown(id)
            }
        };

        if results.send(PathResult::Speech(verdict)).is_err() {
            break;
        }
    }
    debug!("Speech worker stopped");
}

/// Single join point between the classifier paths and the sink
struct Coordinator<K: AlertSink> {
    engine: FusionEngine,
    pending: PendingChunks,
    expected: BTreeSet<Source>,
    acoustic_tx: Sender<Job>,
    speech_tx: Option<Sender<Job>>,
    ambient_tx: Sender<f32>,
    sink: K,
    stats: Arc<SessionStats>,
    max_in_flight: usize,
}

impl<K: AlertSink> Coordinator<K> {
    fn run(mut self, work: Receiver<Arc<AudioChunk>>, results: Receiver<PathResult>, running: &AtomicBool) {
        let no_work = never::<Arc<AudioChunk>>();
        let no_results = never::<PathResult>();
        let mut stream_done = false;
        let mut results_open = true;

        loop {
            if !running.load(Ordering::SeqCst) {
                if !self.pending.is_empty() {
                    debug!("Abandoning {} in-flight chunks", self.pending.len());
                }
                break;
            }
            if stream_done && self.pending.is_empty() {
                break;
            }

            let accepting = !stream_done && self.pending.len() < self.max_in_flight;
            let work_rx = if accepting { &work } else { &no_work };
            let results_rx = if results_open { &results } else { &no_results };
            let deadline = self.pending.next_deadline().map_or_else(never, at);

            select! {
                recv(work_rx) -> msg => match msg {
                    Ok(chunk) => self.dispatch(chunk),
                    Err(_) => stream_done = true,
                },
                recv(results_rx) -> msg => match msg {
                    Ok(result) => {
                        self.pending.record(result);
                    }
                    Err(_) => results_open = false,
                },
                recv(deadline) -> _ => {},
                default(POLL_INTERVAL) => {},
            }

            self.flush_ready();
        }

        if let Err(e) = self.sink.flush() {
            warn!("Failed to flush alert sink: {}", e);
        }
        debug!("Coordinator stopped");
    }

    fn dispatch(&mut self, chunk: Arc<AudioChunk>) {
        let id = chunk.sequence_id;
        let deadline = self.pending.insert(Arc::clone(&chunk), self.expected.clone());

        if Instant::now() >= deadline {
            warn!("Chunk {} expired in the work queue", id);
            for source in self.expected.clone() {
                self.pending.mark_missed(id, source);
            }
            return;
        }

        let job = Job { chunk, deadline };
        let acoustic_ok = self.acoustic_tx.try_send(job.clone()).is_ok();
        let speech_ok = self.speech_tx.as_ref().map(|tx| tx.try_send(job).is_ok());

        if !acoustic_ok {
            self.miss(id, Source::NonSpeech);
        }
        if speech_ok == Some(false) {
            self.miss(id, Source::Speech);
        }
    }

    fn miss(&mut self, chunk_id: u64, source: Source) {
        self.stats.path_misses.fetch_add(1, Ordering::Relaxed);
        warn!("Chunk {}: {} path is saturated, deciding without it", chunk_id, source);
        self.pending.mark_missed(chunk_id, source);
    }

    fn flush_ready(&mut self) {
        while let Some(verdicts) = self.pending.pop_ready(Instant::now()) {
            let outcome = self.engine.process(verdicts, Instant::now());

            if let Some(rms) = outcome.ambient_energy {
                // Full queue: skip this observation rather than block
                let _ = self.ambient_tx.try_send(rms);
            }
            if outcome.emit {
                if let Err(e) = self.sink.emit(&outcome.event) {
                    warn!("Failed to emit event for chunk {}: {}", outcome.event.chunk_id, e);
                }
            }
            *self.stats.fusion.lock() = self.engine.stats();
        }
    }
}

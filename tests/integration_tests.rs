//! Integration tests for threat-rs

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::unbounded;
use threat_rs::{
    AlertEvent, AudioChunk, ChannelSink, ChunkStream, Config, ConditionedSource, JsonModelLoader,
    Label, MemorySource, ModelError, ModelLoader, PartialPolicy, Result, SampleSource,
    ScoringFunction, Session, Severity, Source, ThreatError, Transcriber, Transcript,
};

const SAMPLE_RATE: u32 = 8000;

const LABELS: [&str; 5] = ["crying", "screaming", "shouting", "glass_breaking", "normal"];

/// Generate a tone with a little harmonic content
fn generate_tone(sample_rate: u32, duration_secs: f32, amplitude: f32) -> Vec<f32> {
    let num_samples = (sample_rate as f32 * duration_secs) as usize;
    (0..num_samples)
        .map(|i| {
            let t = i as f32 / sample_rate as f32;
            amplitude
                * (0.7 * (2.0 * std::f32::consts::PI * 440.0 * t).sin()
                    + 0.3 * (2.0 * std::f32::consts::PI * 1320.0 * t).sin())
        })
        .collect()
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.audio.sample_rate = SAMPLE_RATE;
    config.audio.high_pass_cutoff = 0.0;
    config.features.fmax = 4000.0;
    config.fusion.arm_after_secs = 0.0;
    config
}

fn label_index(label: &str) -> usize {
    LABELS
        .iter()
        .position(|l| *l == label)
        .expect("label in the default set")
}

fn one_hot(label: &str, confidence: f32) -> Vec<f32> {
    let rest = (1.0 - confidence) / (LABELS.len() - 1) as f32;
    let mut scores = vec![rest; LABELS.len()];
    scores[label_index(label)] = confidence;
    scores
}

/// Scores each call from a script, repeating the last entry
struct ScriptedScorer {
    labels: Vec<String>,
    script: Vec<Vec<f32>>,
    calls: AtomicUsize,
    delay: Duration,
}

impl ScriptedScorer {
    fn constant(label: &str, confidence: f32) -> Arc<Self> {
        Self::script(&[(label, confidence)])
    }

    fn script(steps: &[(&str, f32)]) -> Arc<Self> {
        Arc::new(Self {
            labels: LABELS.iter().map(|s| s.to_string()).collect(),
            script: steps.iter().map(|(l, c)| one_hot(l, *c)).collect(),
            calls: AtomicUsize::new(0),
            delay: Duration::ZERO,
        })
    }

    fn slow(label: &str, confidence: f32, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            labels: LABELS.iter().map(|s| s.to_string()).collect(),
            script: vec![one_hot(label, confidence)],
            calls: AtomicUsize::new(0),
            delay,
        })
    }
}

impl ScoringFunction for ScriptedScorer {
    fn labels(&self) -> &[String] {
        &self.labels
    }

    fn score(&self, _features: &[f32]) -> std::result::Result<Vec<f32>, ModelError> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        let step = call.min(self.script.len() - 1);
        Ok(self.script[step].clone())
    }
}

/// Returns canned transcripts by chunk sequence id
#[derive(Default)]
struct ScriptedTranscriber {
    transcripts: HashMap<u64, Transcript>,
}

impl ScriptedTranscriber {
    fn with(mut self, chunk_id: u64, text: &str, confidence: f32) -> Self {
        self.transcripts
            .insert(chunk_id, Transcript::new(text).with_confidence(confidence));
        self
    }
}

impl Transcriber for ScriptedTranscriber {
    fn transcribe(&self, chunk: &AudioChunk) -> Result<Option<Transcript>> {
        Ok(self.transcripts.get(&chunk.sequence_id).cloned())
    }
}

fn run_session(
    config: Config,
    scorer: Arc<dyn ScoringFunction>,
    transcriber: Option<Arc<dyn Transcriber>>,
    duration_secs: f32,
) -> Vec<AlertEvent> {
    let session = Session::new(config, scorer, transcriber).expect("valid session");
    let source = MemorySource::new(
        generate_tone(SAMPLE_RATE, duration_secs, 0.3),
        SAMPLE_RATE,
        800,
    );
    let (tx, rx) = unbounded();
    let summary = session
        .run(source, ChannelSink::new(tx))
        .expect("session completes");
    let events: Vec<AlertEvent> = rx.try_iter().collect();
    assert_eq!(summary.chunks_decided, events.len() as u64);
    events
}

/// Microphone stand-in that delivers its samples as fast as they are asked for
struct LiveSource {
    samples: Vec<f32>,
    position: usize,
    block_size: usize,
}

impl LiveSource {
    fn new(samples: Vec<f32>, block_size: usize) -> Self {
        Self {
            samples,
            position: 0,
            block_size,
        }
    }
}

impl SampleSource for LiveSource {
    fn sample_rate(&self) -> u32 {
        SAMPLE_RATE
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
}

fn sources(list: &[Source]) -> BTreeSet<Source> {
    list.iter().copied().collect()
}

#[test]
fn test_config_from_toml_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("threat-rs.toml");
    std::fs::write(
        &path,
        r#"
        [audio]
        sample_rate = 8000
        chunk_duration = 1.0

        [features]
        fmax = 4000.0

        [fusion]
        emit = "positive"
        cooldown_secs = 1.0
        arm_after_secs = 1.0

        [lexicon]
        english_threats = ["run"]
    "#,
    )
    .unwrap();

    let config = Config::from_file(&path).expect("Failed to load config");
    assert_eq!(config.audio.sample_rate, 8000);
    assert_eq!(config.audio.chunk_samples(), 8000);
    assert_eq!(config.fusion.emit, threat_rs::EmitMode::Positive);
    assert_eq!(config.lexicon.english_threats, vec!["run".to_string()]);
    assert!(config.validate().is_ok());
}

#[test]
fn test_missing_config_file() {
    let result = Config::from_file(std::path::Path::new("/nonexistent/threat-rs.toml"));
    assert!(result.is_err());
}

#[test]
fn test_chunk_count_and_overlap() {
    let config = test_config();
    // 6.5 s: five full chunks at a 1 s hop, then a padded tail
    let source = MemorySource::new(generate_tone(SAMPLE_RATE, 6.5, 0.3), SAMPLE_RATE, 1000);
    let chunks: Vec<Arc<AudioChunk>> = ChunkStream::new(source, &config.audio)
        .collect::<Result<_>>()
        .expect("chunking succeeds");

    assert_eq!(chunks.len(), 6);
    for (i, pair) in chunks.windows(2).enumerate() {
        assert_eq!(pair[1].sequence_id, pair[0].sequence_id + 1);
        assert!((pair[1].start_time - pair[0].start_time - 1.0).abs() < 1e-9, "chunk {}", i);
        // Consecutive chunks share exactly one second of samples
        let overlap = pair[0].end_time - pair[1].start_time;
        assert!((overlap - 1.0).abs() <= 1.0 / SAMPLE_RATE as f64, "chunk {}", i);
    }

    let tail = chunks.last().unwrap();
    assert!(tail.partial);
    assert_eq!(tail.samples.len(), 16000);
    assert!((tail.start_time - 5.0).abs() < 1e-9);
    assert!((tail.end_time - 6.5).abs() < 1e-9);
    assert!(chunks[..5].iter().all(|c| !c.partial));
}

#[test]
fn test_speech_threat_detected() {
    let transcriber = ScriptedTranscriber::default().with(0, "I'll hurt you", 0.9);
    let events = run_session(
        test_config(),
        ScriptedScorer::constant("normal", 0.99),
        Some(Arc::new(transcriber)),
        3.0,
    );

    assert_eq!(events.len(), 2);
    let first = &events[0];
    assert!(first.threat_detected);
    assert_eq!(first.severity, Some(Severity::Threat));
    assert_eq!(first.label, Label::ThreatSpeech);
    assert_eq!(first.contributing_sources, sources(&[Source::Speech]));
    assert!(first.matched_terms.contains("i'll hurt you"));
    assert!(!first.degraded);

    assert!(!events[1].threat_detected);
    assert_eq!(events[1].label, Label::Normal);
}

#[test]
fn test_clip_shorter_than_arming_window_still_alerts() {
    // Default arming window, which a single short clip never reaches
    let mut config = test_config();
    config.fusion.arm_after_secs = Config::default().fusion.arm_after_secs;

    let transcriber = ScriptedTranscriber::default().with(0, "I'll hurt you", 0.9);
    let events = run_session(
        config,
        ScriptedScorer::constant("normal", 0.99),
        Some(Arc::new(transcriber)),
        1.5,
    );

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert!(event.threat_detected);
    assert!(!event.suppressed);
    assert_eq!(event.severity, Some(Severity::Threat));
    assert_eq!(event.contributing_sources, sources(&[Source::Speech]));
}

#[test]
fn test_screaming_detected_without_speech_path() {
    let mut config = test_config();
    config.speech.enabled = false;
    let events = run_session(config, ScriptedScorer::constant("screaming", 0.85), None, 2.0);

    assert_eq!(events.len(), 1);
    let event = &events[0];
    assert!(event.threat_detected);
    assert_eq!(event.label, Label::Screaming);
    assert_eq!(event.severity, Some(Severity::Threat));
    assert_eq!(event.contributing_sources, sources(&[Source::NonSpeech]));
    assert!((event.confidence - 0.85).abs() < 1e-6);
}

#[test]
fn test_normal_audio_is_clear() {
    let events = run_session(
        test_config(),
        ScriptedScorer::constant("normal", 0.99),
        Some(Arc::new(ScriptedTranscriber::default())),
        4.0,
    );

    assert_eq!(events.len(), 3);
    for event in &events {
        assert!(!event.threat_detected);
        assert!(!event.suppressed);
        assert_eq!(event.severity, None);
        assert_eq!(event.label, Label::Normal);
        assert!(event.matched_terms.is_empty());
        // Negative decisions list the paths that reported
        assert_eq!(
            event.contributing_sources,
            sources(&[Source::NonSpeech, Source::Speech])
        );
    }
}

#[test]
fn test_profanity_alone_is_not_a_threat() {
    let transcriber = ScriptedTranscriber::default().with(0, "damn it", 0.9);
    let events = run_session(
        test_config(),
        ScriptedScorer::constant("normal", 0.99),
        Some(Arc::new(transcriber)),
        2.0,
    );

    let event = &events[0];
    assert!(!event.threat_detected);
    assert_eq!(event.severity, None);
    assert!(event.matched_terms.contains("damn"));
}

#[test]
fn test_profanity_with_distress_sound_is_a_threat() {
    let transcriber = ScriptedTranscriber::default().with(0, "you idiot", 0.9);
    // Below the acoustic threshold but above the co-occurrence threshold
    let events = run_session(
        test_config(),
        ScriptedScorer::constant("shouting", 0.6),
        Some(Arc::new(transcriber)),
        2.0,
    );

    let event = &events[0];
    assert!(event.threat_detected);
    assert_eq!(event.severity, Some(Severity::Profanity));
    assert_eq!(event.label, Label::Shouting);
    assert_eq!(
        event.contributing_sources,
        sources(&[Source::NonSpeech, Source::Speech])
    );
}

#[test]
fn test_low_confidence_transcript_is_ignored() {
    let transcriber = ScriptedTranscriber::default().with(0, "i will kill you", 0.3);
    let events = run_session(
        test_config(),
        ScriptedScorer::constant("normal", 0.99),
        Some(Arc::new(transcriber)),
        2.0,
    );

    assert!(!events[0].threat_detected);
    assert!(events[0].matched_terms.is_empty());
}

#[test]
fn test_either_path_alone_triggers() {
    // Acoustic positive on chunk 0; speech positive on chunk 4, after the cooldown
    let transcriber = ScriptedTranscriber::default().with(4, "there is a gun", 0.95);
    let scorer = ScriptedScorer::script(&[("glass_breaking", 0.9), ("normal", 0.99)]);
    let events = run_session(test_config(), scorer, Some(Arc::new(transcriber)), 6.0);

    assert_eq!(events.len(), 5);
    assert!(events[0].threat_detected);
    assert_eq!(events[0].contributing_sources, sources(&[Source::NonSpeech]));
    assert!(events[4].threat_detected);
    assert_eq!(events[4].contributing_sources, sources(&[Source::Speech]));
    assert!(events[1..4].iter().all(|e| !e.threat_detected));
}

#[test]
fn test_cooldown_collapses_sustained_threat() {
    let mut config = test_config();
    config.speech.enabled = false;
    let events = run_session(config, ScriptedScorer::constant("screaming", 0.9), None, 6.0);

    assert_eq!(events.len(), 5);
    let alerts: Vec<&AlertEvent> = events.iter().filter(|e| e.threat_detected).collect();
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].chunk_id, 0);
    assert!(events[1..].iter().all(|e| e.suppressed));
}

#[test]
fn test_positive_only_emission() {
    let mut config = test_config();
    config.speech.enabled = false;
    config.fusion.emit = threat_rs::EmitMode::Positive;

    let session = Session::new(config, ScriptedScorer::constant("screaming", 0.9), None).unwrap();
    let source = MemorySource::new(generate_tone(SAMPLE_RATE, 6.0, 0.3), SAMPLE_RATE, 800);
    let (tx, rx) = unbounded();
    let summary = session.run(source, ChannelSink::new(tx)).unwrap();

    let events: Vec<AlertEvent> = rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert_eq!(summary.chunks_decided, 5);
    assert_eq!(summary.alerts, 1);
    assert_eq!(summary.suppressed, 4);
}

#[test]
fn test_events_leave_in_sequence_order() {
    let transcriber = ScriptedTranscriber::default().with(2, "help", 0.9);
    let events = run_session(
        test_config(),
        ScriptedScorer::constant("normal", 0.99),
        Some(Arc::new(transcriber)),
        8.0,
    );

    let ids: Vec<u64> = events.iter().map(|e| e.chunk_id).collect();
    let expected: Vec<u64> = (0..ids.len() as u64).collect();
    assert_eq!(ids, expected);
    assert!(events.windows(2).all(|w| w[0].start_time < w[1].start_time));
}

#[test]
fn test_slow_classifier_degrades_decision() {
    let mut config = test_config();
    config.fusion.max_latency_secs = 0.3;
    let scorer = ScriptedScorer::slow("screaming", 0.95, Duration::from_millis(1200));
    let events = run_session(
        config,
        scorer,
        Some(Arc::new(ScriptedTranscriber::default())),
        3.0,
    );

    assert_eq!(events.len(), 2);
    for event in &events {
        assert!(event.degraded, "chunk {} should be degraded", event.chunk_id);
        assert!(!event.contributing_sources.contains(&Source::NonSpeech));
        assert!(!event.threat_detected);
    }
}

#[test]
fn test_live_overload_drops_oldest_chunks() {
    let mut config = test_config();
    config.speech.enabled = false;
    config.fusion.queue_depth = 1;
    config.fusion.max_in_flight = 1;
    let scorer = ScriptedScorer::slow("normal", 0.99, Duration::from_millis(200));

    let session = Session::new(config, scorer, None).unwrap();
    let source = LiveSource::new(generate_tone(SAMPLE_RATE, 40.0, 0.3), 800);
    let (tx, rx) = unbounded();
    let summary = session.run(source, ChannelSink::new(tx)).unwrap();

    let events: Vec<AlertEvent> = rx.try_iter().collect();
    assert!(summary.chunks_dropped > 0);
    assert!(summary.latency_violations >= summary.chunks_dropped);
    assert_eq!(
        summary.chunks_decided + summary.chunks_dropped,
        summary.chunks_produced
    );
    assert_eq!(summary.chunks_decided, events.len() as u64);
    assert!(events.windows(2).all(|w| w[0].chunk_id < w[1].chunk_id));
}

#[test]
fn test_rejects_invalid_config() {
    let mut config = test_config();
    config.audio.overlap_fraction = 1.0;
    let result = Session::new(config, ScriptedScorer::constant("normal", 0.9), None);
    assert!(matches!(result, Err(ThreatError::Config(_))));
}

#[test]
fn test_rejects_model_missing_a_label() {
    let scorer = Arc::new(ScriptedScorer {
        labels: vec!["screaming".into(), "normal".into()],
        script: vec![vec![0.5, 0.5]],
        calls: AtomicUsize::new(0),
        delay: Duration::ZERO,
    });
    let result = Session::new(test_config(), scorer, None);
    assert!(matches!(result, Err(ThreatError::Model(_))));
}

#[test]
fn test_drop_policy_rejects_short_stream() {
    let mut config = test_config();
    config.audio.partial_policy = PartialPolicy::Drop;
    let session = Session::new(config, ScriptedScorer::constant("normal", 0.9), None).unwrap();

    let source = MemorySource::new(generate_tone(SAMPLE_RATE, 1.0, 0.3), SAMPLE_RATE, 800);
    let (tx, _rx) = unbounded();
    let result = session.run(source, ChannelSink::new(tx));
    assert!(result.is_err());
}

#[test]
fn test_source_rate_must_match() {
    let session =
        Session::new(test_config(), ScriptedScorer::constant("normal", 0.9), None).unwrap();
    let source = MemorySource::new(vec![0.0; 32000], 16000, 800);
    let (tx, _rx) = unbounded();
    assert!(session.start(source, ChannelSink::new(tx)).is_err());
}

#[test]
fn test_json_model_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model.json");

    // Zero weights: the bias alone picks "screaming"
    let dim = 13;
    let model = serde_json::json!({
        "labels": LABELS,
        "weights": vec![vec![0.0f32; dim]; LABELS.len()],
        "bias": [0.0, 5.0, 0.0, 0.0, 0.0],
    });
    std::fs::write(&model_path, model.to_string()).unwrap();

    let mut config = test_config();
    config.features.n_mfcc = dim;
    config.speech.enabled = false;
    config.acoustic.model_path = model_path;

    let scorer = JsonModelLoader.load(&config.acoustic.model_path).unwrap();
    assert_eq!(scorer.dimension(), Some(dim));

    let session = Session::load(config, &JsonModelLoader, None).unwrap();
    let source = MemorySource::new(generate_tone(SAMPLE_RATE, 2.0, 0.3), SAMPLE_RATE, 800);
    let (tx, rx) = unbounded();
    session.run(source, ChannelSink::new(tx)).unwrap();

    let events: Vec<AlertEvent> = rx.try_iter().collect();
    assert_eq!(events.len(), 1);
    assert!(events[0].threat_detected);
    assert_eq!(events[0].label, Label::Screaming);
    assert!(events[0].confidence > 0.9);
}

#[test]
fn test_model_dimension_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let model_path = dir.path().join("model.json");
    let model = serde_json::json!({
        "labels": LABELS,
        "weights": vec![vec![0.0f32; 8]; LABELS.len()],
        "bias": vec![0.0f32; 5],
    });
    std::fs::write(&model_path, model.to_string()).unwrap();

    let mut config = test_config();
    config.acoustic.model_path = model_path;
    let result = Session::load(config, &JsonModelLoader, None);
    assert!(matches!(
        result,
        Err(ThreatError::Model(ModelError::DimensionMismatch { .. }))
    ));
}

#[test]
fn test_missing_model_file() {
    let mut config = test_config();
    config.acoustic.model_path = "/nonexistent/model.json".into();
    let result = Session::load(config, &JsonModelLoader, None);
    assert!(matches!(
        result,
        Err(ThreatError::Model(ModelError::Unavailable { .. }))
    ));
}

#[test]
fn test_wav_input_is_conditioned() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("input.wav");
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 16000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(&path, spec).unwrap();
    for sample in generate_tone(16000, 3.0, 0.3) {
        writer.write_sample((sample * i16::MAX as f32) as i16).unwrap();
    }
    writer.finalize().unwrap();

    let mut config = test_config();
    config.speech.enabled = false;
    let session = Session::new(config.clone(), ScriptedScorer::constant("normal", 0.99), None).unwrap();

    let source = MemorySource::from_wav(&path).unwrap();
    let source = ConditionedSource::new(source, SAMPLE_RATE, 60.0).unwrap();
    let (tx, rx) = unbounded();
    let summary = session.run(source, ChannelSink::new(tx)).unwrap();

    let events: Vec<AlertEvent> = rx.try_iter().collect();
    assert!(!events.is_empty());
    assert_eq!(summary.chunks_decided, events.len() as u64);
    assert!(events.iter().all(|e| !e.threat_detected));
}

//! Whisper-based transcriber

use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::audio::AudioChunk;
use crate::config::SpeechConfig;
use crate::error::{Result, SpeechError};
use crate::speech::transcriber::{Transcript, Transcriber};

/// Sample rate whisper.cpp expects
pub const WHISPER_SAMPLE_RATE: u32 = 16000;

/// Whisper-based speech recognizer
pub struct WhisperTranscriber {
    ctx: WhisperContext,
    language: String,
    threads: u32,
}

impl WhisperTranscriber {
    pub fn new(config: &SpeechConfig) -> Result<Self> {
        let model_path = &config.model_path;

        if !model_path.exists() {
            return Err(SpeechError::ModelNotFound(model_path.display().to_string()).into());
        }

        info!("Loading Whisper model from: {}", model_path.display());

        let path = model_path
            .to_str()
            .ok_or_else(|| SpeechError::ModelLoad("model path is not valid UTF-8".into()))?;
        let ctx = WhisperContext::new_with_params(path, WhisperContextParameters::default())
            .map_err(|e| SpeechError::ModelLoad(e.to_string()))?;

        info!("Whisper model loaded successfully (language: {})", config.language);

        Ok(Self {
            ctx,
            language: config.language.clone(),
            threads: config.threads,
        })
    }

    fn run(&self, samples: &[f32]) -> std::result::Result<(String, Option<f32>), SpeechError> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });

        params.set_n_threads(self.threads as i32);
        params.set_language(Some(&self.language));
        params.set_translate(false);
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params.set_single_segment(true);
        params.set_no_context(true);

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| SpeechError::Whisper(e.to_string()))?;

        state
            .full(params, samples)
            .map_err(|e| SpeechError::Transcription(e.to_string()))?;

        let num_segments = state
            .full_n_segments()
            .map_err(|e| SpeechError::Transcription(e.to_string()))?;

        let mut text = String::new();
        let mut prob_sum = 0.0f32;
        let mut token_count = 0usize;

        for i in 0..num_segments {
            let segment = state
                .full_get_segment_text(i)
                .map_err(|e| SpeechError::Transcription(e.to_string()))?;
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(segment.trim());

            let n_tokens = state
                .full_n_tokens(i)
                .map_err(|e| SpeechError::Transcription(e.to_string()))?;
            for t in 0..n_tokens {
                let prob = state
                    .full_get_token_prob(i, t)
                    .map_err(|e| SpeechError::Transcription(e.to_string()))?;
                prob_sum += prob;
                token_count += 1;
            }
        }

        let confidence = (token_count > 0).then(|| prob_sum / token_count as f32);
        Ok((text.trim().to_string(), confidence))
    }
}

impl Transcriber for WhisperTranscriber {
    fn transcribe(&self, chunk: &AudioChunk) -> Result<Option<Transcript>> {
        if chunk.sample_rate != WHISPER_SAMPLE_RATE {
            return Err(SpeechError::Transcription(format!(
                "Whisper needs {} Hz audio, chunk is {} Hz",
                WHISPER_SAMPLE_RATE, chunk.sample_rate
            ))
            .into());
        }

        let valid = chunk.valid();
        if valid.is_empty() {
            return Ok(None);
        }

        // whisper.cpp rejects input shorter than one second
        let mut samples = valid.to_vec();
        let min_len = WHISPER_SAMPLE_RATE as usize + WHISPER_SAMPLE_RATE as usize / 10;
        if samples.len() < min_len {
            samples.resize(min_len, 0.0);
        }

        debug!(
            "Chunk {}: transcribing {:.2}s",
            chunk.sequence_id,
            valid.len() as f32 / WHISPER_SAMPLE_RATE as f32
        );

        let (text, confidence) = self.run(&samples)?;
        if text.is_empty() {
            return Ok(None);
        }

        debug!("Chunk {}: transcript \"{}\"", chunk.sequence_id, text);
        Ok(Some(Transcript {
            text,
            confidence: confidence.map(|c| c.clamp(0.0, 1.0)),
        }))
    }
}

// Safety: WhisperContext is thread-safe for inference; each call creates its own state
unsafe impl Send for WhisperTranscriber {}
unsafe impl Sync for WhisperTranscriber {}

//! Recogniser facade and engine registry.
//!
//! A speech engine is an opaque capability: raw PCM in, text plus parallel
//! token/timestamp/duration arrays out. Concrete engines register a
//! constructor under a model tag; swapping in a new engine touches only the
//! registry and the merge-choice table.

use std::collections::HashMap;
use std::path::Path;
use std::time::Instant;

use crate::error::{ZbError, ZbResult};
use crate::result::{tokens_to_segments, Token, TranscriptionResult};
use crate::waveform;

// Model tags carried on job types and re-transcription requests.
pub const MODEL_REAZONSPEECH: &str = "reazonspeech";
pub const MODEL_SENSEVOICE: &str = "sensevoice";
pub const MODEL_WHISPER: &str = "whisper";
pub const MODEL_WHISPER_ALIGN: &str = "whisper:align";

/// How a model's partial re-transcription output is merged back into an
/// existing transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeStrategy {
    /// Reliable per-token timestamps: splice by time range.
    Timestamp,
    /// Uniform timestamps over the window: redistribute by segment
    /// duration ratio.
    DurationRatio,
    /// Better text, no timestamps: LCS character alignment against the
    /// original tokens.
    LcsAlign,
}

/// The merge primitive appropriate to each engine class. Fixed here; new
/// engines add a row.
#[must_use]
pub fn merge_strategy_for_model(model: &str) -> MergeStrategy {
    match model {
        MODEL_WHISPER => MergeStrategy::DurationRatio,
        MODEL_WHISPER_ALIGN => MergeStrategy::LcsAlign,
        _ => MergeStrategy::Timestamp,
    }
}

/// Raw engine output: parallel arrays of equal length, timestamps in seconds
/// relative to the start of the provided PCM. Engines without usable
/// timestamps leave the arrays empty.
#[derive(Debug, Clone, Default)]
pub struct RawRecognition {
    pub text: String,
    pub tokens: Vec<String>,
    pub timestamps: Vec<f32>,
    pub durations: Vec<f32>,
}

/// The capability a plugged-in recognition engine must satisfy. Engines hold
/// native resources and are not shared across threads; each job constructs
/// and drops its own.
pub trait SpeechEngine: Send {
    fn name(&self) -> &str;
    fn transcribe(&mut self, samples: &[f32], sample_rate: u32) -> ZbResult<RawRecognition>;
}

/// Extract tokens from raw engine output, skipping empty-text tokens.
/// Missing timestamp/duration entries default to zero.
#[must_use]
pub fn extract_tokens(raw: &RawRecognition) -> Vec<Token> {
    extract_tokens_with_offset(raw, 0.0)
}

/// As [`extract_tokens`], shifting every timestamp by `time_offset`.
#[must_use]
pub fn extract_tokens_with_offset(raw: &RawRecognition, time_offset: f32) -> Vec<Token> {
    let mut tokens = Vec::with_capacity(raw.tokens.len());
    for (i, text) in raw.tokens.iter().enumerate() {
        if text.is_empty() {
            continue;
        }
        tokens.push(Token {
            text: text.clone(),
            start_time: raw.timestamps.get(i).copied().unwrap_or(0.0) + time_offset,
            duration: raw.durations.get(i).copied().unwrap_or(0.0),
        });
    }
    tokens
}

/// Facade over a speech engine: guards micro-inputs, filters empty tokens,
/// and assembles results.
pub struct Recognizer {
    engine: Box<dyn SpeechEngine>,
    sample_rate: u32,
}

impl Recognizer {
    #[must_use]
    pub fn new(engine: Box<dyn SpeechEngine>, sample_rate: u32) -> Self {
        Self {
            engine,
            sample_rate,
        }
    }

    #[must_use]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub fn engine_name(&self) -> &str {
        self.engine.name()
    }

    /// Transcribe raw samples. Inputs shorter than 0.1 s are short-circuited
    /// to an empty result; the underlying neural graphs error on
    /// micro-inputs.
    pub fn transcribe_samples(&mut self, samples: &[f32]) -> ZbResult<TranscriptionResult> {
        let min_samples = (self.sample_rate / 10) as usize;
        if samples.len() < min_samples {
            return Ok(TranscriptionResult::default());
        }

        let started = Instant::now();
        let raw = self.engine.transcribe(samples, self.sample_rate)?;
        let tokens = extract_tokens(&raw);

        let total_duration = tokens.last().map(Token::end_time).unwrap_or(0.0);
        let segments = tokens_to_segments(&tokens);
        Ok(TranscriptionResult {
            text: raw.text,
            tokens,
            segments,
            total_duration,
            duration: started.elapsed().as_secs_f64(),
            speaker: None,
        })
    }

    /// Read a whole 16 kHz mono WAV file and transcribe it in one pass.
    pub fn transcribe_wav_file(&mut self, path: &Path) -> ZbResult<TranscriptionResult> {
        let samples = waveform::read_wav_samples(path)?;
        self.transcribe_samples(&samples)
    }
}

/// Constructor for a registered engine.
pub type EngineFactory = Box<dyn Fn() -> ZbResult<Box<dyn SpeechEngine>> + Send + Sync>;

/// Process-local engine registry, rebuilt on startup. Keys are model tags.
#[derive(Default)]
pub struct EngineRegistry {
    factories: HashMap<String, EngineFactory>,
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRegistry")
            .field("models", &self.factories.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EngineRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, model: &str, factory: EngineFactory) {
        self.factories.insert(model.to_owned(), factory);
    }

    #[must_use]
    pub fn contains(&self, model: &str) -> bool {
        self.factories.contains_key(model)
    }

    /// Construct a fresh engine for the model tag. The engine is owned by
    /// one job and dropped with it.
    pub fn create(&self, model: &str) -> ZbResult<Box<dyn SpeechEngine>> {
        let factory = self.factories.get(model).ok_or_else(|| {
            ZbError::RecognizerInit(format!("no engine registered for model `{model}`"))
        })?;
        factory()
    }

    /// A facade over a freshly constructed engine.
    pub fn create_recognizer(&self, model: &str, sample_rate: u32) -> ZbResult<Recognizer> {
        Ok(Recognizer::new(self.create(model)?, sample_rate))
    }
}

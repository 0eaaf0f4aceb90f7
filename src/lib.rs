#![forbid(unsafe_code)]

pub mod align;
pub mod block;
pub mod boundary;
pub mod config;
pub mod engine;
pub mod error;
pub mod ingest;
pub mod logging;
pub mod media;
pub mod partial;
pub mod result;
pub mod silence;
pub mod storage;
pub mod transcribe;
pub mod vad;
pub mod waveform;
pub mod worker;

pub use block::{OverlapBlock, SpeechBlock};
pub use engine::{EngineRegistry, MergeStrategy, Recognizer, SpeechEngine};
pub use error::{ZbError, ZbResult};
pub use ingest::AudioIngester;
pub use result::{Segment, Token, TranscriptionResult};
pub use storage::Database;
pub use worker::{CancellationToken, Worker};

//! Neural voice activity detection behind a host-supplied trait.
//!
//! The core feeds 32 ms windows (512 samples at 16 kHz) into an opaque
//! detector and converts the spans it emits into speech blocks on the
//! original timeline. The detector implementation (model loading, inference)
//! lives outside the core.

use std::path::{Path, PathBuf};

use crate::block::SpeechBlock;
use crate::error::{ZbError, ZbResult};
use crate::media::{PcmRequest, PcmStream};
use crate::worker::CancellationToken;

/// Window size the detector ingests: 32 ms at 16 kHz.
pub const VAD_WINDOW_SIZE: usize = 512;

/// Configuration for voice activity detection.
#[derive(Debug, Clone)]
pub struct VadConfig {
    /// Path to the VAD model file.
    pub model_path: PathBuf,
    /// Speech detection threshold in [0, 1].
    pub threshold: f32,
    /// Minimum speech duration in seconds.
    pub min_speech_duration: f32,
    /// Minimum silence duration that splits spans, in seconds. Large values
    /// merge closely spaced spans; the production profile relies on this.
    pub min_silence_duration: f32,
    /// Maximum block duration before forced splitting, in seconds.
    pub max_block_duration: f64,
}

impl VadConfig {
    #[must_use]
    pub fn new(model_path: &Path) -> Self {
        Self {
            model_path: model_path.to_path_buf(),
            threshold: 0.5,
            min_speech_duration: 0.25,
            min_silence_duration: 0.5,
            max_block_duration: 5.0,
        }
    }

    /// The production profile: high sensitivity and aggressive span merging.
    #[must_use]
    pub fn production(model_path: &Path) -> Self {
        Self {
            threshold: 0.1,
            min_silence_duration: 6.0,
            ..Self::new(model_path)
        }
    }

    /// Err(`VadModelMissing`) when the model file is absent.
    pub fn ensure_model(&self) -> ZbResult<()> {
        if !self.model_path.exists() {
            return Err(ZbError::VadModelMissing(self.model_path.clone()));
        }
        Ok(())
    }
}

/// A speech span emitted by the detector, positioned by sample offset from
/// the start of the stream.
#[derive(Debug, Clone)]
pub struct VadSpan {
    pub start_sample: usize,
    pub samples: Vec<f32>,
}

/// The opaque neural VAD the host plugs in. The detector buffers audio
/// internally (30-60 s look-ahead) and releases spans as they close;
/// `flush` drains spans still pending at EOF.
pub trait VoiceDetector: Send {
    fn accept_waveform(&mut self, samples: &[f32]);
    fn next_span(&mut self) -> Option<VadSpan>;
    fn flush(&mut self);
}

/// Constructor for a host-supplied detector.
pub type VadFactory = Box<dyn Fn(&VadConfig) -> ZbResult<Box<dyn VoiceDetector>> + Send + Sync>;

/// Stream PCM through the detector (no tempo) and collect speech blocks.
pub fn detect_speech_blocks(
    path: &Path,
    detector: &mut dyn VoiceDetector,
    sample_rate: u32,
    token: Option<&CancellationToken>,
) -> ZbResult<Vec<SpeechBlock>> {
    let mut stream = PcmStream::open(&PcmRequest {
        sample_rate,
        ..PcmRequest::whole_file(path)
    })?;

    let mut blocks = Vec::new();
    loop {
        let chunk = stream.read_samples(VAD_WINDOW_SIZE, token)?;
        if chunk.is_empty() {
            break;
        }
        detector.accept_waveform(&chunk);
        drain_spans(detector, sample_rate, &mut blocks);
    }

    detector.flush();
    drain_spans(detector, sample_rate, &mut blocks);

    tracing::debug!(blocks = blocks.len(), "vad detection done");
    Ok(blocks)
}

fn drain_spans(detector: &mut dyn VoiceDetector, sample_rate: u32, blocks: &mut Vec<SpeechBlock>) {
    while let Some(span) = detector.next_span() {
        let start = span.start_sample as f64 / f64::from(sample_rate);
        let end = start + span.samples.len() as f64 / f64::from(sample_rate);
        blocks.push(SpeechBlock {
            start_time: start,
            end_time: end,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let config = VadConfig::new(Path::new("silero_vad.onnx"));
        assert!((config.threshold - 0.5).abs() < 1e-9);
        assert!((config.min_speech_duration - 0.25).abs() < 1e-9);
        assert!((config.min_silence_duration - 0.5).abs() < 1e-9);
        assert!((config.max_block_duration - 5.0).abs() < 1e-9);
    }

    #[test]
    fn production_profile_merges_aggressively() {
        let config = VadConfig::production(Path::new("silero_vad.onnx"));
        assert!((config.threshold - 0.1).abs() < 1e-9);
        assert!((config.min_silence_duration - 6.0).abs() < 1e-9);
    }

    #[test]
    fn missing_model_file_is_reported() {
        let config = VadConfig::new(Path::new("/no/such/model.onnx"));
        match config.ensure_model() {
            Err(ZbError::VadModelMissing(path)) => {
                assert_eq!(path, PathBuf::from("/no/such/model.onnx"));
            }
            other => panic!("expected VadModelMissing, got {other:?}"),
        }
    }

    #[test]
    fn spans_convert_to_blocks_by_sample_rate() {
        struct Scripted(Vec<VadSpan>);
        impl VoiceDetector for Scripted {
            fn accept_waveform(&mut self, _samples: &[f32]) {}
            fn next_span(&mut self) -> Option<VadSpan> {
                if self.0.is_empty() {
                    None
                } else {
                    Some(self.0.remove(0))
                }
            }
            fn flush(&mut self) {}
        }

        let mut detector = Scripted(vec![VadSpan {
            start_sample: 16_000,
            samples: vec![0.0; 8_000],
        }]);
        let mut blocks = Vec::new();
        drain_spans(&mut detector, 16_000, &mut blocks);
        assert_eq!(blocks.len(), 1);
        assert!((blocks[0].start_time - 1.0).abs() < 1e-9);
        assert!((blocks[0].end_time - 1.5).abs() < 1e-9);
    }
}

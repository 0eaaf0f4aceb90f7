//! Energy-based silence detection.
//!
//! An alternative to the neural VAD that detects any sound, not just voice:
//! the PCM stream is cut into fixed frames, each frame's RMS is compared to
//! a threshold, and runs of non-silent frames become speech blocks.

use std::path::Path;

use crate::block::{split_long_blocks, SpeechBlock};
use crate::error::ZbResult;
use crate::media::{PcmRequest, PcmStream};
use crate::worker::CancellationToken;

/// Configuration for silence-based speech detection.
#[derive(Debug, Clone, Copy)]
pub struct SilenceConfig {
    /// RMS level below which a frame counts as silence (0.0-1.0).
    /// Lower values are more sensitive.
    pub silence_threshold: f64,
    /// Minimum silence duration that splits blocks, in seconds.
    pub min_silence_duration: f64,
    /// Minimum speech duration to keep a block, in seconds.
    pub min_speech_duration: f64,
    /// Maximum block duration before forced splitting, in seconds.
    pub max_block_duration: f64,
    /// Samples per frame for the RMS calculation.
    pub frame_size: usize,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            silence_threshold: 0.01,
            min_silence_duration: 0.3,
            min_speech_duration: 0.1,
            max_block_duration: 5.0,
            // 30ms at 16kHz.
            frame_size: 480,
        }
    }
}

impl SilenceConfig {
    /// The production profile: very quiet speech is still captured, and
    /// blocks run up to 10 seconds.
    #[must_use]
    pub fn production() -> Self {
        Self {
            silence_threshold: 0.0003,
            min_silence_duration: 0.5,
            max_block_duration: 10.0,
            ..Self::default()
        }
    }
}

/// Root mean square of a sample window.
#[must_use]
pub fn calculate_rms(samples: &[f32]) -> f64 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64).sqrt()
}

/// Convert a sequence of frame RMS values into speech blocks.
///
/// State machine: a non-silent frame opens a block; once the silence run
/// reaches `min_silence_duration` the block closes at the first silent
/// frame, and is kept only if it spans at least `min_speech_duration`.
/// Speech still open at EOF closes there.
#[must_use]
pub fn blocks_from_frames(
    frames: &[f64],
    frame_duration: f64,
    config: &SilenceConfig,
) -> Vec<SpeechBlock> {
    if frames.is_empty() {
        return Vec::new();
    }

    let min_silence_frames = (config.min_silence_duration / frame_duration) as usize;
    let min_speech_frames = (config.min_speech_duration / frame_duration) as usize;

    let mut blocks = Vec::new();
    let mut in_speech = false;
    let mut speech_start = 0_usize;
    let mut silence_count = 0_usize;

    for (i, &rms) in frames.iter().enumerate() {
        let is_silent = rms < config.silence_threshold;

        if !in_speech {
            if !is_silent {
                in_speech = true;
                speech_start = i;
                silence_count = 0;
            }
        } else if is_silent {
            silence_count += 1;
            if silence_count >= min_silence_frames {
                let speech_end = i - silence_count + 1;
                if speech_end - speech_start >= min_speech_frames {
                    blocks.push(SpeechBlock {
                        start_time: speech_start as f64 * frame_duration,
                        end_time: speech_end as f64 * frame_duration,
                    });
                }
                in_speech = false;
                silence_count = 0;
            }
        } else {
            silence_count = 0;
        }
    }

    if in_speech {
        let speech_end = frames.len();
        if speech_end - speech_start >= min_speech_frames {
            blocks.push(SpeechBlock {
                start_time: speech_start as f64 * frame_duration,
                end_time: speech_end as f64 * frame_duration,
            });
        }
    }

    blocks
}

/// Stream PCM from the converter (no tempo), compute per-frame RMS, and
/// produce speech blocks. Long blocks are split to `max_block_duration`.
pub fn detect_speech_blocks(
    path: &Path,
    config: &SilenceConfig,
    sample_rate: u32,
    token: Option<&CancellationToken>,
) -> ZbResult<Vec<SpeechBlock>> {
    let mut stream = PcmStream::open(&PcmRequest {
        sample_rate,
        ..PcmRequest::whole_file(path)
    })?;

    let mut frames = Vec::new();
    let mut frame_samples: Vec<f32> = Vec::with_capacity(config.frame_size);

    loop {
        let chunk = stream.read_samples(config.frame_size, token)?;
        if chunk.is_empty() {
            break;
        }
        frame_samples.extend_from_slice(&chunk);
        while frame_samples.len() >= config.frame_size {
            let rest = frame_samples.split_off(config.frame_size);
            frames.push(calculate_rms(&frame_samples));
            frame_samples = rest;
        }
    }
    if !frame_samples.is_empty() {
        frames.push(calculate_rms(&frame_samples));
    }

    let frame_duration = config.frame_size as f64 / f64::from(sample_rate);
    let blocks = blocks_from_frames(&frames, frame_duration, config);
    tracing::debug!(frames = frames.len(), blocks = blocks.len(), "silence detection done");
    Ok(split_long_blocks(blocks, config.max_block_duration))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_silence_is_zero() {
        assert_eq!(calculate_rms(&[]), 0.0);
        assert_eq!(calculate_rms(&[0.0; 480]), 0.0);
    }

    #[test]
    fn rms_of_constant_signal_is_its_magnitude() {
        assert!((calculate_rms(&[0.5; 100]) - 0.5).abs() < 1e-9);
        assert!((calculate_rms(&[-0.25; 100]) - 0.25).abs() < 1e-9);
    }

    #[test]
    fn synthetic_trace_yields_two_blocks() {
        // 30ms frames, min_silence 90ms (3 frames), min_speech 60ms (2 frames).
        let frames = [
            0.0, 0.0, 0.0, // silence
            0.2, 0.2, 0.2, // speech: frames 3-5
            0.0, 0.0, 0.0, // silence
            0.2, 0.2, // speech: frames 9-10
            0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        ];
        let config = SilenceConfig {
            silence_threshold: 0.1,
            min_silence_duration: 0.09,
            min_speech_duration: 0.06,
            max_block_duration: 5.0,
            frame_size: 480,
        };
        let blocks = blocks_from_frames(&frames, 0.03, &config);
        assert_eq!(blocks.len(), 2);
        assert!((blocks[0].start_time - 0.09).abs() < 1e-9);
        assert!((blocks[0].end_time - 0.18).abs() < 1e-9);
        assert!((blocks[1].start_time - 0.27).abs() < 1e-9);
        assert!((blocks[1].end_time - 0.33).abs() < 1e-9);
    }

    #[test]
    fn speech_at_eof_closes_a_block() {
        let frames = [0.0, 0.0, 0.3, 0.3, 0.3];
        let config = SilenceConfig {
            silence_threshold: 0.1,
            min_silence_duration: 0.09,
            min_speech_duration: 0.06,
            ..SilenceConfig::default()
        };
        let blocks = blocks_from_frames(&frames, 0.03, &config);
        assert_eq!(blocks.len(), 1);
        assert!((blocks[0].start_time - 0.06).abs() < 1e-9);
        assert!((blocks[0].end_time - 0.15).abs() < 1e-9);
    }

    #[test]
    fn short_speech_bursts_are_dropped() {
        // A single loud frame between silences never reaches min_speech.
        let frames = [0.0, 0.0, 0.5, 0.0, 0.0, 0.0, 0.0];
        let config = SilenceConfig {
            silence_threshold: 0.1,
            min_silence_duration: 0.09,
            min_speech_duration: 0.06,
            ..SilenceConfig::default()
        };
        assert!(blocks_from_frames(&frames, 0.03, &config).is_empty());
    }

    #[test]
    fn brief_silence_does_not_split_speech() {
        // Two silent frames inside speech stay under min_silence (3 frames).
        let frames = [0.3, 0.3, 0.0, 0.0, 0.3, 0.3, 0.0, 0.0, 0.0, 0.0];
        let config = SilenceConfig {
            silence_threshold: 0.1,
            min_silence_duration: 0.09,
            min_speech_duration: 0.06,
            ..SilenceConfig::default()
        };
        let blocks = blocks_from_frames(&frames, 0.03, &config);
        assert_eq!(blocks.len(), 1);
        assert!((blocks[0].start_time - 0.0).abs() < 1e-9);
        assert!((blocks[0].end_time - 0.18).abs() < 1e-9);
    }

    #[test]
    fn production_profile_overrides() {
        let config = SilenceConfig::production();
        assert!((config.silence_threshold - 0.0003).abs() < 1e-12);
        assert!((config.max_block_duration - 10.0).abs() < 1e-9);
        assert_eq!(config.frame_size, 480);
    }
}

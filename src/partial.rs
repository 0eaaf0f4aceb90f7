//! Partial re-transcription and merge primitives.
//!
//! A time range of an already-transcribed file is re-run with a (possibly
//! different) recogniser; the new tokens come back in original-timeline
//! coordinates and are merged into the global token/segment stream. Which
//! merge primitive applies depends on the engine class (see
//! [`crate::engine::MergeStrategy`]).

use std::path::Path;

use crate::engine::Recognizer;
use crate::error::{ZbError, ZbResult};
use crate::media::{PcmRequest, PcmStream};
use crate::result::{Segment, Token, TranscriptionResult};
use crate::transcribe::project_tokens;
use crate::worker::CancellationToken;

/// Tolerance for tokens sitting just past a range or segment end.
const END_TOLERANCE: f64 = 0.01;

/// Options for partial transcription.
#[derive(Debug, Clone, Copy)]
pub struct PartialOptions {
    pub start_time: f64,
    pub end_time: f64,
    /// Audio tempo; below 1.0 slows the audio for harder passages.
    pub tempo: f64,
    /// Sub-window length in seconds.
    pub chunk_sec: usize,
}

impl PartialOptions {
    #[must_use]
    pub fn new(start_time: f64, end_time: f64) -> Self {
        Self {
            start_time,
            end_time,
            tempo: 0.95,
            chunk_sec: 20,
        }
    }
}

/// Transcribe `[start_time, end_time]` of a file in `chunk_sec` sub-windows,
/// offsetting each sub-window's tokens by the running sample count so they
/// land on the original timeline.
pub fn transcribe_partial(
    path: &Path,
    opts: PartialOptions,
    recognizer: &mut Recognizer,
    token: Option<&CancellationToken>,
) -> ZbResult<TranscriptionResult> {
    let tempo = if opts.tempo > 0.0 { opts.tempo } else { 0.95 };
    let chunk_sec = if opts.chunk_sec > 0 { opts.chunk_sec } else { 20 };

    let duration = opts.end_time - opts.start_time;
    if duration <= 0.0 {
        return Err(ZbError::InvalidInput(format!(
            "invalid time range: {:.2} - {:.2}",
            opts.start_time, opts.end_time
        )));
    }

    let request = PcmRequest {
        sample_rate: recognizer.sample_rate(),
        ..PcmRequest::window(path, opts.start_time, duration).with_tempo(tempo)
    };
    let mut stream = PcmStream::open(&request)?;

    let chunk_samples = recognizer.sample_rate() as usize * chunk_sec;
    let mut all_tokens = Vec::new();
    let mut all_text = String::new();
    let mut processed_samples = 0_u64;

    loop {
        let samples = stream.read_samples(chunk_samples, token)?;
        if samples.is_empty() {
            break;
        }

        // Sub-window offset in stretched stream time; the projection folds
        // in the tempo correction and the absolute range start.
        let chunk_offset =
            processed_samples as f64 / f64::from(recognizer.sample_rate());
        processed_samples += samples.len() as u64;

        let result = recognizer.transcribe_samples(&samples)?;
        all_tokens.extend(project_tokens(
            &result.tokens,
            opts.start_time + chunk_offset * tempo,
            tempo,
        ));
        all_text.push_str(&result.text);
    }

    // Rounding at the window tail can push a token marginally past the
    // range end; clamp to the documented tolerance.
    all_tokens.retain(|t| f64::from(t.start_time) <= opts.end_time + END_TOLERANCE);

    Ok(TranscriptionResult {
        text: all_text,
        tokens: all_tokens,
        ..Default::default()
    })
}

/// Transcribe the whole window in one pass and distribute timestamps
/// uniformly over `[start_time, end_time]`. For engines that return subword
/// tokens without usable timestamps.
pub fn transcribe_partial_uniform(
    path: &Path,
    opts: PartialOptions,
    recognizer: &mut Recognizer,
    token: Option<&CancellationToken>,
) -> ZbResult<TranscriptionResult> {
    let tempo = if opts.tempo > 0.0 { opts.tempo } else { 1.0 };
    let duration = opts.end_time - opts.start_time;
    if duration <= 0.0 {
        return Err(ZbError::InvalidInput(format!(
            "invalid time range: {:.2} - {:.2}",
            opts.start_time, opts.end_time
        )));
    }

    let request = PcmRequest {
        sample_rate: recognizer.sample_rate(),
        ..PcmRequest::window(path, opts.start_time, duration).with_tempo(tempo)
    };
    let mut stream = PcmStream::open(&request)?;
    let samples = stream.read_to_end(token)?;
    if samples.is_empty() {
        return Ok(TranscriptionResult::default());
    }

    let result = recognizer.transcribe_samples(&samples)?;
    if result.text.is_empty() {
        return Ok(TranscriptionResult::default());
    }

    let text = result.text.trim().to_owned();
    let token_texts: Vec<String> = result.tokens.into_iter().map(|t| t.text).collect();
    let tokens = distribute_timestamps(&token_texts, opts.start_time, opts.end_time);

    Ok(TranscriptionResult {
        text,
        tokens,
        ..Default::default()
    })
}

/// Uniformly spread token texts over `[start_time, end_time]`, skipping
/// whitespace-only tokens.
#[must_use]
pub fn distribute_timestamps(token_texts: &[String], start_time: f64, end_time: f64) -> Vec<Token> {
    let valid: Vec<&String> = token_texts
        .iter()
        .filter(|t| !t.trim().is_empty())
        .collect();
    if valid.is_empty() {
        return Vec::new();
    }

    let token_duration = (end_time - start_time) / valid.len() as f64;
    valid
        .into_iter()
        .enumerate()
        .map(|(i, text)| Token {
            text: text.clone(),
            start_time: (start_time + i as f64 * token_duration) as f32,
            duration: token_duration as f32,
        })
        .collect()
}

/// Timestamp-based token merge: original tokens before `start_time`, then
/// the replacement, then original tokens from `end_time` on.
#[must_use]
pub fn merge_tokens(
    original: &[Token],
    replacement: &[Token],
    start_time: f64,
    end_time: f64,
) -> Vec<Token> {
    let mut result = Vec::with_capacity(original.len() + replacement.len());
    for token in original {
        if f64::from(token.start_time) < start_time {
            result.push(token.clone());
        }
    }
    result.extend_from_slice(replacement);
    for token in original {
        if f64::from(token.start_time) >= end_time {
            result.push(token.clone());
        }
    }
    result
}

/// Rebuild segments `[start_idx, end_idx]` from replacement tokens while
/// keeping the original segment time boundaries. The final segment also
/// claims tokens within the end tolerance past its end.
#[must_use]
pub fn merge_segments(
    original: &[Segment],
    start_idx: usize,
    end_idx: usize,
    new_tokens: &[Token],
) -> Vec<Segment> {
    let mut result = Vec::with_capacity(original.len());
    result.extend_from_slice(&original[..start_idx.min(original.len())]);

    for (i, seg) in original
        .iter()
        .enumerate()
        .take((end_idx + 1).min(original.len()))
        .skip(start_idx)
    {
        let mut seg_text = String::new();
        for token in new_tokens {
            let ts = f64::from(token.start_time);
            if ts >= seg.start_time && ts < seg.end_time {
                seg_text.push_str(&token.text);
            }
        }
        if i == end_idx {
            for token in new_tokens {
                let ts = f64::from(token.start_time);
                if ts >= seg.end_time && ts <= seg.end_time + END_TOLERANCE {
                    seg_text.push_str(&token.text);
                }
            }
        }
        result.push(Segment {
            text: seg_text,
            start_time: seg.start_time,
            end_time: seg.end_time,
        });
    }

    if end_idx + 1 < original.len() {
        result.extend_from_slice(&original[end_idx + 1..]);
    }
    result
}

/// Duration-ratio segment merge for engines with uniform timestamps: each
/// affected segment receives tokens proportional to its share of the total
/// duration; the last segment absorbs the remainder.
#[must_use]
pub fn merge_segments_by_ratio(
    original: &[Segment],
    start_idx: usize,
    end_idx: usize,
    new_tokens: &[Token],
) -> Vec<Segment> {
    let mut result = Vec::with_capacity(original.len());
    result.extend_from_slice(&original[..start_idx.min(original.len())]);

    let total_duration: f64 = original
        .iter()
        .take((end_idx + 1).min(original.len()))
        .skip(start_idx)
        .map(|seg| (seg.end_time - seg.start_time).max(0.0))
        .sum();

    let mut token_index = 0_usize;
    for (i, seg) in original
        .iter()
        .enumerate()
        .take((end_idx + 1).min(original.len()))
        .skip(start_idx)
    {
        let duration = seg.end_time - seg.start_time;
        let mut seg_text = String::new();

        if total_duration > 0.0 && duration > 0.0 {
            let mut token_count =
                (new_tokens.len() as f64 * duration / total_duration) as usize;
            if i == end_idx {
                token_count = new_tokens.len() - token_index;
            }
            for _ in 0..token_count {
                if token_index >= new_tokens.len() {
                    break;
                }
                seg_text.push_str(&new_tokens[token_index].text);
                token_index += 1;
            }
        }

        result.push(Segment {
            text: seg_text,
            start_time: seg.start_time,
            end_time: seg.end_time,
        });
    }

    if end_idx + 1 < original.len() {
        result.extend_from_slice(&original[end_idx + 1..]);
    }
    result
}

/// Duration-ratio token merge: replacement tokens are restamped to fit
/// within the affected segments' time frames, giving monotonic in-segment
/// times even when the engine supplied none.
#[must_use]
pub fn merge_tokens_by_segment_ratio(
    original: &[Token],
    new_tokens: &[Token],
    segments: &[Segment],
    start_idx: usize,
    end_idx: usize,
    start_time: f64,
    end_time: f64,
) -> Vec<Token> {
    let mut result = Vec::with_capacity(original.len() + new_tokens.len());
    for token in original {
        if f64::from(token.start_time) < start_time {
            result.push(token.clone());
        }
    }

    let total_duration: f64 = segments
        .iter()
        .take((end_idx + 1).min(segments.len()))
        .skip(start_idx)
        .map(|seg| (seg.end_time - seg.start_time).max(0.0))
        .sum();

    let mut token_index = 0_usize;
    for (i, seg) in segments
        .iter()
        .enumerate()
        .take((end_idx + 1).min(segments.len()))
        .skip(start_idx)
    {
        let duration = seg.end_time - seg.start_time;
        if total_duration <= 0.0 || duration <= 0.0 {
            continue;
        }

        let mut token_count = (new_tokens.len() as f64 * duration / total_duration) as usize;
        if i == end_idx {
            token_count = new_tokens.len() - token_index;
        }

        for j in 0..token_count {
            if token_index >= new_tokens.len() {
                break;
            }
            let token_ratio = j as f64 / token_count.max(1) as f64;
            result.push(Token {
                text: new_tokens[token_index].text.clone(),
                start_time: (seg.start_time + duration * token_ratio) as f32,
                duration: (duration / token_count.max(1) as f64) as f32,
            });
            token_index += 1;
        }
    }

    for token in original {
        if f64::from(token.start_time) >= end_time {
            result.push(token.clone());
        }
    }
    result
}

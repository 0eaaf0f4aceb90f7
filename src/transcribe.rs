//! Block-level transcription strategies.
//!
//! Every strategy ends in the same place: tokens whose timestamps live on
//! the original audio timeline. Blocks are extracted with seek + optional
//! tempo stretch; timestamps emerging from the recogniser are in stretched
//! stream time and are re-projected as `start + t * tempo`.

use std::path::Path;
use std::time::Instant;

use crate::block::{split_long_blocks, split_long_blocks_with_overlap, SpeechBlock};
use crate::engine::Recognizer;
use crate::error::{ZbError, ZbResult};
use crate::media::{self, PcmRequest, PcmStream};
use crate::result::{tokens_to_segments, Token, TranscriptionResult};
use crate::silence::{self, SilenceConfig};
use crate::vad::{self, VadConfig, VoiceDetector};
use crate::worker::CancellationToken;

/// Progress callback: percentage (0-100) and a short step label.
pub type ProgressFn<'a> = &'a dyn Fn(i64, &str);

/// Minimum block duration the recogniser accepts, in stream seconds.
const MIN_BLOCK_SECONDS: f64 = 0.1;

fn report(progress: Option<ProgressFn<'_>>, percent: i64, step: &str) {
    if let Some(callback) = progress {
        callback(percent, step);
    }
}

/// Map tokens from stretched stream time onto the original timeline.
#[must_use]
pub fn project_tokens(tokens: &[Token], block_start: f64, tempo: f64) -> Vec<Token> {
    tokens
        .iter()
        .map(|token| Token {
            text: token.text.clone(),
            start_time: (block_start + f64::from(token.start_time) * tempo) as f32,
            duration: (f64::from(token.duration) * tempo) as f32,
        })
        .collect()
}

/// Transcribe a single speech block, optionally tempo-stretched, returning
/// tokens in original-timeline coordinates.
pub fn transcribe_block(
    path: &Path,
    block: SpeechBlock,
    tempo: f64,
    recognizer: &mut Recognizer,
    token: Option<&CancellationToken>,
) -> ZbResult<(Vec<Token>, String)> {
    let duration = block.duration();
    if duration <= 0.0 {
        return Ok((Vec::new(), String::new()));
    }

    // Stretched duration below the recogniser floor: the neural graphs
    // reject micro-inputs, so skip outright.
    if duration / tempo < MIN_BLOCK_SECONDS {
        return Ok((Vec::new(), String::new()));
    }

    let request = PcmRequest {
        sample_rate: recognizer.sample_rate(),
        ..PcmRequest::window(path, block.start_time, duration).with_tempo(tempo)
    };
    let mut stream = PcmStream::open(&request)?;
    let samples = stream.read_to_end(token)?;
    if samples.is_empty() {
        return Ok((Vec::new(), String::new()));
    }

    let result = recognizer.transcribe_samples(&samples)?;
    Ok((
        project_tokens(&result.tokens, block.start_time, tempo),
        result.text,
    ))
}

/// Transcribe using energy-based silence detection. Detects any sound, not
/// just voice, which keeps very quiet speech.
pub fn transcribe_with_silence(
    path: &Path,
    config: &SilenceConfig,
    tempo: f64,
    recognizer: &mut Recognizer,
    progress: Option<ProgressFn<'_>>,
    token: Option<&CancellationToken>,
) -> ZbResult<TranscriptionResult> {
    let tempo = if tempo > 0.0 { tempo } else { 1.0 };
    let started = Instant::now();

    report(progress, 10, "detecting speech");
    let mut blocks =
        silence::detect_speech_blocks(path, config, recognizer.sample_rate(), token)?;
    if blocks.is_empty() {
        return Ok(TranscriptionResult::default());
    }

    pull_first_block_to_zero(&mut blocks);
    let blocks = split_long_blocks(blocks, config.max_block_duration);
    report(progress, 20, &format!("found {} blocks", blocks.len()));

    let mut all_tokens = Vec::new();
    let mut all_text = String::new();

    for (i, block) in blocks.iter().enumerate() {
        report(
            progress,
            20 + (60 * i / blocks.len()) as i64,
            &format!("transcribing block {}/{}", i + 1, blocks.len()),
        );
        match transcribe_block(path, *block, tempo, recognizer, token) {
            Ok((tokens, text)) => {
                all_tokens.extend(tokens);
                all_text.push_str(&text);
            }
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                let error = ZbError::RecognizerCrashed {
                    block: i + 1,
                    reason: error.to_string(),
                };
                tracing::warn!(%error, "skipping block");
            }
        }
    }

    report(progress, 90, "finalizing");
    Ok(assemble(all_text, all_tokens, started))
}

/// Transcribe with overlapping chunks. Each block is recognised with context
/// past its cut, but only tokens starting inside the block's main region
/// survive, so seams produce neither duplicates nor split words.
pub fn transcribe_with_overlap(
    path: &Path,
    config: &SilenceConfig,
    tempo: f64,
    overlap: f64,
    recognizer: &mut Recognizer,
    progress: Option<ProgressFn<'_>>,
    token: Option<&CancellationToken>,
) -> ZbResult<TranscriptionResult> {
    let tempo = if tempo > 0.0 { tempo } else { 1.0 };
    let overlap = if overlap > 0.0 { overlap } else { 0.5 };
    let started = Instant::now();

    report(progress, 10, "detecting speech");
    let mut blocks =
        silence::detect_speech_blocks(path, config, recognizer.sample_rate(), token)?;
    if blocks.is_empty() {
        return Ok(TranscriptionResult::default());
    }

    pull_first_block_to_zero(&mut blocks);
    let overlap_blocks =
        split_long_blocks_with_overlap(blocks, config.max_block_duration, overlap);
    report(progress, 20, &format!("found {} blocks", overlap_blocks.len()));

    let mut all_tokens = Vec::new();

    for (i, ob) in overlap_blocks.iter().enumerate() {
        report(
            progress,
            20 + (60 * i / overlap_blocks.len()) as i64,
            &format!("transcribing block {}/{}", i + 1, overlap_blocks.len()),
        );
        match transcribe_block(path, ob.block, tempo, recognizer, token) {
            Ok((tokens, _)) => {
                // Keep only tokens that start inside the main region.
                for t in tokens {
                    let ts = f64::from(t.start_time);
                    if ts >= ob.main_start && ts < ob.main_end {
                        all_tokens.push(t);
                    }
                }
            }
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                let error = ZbError::RecognizerCrashed {
                    block: i + 1,
                    reason: error.to_string(),
                };
                tracing::warn!(%error, "skipping block");
            }
        }
    }

    report(progress, 90, "finalizing");
    let text = crate::result::rebuild_text(&all_tokens);
    Ok(assemble(text, all_tokens, started))
}

/// Transcribe using neural VAD block detection.
pub fn transcribe_with_vad_blocks(
    path: &Path,
    config: &VadConfig,
    detector: &mut dyn VoiceDetector,
    tempo: f64,
    recognizer: &mut Recognizer,
    progress: Option<ProgressFn<'_>>,
    token: Option<&CancellationToken>,
) -> ZbResult<TranscriptionResult> {
    let tempo = if tempo > 0.0 { tempo } else { 1.0 };
    let started = Instant::now();
    config.ensure_model()?;

    report(progress, 10, "detecting speech");
    let blocks = vad::detect_speech_blocks(path, detector, recognizer.sample_rate(), token)?;
    if blocks.is_empty() {
        return Ok(TranscriptionResult::default());
    }

    // Split long blocks so recognition does not drop block openings.
    let blocks = split_long_blocks(blocks, config.max_block_duration);
    report(progress, 20, &format!("found {} blocks", blocks.len()));

    let mut all_tokens: Vec<Token> = Vec::new();
    let mut all_text = String::new();

    for (i, block) in blocks.iter().enumerate() {
        report(
            progress,
            20 + (60 * i / blocks.len()) as i64,
            &format!("transcribing block {}/{}", i + 1, blocks.len()),
        );
        match transcribe_block(path, *block, tempo, recognizer, token) {
            Ok((tokens, text)) => {
                all_tokens.extend(tokens);
                all_text.push_str(&text);
            }
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                let error = ZbError::RecognizerCrashed {
                    block: i + 1,
                    reason: error.to_string(),
                };
                tracing::warn!(%error, "skipping block");
            }
        }
    }

    all_tokens.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));

    report(progress, 90, "finalizing");
    Ok(assemble(all_text, all_tokens, started))
}

/// Whole-file tempo/chunk mode: one converter invocation over the entire
/// file, read in fixed windows, each transcribed independently with offset
/// `chunk_index * chunk_sec * tempo`.
pub fn transcribe_with_tempo(
    path: &Path,
    tempo: f64,
    chunk_sec: usize,
    recognizer: &mut Recognizer,
    progress: Option<ProgressFn<'_>>,
    token: Option<&CancellationToken>,
) -> ZbResult<TranscriptionResult> {
    let tempo = if tempo > 0.0 { tempo } else { 1.0 };
    let chunk_sec = if chunk_sec > 0 { chunk_sec } else { 20 };
    let started = Instant::now();

    let total_duration = media::probe_duration(path)?;

    let request = PcmRequest {
        sample_rate: recognizer.sample_rate(),
        ..PcmRequest::whole_file(path).with_tempo(tempo)
    };
    let mut stream = PcmStream::open(&request)?;

    let chunk_samples = recognizer.sample_rate() as usize * chunk_sec;
    let mut all_tokens = Vec::new();
    let mut all_text = String::new();
    let mut processed_samples = 0_u64;
    let mut chunk_index = 0_usize;

    loop {
        let samples = stream.read_samples(chunk_samples, token)?;
        if samples.is_empty() {
            break;
        }
        processed_samples += samples.len() as u64;

        // Chunk offset in stream time, corrected back to the original
        // timeline by the tempo factor.
        let start_sec = (chunk_index * chunk_sec) as f64 * tempo;
        chunk_index += 1;

        match recognizer.transcribe_samples(&samples) {
            Ok(result) => {
                all_tokens.extend(project_tokens(&result.tokens, start_sec, tempo));
                all_text.push_str(&result.text);
            }
            Err(error) if error.is_cancelled() => return Err(error),
            Err(error) => {
                tracing::warn!(chunk = chunk_index, %error, "failed to transcribe chunk, skipping");
            }
        }

        if total_duration > 0.0 {
            let progressed = processed_samples as f64
                / f64::from(recognizer.sample_rate())
                * tempo;
            let percent = (30.0 + 60.0 * progressed / total_duration).min(90.0) as i64;
            report(progress, percent, "transcribing");
        }
    }

    Ok(assemble(all_text, all_tokens, started))
}

/// Quiet openings are easy to lose: when the first detected block starts
/// late, extend it back to zero.
fn pull_first_block_to_zero(blocks: &mut [SpeechBlock]) {
    if let Some(first) = blocks.first_mut() {
        if first.start_time > 0.5 {
            first.start_time = 0.0;
        }
    }
}

fn assemble(text: String, tokens: Vec<Token>, started: Instant) -> TranscriptionResult {
    let total_duration = tokens.last().map(Token::end_time).unwrap_or(0.0);
    let segments = tokens_to_segments(&tokens);
    TranscriptionResult {
        text,
        tokens,
        segments,
        total_duration,
        duration: started.elapsed().as_secs_f64(),
        speaker: None,
    }
}

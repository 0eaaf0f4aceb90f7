//! Speech blocks and block splitting.
//!
//! A [`SpeechBlock`] is a detected speech span on the original audio
//! timeline. Long blocks are split before recognition: either into hard
//! slices of at most `max_duration`, or into overlapping slices whose
//! non-overlapping `main` regions tile the input.

use serde::{Deserialize, Serialize};

/// A detected speech span `[start_time, end_time]` in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpeechBlock {
    pub start_time: f64,
    pub end_time: f64,
}

impl SpeechBlock {
    #[must_use]
    pub fn duration(&self) -> f64 {
        self.end_time - self.start_time
    }
}

/// A block carrying a `main` subregion whose tokens are authoritative.
/// Tokens outside `[main_start, main_end)` are context only and discarded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OverlapBlock {
    pub block: SpeechBlock,
    pub main_start: f64,
    pub main_end: f64,
}

/// Split blocks longer than `max_duration` into contiguous slices of exactly
/// `max_duration` (last slice may be shorter). `max_duration <= 0` disables
/// splitting.
#[must_use]
pub fn split_long_blocks(blocks: Vec<SpeechBlock>, max_duration: f64) -> Vec<SpeechBlock> {
    if max_duration <= 0.0 {
        return blocks;
    }

    let mut result = Vec::with_capacity(blocks.len());
    for block in blocks {
        if block.duration() <= max_duration {
            result.push(block);
            continue;
        }

        let mut start = block.start_time;
        while start < block.end_time {
            let end = (start + max_duration).min(block.end_time);
            result.push(SpeechBlock {
                start_time: start,
                end_time: end,
            });
            start = end;
        }
    }
    result
}

/// Split blocks with overlap for context re-injection.
///
/// Each physical slice spans `max_duration`; its `main` region spans
/// `max_duration - overlap`, and the next slice starts at the previous
/// `main_end` so the recogniser sees `overlap` seconds past every cut.
/// Consecutive `main` regions tile the block without overlap.
#[must_use]
pub fn split_long_blocks_with_overlap(
    blocks: Vec<SpeechBlock>,
    max_duration: f64,
    overlap: f64,
) -> Vec<OverlapBlock> {
    let max_duration = if max_duration > 0.0 { max_duration } else { 2.0 };
    let overlap = if overlap > 0.0 { overlap } else { 0.5 };

    let mut result = Vec::new();
    for block in blocks {
        if block.duration() <= max_duration {
            result.push(OverlapBlock {
                block,
                main_start: block.start_time,
                main_end: block.end_time,
            });
            continue;
        }

        let main_duration = max_duration - overlap;
        let mut start = block.start_time;

        while start < block.end_time {
            let end = (start + max_duration).min(block.end_time);
            let main_start = start;
            let main_end = (start + main_duration).min(block.end_time);

            result.push(OverlapBlock {
                block: SpeechBlock {
                    start_time: start,
                    end_time: end,
                },
                main_start,
                main_end,
            });

            start = main_end;
        }
    }
    result
}

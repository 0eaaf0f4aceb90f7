//! LCS character alignment.
//!
//! Aligns replacement text (from an engine with better recognition but no
//! timestamps) against original tokens, preserving original timestamps for
//! characters that did not change and interpolating times for insertions.

use crate::error::ZbResult;
use crate::result::{Segment, Token};
use crate::worker::CancellationToken;

/// One step of the character alignment. Exposed so UIs can highlight
/// corrections against the original transcript.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlignOp {
    /// Character present in both sequences; the original timestamp is kept.
    Match { orig_idx: usize, new_idx: usize },
    /// Character only in the new text; its timestamp is interpolated.
    Insert { new_idx: usize },
    /// Character only in the original; it is dropped from the output.
    Delete { orig_idx: usize },
}

/// A timestamp reference point taken from a matched original token.
#[derive(Debug, Clone, Copy)]
struct Anchor {
    new_idx: usize,
    time: f32,
    duration: f32,
}

/// Align `new_text` against `original_tokens`, producing per-character tokens
/// whose matched characters keep their original timestamps exactly.
///
/// Returns the aligned tokens together with the alignment operations.
pub fn align_tokens_with_text(
    original_tokens: &[Token],
    new_text: &str,
    token: Option<&CancellationToken>,
) -> ZbResult<(Vec<Token>, Vec<AlignOp>)> {
    if original_tokens.is_empty() || new_text.is_empty() {
        return Ok((Vec::new(), Vec::new()));
    }

    // Character-to-token index map over the concatenated original text.
    let mut original_chars = Vec::new();
    let mut char_to_token = Vec::new();
    for (i, tok) in original_tokens.iter().enumerate() {
        for ch in tok.text.chars() {
            original_chars.push(ch);
            char_to_token.push(i);
        }
    }

    let new_chars: Vec<char> = new_text.chars().collect();

    let ops = compute_alignment(&original_chars, &new_chars, token)?;
    let aligned = build_aligned_tokens(original_tokens, &char_to_token, &new_chars, &ops);
    Ok((aligned, ops))
}

/// Standard LCS dynamic program with backtrack to Match/Insert/Delete ops.
///
/// The DP loop checkpoints the cancellation token once per row so multi-
/// minute alignments terminate promptly on shutdown.
pub fn compute_alignment(
    original: &[char],
    new_chars: &[char],
    token: Option<&CancellationToken>,
) -> ZbResult<Vec<AlignOp>> {
    let m = original.len();
    let n = new_chars.len();

    let mut dp = vec![vec![0_usize; n + 1]; m + 1];
    for i in 1..=m {
        if let Some(tok) = token {
            tok.checkpoint()?;
        }
        for j in 1..=n {
            dp[i][j] = if original[i - 1] == new_chars[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }

    let mut ops = Vec::new();
    let (mut i, mut j) = (m, n);
    while i > 0 || j > 0 {
        if i > 0 && j > 0 && original[i - 1] == new_chars[j - 1] {
            ops.push(AlignOp::Match {
                orig_idx: i - 1,
                new_idx: j - 1,
            });
            i -= 1;
            j -= 1;
        } else if j > 0 && (i == 0 || dp[i][j - 1] >= dp[i - 1][j]) {
            ops.push(AlignOp::Insert { new_idx: j - 1 });
            j -= 1;
        } else {
            ops.push(AlignOp::Delete { orig_idx: i - 1 });
            i -= 1;
        }
    }
    ops.reverse();
    Ok(ops)
}

fn build_aligned_tokens(
    original_tokens: &[Token],
    char_to_token: &[usize],
    new_chars: &[char],
    ops: &[AlignOp],
) -> Vec<Token> {
    if ops.is_empty() {
        return Vec::new();
    }

    let mut anchors = Vec::new();
    for op in ops {
        if let AlignOp::Match { orig_idx, new_idx } = op {
            if let Some(&token_idx) = char_to_token.get(*orig_idx) {
                let orig = &original_tokens[token_idx];
                anchors.push(Anchor {
                    new_idx: *new_idx,
                    time: orig.start_time,
                    duration: orig.duration,
                });
            }
        }
    }

    if anchors.is_empty() {
        let first = &original_tokens[0];
        let last = &original_tokens[original_tokens.len() - 1];
        return distribute_uniformly(
            new_chars,
            f64::from(first.start_time),
            f64::from(last.end_time()),
        );
    }

    let mut result = Vec::new();
    for op in ops {
        match op {
            AlignOp::Delete { .. } => {}
            AlignOp::Match { orig_idx, new_idx } => {
                // Matched characters carry their original timing exactly.
                let orig = &original_tokens[char_to_token[*orig_idx]];
                result.push(Token {
                    text: new_chars[*new_idx].to_string(),
                    start_time: orig.start_time,
                    duration: orig.duration,
                });
            }
            AlignOp::Insert { new_idx } => {
                result.push(Token {
                    text: new_chars[*new_idx].to_string(),
                    start_time: interpolate_timestamp(*new_idx, &anchors),
                    duration: estimate_duration(&anchors),
                });
            }
        }
    }
    result
}

fn interpolate_timestamp(new_idx: usize, anchors: &[Anchor]) -> f32 {
    if anchors.is_empty() {
        return 0.0;
    }

    let prev = anchors.iter().rev().find(|a| a.new_idx <= new_idx);
    let next = anchors.iter().find(|a| a.new_idx >= new_idx);

    if let Some(prev) = prev {
        if prev.new_idx == new_idx {
            return prev.time;
        }
    }

    match (prev, next) {
        (Some(prev), None) => {
            // Extrapolate forward from the last two anchors' rate.
            if anchors.len() >= 2 {
                let last = anchors[anchors.len() - 1];
                let second_last = anchors[anchors.len() - 2];
                if last.new_idx > second_last.new_idx {
                    let rate = (last.time - second_last.time)
                        / (last.new_idx - second_last.new_idx) as f32;
                    return last.time + rate * (new_idx - last.new_idx) as f32;
                }
            }
            prev.time + prev.duration
        }
        (None, Some(next)) => {
            // Extrapolate backward from the first two anchors' rate.
            if anchors.len() >= 2 {
                let first = anchors[0];
                let second = anchors[1];
                if second.new_idx > first.new_idx {
                    let rate =
                        (second.time - first.time) / (second.new_idx - first.new_idx) as f32;
                    return first.time - rate * (first.new_idx - new_idx) as f32;
                }
            }
            next.time
        }
        (Some(prev), Some(next)) => {
            if prev.new_idx == next.new_idx {
                return prev.time;
            }
            let ratio = (new_idx - prev.new_idx) as f32 / (next.new_idx - prev.new_idx) as f32;
            prev.time + ratio * (next.time - prev.time)
        }
        (None, None) => 0.0,
    }
}

/// Mean anchor duration clamped to [0.1, 0.3] s; 0.1 when no anchors exist.
fn estimate_duration(anchors: &[Anchor]) -> f32 {
    if anchors.is_empty() {
        return 0.1;
    }
    let sum: f32 = anchors.iter().map(|a| a.duration).sum();
    (sum / anchors.len() as f32).clamp(0.1, 0.3)
}

fn distribute_uniformly(chars: &[char], start_time: f64, end_time: f64) -> Vec<Token> {
    if chars.is_empty() {
        return Vec::new();
    }
    let char_duration = (end_time - start_time) / chars.len() as f64;
    chars
        .iter()
        .enumerate()
        .map(|(i, ch)| Token {
            text: ch.to_string(),
            start_time: (start_time + i as f64 * char_duration) as f32,
            duration: char_duration as f32,
        })
        .collect()
}

/// Align replacement text against the tokens of segments
/// `[start_idx, end_idx]`, then redistribute the aligned tokens back into the
/// original segment frames.
///
/// Returns the aligned tokens, the rebuilt segments over the affected range,
/// and the character diff.
pub fn align_tokens_for_segments(
    original_tokens: &[Token],
    new_text: &str,
    segments: &[Segment],
    start_idx: usize,
    end_idx: usize,
    token: Option<&CancellationToken>,
) -> ZbResult<(Vec<Token>, Vec<Segment>, Vec<AlignOp>)> {
    // Tokens whose start falls inside one of the target segments.
    let mut segment_tokens = Vec::new();
    for tok in original_tokens {
        let ts = f64::from(tok.start_time);
        for seg in segments
            .iter()
            .take((end_idx + 1).min(segments.len()))
            .skip(start_idx)
        {
            if ts >= seg.start_time && ts < seg.end_time {
                segment_tokens.push(tok.clone());
                break;
            }
        }
    }

    // Tokens sitting within 10ms past the final segment's end still belong.
    if let Some(last_seg) = segments.get(end_idx) {
        for tok in original_tokens {
            let ts = f64::from(tok.start_time);
            if ts >= last_seg.end_time && ts <= last_seg.end_time + 0.01 {
                segment_tokens.push(tok.clone());
            }
        }
    }

    let (aligned, ops) = align_tokens_with_text(&segment_tokens, new_text, token)?;
    if aligned.is_empty() {
        return Ok((Vec::new(), Vec::new(), ops));
    }

    let mut new_segments = Vec::with_capacity(end_idx.saturating_sub(start_idx) + 1);
    for (i, seg) in segments
        .iter()
        .enumerate()
        .take((end_idx + 1).min(segments.len()))
        .skip(start_idx)
    {
        let mut seg_text = String::new();
        for tok in &aligned {
            let ts = f64::from(tok.start_time);
            if ts >= seg.start_time && ts < seg.end_time {
                seg_text.push_str(&tok.text);
            }
            if i == end_idx && ts >= seg.end_time && ts <= seg.end_time + 0.01 {
                seg_text.push_str(&tok.text);
            }
        }
        new_segments.push(Segment {
            text: seg_text,
            start_time: seg.start_time,
            end_time: seg.end_time,
        });
    }

    Ok((aligned, new_segments, ops))
}

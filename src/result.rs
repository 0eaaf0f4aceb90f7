//! Transcription result model and output formatters.
//!
//! A [`TranscriptionResult`] is the unit persisted as a `transcription`
//! artifact: the full text, per-token timestamps on the original audio
//! timeline, and segments grouped from tokens. All serialized field names
//! are lower-snake-case; times are seconds.

use serde::{Deserialize, Serialize};

use crate::error::ZbResult;

/// The atomic time-aligned unit: typically one grapheme cluster or subword.
///
/// Times are single precision as delivered by recogniser FFIs; `start_time`
/// is measured on the original audio timeline, even after tempo stretching
/// or chunked processing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub text: String,
    pub start_time: f32,
    pub duration: f32,
}

impl Token {
    #[must_use]
    pub fn end_time(&self) -> f32 {
        self.start_time + self.duration
    }
}

/// A contiguous stretch of text grouped from tokens with gaps <= 0.5 s.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub text: String,
    pub start_time: f64,
    pub end_time: f64,
}

/// Complete transcription output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct TranscriptionResult {
    pub text: String,
    #[serde(default)]
    pub tokens: Vec<Token>,
    #[serde(default)]
    pub segments: Vec<Segment>,
    /// End of the last token on the original timeline.
    #[serde(default)]
    pub total_duration: f32,
    /// Processing wall-clock time in seconds.
    #[serde(default)]
    pub duration: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speaker: Option<String>,
}

impl TranscriptionResult {
    /// Assemble a result from tokens: text concatenation, segment grouping,
    /// and total duration from the last token's end.
    #[must_use]
    pub fn from_tokens(tokens: Vec<Token>, processing_seconds: f64) -> Self {
        let text: String = tokens.iter().map(|t| t.text.as_str()).collect();
        let total_duration = tokens.last().map(Token::end_time).unwrap_or(0.0);
        let segments = tokens_to_segments(&tokens);
        Self {
            text,
            tokens,
            segments,
            total_duration,
            duration: processing_seconds,
            speaker: None,
        }
    }

    #[must_use]
    pub fn format_as_text(&self) -> String {
        self.text.clone()
    }

    pub fn format_as_json(&self) -> ZbResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// SRT subtitle output: numbered entries, `HH:MM:SS,mmm` times,
    /// blank-line separated.
    #[must_use]
    pub fn format_as_srt(&self) -> String {
        if self.segments.is_empty() {
            return format_srt_segment(1, 0.0, 0.0, &self.text);
        }

        let mut srt = String::new();
        for (i, seg) in self.segments.iter().enumerate() {
            srt.push_str(&format_srt_segment(
                i + 1,
                seg.start_time,
                seg.end_time,
                &seg.text,
            ));
            if i < self.segments.len() - 1 {
                srt.push('\n');
            }
        }
        srt
    }

    /// WebVTT output: `WEBVTT` header, `HH:MM:SS.mmm` times.
    #[must_use]
    pub fn format_as_vtt(&self) -> String {
        let mut vtt = String::from("WEBVTT\n\n");
        if self.segments.is_empty() {
            vtt.push_str(&format!(
                "{} --> {}\n{}\n",
                format_clock_time(0.0, '.'),
                format_clock_time(0.0, '.'),
                self.text
            ));
            return vtt;
        }

        for (i, seg) in self.segments.iter().enumerate() {
            vtt.push_str(&format!(
                "{} --> {}\n{}\n",
                format_clock_time(seg.start_time, '.'),
                format_clock_time(seg.end_time, '.'),
                seg.text
            ));
            if i < self.segments.len() - 1 {
                vtt.push('\n');
            }
        }
        vtt
    }
}

/// Group tokens into segments: a gap > 0.5 s between a token's start and the
/// previous token's end starts a new segment.
#[must_use]
pub fn tokens_to_segments(tokens: &[Token]) -> Vec<Segment> {
    const GAP_THRESHOLD: f32 = 0.5;

    if tokens.is_empty() {
        return Vec::new();
    }

    let mut segments = Vec::new();
    let mut current_text = tokens[0].text.clone();
    let mut segment_start = f64::from(tokens[0].start_time);
    let mut last_end = tokens[0].end_time();

    for token in &tokens[1..] {
        let gap = token.start_time - last_end;
        if gap > GAP_THRESHOLD {
            segments.push(Segment {
                text: std::mem::take(&mut current_text),
                start_time: segment_start,
                end_time: f64::from(last_end),
            });
            segment_start = f64::from(token.start_time);
            current_text = token.text.clone();
        } else {
            current_text.push_str(&token.text);
        }
        last_end = token.end_time();
    }

    if !current_text.is_empty() {
        segments.push(Segment {
            text: current_text,
            start_time: segment_start,
            end_time: f64::from(last_end),
        });
    }

    segments
}

/// Rebuild the full text from tokens.
#[must_use]
pub fn rebuild_text(tokens: &[Token]) -> String {
    tokens.iter().map(|t| t.text.as_str()).collect()
}

fn format_srt_segment(index: usize, start_sec: f64, end_sec: f64, text: &str) -> String {
    format!(
        "{}\n{} --> {}\n{}\n",
        index,
        format_clock_time(start_sec, ','),
        format_clock_time(end_sec, ','),
        text
    )
}

fn format_clock_time(seconds: f64, ms_sep: char) -> String {
    let total_ms = (seconds * 1000.0).round() as u64;
    let h = total_ms / 3_600_000;
    let m = (total_ms / 60_000) % 60;
    let s = (total_ms / 1000) % 60;
    let ms = total_ms % 1000;
    format!("{h:02}:{m:02}:{s:02}{ms_sep}{ms:03}")
}

/// Format seconds as `MM:SS`.
#[must_use]
pub fn format_time(seconds: f64) -> String {
    let mins = (seconds as u64) / 60;
    let secs = (seconds as u64) % 60;
    format!("{mins:02}:{secs:02}")
}

/// Format a time range as `MM:SS-MM:SS`.
#[must_use]
pub fn format_time_range(start_sec: f64, end_sec: f64) -> String {
    format!("{}-{}", format_time(start_sec), format_time(end_sec))
}

// ---------------------------------------------------------------------------
// Display segments — fixed-interval timeline cells for UIs
// ---------------------------------------------------------------------------

/// A single element in the timeline display: token text or a silence marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayElement {
    /// "text" or "silence".
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
    pub start_time: f64,
    pub duration: f64,
}

/// Reference to an ASR segment overlapping a display cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentInfo {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
}

/// A fixed-interval display cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplaySegment {
    pub index: usize,
    pub start_time: f64,
    pub end_time: f64,
    pub elements: Vec<DisplayElement>,
    pub asr_segments: Vec<SegmentInfo>,
}

/// Tile `[0, total_duration]` in fixed `interval_sec` cells and populate each
/// with token text and silence markers for gaps >= `silence_threshold`.
#[must_use]
pub fn generate_display_segments(
    tokens: &[Token],
    segments: &[Segment],
    total_duration: f64,
    interval_sec: f64,
    silence_threshold: f64,
    dots_per_second: f64,
) -> Vec<DisplaySegment> {
    let interval_sec = if interval_sec > 0.0 { interval_sec } else { 10.0 };
    let silence_threshold = if silence_threshold > 0.0 {
        silence_threshold
    } else {
        0.3
    };
    let dots_per_second = if dots_per_second > 0.0 {
        dots_per_second
    } else {
        5.0
    };

    let mut total_duration = total_duration;
    if total_duration <= 0.0 {
        if let Some(last) = tokens.last() {
            total_duration = f64::from(last.end_time());
        }
    }
    let num_segments = (total_duration / interval_sec) as usize + 1;

    let mut cells: Vec<DisplaySegment> = (0..num_segments)
        .map(|i| DisplaySegment {
            index: i,
            start_time: i as f64 * interval_sec,
            end_time: (i + 1) as f64 * interval_sec,
            elements: Vec::new(),
            asr_segments: Vec::new(),
        })
        .collect();

    for (seg_idx, seg) in segments.iter().enumerate() {
        for cell in &mut cells {
            if seg.start_time < cell.end_time && seg.end_time > cell.start_time {
                cell.asr_segments.push(SegmentInfo {
                    index: seg_idx + 1,
                    start_time: seg.start_time,
                    end_time: seg.end_time,
                });
            }
        }
    }

    let mut last_end_time = 0.0_f64;

    for token in tokens {
        let token_start = f64::from(token.start_time);
        let mut token_end = token_start + f64::from(token.duration);
        if token.duration == 0.0 {
            // Zero-length tokens still occupy space on the timeline.
            token_end = token_start + 0.1;
        }

        let seg_idx = ((token_start / interval_sec) as usize).min(num_segments - 1);

        let gap = token_start - last_end_time;
        if gap >= silence_threshold && last_end_time > 0.0 {
            add_silence(
                &mut cells,
                last_end_time,
                token_start,
                interval_sec,
                dots_per_second,
            );
        }

        cells[seg_idx].elements.push(DisplayElement {
            kind: "text".to_owned(),
            text: token.text.clone(),
            start_time: token_start,
            duration: f64::from(token.duration),
        });

        last_end_time = token_end;
    }

    if last_end_time < total_duration {
        add_silence(
            &mut cells,
            last_end_time,
            total_duration,
            interval_sec,
            dots_per_second,
        );
    }

    cells
}

fn add_silence(
    cells: &mut [DisplaySegment],
    start_time: f64,
    end_time: f64,
    interval_sec: f64,
    dots_per_second: f64,
) {
    let duration = end_time - start_time;
    let num_dots = ((duration * dots_per_second) as usize).clamp(1, 20);
    let dots = "・".repeat(num_dots);

    let seg_idx = ((start_time / interval_sec) as usize).min(cells.len().saturating_sub(1));
    if cells.is_empty() {
        return;
    }
    cells[seg_idx].elements.push(DisplayElement {
        kind: "silence".to_owned(),
        text: dots,
        start_time,
        duration,
    });
}

//! End-to-end pipeline scenarios: segmentation, splitting, timestamp
//! projection, alignment, and partial-range merging.

use zbor::align::align_tokens_with_text;
use zbor::block::{split_long_blocks, split_long_blocks_with_overlap, SpeechBlock};
use zbor::partial::{merge_segments, merge_tokens};
use zbor::result::{Segment, Token, TranscriptionResult};
use zbor::silence::{blocks_from_frames, SilenceConfig};
use zbor::transcribe::project_tokens;

fn token(text: &str, start: f32, duration: f32) -> Token {
    Token {
        text: text.to_owned(),
        start_time: start,
        duration,
    }
}

#[test]
fn silence_detector_block_splitting() {
    // 30ms frames, min_silence 90ms, min_speech 60ms, threshold 0.1.
    let frames = [
        0.0, 0.0, 0.0, 0.2, 0.2, 0.2, 0.0, 0.0, 0.0, 0.2, 0.2, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0,
        0.0, 0.0, 0.0,
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
fn overlap_splitter_arithmetic() {
    let blocks = vec![SpeechBlock {
        start_time: 0.0,
        end_time: 10.0,
    }];
    let result = split_long_blocks_with_overlap(blocks, 5.0, 2.0);
    assert_eq!(result.len(), 4);

    let mains: Vec<(f64, f64)> = result.iter().map(|b| (b.main_start, b.main_end)).collect();
    assert_eq!(mains, vec![(0.0, 3.0), (3.0, 6.0), (6.0, 9.0), (9.0, 10.0)]);

    let physical: Vec<(f64, f64)> = result
        .iter()
        .map(|b| (b.block.start_time, b.block.end_time))
        .collect();
    assert_eq!(physical, vec![(0.0, 5.0), (3.0, 8.0), (6.0, 10.0), (9.0, 10.0)]);
}

#[test]
fn split_blocks_cover_the_input_with_bounded_lengths() {
    let input = vec![
        SpeechBlock {
            start_time: 1.0,
            end_time: 14.0,
        },
        SpeechBlock {
            start_time: 20.0,
            end_time: 21.0,
        },
    ];
    let result = split_long_blocks(input.clone(), 4.0);

    for block in &result {
        assert!(block.duration() <= 4.0 + 1e-9);
    }
    // The union is unchanged: pieces of each input block chain end-to-end.
    assert_eq!(result.first().unwrap().start_time, 1.0);
    let covered: f64 = result.iter().map(SpeechBlock::duration).sum();
    let original: f64 = input.iter().map(SpeechBlock::duration).sum();
    assert!((covered - original).abs() < 1e-9);
}

#[test]
fn tempo_timestamp_correction() {
    // In-stream time 4.0s in a block starting at 10.0s with tempo 0.95:
    // 10.0 + 4.0 * 0.95 = 13.8s.
    let projected = project_tokens(&[token("あ", 4.0, 0.5)], 10.0, 0.95);
    assert!((projected[0].start_time - 13.8).abs() < 1e-3);
}

#[test]
fn lcs_alignment_preserves_matches_and_interpolates_inserts() {
    let original = vec![token("あ", 1.0, 0.2), token("う", 3.0, 0.2)];
    let (aligned, _) = align_tokens_with_text(&original, "あいう", None).unwrap();

    assert_eq!(aligned.len(), 3);
    assert_eq!(aligned[0].start_time, 1.0);
    assert!((aligned[1].start_time - 2.0).abs() < 1e-6);
    assert!((aligned[1].duration - 0.2).abs() < 1e-6);
    assert_eq!(aligned[2].start_time, 3.0);
}

/// Ten segments; a partial re-run over segments 3-5 leaves everything
/// outside the range byte-identical.
#[test]
fn partial_retranscription_leaves_surroundings_intact() {
    let mut tokens = Vec::new();
    let mut segments = Vec::new();
    for i in 0..10 {
        let start = i as f64 * 2.0;
        tokens.push(token(&format!("t{i}"), start as f32, 0.5));
        segments.push(Segment {
            text: format!("t{i}"),
            start_time: start,
            end_time: start + 0.5,
        });
    }
    let before = TranscriptionResult {
        text: zbor::result::rebuild_text(&tokens),
        tokens,
        segments,
        total_duration: 18.5,
        duration: 1.0,
        speaker: None,
    };

    let range_start = before.segments[3].start_time;
    let range_end = before.segments[5].end_time;
    let replacement = vec![
        token("X", 6.1, 0.3),
        token("Y", 8.2, 0.3),
        token("Z", 10.3, 0.3),
    ];

    let merged_tokens = merge_tokens(&before.tokens, &replacement, range_start, range_end);
    let merged_segments = merge_segments(&before.segments, 3, 5, &replacement);

    // Tokens in segments 0-2 and 6-9 are untouched.
    for i in 0..3 {
        assert_eq!(merged_tokens[i], before.tokens[i]);
        assert_eq!(merged_segments[i], before.segments[i]);
    }
    for i in 6..10 {
        let merged = &merged_tokens[merged_tokens.len() - (10 - i)];
        assert_eq!(merged, &before.tokens[i]);
        assert_eq!(merged_segments[i], before.segments[i]);
    }

    // Replaced segments keep their original time frames.
    for i in 3..6 {
        assert_eq!(merged_segments[i].start_time, before.segments[i].start_time);
        assert_eq!(merged_segments[i].end_time, before.segments[i].end_time);
    }

    // Timeline monotonicity holds after the merge.
    for pair in merged_tokens.windows(2) {
        assert!(pair[0].start_time <= pair[1].start_time + 0.1);
    }
}

#[test]
fn result_json_round_trip_is_bit_for_bit() {
    let tokens = vec![token("こ", 0.0, 0.25), token("ん", 0.3, 0.25), token("ば", 5.0, 0.25)];
    let result = TranscriptionResult {
        text: "こんば".to_owned(),
        segments: zbor::result::tokens_to_segments(&tokens),
        total_duration: 5.25,
        duration: 0.123_456_789,
        speaker: Some("alice".to_owned()),
        tokens,
    };

    let json = result.format_as_json().unwrap();
    let parsed: TranscriptionResult = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, result);

    let json_again = parsed.format_as_json().unwrap();
    assert_eq!(json, json_again);
}

//! Segment boundary adjustment over waveform peaks.
//!
//! Widens a segment's time range to swallow nearby audio activity: clusters
//! of peaks above a threshold within a search window are merged into the
//! segment when the silence gap between them is small enough. Operates on
//! the peak arrays produced by [`crate::waveform`].

/// Parameters for boundary adjustment.
#[derive(Debug, Clone, Copy)]
pub struct BoundaryParams {
    /// Minimum peak value (0-1) counted as audio.
    pub threshold: f64,
    /// Merge clusters separated by at most this many milliseconds.
    pub merge_gap_ms: u64,
    /// Search window before/after the segment, in milliseconds.
    pub search_window_ms: u64,
}

impl Default for BoundaryParams {
    fn default() -> Self {
        Self {
            threshold: 0.03,
            merge_gap_ms: 300,
            search_window_ms: 1000,
        }
    }
}

/// A contiguous region of audio activity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AudioCluster {
    pub start_time: f64,
    pub end_time: f64,
    pub max_peak: f64,
}

/// The outcome of a boundary adjustment.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundaryAdjustment {
    pub original_start: f64,
    pub original_end: f64,
    pub adjusted_start: f64,
    pub adjusted_end: f64,
    pub start_extended_ms: i64,
    pub end_extended_ms: i64,
    pub merged_clusters: Vec<AudioCluster>,
}

/// Detect audio clusters within `[start_time, end_time]`.
#[must_use]
pub fn find_audio_clusters(
    peaks: &[f64],
    samples_per_sec: f64,
    start_time: f64,
    end_time: f64,
    threshold: f64,
) -> Vec<AudioCluster> {
    if peaks.is_empty() || samples_per_sec <= 0.0 {
        return Vec::new();
    }

    let start_idx = ((start_time * samples_per_sec) as usize).min(peaks.len());
    let end_idx = ((end_time * samples_per_sec) as usize).min(peaks.len());
    if start_idx >= end_idx {
        return Vec::new();
    }

    let mut clusters = Vec::new();
    let mut current: Option<AudioCluster> = None;

    for (i, &peak) in peaks.iter().enumerate().take(end_idx).skip(start_idx) {
        let time = i as f64 / samples_per_sec;
        if peak >= threshold {
            match current.as_mut() {
                None => {
                    current = Some(AudioCluster {
                        start_time: time,
                        end_time: time,
                        max_peak: peak,
                    });
                }
                Some(cluster) => {
                    cluster.end_time = time;
                    if peak > cluster.max_peak {
                        cluster.max_peak = peak;
                    }
                }
            }
        } else if let Some(cluster) = current.take() {
            clusters.push(cluster);
        }
    }

    if let Some(cluster) = current {
        clusters.push(cluster);
    }
    clusters
}

/// Merge clusters separated by at most `merge_gap_ms`.
#[must_use]
pub fn merge_clusters(clusters: &[AudioCluster], merge_gap_ms: u64) -> Vec<AudioCluster> {
    let Some(first) = clusters.first() else {
        return Vec::new();
    };

    let merge_gap_sec = merge_gap_ms as f64 / 1000.0;
    let mut merged = Vec::new();
    let mut current = *first;

    for next in &clusters[1..] {
        let gap = next.start_time - current.end_time;
        if gap <= merge_gap_sec {
            current.end_time = next.end_time;
            if next.max_peak > current.max_peak {
                current.max_peak = next.max_peak;
            }
        } else {
            merged.push(current);
            current = *next;
        }
    }
    merged.push(current);
    merged
}

/// Widen `[segment_start, segment_end]` to cover adjacent audio clusters
/// reachable through gaps of at most the merge budget, searching at most
/// the configured window on either side.
#[must_use]
pub fn adjust_boundaries(
    peaks: &[f64],
    samples_per_sec: f64,
    segment_start: f64,
    segment_end: f64,
    params: BoundaryParams,
) -> BoundaryAdjustment {
    let mut result = BoundaryAdjustment {
        original_start: segment_start,
        original_end: segment_end,
        adjusted_start: segment_start,
        adjusted_end: segment_end,
        start_extended_ms: 0,
        end_extended_ms: 0,
        merged_clusters: Vec::new(),
    };

    if peaks.is_empty() {
        return result;
    }

    let search_window_sec = params.search_window_ms as f64 / 1000.0;
    let merge_gap_sec = params.merge_gap_ms as f64 / 1000.0;
    let total_duration = peaks.len() as f64 / samples_per_sec;

    let search_start = (segment_start - search_window_sec).max(0.0);
    let clusters_before = merge_clusters(
        &find_audio_clusters(peaks, samples_per_sec, search_start, segment_start, params.threshold),
        params.merge_gap_ms,
    );

    let search_end = (segment_end + search_window_sec).min(total_duration);
    let clusters_after = merge_clusters(
        &find_audio_clusters(peaks, samples_per_sec, segment_end, search_end, params.threshold),
        params.merge_gap_ms,
    );

    let clusters_within = merge_clusters(
        &find_audio_clusters(peaks, samples_per_sec, segment_start, segment_end, params.threshold),
        params.merge_gap_ms,
    );

    // Walk backwards through preceding clusters while each gap fits.
    let mut new_start = segment_start;
    let mut merged_before = Vec::new();
    for cluster in clusters_before.iter().rev() {
        let gap = new_start - cluster.end_time;
        if gap <= merge_gap_sec {
            new_start = cluster.start_time;
            merged_before.insert(0, *cluster);
        } else {
            break;
        }
    }

    let mut new_end = segment_end;
    let mut merged_after = Vec::new();
    for cluster in &clusters_after {
        let gap = cluster.start_time - new_end;
        if gap <= merge_gap_sec {
            new_end = cluster.end_time;
            merged_after.push(*cluster);
        } else {
            break;
        }
    }

    result.adjusted_start = new_start;
    result.adjusted_end = new_end;
    result.start_extended_ms = ((segment_start - new_start) * 1000.0) as i64;
    result.end_extended_ms = ((new_end - segment_end) * 1000.0) as i64;
    result.merged_clusters.extend(merged_before);
    result.merged_clusters.extend(clusters_within);
    result.merged_clusters.extend(merged_after);
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    // 10 peaks per second throughout.
    const RATE: f64 = 10.0;

    #[test]
    fn clusters_split_on_silence() {
        let mut peaks = vec![0.0; 30];
        for p in &mut peaks[2..5] {
            *p = 0.5;
        }
        for p in &mut peaks[10..12] {
            *p = 0.8;
        }
        let clusters = find_audio_clusters(&peaks, RATE, 0.0, 3.0, 0.1);
        assert_eq!(clusters.len(), 2);
        assert!((clusters[0].start_time - 0.2).abs() < 1e-9);
        assert!((clusters[0].end_time - 0.4).abs() < 1e-9);
        assert!((clusters[1].max_peak - 0.8).abs() < 1e-9);
    }

    #[test]
    fn merge_respects_gap_budget() {
        let clusters = vec![
            AudioCluster {
                start_time: 0.0,
                end_time: 0.2,
                max_peak: 0.5,
            },
            AudioCluster {
                start_time: 0.4,
                end_time: 0.6,
                max_peak: 0.9,
            },
            AudioCluster {
                start_time: 2.0,
                end_time: 2.2,
                max_peak: 0.3,
            },
        ];
        let merged = merge_clusters(&clusters, 300);
        assert_eq!(merged.len(), 2);
        assert!((merged[0].end_time - 0.6).abs() < 1e-9);
        assert!((merged[0].max_peak - 0.9).abs() < 1e-9);
    }

    #[test]
    fn adjustment_extends_into_nearby_activity() {
        // Activity at 0.8-0.9s just before a segment starting at 1.0s.
        let mut peaks = vec![0.0; 40];
        for p in &mut peaks[8..10] {
            *p = 0.5;
        }
        for p in &mut peaks[10..20] {
            *p = 0.6;
        }
        let result = adjust_boundaries(&peaks, RATE, 1.0, 2.0, BoundaryParams::default());
        assert!(result.adjusted_start <= 0.8 + 1e-9);
        assert!(result.start_extended_ms >= 100);
        assert_eq!(result.adjusted_end, 2.0);
    }

    #[test]
    fn adjustment_ignores_activity_past_the_gap_budget() {
        // Activity 0.0-0.1s, a full 0.9s gap before the segment at 1.0s.
        let mut peaks = vec![0.0; 40];
        peaks[0] = 0.5;
        peaks[1] = 0.5;
        let result = adjust_boundaries(&peaks, RATE, 1.0, 2.0, BoundaryParams::default());
        assert_eq!(result.adjusted_start, 1.0);
        assert_eq!(result.start_extended_ms, 0);
    }

    #[test]
    fn empty_peaks_leave_boundaries_unchanged() {
        let result = adjust_boundaries(&[], RATE, 1.0, 2.0, BoundaryParams::default());
        assert_eq!(result.adjusted_start, 1.0);
        assert_eq!(result.adjusted_end, 2.0);
    }
}

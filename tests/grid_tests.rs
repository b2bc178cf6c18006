//! Subbeat grid construction and tolerance quantization

use maniagen::chart::{NoteEvent, TempoInfo};
use maniagen::grid::{self, SubbeatGrid};

fn tempo(bpm: f64, start_time_ms: f64) -> TempoInfo {
    TempoInfo {
        beats_per_minute: bpm,
        start_time_ms,
    }
}

/// Note on a single lane of a 4-lane chart
fn single_note(time_ms: f64, lane: usize) -> NoteEvent {
    let mut lane_flags = vec![false; 4];
    lane_flags[lane] = true;
    NoteEvent { time_ms, lane_flags }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_spacing_is_constant() {
        for &(bpm, precision) in &[(120.0, 2u32), (174.0, 4), (87.3, 3), (200.0, 1)] {
            let t = tempo(bpm, 37.5);
            let g = SubbeatGrid::for_chart(&t, precision, 60_000.0);
            let expected = 60_000.0 / (bpm * precision as f64);
            assert!((g.subbeat_ms - expected).abs() < 1e-9);
            assert_eq!(g.points[0].time_ms, 37.5);
            for pair in g.points.windows(2) {
                assert_eq!(pair[1].index, pair[0].index + 1);
                assert!(((pair[1].time_ms - pair[0].time_ms) - expected).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn test_chart_grid_covers_last_note() {
        let t = tempo(120.0, 0.0);
        // 1000 ms / 125 ms = 8 => 9 points (0..=1000)
        let g = SubbeatGrid::for_chart(&t, 2, 1000.0);
        assert_eq!(g.len(), 9);
        assert_eq!(g.points.last().unwrap().time_ms, 1000.0);

        let g = SubbeatGrid::for_chart(&t, 2, 1060.0);
        assert_eq!(g.len(), 9);
    }

    #[test]
    fn test_duration_grid_excludes_end() {
        let t = tempo(120.0, 0.0);
        let g = SubbeatGrid::for_duration(&t, 2, 1000.0);
        assert_eq!(g.len(), 8);
        assert!(SubbeatGrid::for_duration(&t, 2, -5.0).is_empty());
    }

    #[test]
    fn test_note_at_130ms_lands_on_index_one() {
        let t = tempo(120.0, 0.0);
        let g = SubbeatGrid::with_len(&t, 2, 3);
        assert_eq!(g.subbeat_ms, 125.0);

        let records = grid::quantize(&g, &[single_note(130.0, 2)], 10.0, 4);

        assert_eq!(records.len(), 3);
        assert!(!records[0].has_note());
        assert_eq!(records[1].time_ms, 125.0);
        assert_eq!(records[1].lane_flags, vec![false, false, true, false]);
        assert!(!records[2].has_note());
    }

    #[test]
    fn test_out_of_tolerance_notes_are_dropped() {
        let t = tempo(120.0, 0.0);
        let g = SubbeatGrid::with_len(&t, 2, 4);
        let notes = vec![single_note(0.0, 0), single_note(190.0, 1), single_note(260.0, 3)];

        let (records, report) = grid::quantize_with_report(&g, &notes, 10.0, 4);

        assert_eq!(report.input_events, 3);
        assert_eq!(report.matched_events, 2);
        assert_eq!(report.dropped_events(), 1);
        assert_eq!(report.occupied_subbeats, 2);
        assert!(records[0].lane_flags[0]);
        assert!(!records[1].has_note());
        assert!(records[2].lane_flags[3]);
    }

    #[test]
    fn test_first_matching_event_wins() {
        let t = tempo(120.0, 0.0);
        let g = SubbeatGrid::with_len(&t, 2, 2);
        let notes = vec![single_note(120.0, 0), single_note(128.0, 3)];

        let records = grid::quantize(&g, &notes, 10.0, 4);
        assert_eq!(records[1].lane_flags, vec![true, false, false, false]);
    }

    #[test]
    fn test_quantization_is_idempotent() {
        let t = tempo(150.0, 12.0);
        let g = SubbeatGrid::for_chart(&t, 4, 5000.0);
        let notes: Vec<NoteEvent> = (0..40)
            .map(|i| single_note(12.0 + i as f64 * 97.0, i % 4))
            .collect();

        let first = grid::quantize(&g, &notes, 10.0, 4);
        let second = grid::quantize(&g, &notes, 10.0, 4);
        assert_eq!(first, second);
        assert_eq!(first.len(), g.len());
    }

    #[test]
    fn test_time_at_extrapolates() {
        let g = SubbeatGrid::with_len(&tempo(120.0, 100.0), 2, 2);
        assert_eq!(g.time_at(1), 225.0);
        assert_eq!(g.time_at(10), 1350.0);
    }
}

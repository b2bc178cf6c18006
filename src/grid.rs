//! Subbeat grid construction and tolerance quantization of note events

use crate::chart::{NoteEvent, TempoInfo};
use serde::{Deserialize, Serialize};

/// One point of the uniform subbeat grid
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SubbeatPoint {
    pub index: usize,
    pub time_ms: f64,
}

/// Uniform grid of subbeat timestamps starting at the tempo reference time
#[derive(Debug, Clone, PartialEq)]
pub struct SubbeatGrid {
    pub start_time_ms: f64,
    pub subbeat_ms: f64,
    pub points: Vec<SubbeatPoint>,
}

/// Duration of one subbeat: `(60000 / bpm) / note_precision`
pub fn subbeat_ms(tempo: &TempoInfo, note_precision: u32) -> f64 {
    tempo.beat_ms() / note_precision.max(1) as f64
}

impl SubbeatGrid {
    /// Grid with exactly `len` points
    pub fn with_len(tempo: &TempoInfo, note_precision: u32, len: usize) -> Self {
        let step = subbeat_ms(tempo, note_precision);
        // Multiply instead of accumulating so spacing does not drift
        let points = (0..len)
            .map(|index| SubbeatPoint {
                index,
                time_ms: tempo.start_time_ms + index as f64 * step,
            })
            .collect();

        Self {
            start_time_ms: tempo.start_time_ms,
            subbeat_ms: step,
            points,
        }
    }

    /// Grid covering a chart up to and including its last note
    pub fn for_chart(tempo: &TempoInfo, note_precision: u32, last_note_time_ms: f64) -> Self {
        let step = subbeat_ms(tempo, note_precision);
        let span = ((last_note_time_ms - tempo.start_time_ms) / step).floor();
        let len = if span >= 0.0 { span as usize + 1 } else { 0 };
        Self::with_len(tempo, note_precision, len)
    }

    /// Grid covering an audio track of `duration_ms`
    pub fn for_duration(tempo: &TempoInfo, note_precision: u32, duration_ms: f64) -> Self {
        let step = subbeat_ms(tempo, note_precision);
        let span = ((duration_ms - tempo.start_time_ms) / step).floor();
        let len = if span > 0.0 { span as usize } else { 0 };
        Self::with_len(tempo, note_precision, len)
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Timestamp of subbeat `index`, extrapolated past the last point
    pub fn time_at(&self, index: usize) -> f64 {
        self.start_time_ms + index as f64 * self.subbeat_ms
    }

    pub fn times_ms(&self) -> Vec<f64> {
        self.points.iter().map(|p| p.time_ms).collect()
    }
}

/// Grid point with the lanes of the note matched to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedRecord {
    pub subbeat_index: usize,
    pub time_ms: f64,
    pub lane_flags: Vec<bool>,
}

impl QuantizedRecord {
    pub fn has_note(&self) -> bool {
        self.lane_flags.iter().any(|&f| f)
    }
}

/// Counts for callers that need to diagnose dropped events
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizeReport {
    pub input_events: usize,
    /// Distinct events matched to at least one subbeat
    pub matched_events: usize,
    pub occupied_subbeats: usize,
}

impl QuantizeReport {
    pub fn dropped_events(&self) -> usize {
        self.input_events - self.matched_events
    }
}

/// Index of the first event (in input order) within tolerance of `time_ms`
fn first_match(notes: &[NoteEvent], sorted: bool, time_ms: f64, tolerance_ms: f64) -> Option<usize> {
    if sorted {
        let lo = notes.partition_point(|n| n.time_ms < time_ms - tolerance_ms);
        (lo < notes.len() && notes[lo].time_ms <= time_ms + tolerance_ms).then_some(lo)
    } else {
        notes
            .iter()
            .position(|n| (n.time_ms - time_ms).abs() <= tolerance_ms)
    }
}

/// Quantize note events onto the grid and report how many were kept
pub fn quantize_with_report(
    grid: &SubbeatGrid,
    notes: &[NoteEvent],
    tolerance_ms: f64,
    num_lanes: usize,
) -> (Vec<QuantizedRecord>, QuantizeReport) {
    let sorted = notes.windows(2).all(|w| w[0].time_ms <= w[1].time_ms);
    let mut matched = vec![false; notes.len()];
    let mut occupied_subbeats = 0;

    let records = grid
        .points
        .iter()
        .map(|point| {
            let lane_flags = match first_match(notes, sorted, point.time_ms, tolerance_ms) {
                Some(idx) => {
                    matched[idx] = true;
                    occupied_subbeats += 1;
                    let mut flags = notes[idx].lane_flags.clone();
                    flags.resize(num_lanes, false);
                    flags
                }
                None => vec![false; num_lanes],
            };
            QuantizedRecord {
                subbeat_index: point.index,
                time_ms: point.time_ms,
                lane_flags,
            }
        })
        .collect();

    let report = QuantizeReport {
        input_events: notes.len(),
        matched_events: matched.iter().filter(|&&m| m).count(),
        occupied_subbeats,
    };

    (records, report)
}

/// Quantize note events onto the grid; events outside tolerance of every subbeat are dropped
pub fn quantize(
    grid: &SubbeatGrid,
    notes: &[NoteEvent],
    tolerance_ms: f64,
    num_lanes: usize,
) -> Vec<QuantizedRecord> {
    quantize_with_report(grid, notes, tolerance_ms, num_lanes).0
}

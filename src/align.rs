//! Merging quantized note grids with mapped audio descriptors

use crate::audio::{AudioDescriptorFrame, DescriptorTrack};
use crate::chart::ParsedChart;
use crate::config::GridConfig;
use crate::error::{ManiaError, Result};
use crate::grid::{self, QuantizeReport, QuantizedRecord, SubbeatGrid};
use serde::{Deserialize, Serialize};

/// Atomic training row: one subbeat with its audio descriptors and lane labels
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlignedRecord {
    pub subbeat_index: usize,
    pub cepstral: Vec<f32>,
    pub onset_strength: f32,
    pub energy: f32,
    pub lane_flags: Vec<bool>,
}

impl AlignedRecord {
    pub fn from_parts(quantized: &QuantizedRecord, frame: &AudioDescriptorFrame) -> Self {
        Self {
            subbeat_index: quantized.subbeat_index,
            cepstral: frame.cepstral.clone(),
            onset_strength: frame.onset_strength,
            energy: frame.energy,
            lane_flags: quantized.lane_flags.clone(),
        }
    }

    pub fn num_features(&self) -> usize {
        self.cepstral.len() + 2
    }

    /// Raw feature columns: cepstral coefficients, onset strength, energy
    pub fn features(&self) -> Vec<f32> {
        descriptor_features(&self.cepstral, self.onset_strength, self.energy)
    }

    /// Lane labels as 0/1
    pub fn labels(&self) -> Vec<f32> {
        self.lane_flags
            .iter()
            .map(|&f| if f { 1.0 } else { 0.0 })
            .collect()
    }

    /// Features followed by labels, the layout stored in sequence chunks
    pub fn row(&self) -> Vec<f32> {
        let mut row = self.features();
        row.extend(self.labels());
        row
    }
}

/// Feature vector of one descriptor frame
pub fn descriptor_features(cepstral: &[f32], onset_strength: f32, energy: f32) -> Vec<f32> {
    let mut features = Vec::with_capacity(cepstral.len() + 2);
    features.extend_from_slice(cepstral);
    features.push(onset_strength);
    features.push(energy);
    features
}

/// Descriptor frame for every grid point
pub fn map_descriptors<'a>(
    grid: &SubbeatGrid,
    track: &'a DescriptorTrack,
) -> Result<Vec<&'a AudioDescriptorFrame>> {
    if track.is_empty() {
        return Err(ManiaError::EmptyAlignment(
            "audio produced no descriptor frames".to_string(),
        ));
    }
    Ok(grid
        .points
        .iter()
        .filter_map(|p| track.frame_at_ms(p.time_ms))
        .collect())
}

/// Merge quantized records with the descriptor frames their timestamps map to
pub fn merge_aligned(
    quantized: &[QuantizedRecord],
    track: &DescriptorTrack,
) -> Result<Vec<AlignedRecord>> {
    if quantized.is_empty() {
        return Err(ManiaError::EmptyAlignment(
            "no quantized subbeats to align".to_string(),
        ));
    }
    if track.is_empty() {
        return Err(ManiaError::EmptyAlignment(
            "audio produced no descriptor frames".to_string(),
        ));
    }

    Ok(quantized
        .iter()
        .filter_map(|q| {
            track
                .frame_at_ms(q.time_ms)
                .map(|frame| AlignedRecord::from_parts(q, frame))
        })
        .collect())
}

/// Build the grid for a chart, quantize its notes and merge with audio descriptors
pub fn align_chart(
    chart: &ParsedChart,
    track: &DescriptorTrack,
    config: &GridConfig,
) -> Result<(Vec<AlignedRecord>, QuantizeReport)> {
    let last_note_ms = chart
        .last_note_time_ms()
        .ok_or_else(|| ManiaError::EmptyAlignment("chart has no note events".to_string()))?;

    let grid = SubbeatGrid::for_chart(&chart.tempo, config.note_precision, last_note_ms);
    let (quantized, report) =
        grid::quantize_with_report(&grid, &chart.notes, config.tolerance_ms, config.num_lanes);

    if report.dropped_events() > 0 {
        log::debug!(
            "{} of {} note events fell outside the {} ms tolerance",
            report.dropped_events(),
            report.input_events,
            config.tolerance_ms
        );
    }

    let records = merge_aligned(&quantized, track)?;
    Ok((records, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartMetadata, NoteEvent, TempoInfo};

    fn track(n_frames: usize) -> DescriptorTrack {
        DescriptorTrack {
            frames: (0..n_frames)
                .map(|i| AudioDescriptorFrame {
                    frame_index: i,
                    cepstral: vec![0.0; 5],
                    onset_strength: 0.0,
                    energy: 0.0,
                })
                .collect(),
            sample_rate: 1000,
            hop_length: 10,
        }
    }

    fn chart(start_time_ms: f64, note_times: &[f64]) -> ParsedChart {
        ParsedChart {
            tempo: TempoInfo {
                beats_per_minute: 120.0,
                start_time_ms,
            },
            notes: note_times
                .iter()
                .map(|&time_ms| NoteEvent {
                    time_ms,
                    lane_flags: vec![true, false, false, false],
                })
                .collect(),
            metadata: ChartMetadata::default(),
            hit_count: note_times.len(),
        }
    }

    #[test]
    fn test_no_quantized_subbeats_is_empty_alignment() {
        assert!(matches!(
            merge_aligned(&[], &track(10)),
            Err(ManiaError::EmptyAlignment(_))
        ));
    }

    #[test]
    fn test_silent_track_is_empty_alignment() {
        let quantized = vec![QuantizedRecord {
            subbeat_index: 0,
            time_ms: 0.0,
            lane_flags: vec![false; 4],
        }];
        assert!(matches!(
            merge_aligned(&quantized, &track(0)),
            Err(ManiaError::EmptyAlignment(_))
        ));
    }

    #[test]
    fn test_chart_without_notes_is_empty_alignment() {
        let err = align_chart(&chart(0.0, &[]), &track(10), &GridConfig::default()).unwrap_err();
        assert!(matches!(err, ManiaError::EmptyAlignment(_)));
        assert!(err.is_skippable());
    }

    #[test]
    fn test_notes_before_first_beat_is_empty_alignment() {
        let result = align_chart(&chart(1000.0, &[100.0, 400.0]), &track(10), &GridConfig::default());
        assert!(matches!(result, Err(ManiaError::EmptyAlignment(_))));
    }
}

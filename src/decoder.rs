//! Adaptive multi-label decoding of per-lane prediction scores into note placements
//!
//! The decoder keeps two views of past output: a signed running score per
//! lane (long term) and a sliding window of emitted lane vectors (short
//! term). Lanes that have fired disproportionately often get a small penalty
//! before ranking, which keeps a single lane from dominating the pattern.

use crate::config::{validate_decoder, DecoderConfig};
use crate::error::{ManiaError, Result};
use crate::grid::SubbeatGrid;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Per-lane model output for one subbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPrediction {
    pub subbeat_index: usize,
    pub per_lane_probability: Vec<f32>,
}

/// Decoder output for one subbeat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecodedNoteEvent {
    pub subbeat_index: usize,
    pub time_ms: f64,
    pub per_lane_flag: Vec<bool>,
    /// Raw model probabilities, before bias adjustment
    pub per_lane_probability: Vec<f32>,
}

impl DecodedNoteEvent {
    pub fn has_note(&self) -> bool {
        self.per_lane_flag.iter().any(|&f| f)
    }

    pub fn active_lanes(&self) -> impl Iterator<Item = usize> + '_ {
        self.per_lane_flag
            .iter()
            .enumerate()
            .filter(|(_, &f)| f)
            .map(|(lane, _)| lane)
    }
}

/// Aggregate view of one decoding run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DecodeSummary {
    pub subbeats: usize,
    pub lane_frequencies: Vec<usize>,
    /// Fraction of (subbeat, lane) cells that fired
    pub note_density: f64,
    pub min_probability: f32,
    pub max_probability: f32,
    pub mean_probability: f32,
}

/// Per-run decoding state machine
#[derive(Debug, Clone)]
pub struct PredictionDecoder {
    config: DecoderConfig,
    num_lanes: usize,
    max_delta: f32,
    lane_weights: Vec<f32>,
    lane_history: VecDeque<Vec<bool>>,
    lane_frequencies: Vec<usize>,
}

impl PredictionDecoder {
    pub fn new(config: DecoderConfig, num_lanes: usize) -> Result<Self> {
        validate_decoder(&config)?;
        if num_lanes == 0 {
            return Err(ManiaError::InvalidConfigParameter(
                "decoder needs at least one lane".to_string(),
            ));
        }
        let max_delta = config.max_prediction_delta(num_lanes);
        Ok(Self {
            config,
            num_lanes,
            max_delta,
            lane_weights: vec![0.0; num_lanes],
            lane_history: VecDeque::with_capacity(16),
            lane_frequencies: vec![0; num_lanes],
        })
    }

    pub fn num_lanes(&self) -> usize {
        self.num_lanes
    }

    pub fn lane_weights(&self) -> &[f32] {
        &self.lane_weights
    }

    /// Number of subbeats each lane fired on so far
    pub fn lane_frequencies(&self) -> &[usize] {
        &self.lane_frequencies
    }

    /// `long_term_weight * long + short_term_weight * short` per lane
    pub fn combined_bias(&self) -> Vec<f32> {
        let max_weight = self
            .lane_weights
            .iter()
            .fold(1.0f32, |acc, w| acc.max(w.abs()));

        let mut recent = vec![0usize; self.num_lanes];
        for past in &self.lane_history {
            for (lane, &fired) in past.iter().enumerate() {
                recent[lane] += fired as usize;
            }
        }
        let max_recent = recent.iter().copied().max().unwrap_or(0).max(1) as f32;

        self.lane_weights
            .iter()
            .zip(&recent)
            .map(|(&w, &count)| {
                self.config.long_term_weight * (w / max_weight)
                    + self.config.short_term_weight * (count as f32 / max_recent)
            })
            .collect()
    }

    fn remember(&mut self, flags: Vec<bool>) {
        if self.lane_history.len() == self.config.history_window {
            self.lane_history.pop_front();
        }
        self.lane_history.push_back(flags);
    }

    /// Lane flags for one probability vector, updating the run state
    pub fn decode_probabilities(&mut self, probabilities: &[f32]) -> Result<Vec<bool>> {
        if probabilities.len() != self.num_lanes {
            return Err(ManiaError::ShapeMismatch(format!(
                "prediction has {} lanes, decoder expects {}",
                probabilities.len(),
                self.num_lanes
            )));
        }

        let bias = self.combined_bias();
        let adjusted: Vec<f32> = probabilities
            .iter()
            .zip(&bias)
            .map(|(&p, &b)| p - b * self.config.frequency_bias_strength)
            .collect();

        // Descending by adjusted value; ties keep the lower lane first
        let mut ranked: Vec<usize> = (0..self.num_lanes).collect();
        ranked.sort_by(|&a, &b| adjusted[b].total_cmp(&adjusted[a]));

        let mut flags = vec![false; self.num_lanes];
        let threshold = self.config.prediction_threshold;
        if adjusted[ranked[0]] < threshold {
            self.remember(flags.clone());
            return Ok(flags);
        }

        flags[ranked[0]] = true;
        let mut previous = adjusted[ranked[0]];
        for &lane in &ranked[1..] {
            let current = adjusted[lane];
            if previous - current <= self.max_delta && current >= threshold {
                flags[lane] = true;
                previous = current;
            } else {
                break;
            }
        }

        for lane in 0..self.num_lanes {
            let sign = if flags[lane] { 1.0 } else { -1.0 };
            self.lane_weights[lane] += sign * probabilities[lane];
            self.lane_frequencies[lane] += flags[lane] as usize;
        }
        self.remember(flags.clone());
        Ok(flags)
    }

    pub fn decode_step(&mut self, prediction: &RawPrediction, time_ms: f64) -> Result<DecodedNoteEvent> {
        let per_lane_flag = self.decode_probabilities(&prediction.per_lane_probability)?;
        Ok(DecodedNoteEvent {
            subbeat_index: prediction.subbeat_index,
            time_ms,
            per_lane_flag,
            per_lane_probability: prediction.per_lane_probability.clone(),
        })
    }

    /// Decode a whole run; one event per prediction, timestamps from the grid
    pub fn decode_all(
        &mut self,
        predictions: &[RawPrediction],
        grid: &SubbeatGrid,
    ) -> Result<Vec<DecodedNoteEvent>> {
        let events = predictions
            .iter()
            .map(|p| self.decode_step(p, grid.time_at(p.subbeat_index)))
            .collect::<Result<Vec<_>>>()?;

        log::info!("Lane frequencies after decoding: {:?}", self.lane_frequencies);
        Ok(events)
    }
}

/// Statistics over raw predictions and their decoded flags
pub fn summarize(events: &[DecodedNoteEvent], num_lanes: usize) -> DecodeSummary {
    let mut lane_frequencies = vec![0usize; num_lanes];
    let mut fired = 0usize;
    let mut cells = 0usize;
    let mut sum = 0.0f64;
    let mut min_probability = f32::INFINITY;
    let mut max_probability = f32::NEG_INFINITY;

    for event in events {
        for lane in event.active_lanes() {
            if lane < num_lanes {
                lane_frequencies[lane] += 1;
            }
            fired += 1;
        }
        for &p in &event.per_lane_probability {
            min_probability = min_probability.min(p);
            max_probability = max_probability.max(p);
            sum += p as f64;
            cells += 1;
        }
    }

    if cells == 0 {
        return DecodeSummary {
            lane_frequencies,
            ..Default::default()
        };
    }

    DecodeSummary {
        subbeats: events.len(),
        lane_frequencies,
        note_density: fired as f64 / cells as f64,
        min_probability,
        max_probability,
        mean_probability: (sum / cells as f64) as f32,
    }
}

/// Wrap flat probability rows as predictions indexed from zero
pub fn predictions_from_rows(rows: ndarray::ArrayView2<f32>) -> Vec<RawPrediction> {
    rows.outer_iter()
        .enumerate()
        .map(|(subbeat_index, row)| RawPrediction {
            subbeat_index,
            per_lane_probability: row.to_vec(),
        })
        .collect()
}

//! Fixed-length overlapping windows and train/test split assignment

use crate::align::AlignedRecord;
use crate::config::{SplitMode, WindowConfig};
use crate::error::{ManiaError, Result};
use crate::stats::NormStats;
use ndarray::{s, Array2, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Contiguous run of records from a single chart
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceWindow {
    /// Position of the first record in the source stream
    pub start: usize,
    pub records: Vec<AlignedRecord>,
}

impl SequenceWindow {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Rows of features followed by labels
    pub fn to_array(&self) -> Result<Array2<f32>> {
        record_matrix(&self.records)
    }
}

/// Window start offsets: `0, stride, 2*stride, ... < n - len`
pub fn window_starts(n: usize, len: usize, stride: usize) -> impl Iterator<Item = usize> {
    let end = n.saturating_sub(len);
    (0..end).step_by(stride.max(1))
}

/// Number of windows `window_starts` yields
pub fn window_count(n: usize, len: usize, stride: usize) -> usize {
    let end = n.saturating_sub(len);
    let stride = stride.max(1);
    (end + stride - 1) / stride
}

/// Slice a record stream into windows of length `len`
pub fn build_windows(records: &[AlignedRecord], len: usize, stride: usize) -> Vec<SequenceWindow> {
    window_starts(records.len(), len, stride)
        .map(|start| SequenceWindow {
            start,
            records: records[start..start + len].to_vec(),
        })
        .collect()
}

/// Stack record rows (features then labels) into a matrix
pub fn record_matrix(records: &[AlignedRecord]) -> Result<Array2<f32>> {
    let width = records.first().map(|r| r.num_features() + r.lane_flags.len()).unwrap_or(0);
    let mut flat = Vec::with_capacity(records.len() * width);
    for record in records {
        let row = record.row();
        if row.len() != width {
            return Err(ManiaError::ShapeMismatch(format!(
                "record {} has {} columns, expected {}",
                record.subbeat_index,
                row.len(),
                width
            )));
        }
        flat.extend(row);
    }
    Ok(Array2::from_shape_vec((records.len(), width), flat)?)
}

/// Record matrix of a chart with feature columns normalized when stats are given
pub fn chart_matrix(records: &[AlignedRecord], stats: Option<&NormStats>) -> Result<Array2<f32>> {
    let mut rows = record_matrix(records)?;
    if let Some(stats) = stats {
        stats.normalize_rows(&mut rows)?;
    }
    Ok(rows)
}

/// View of the window starting at `start`
pub fn window_view(rows: &Array2<f32>, start: usize, len: usize) -> ArrayView2<'_, f32> {
    rows.slice(s![start..start + len, ..])
}

/// Corpus partition a window is written to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Split {
    Train,
    Test,
}

impl Split {
    pub fn label(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Test => "test",
        }
    }

    pub fn all() -> [Split; 2] {
        [Split::Train, Split::Test]
    }
}

/// FNV-1a, stable across platforms and toolchains
fn stable_hash(text: &str) -> u64 {
    text.bytes().fold(0xcbf2_9ce4_8422_2325u64, |hash, byte| {
        (hash ^ byte as u64).wrapping_mul(0x0100_0000_01b3)
    })
}

/// Seeded train/test sampler
///
/// Every chart gets its own generator derived from the configured seed and
/// the chart identifier, so assignments do not depend on which other charts
/// were processed in the same run.
#[derive(Debug, Clone)]
pub struct SplitAssigner {
    seed: u64,
    test_ratio: f64,
    mode: SplitMode,
}

impl SplitAssigner {
    pub fn new(config: &WindowConfig) -> Self {
        Self {
            seed: config.seed,
            test_ratio: config.test_ratio,
            mode: config.split_mode,
        }
    }

    fn draw(&self, rng: &mut StdRng) -> Split {
        if rng.gen::<f64>() < self.test_ratio {
            Split::Test
        } else {
            Split::Train
        }
    }

    /// Split of each of the `n_windows` windows of chart `chart_id`
    pub fn assign(&self, chart_id: &str, n_windows: usize) -> Vec<Split> {
        let mut rng = StdRng::seed_from_u64(self.seed ^ stable_hash(chart_id));
        match self.mode {
            SplitMode::PerWindow => (0..n_windows).map(|_| self.draw(&mut rng)).collect(),
            SplitMode::PerChart => {
                let split = self.draw(&mut rng);
                vec![split; n_windows]
            }
        }
    }
}

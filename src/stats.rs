//! Streaming per-column mean/std over chunked corpora and feature normalization

use crate::error::{ManiaError, Result};
use crate::records::{self, RecordSchema};
use ndarray::{Array2, Array3, ArrayView2, Axis};
use ndarray_npy::ReadNpyExt;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

/// Per-feature normalization statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormStats {
    pub means: Vec<f32>,
    pub stds: Vec<f32>,
}

impl NormStats {
    /// Build stats, replacing zero deviations with 1.0
    pub fn new(means: Vec<f32>, stds: Vec<f32>) -> Result<Self> {
        if means.len() != stds.len() {
            return Err(ManiaError::StatsFileError(format!(
                "{} means but {} stds",
                means.len(),
                stds.len()
            )));
        }
        let stds = stds
            .into_iter()
            .map(|s| if s == 0.0 || !s.is_finite() { 1.0 } else { s })
            .collect();
        Ok(Self { means, stds })
    }

    pub fn num_features(&self) -> usize {
        self.means.len()
    }

    pub fn normalize_value(&self, column: usize, value: f32) -> f32 {
        (value - self.means[column]) / self.stds[column]
    }

    pub fn denormalize_value(&self, column: usize, value: f32) -> f32 {
        value * self.stds[column] + self.means[column]
    }

    fn check_width(&self, width: usize) -> Result<()> {
        if width < self.num_features() {
            return Err(ManiaError::ShapeMismatch(format!(
                "rows have {} columns but stats cover {} features",
                width,
                self.num_features()
            )));
        }
        Ok(())
    }

    /// Normalize the leading feature columns in place; label columns are untouched
    pub fn normalize_rows(&self, rows: &mut Array2<f32>) -> Result<()> {
        self.check_width(rows.ncols())?;
        for (col, mut column) in rows.axis_iter_mut(Axis(1)).take(self.num_features()).enumerate() {
            column.mapv_inplace(|v| self.normalize_value(col, v));
        }
        Ok(())
    }

    /// Inverse of `normalize_rows`
    pub fn denormalize_rows(&self, rows: &mut Array2<f32>) -> Result<()> {
        self.check_width(rows.ncols())?;
        for (col, mut column) in rows.axis_iter_mut(Axis(1)).take(self.num_features()).enumerate() {
            column.mapv_inplace(|v| self.denormalize_value(col, v));
        }
        Ok(())
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ManiaError::StatsFileError(format!("cannot read {}: {}", path.display(), e))
        })?;
        let raw: NormStats = serde_json::from_str(&content)?;
        Self::new(raw.means, raw.stds)
    }
}

/// Running count, mean and sum of squared deviations per column
#[derive(Debug, Clone, PartialEq)]
pub struct RunningStats {
    count: u64,
    mean: Vec<f64>,
    m2: Vec<f64>,
}

impl RunningStats {
    pub fn new(num_features: usize) -> Self {
        Self {
            count: 0,
            mean: vec![0.0; num_features],
            m2: vec![0.0; num_features],
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn num_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    /// Merge a batch of `n` samples given its mean and `n * variance`
    pub fn merge_batch(&mut self, n: u64, batch_mean: &[f64], batch_n_variance: &[f64]) {
        if n == 0 {
            return;
        }
        let total = (self.count + n) as f64;
        let (count, n_f) = (self.count as f64, n as f64);
        for col in 0..self.mean.len() {
            let delta = batch_mean[col] - self.mean[col];
            self.mean[col] += delta * n_f / total;
            self.m2[col] += batch_n_variance[col] + delta * delta * count * n_f / total;
        }
        self.count += n;
    }

    /// Combine with an independently computed partial
    pub fn merge(&mut self, other: &RunningStats) {
        self.merge_batch(other.count, &other.mean, &other.m2);
    }

    /// Fold the leading `num_features` columns of `rows` in as one batch
    pub fn update_rows(&mut self, rows: ArrayView2<f32>) -> Result<()> {
        let n = rows.nrows();
        if n == 0 {
            return Ok(());
        }
        if rows.ncols() < self.num_features() {
            return Err(ManiaError::ShapeMismatch(format!(
                "batch has {} columns, stats need {}",
                rows.ncols(),
                self.num_features()
            )));
        }

        let mut batch_mean = vec![0.0f64; self.num_features()];
        let mut batch_m2 = vec![0.0f64; self.num_features()];
        for col in 0..self.num_features() {
            let column = rows.column(col);
            let mean = column.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
            batch_mean[col] = mean;
            batch_m2[col] = column.iter().map(|&v| (v as f64 - mean).powi(2)).sum();
        }
        self.merge_batch(n as u64, &batch_mean, &batch_m2);
        Ok(())
    }

    /// Sample variance `M2 / max(count - 1, 1)`
    pub fn variance(&self) -> Vec<f64> {
        let denom = (self.count.saturating_sub(1)).max(1) as f64;
        self.m2.iter().map(|&m2| m2 / denom).collect()
    }

    pub fn std(&self) -> Vec<f64> {
        self.variance().into_iter().map(f64::sqrt).collect()
    }

    pub fn finalize(&self) -> Result<NormStats> {
        NormStats::new(
            self.mean.iter().map(|&m| m as f32).collect(),
            self.std().into_iter().map(|s| s as f32).collect(),
        )
    }
}

/// Read a sequence chunk of shape (windows, window_length, columns)
pub fn read_chunk<P: AsRef<Path>>(path: P) -> Result<Array3<f32>> {
    let reader = BufReader::new(File::open(path)?);
    Ok(Array3::<f32>::read_npy(reader)?)
}

/// Partial stats of one chunk file
pub fn chunk_stats<P: AsRef<Path>>(path: P, num_features: usize) -> Result<RunningStats> {
    let chunk = read_chunk(path)?;
    let (windows, len, cols) = chunk.dim();
    let rows = chunk.into_shape((windows * len, cols))?;
    let mut stats = RunningStats::new(num_features);
    stats.update_rows(rows.view())?;
    Ok(stats)
}

/// Stream stats over chunk files one at a time
pub fn compute_chunk_stats(files: &[PathBuf], num_features: usize) -> Result<RunningStats> {
    let mut total = RunningStats::new(num_features);
    for path in files {
        let partial = chunk_stats(path, num_features)?;
        log::debug!("{}: {} rows", path.display(), partial.count());
        total.merge(&partial);
    }
    Ok(total)
}

/// Stats over every train chunk of `bucket` under `sequences_root`
pub fn compute_bucket_stats<P: AsRef<Path>>(
    sequences_root: P,
    bucket: &str,
    num_features: usize,
) -> Result<NormStats> {
    let train_dir = sequences_root.as_ref().join(bucket).join("train");
    let files = crate::chunks::chunk_files(&train_dir, bucket, "train")?;
    if files.is_empty() {
        return Err(ManiaError::NoDataFound(format!(
            "no {}_train_sequences_*.npy chunks in {}",
            bucket,
            train_dir.display()
        )));
    }
    log::info!("Computing stats over {} train chunks of {}", files.len(), bucket);
    compute_chunk_stats(&files, num_features)?.finalize()
}

/// Record files (`*.csv`) under every bucket directory of `preprocessed_root`
pub fn record_files<P: AsRef<Path>>(preprocessed_root: P) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for bucket_dir in sorted_subdirs(preprocessed_root.as_ref())? {
        files.extend(sorted_files_with_extension(&bucket_dir, records::RECORD_EXTENSION)?);
    }
    Ok(files)
}

/// Stats over the feature columns of every record file; mismatched files are skipped
pub fn compute_record_stats<P: AsRef<Path>>(
    preprocessed_root: P,
    schema: &RecordSchema,
) -> Result<NormStats> {
    let files = record_files(&preprocessed_root)?;
    let mut total = RunningStats::new(schema.num_features());
    for path in &files {
        let recs = match records::read_records(path, schema) {
            Ok(recs) => recs,
            Err(e) if e.is_skippable() => {
                log::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(e),
        };
        if recs.is_empty() {
            continue;
        }
        let rows = crate::windowing::record_matrix(&recs)?;
        total.update_rows(rows.view())?;
    }
    if total.count() == 0 {
        return Err(ManiaError::NoDataFound(format!(
            "no readable record files under {}",
            preprocessed_root.as_ref().display()
        )));
    }
    total.finalize()
}

pub(crate) fn sorted_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Err(ManiaError::InputValidationError(format!(
            "directory does not exist: {}",
            dir.display()
        )));
    }
    let mut dirs: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_dir())
        .collect();
    dirs.sort();
    Ok(dirs)
}

pub(crate) fn sorted_files_with_extension(dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.is_file() && p.extension().and_then(|e| e.to_str()) == Some(extension))
        .collect();
    files.sort();
    Ok(files)
}

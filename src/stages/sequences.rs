//! Stage 2: record files → train/test sequence chunks per difficulty bucket

use crate::chunks::{BucketCorpusWriter, CorpusSummary};
use crate::config::Config;
use crate::error::{ManiaError, Result};
use crate::records::{self, RecordSchema, RECORD_EXTENSION};
use crate::stats::{sorted_files_with_extension, sorted_subdirs, NormStats};
use crate::windowing::{self, SplitAssigner};
use std::path::Path;

/// Window every record file of one bucket directory into its chunk corpus
pub fn build_bucket(
    bucket_dir: &Path,
    config: &Config,
    stats: Option<&NormStats>,
) -> Result<CorpusSummary> {
    let bucket = bucket_dir
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| {
            ManiaError::InputValidationError(format!("bad bucket directory {}", bucket_dir.display()))
        })?;

    let schema = RecordSchema::from_config(config);
    let window = &config.window;
    let assigner = SplitAssigner::new(window);
    let mut writer = BucketCorpusWriter::new(
        &config.paths.sequences_root,
        bucket,
        window.sequence_length,
        schema.row_width(),
        window.max_chunk_bytes,
    )?;

    let files = sorted_files_with_extension(bucket_dir, RECORD_EXTENSION)?;
    log::info!("{}: windowing {} record files", bucket, files.len());

    for path in &files {
        let Some(chart_id) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if writer.is_processed(chart_id) {
            log::debug!("{}: already in corpus", chart_id);
            continue;
        }

        let recs = match records::read_records(path, &schema) {
            Ok(recs) => recs,
            Err(e) if e.is_skippable() => {
                log::warn!("Skipping {}: {}", path.display(), e);
                continue;
            }
            Err(e) => return Err(e),
        };

        let n_windows = windowing::window_count(recs.len(), window.sequence_length, window.stride);
        if n_windows > 0 {
            let rows = windowing::chart_matrix(&recs, stats)?;
            let splits = assigner.assign(chart_id, n_windows);
            let starts = windowing::window_starts(recs.len(), window.sequence_length, window.stride);
            for (start, split) in starts.zip(splits) {
                writer.push(split, windowing::window_view(&rows, start, window.sequence_length))?;
            }
        } else {
            log::debug!(
                "{}: {} records, too short for a {}-step window",
                chart_id,
                recs.len(),
                window.sequence_length
            );
        }
        writer.finish_chart(chart_id)?;
    }

    let summary = writer.finish()?;
    log::info!(
        "{}: {} charts, {} train / {} test windows",
        bucket,
        summary.charts,
        summary.train_windows,
        summary.test_windows
    );
    Ok(summary)
}

/// Build the sequence corpus of every bucket under `paths.preprocessed_root`
pub fn run(config: &Config, stats: Option<&NormStats>) -> Result<Vec<CorpusSummary>> {
    let root = &config.paths.preprocessed_root;
    let buckets = sorted_subdirs(root)?;
    if buckets.is_empty() {
        return Err(ManiaError::NoDataFound(format!(
            "no bucket directories under {}",
            root.display()
        )));
    }
    if stats.is_some() {
        log::info!("Normalizing feature columns while windowing");
    }

    buckets
        .iter()
        .map(|dir| build_bucket(dir, config, stats))
        .collect()
}

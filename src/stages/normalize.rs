//! Stage 3: normalization statistics over the train chunks or record files

use crate::config::Config;
use crate::error::{ManiaError, Result};
use crate::records::RecordSchema;
use crate::stats::{self, sorted_subdirs, NormStats, RunningStats};
use std::path::Path;

/// Where the statistics are computed from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatsSource {
    /// Train chunks of one bucket
    Bucket(String),
    /// Train chunks of every bucket under the sequences root
    AllBuckets,
    /// Record files under the preprocessed root
    Records,
}

fn all_bucket_stats(sequences_root: &Path, num_features: usize) -> Result<NormStats> {
    let mut total = RunningStats::new(num_features);
    for bucket_dir in sorted_subdirs(sequences_root)? {
        let Some(bucket) = bucket_dir.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let files = crate::chunks::chunk_files(bucket_dir.join("train"), bucket, "train")?;
        total.merge(&stats::compute_chunk_stats(&files, num_features)?);
    }
    if total.count() == 0 {
        return Err(ManiaError::NoDataFound(format!(
            "no train chunks under {}",
            sequences_root.display()
        )));
    }
    total.finalize()
}

/// Compute stats from `source` and write them to `output`
pub fn run(config: &Config, source: &StatsSource, output: &Path) -> Result<NormStats> {
    let schema = RecordSchema::from_config(config);
    let num_features = schema.num_features();

    let stats = match source {
        StatsSource::Bucket(bucket) => {
            stats::compute_bucket_stats(&config.paths.sequences_root, bucket, num_features)?
        }
        StatsSource::AllBuckets => all_bucket_stats(&config.paths.sequences_root, num_features)?,
        StatsSource::Records => {
            stats::compute_record_stats(&config.paths.preprocessed_root, &schema)?
        }
    };

    stats.save(output)?;
    log::info!("Saved normalization stats to {}", output.display());
    Ok(stats)
}

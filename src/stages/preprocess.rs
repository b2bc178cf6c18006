//! Stage 1: raw charts + audio → per-chart record files grouped by difficulty bucket

use crate::align;
use crate::audio::{self, DescriptorTrack};
use crate::chart::{self, DifficultyBucket, ParsedChart};
use crate::config::Config;
use crate::error::{ManiaError, Result};
use crate::records::{self, RecordSchema, RECORD_EXTENSION};
use crate::stats::sorted_subdirs;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

const CHART_EXTENSION: &str = "osu";
const CHART_PREFIX: &str = "bm_";

/// Outcome counts of one preprocessing run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessReport {
    pub processed: usize,
    pub skipped_existing: usize,
    pub skipped_filtered: usize,
    pub failed: usize,
    /// Note events parsed from processed charts
    pub input_notes: usize,
    /// Of those, events that landed on a subbeat
    pub matched_notes: usize,
}

impl PreprocessReport {
    pub fn dropped_notes(&self) -> usize {
        self.input_notes - self.matched_notes
    }
}

/// A chart file and the identifier its outputs are named after
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartJob {
    pub chart_id: String,
    pub chart_path: PathBuf,
}

/// Chart files (`bm_*.osu`) of one set directory, sorted
pub fn discover_charts<P: AsRef<Path>>(set_dir: P) -> Result<Vec<ChartJob>> {
    let mut jobs: Vec<ChartJob> = std::fs::read_dir(set_dir)?
        .filter_map(|e| e.ok().map(|e| e.path()))
        .filter(|p| p.extension().and_then(|e| e.to_str()) == Some(CHART_EXTENSION))
        .filter_map(|chart_path| {
            let chart_id = chart_path.file_stem()?.to_str()?.to_string();
            chart_id.starts_with(CHART_PREFIX).then_some(ChartJob {
                chart_id,
                chart_path,
            })
        })
        .collect();
    jobs.sort_by(|a, b| a.chart_id.cmp(&b.chart_id));
    Ok(jobs)
}

/// Identifiers that already have a record file in any bucket
pub fn existing_outputs<P: AsRef<Path>>(preprocessed_root: P) -> Result<HashSet<String>> {
    let root = preprocessed_root.as_ref();
    let mut ids = HashSet::new();
    if !root.is_dir() {
        return Ok(ids);
    }
    for bucket_dir in sorted_subdirs(root)? {
        for entry in std::fs::read_dir(&bucket_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                ids.insert(stem.to_string());
            }
        }
    }
    Ok(ids)
}

/// Parsed chart that passed the layout filter
struct AcceptedChart {
    job: ChartJob,
    chart: ParsedChart,
    bucket: DifficultyBucket,
}

/// Parse a chart and its sidecar; `None` when the chart is not a matching layout
fn accept_chart(job: &ChartJob, config: &Config) -> Result<Option<AcceptedChart>> {
    let mut chart = chart::load_chart(&job.chart_path, &config.grid)?;
    let sidecar = chart::load_sidecar(&job.chart_path)?;
    if let Some(sidecar) = &sidecar {
        sidecar.apply_to(&mut chart.metadata);
    }

    if !chart.metadata.matches_layout(config.grid.num_lanes) {
        log::debug!(
            "{}: mode {:?} with {:?} keys, skipping",
            job.chart_id,
            chart.metadata.mode,
            chart.metadata.key_count
        );
        return Ok(None);
    }

    let bucket = sidecar
        .map(|s| s.bucket())
        .unwrap_or(DifficultyBucket::Unrated);
    Ok(Some(AcceptedChart {
        job: job.clone(),
        chart,
        bucket,
    }))
}

fn load_track(set_dir: &Path, config: &Config) -> Result<DescriptorTrack> {
    let audio_path = audio::find_audio_file(set_dir).ok_or_else(|| {
        ManiaError::AudioFileError(format!("no audio file in {}", set_dir.display()))
    })?;
    let clip = audio::load_audio_file(&audio_path)?;
    audio::extract_descriptors(&clip.samples, clip.sample_rate, &config.audio)
}

/// Align one accepted chart and write its record file
fn write_chart_records(
    accepted: &AcceptedChart,
    track: &DescriptorTrack,
    config: &Config,
    schema: &RecordSchema,
    report: &mut PreprocessReport,
) -> Result<PathBuf> {
    let (records, quantize_report) = align::align_chart(&accepted.chart, track, &config.grid)?;
    let output = config
        .paths
        .preprocessed_root
        .join(accepted.bucket.label())
        .join(format!("{}.{}", accepted.job.chart_id, RECORD_EXTENSION));
    records::write_records(&output, &records, schema)?;

    report.input_notes += quantize_report.input_events;
    report.matched_notes += quantize_report.matched_events;
    Ok(output)
}

fn record_failure(report: &mut PreprocessReport, chart_id: &str, err: ManiaError) -> Result<()> {
    if !err.is_skippable() {
        return Err(err);
    }
    log::warn!("{}: {}", chart_id, err);
    report.failed += 1;
    Ok(())
}

/// Preprocess one set directory; audio is analyzed once for all its charts
pub fn process_set(
    set_dir: &Path,
    config: &Config,
    existing: &mut HashSet<String>,
    report: &mut PreprocessReport,
) -> Result<()> {
    let schema = RecordSchema::from_config(config);
    let mut accepted = Vec::new();

    for job in discover_charts(set_dir)? {
        if existing.contains(&job.chart_id) {
            report.skipped_existing += 1;
            continue;
        }
        match accept_chart(&job, config) {
            Ok(Some(chart)) => accepted.push(chart),
            Ok(None) => report.skipped_filtered += 1,
            Err(e) => record_failure(report, &job.chart_id, e)?,
        }
    }

    if accepted.is_empty() {
        return Ok(());
    }

    let track = match load_track(set_dir, config) {
        Ok(track) => track,
        Err(e) if e.is_skippable() => {
            log::warn!("{}: {}", set_dir.display(), e);
            report.failed += accepted.len();
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    for chart in &accepted {
        match write_chart_records(chart, &track, config, &schema, report) {
            Ok(path) => {
                log::debug!("Wrote {}", path.display());
                existing.insert(chart.job.chart_id.clone());
                report.processed += 1;
            }
            Err(e) => record_failure(report, &chart.job.chart_id, e)?,
        }
    }
    Ok(())
}

/// Preprocess every set under `paths.raw_root`
pub fn run(config: &Config) -> Result<PreprocessReport> {
    let raw_root = &config.paths.raw_root;
    let sets = sorted_subdirs(raw_root)?;
    let mut existing = existing_outputs(&config.paths.preprocessed_root)?;
    let mut report = PreprocessReport::default();

    log::info!(
        "Preprocessing {} chart sets from {} ({} charts already done)",
        sets.len(),
        raw_root.display(),
        existing.len()
    );

    for (i, set_dir) in sets.iter().enumerate() {
        process_set(set_dir, config, &mut existing, &mut report)?;
        log::info!(
            "Processed sets: {}/{} ({:.1}%)",
            i + 1,
            sets.len(),
            (i + 1) as f64 / sets.len() as f64 * 100.0
        );
    }

    log::info!(
        "Preprocessing complete: {} written, {} existing, {} filtered, {} failed",
        report.processed,
        report.skipped_existing,
        report.skipped_filtered,
        report.failed
    );
    Ok(report)
}

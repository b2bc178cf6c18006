//! Rhythm-Game Chart Alignment and Decoding Engine
//!
//! Turns mania charts and their audio into fixed-grid feature/label
//! sequences for an external learner, and decodes per-subbeat lane
//! probabilities from a trained model back into playable note patterns.

pub mod align;
pub mod audio;
pub mod chart;
pub mod chunks;
pub mod config;
pub mod decoder;
pub mod error;
pub mod export;
pub mod grid;
pub mod records;
pub mod spectral;
pub mod stages;
pub mod stats;
pub mod windowing;

pub use align::AlignedRecord;
pub use chart::{NoteEvent, ParsedChart, TempoInfo};
pub use config::Config;
pub use decoder::{DecodedNoteEvent, PredictionDecoder, RawPrediction};
pub use error::{ManiaError, Result};
pub use grid::{QuantizedRecord, SubbeatGrid};
pub use stats::{NormStats, RunningStats};

use chunks::CorpusSummary;
use decoder::DecodeSummary;
use export::ChartTemplate;
use stages::normalize::StatsSource;
use stages::preprocess::PreprocessReport;
use std::path::Path;

/// Corpus building and generation entry points sharing one configuration
pub struct ManiaPipeline {
    config: Config,
}

impl ManiaPipeline {
    /// Create a pipeline; the configuration is validated once here
    pub fn new(config: Config) -> Result<Self> {
        config::validate_config(&config)?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Raw charts + audio → record files
    pub fn preprocess(&self) -> Result<PreprocessReport> {
        stages::preprocess::run(&self.config)
    }

    /// Record files → sequence chunks, normalized when a stats file is given
    pub fn build_sequences(&self, stats_path: Option<&Path>) -> Result<Vec<CorpusSummary>> {
        let stats = stats_path.map(NormStats::load).transpose()?;
        stages::sequences::run(&self.config, stats.as_ref())
    }

    /// Chunks or records → stats file at `paths.stats_file`
    pub fn compute_stats(&self, source: &StatsSource) -> Result<NormStats> {
        stages::normalize::run(&self.config, source, &self.config.paths.stats_file)
    }

    /// Audio → normalized `(n, L, features)` windows written to `output`
    pub fn features(&self, audio_path: &Path, bpm: f64, start_ms: f64, output: &Path) -> Result<()> {
        let tempo = stages::generate::tempo_from_bpm(bpm, start_ms)?;
        let stats = NormStats::load(&self.config.paths.stats_file)?;
        let features = stages::generate::inference_features(audio_path, &tempo, &self.config, &stats)?;
        log::info!("Extracted {} feature windows", features.dim().0);
        stages::generate::write_features(output, &features)
    }

    /// Predictions → `.gblf` (and optionally a chart file)
    pub fn decode(
        &self,
        predictions: &Path,
        bpm: f64,
        start_ms: f64,
        gblf_output: &Path,
        chart_output: Option<(&Path, &ChartTemplate)>,
    ) -> Result<DecodeSummary> {
        let tempo = stages::generate::tempo_from_bpm(bpm, start_ms)?;
        stages::generate::run_decode(predictions, &tempo, &self.config, gblf_output, chart_output)
    }
}

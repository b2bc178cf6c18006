//! Configuration system for corpus building and prediction decoding

use crate::error::{ManiaError, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub version: String,
    pub grid: GridConfig,
    pub audio: AudioConfig,
    pub window: WindowConfig,
    pub decoder: DecoderConfig,
    pub paths: PathsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            grid: GridConfig::default(),
            audio: AudioConfig::default(),
            window: WindowConfig::default(),
            decoder: DecoderConfig::default(),
            paths: PathsConfig::default(),
        }
    }
}

/// Subbeat grid and chart layout configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// Subdivisions per quarter note
    pub note_precision: u32,
    /// Maximum distance between a note and its subbeat
    pub tolerance_ms: f64,
    pub num_lanes: usize,
    /// Horizontal extent of the chart playfield in chart units
    pub playfield_width: u32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            note_precision: 2,
            tolerance_ms: 10.0,
            num_lanes: 4,
            playfield_width: 512,
        }
    }
}

/// Audio descriptor extraction configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    pub n_mfcc: usize,
    /// Dynamic range kept when converting mel power to decibels
    pub top_db: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            n_mfcc: 5,
            top_db: 80.0,
        }
    }
}

/// How windows are assigned to the train/test split
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SplitMode {
    /// Every window is sampled independently (overlapping windows may leak across splits)
    PerWindow,
    /// All windows of one chart land in the same split
    PerChart,
}

/// Sequence windowing and chunking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub sequence_length: usize,
    pub stride: usize,
    pub test_ratio: f64,
    pub seed: u64,
    /// Uncompressed payload ceiling per chunk file
    pub max_chunk_bytes: u64,
    pub split_mode: SplitMode,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            sequence_length: 64,
            stride: 1,
            test_ratio: 0.2,
            seed: 42,
            max_chunk_bytes: 512 * 1024 * 1024,
            split_mode: SplitMode::PerWindow,
        }
    }
}

/// Prediction decoder configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub prediction_threshold: f32,
    pub frequency_bias_strength: f32,
    pub history_window: usize,
    pub long_term_weight: f32,
    pub short_term_weight: f32,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            prediction_threshold: 0.45,
            frequency_bias_strength: 0.002,
            history_window: 16,
            long_term_weight: 0.3,
            short_term_weight: 0.7,
        }
    }
}

impl DecoderConfig {
    /// Maximum gap between consecutive ranked lanes that still fire together
    pub fn max_prediction_delta(&self, num_lanes: usize) -> f32 {
        self.prediction_threshold / num_lanes.max(1) as f32
    }
}

/// Corpus directory layout
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub raw_root: PathBuf,
    pub preprocessed_root: PathBuf,
    pub sequences_root: PathBuf,
    pub stats_file: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            raw_root: PathBuf::from("data/raw"),
            preprocessed_root: PathBuf::from("data/preprocessed"),
            sequences_root: PathBuf::from("data/sequences"),
            stats_file: PathBuf::from("data/feature_norm_stats.json"),
        }
    }
}

fn invalid(msg: impl Into<String>) -> ManiaError {
    ManiaError::InvalidConfigParameter(msg.into())
}

/// Validate grid parameters
pub fn validate_grid(grid: &GridConfig) -> Result<()> {
    if grid.note_precision == 0 {
        return Err(invalid("grid.note_precision must be >= 1"));
    }
    if grid.num_lanes == 0 {
        return Err(invalid("grid.num_lanes must be >= 1"));
    }
    if !(grid.tolerance_ms >= 0.0) {
        return Err(invalid("grid.tolerance_ms must be >= 0"));
    }
    if grid.playfield_width == 0 {
        return Err(invalid("grid.playfield_width must be > 0"));
    }
    Ok(())
}

/// Validate audio analysis parameters
pub fn validate_audio(audio: &AudioConfig) -> Result<()> {
    if audio.n_fft < 2 || audio.hop_length == 0 {
        return Err(invalid("audio.n_fft must be >= 2 and audio.hop_length > 0"));
    }
    if audio.n_mels == 0 || audio.n_mfcc == 0 || audio.n_mfcc > audio.n_mels {
        return Err(invalid("audio.n_mfcc must be in 1..=audio.n_mels"));
    }
    if !(audio.top_db > 0.0) {
        return Err(invalid("audio.top_db must be > 0"));
    }
    Ok(())
}

/// Validate windowing parameters
pub fn validate_window(window: &WindowConfig) -> Result<()> {
    if window.sequence_length == 0 || window.stride == 0 {
        return Err(invalid("window.sequence_length and window.stride must be >= 1"));
    }
    if !(0.0..=1.0).contains(&window.test_ratio) {
        return Err(invalid("window.test_ratio must be within [0, 1]"));
    }
    if window.max_chunk_bytes == 0 {
        return Err(invalid("window.max_chunk_bytes must be > 0"));
    }
    Ok(())
}

/// Validate decoder parameters
pub fn validate_decoder(decoder: &DecoderConfig) -> Result<()> {
    if !(0.0..=1.0).contains(&decoder.prediction_threshold) {
        return Err(invalid("decoder.prediction_threshold must be within [0, 1]"));
    }
    if !(decoder.frequency_bias_strength >= 0.0) {
        return Err(invalid("decoder.frequency_bias_strength must be >= 0"));
    }
    if decoder.history_window == 0 {
        return Err(invalid("decoder.history_window must be >= 1"));
    }
    if !(decoder.long_term_weight >= 0.0 && decoder.short_term_weight >= 0.0) {
        return Err(invalid("decoder bias weights must be >= 0"));
    }
    Ok(())
}

/// Validate configuration parameters
pub fn validate_config(config: &Config) -> Result<()> {
    validate_grid(&config.grid)
        .and_then(|_| validate_audio(&config.audio))
        .and_then(|_| validate_window(&config.window))
        .and_then(|_| validate_decoder(&config.decoder))
        .map_err(|e| ManiaError::ConfigValidationFailed(e.to_string()))
}

/// Load configuration from JSON file
pub fn load_config<P: AsRef<std::path::Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Save configuration to JSON file
pub fn save_config<P: AsRef<std::path::Path>>(config: &Config, path: P) -> Result<()> {
    let content = serde_json::to_string_pretty(config)?;
    std::fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&Config::default()).is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config =
            serde_json::from_str(r#"{"grid": {"note_precision": 4}, "window": {"split_mode": "per_chart"}}"#)
                .unwrap();
        assert_eq!(config.grid.note_precision, 4);
        assert_eq!(config.grid.num_lanes, 4);
        assert_eq!(config.window.split_mode, SplitMode::PerChart);
        assert!((config.decoder.prediction_threshold - 0.45).abs() < 1e-6);
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut config = Config::default();
        config.window.test_ratio = 1.5;
        assert!(matches!(
            validate_config(&config),
            Err(ManiaError::ConfigValidationFailed(_))
        ));

        let mut config = Config::default();
        config.grid.note_precision = 0;
        assert!(validate_config(&config).is_err());

        let mut config = Config::default();
        config.audio.n_mfcc = 200;
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_max_prediction_delta() {
        let decoder = DecoderConfig::default();
        assert!((decoder.max_prediction_delta(4) - 0.1125).abs() < 1e-6);
    }
}

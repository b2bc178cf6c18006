//! Error types for the chart alignment and decoding engine

use std::fmt;
use std::path::PathBuf;

/// Custom error type for corpus building and decoding
#[derive(Debug, Clone)]
pub enum ManiaError {
    /// E001: Chart is missing its tempo or note section (skip the chart)
    MalformedChart(String),
    /// E002: Merged record stream is empty (skip the chart)
    EmptyAlignment(String),
    /// E003: Persisted record file has an unexpected column count (skip the file)
    ColumnMismatch {
        path: PathBuf,
        expected: usize,
        found: usize,
    },
    /// E004: No chunk or record files matched (fatal for the stage)
    NoDataFound(String),
    /// E005: Invalid audio format (e.g. unsupported container or bit depth)
    InvalidAudioFormat(String),
    /// E006: Audio file I/O error
    AudioFileError(String),
    /// E007: Configuration validation failed
    ConfigValidationFailed(String),
    /// E008: Invalid configuration parameter
    InvalidConfigParameter(String),
    /// E009: Record file read/write error
    RecordFileError(String),
    /// E010: Chunk serialization error
    ChunkWriteError(String),
    /// E011: Normalization stats file error
    StatsFileError(String),
    /// E012: Input validation error (missing directories, bad arguments)
    InputValidationError(String),
    /// E013: Array shape does not match the expected layout
    ShapeMismatch(String),
}

impl ManiaError {
    /// Per-item failures are logged and skipped; everything else aborts the stage.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            ManiaError::MalformedChart(_)
                | ManiaError::EmptyAlignment(_)
                | ManiaError::ColumnMismatch { .. }
                | ManiaError::InvalidAudioFormat(_)
                | ManiaError::AudioFileError(_)
                | ManiaError::RecordFileError(_)
        )
    }
}

impl fmt::Display for ManiaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManiaError::MalformedChart(msg) => {
                write!(f, "E001: Malformed chart - {}", msg)
            }
            ManiaError::EmptyAlignment(msg) => {
                write!(f, "E002: Empty alignment - {}", msg)
            }
            ManiaError::ColumnMismatch {
                path,
                expected,
                found,
            } => {
                write!(
                    f,
                    "E003: Column mismatch in {} ({} columns found, {} expected)",
                    path.display(),
                    found,
                    expected
                )
            }
            ManiaError::NoDataFound(msg) => {
                write!(f, "E004: No data found - {}", msg)
            }
            ManiaError::InvalidAudioFormat(msg) => {
                write!(f, "E005: Invalid audio format - {}", msg)
            }
            ManiaError::AudioFileError(msg) => {
                write!(f, "E006: Audio file I/O error - {}", msg)
            }
            ManiaError::ConfigValidationFailed(msg) => {
                write!(f, "E007: Configuration validation failed - {}", msg)
            }
            ManiaError::InvalidConfigParameter(msg) => {
                write!(f, "E008: Invalid configuration parameter - {}", msg)
            }
            ManiaError::RecordFileError(msg) => {
                write!(f, "E009: Record file error - {}", msg)
            }
            ManiaError::ChunkWriteError(msg) => {
                write!(f, "E010: Chunk write error - {}", msg)
            }
            ManiaError::StatsFileError(msg) => {
                write!(f, "E011: Normalization stats error - {}", msg)
            }
            ManiaError::InputValidationError(msg) => {
                write!(f, "E012: Input validation error - {}", msg)
            }
            ManiaError::ShapeMismatch(msg) => {
                write!(f, "E013: Shape mismatch - {}", msg)
            }
        }
    }
}

impl std::error::Error for ManiaError {}

// From implementations for common error types
impl From<std::io::Error> for ManiaError {
    fn from(err: std::io::Error) -> Self {
        ManiaError::RecordFileError(format!("File I/O error: {}", err))
    }
}

impl From<serde_json::Error> for ManiaError {
    fn from(err: serde_json::Error) -> Self {
        ManiaError::StatsFileError(format!("JSON serialization error: {}", err))
    }
}

impl From<hound::Error> for ManiaError {
    fn from(err: hound::Error) -> Self {
        ManiaError::AudioFileError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for ManiaError {
    fn from(err: ndarray::ShapeError) -> Self {
        ManiaError::ShapeMismatch(err.to_string())
    }
}

impl From<ndarray_npy::WriteNpyError> for ManiaError {
    fn from(err: ndarray_npy::WriteNpyError) -> Self {
        ManiaError::ChunkWriteError(err.to_string())
    }
}

impl From<ndarray_npy::ReadNpyError> for ManiaError {
    fn from(err: ndarray_npy::ReadNpyError) -> Self {
        ManiaError::ChunkWriteError(format!("Failed to read .npy array: {}", err))
    }
}

/// Result type alias for corpus and decoding operations
pub type Result<T> = std::result::Result<T, ManiaError>;

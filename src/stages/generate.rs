//! Inference side: audio → normalized feature windows, predictions → `.gblf`

use crate::align::descriptor_features;
use crate::audio::{self, AudioClip};
use crate::chart::{TempoInfo, MIN_BEAT_LENGTH_MS};
use crate::config::Config;
use crate::decoder::{self, DecodeSummary, DecodedNoteEvent, PredictionDecoder};
use crate::error::{ManiaError, Result};
use crate::export::{self, ChartTemplate};
use crate::grid::SubbeatGrid;
use crate::stats::NormStats;
use ndarray::{Array2, Array3, ArrayD, ArrayView2, Ix2};
use ndarray_npy::{ReadNpyExt, WriteNpyExt};
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::Path;

/// Tempo of a track given as BPM and first-beat offset
pub fn tempo_from_bpm(bpm: f64, start_ms: f64) -> Result<TempoInfo> {
    let max_bpm = 60_000.0 / MIN_BEAT_LENGTH_MS;
    if !(bpm > 0.0 && bpm <= max_bpm) {
        return Err(ManiaError::InputValidationError(format!(
            "BPM must be in (0, {}], got {}",
            max_bpm, bpm
        )));
    }
    Ok(TempoInfo {
        beats_per_minute: bpm,
        start_time_ms: start_ms,
    })
}

/// Normalized descriptor rows, one per subbeat of the track
pub fn subbeat_features(
    clip: &AudioClip,
    tempo: &TempoInfo,
    config: &Config,
    stats: &NormStats,
) -> Result<Array2<f32>> {
    let grid = SubbeatGrid::for_duration(tempo, config.grid.note_precision, clip.duration_ms());
    if grid.is_empty() {
        return Err(ManiaError::EmptyAlignment(format!(
            "audio of {:.0} ms ends before the first subbeat at {} ms",
            clip.duration_ms(),
            tempo.start_time_ms
        )));
    }

    let track = audio::extract_descriptors(&clip.samples, clip.sample_rate, &config.audio)?;
    let frames = crate::align::map_descriptors(&grid, &track)?;
    let width = config.audio.n_mfcc + 2;

    let mut flat = Vec::with_capacity(frames.len() * width);
    for frame in &frames {
        flat.extend(descriptor_features(&frame.cepstral, frame.onset_strength, frame.energy));
    }
    let mut rows = Array2::from_shape_vec((frames.len(), width), flat)?;
    stats.normalize_rows(&mut rows)?;
    Ok(rows)
}

/// Group subbeat rows into `(n, sequence_length, features)`, dropping the partial tail
pub fn to_windows(rows: Array2<f32>, sequence_length: usize) -> Result<Array3<f32>> {
    let (n_rows, width) = rows.dim();
    let n_windows = n_rows / sequence_length.max(1);
    if n_windows == 0 {
        return Err(ManiaError::EmptyAlignment(format!(
            "{} subbeats do not fill one {}-step window",
            n_rows, sequence_length
        )));
    }
    let kept = n_windows * sequence_length;
    let trimmed: Vec<f32> = rows.outer_iter().take(kept).flat_map(|r| r.to_vec()).collect();
    Ok(Array3::from_shape_vec((n_windows, sequence_length, width), trimmed)?)
}

/// Feature windows for an audio file, ready for an external model
pub fn inference_features(
    audio_path: &Path,
    tempo: &TempoInfo,
    config: &Config,
    stats: &NormStats,
) -> Result<Array3<f32>> {
    let clip = audio::load_audio_file(audio_path)?;
    let rows = subbeat_features(&clip, tempo, config, stats)?;
    to_windows(rows, config.window.sequence_length)
}

pub fn write_features(path: &Path, features: &Array3<f32>) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut writer = BufWriter::new(File::create(path)?);
    features.write_npy(&mut writer)?;
    writer.flush()?;
    Ok(())
}

/// Read predictions of shape `(n, lanes)` or `(n, L, lanes)` as per-subbeat rows
pub fn load_predictions(path: &Path) -> Result<Array2<f32>> {
    let reader = BufReader::new(File::open(path)?);
    let raw = ArrayD::<f32>::read_npy(reader)?;
    flatten_predictions(raw)
}

pub fn flatten_predictions(raw: ArrayD<f32>) -> Result<Array2<f32>> {
    match raw.ndim() {
        2 => Ok(raw.into_dimensionality::<Ix2>()?),
        3 => {
            let shape = raw.shape().to_vec();
            Ok(raw.into_shape((shape[0] * shape[1], shape[2]))?)
        }
        n => Err(ManiaError::ShapeMismatch(format!(
            "predictions must be 2- or 3-dimensional, got {} dimensions",
            n
        ))),
    }
}

/// Decode probability rows into one event per subbeat
pub fn decode_predictions(
    rows: ArrayView2<f32>,
    tempo: &TempoInfo,
    config: &Config,
) -> Result<Vec<DecodedNoteEvent>> {
    let grid = SubbeatGrid::with_len(tempo, config.grid.note_precision, rows.nrows());
    let mut decoder = PredictionDecoder::new(config.decoder.clone(), config.grid.num_lanes)?;
    decoder.decode_all(&decoder::predictions_from_rows(rows), &grid)
}

/// Decode a predictions file to `.gblf`, optionally also rendering a chart
///
/// Neither output may exist yet; nothing is written if either does.
pub fn run_decode(
    predictions_path: &Path,
    tempo: &TempoInfo,
    config: &Config,
    gblf_output: &Path,
    chart_output: Option<(&Path, &ChartTemplate)>,
) -> Result<DecodeSummary> {
    export::ensure_absent(gblf_output)?;
    if let Some((path, _)) = chart_output {
        export::ensure_absent(path)?;
    }

    let rows = load_predictions(predictions_path)?;
    log::info!(
        "Decoding {} subbeats from {}",
        rows.nrows(),
        predictions_path.display()
    );

    let events = decode_predictions(rows.view(), tempo, config)?;
    export::write_gblf(gblf_output, &events)?;
    log::info!("Wrote {}", gblf_output.display());

    if let Some((path, template)) = chart_output {
        let text = export::render_chart_text(&events, tempo, template, &config.grid);
        export::write_chart(path, &text)?;
        log::info!("Wrote {}", path.display());
    }

    Ok(decoder::summarize(&events, config.grid.num_lanes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::IxDyn;

    #[test]
    fn test_flatten_three_dimensional_predictions() {
        let raw = ArrayD::from_shape_vec(IxDyn(&[2, 3, 4]), (0..24).map(|v| v as f32).collect()).unwrap();
        let rows = flatten_predictions(raw).unwrap();
        assert_eq!(rows.dim(), (6, 4));
        assert_eq!(rows[[5, 3]], 23.0);
    }

    #[test]
    fn test_bpm_range() {
        assert!(tempo_from_bpm(120.0, 0.0).is_ok());
        assert!(tempo_from_bpm(0.0, 0.0).is_err());
        assert!(tempo_from_bpm(f64::NAN, 0.0).is_err());
        assert!(tempo_from_bpm(1.0e9, 0.0).is_err());
    }

    #[test]
    fn test_to_windows_drops_tail() {
        let rows = Array2::from_shape_vec((10, 2), (0..20).map(|v| v as f32).collect()).unwrap();
        let windows = to_windows(rows, 4).unwrap();
        assert_eq!(windows.dim(), (2, 4, 2));
        assert_eq!(windows[[1, 3, 1]], 15.0);
    }
}

//! Audio loading and frame-rate descriptor extraction

use crate::config::AudioConfig;
use crate::error::{ManiaError, Result};
use crate::spectral::{self, MelFilterBank};
use hound::WavReader;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Decoded mono audio
#[derive(Debug, Clone)]
pub struct AudioClip {
    /// Audio samples (mono, normalized to [-1, 1])
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioClip {
    pub fn duration_ms(&self) -> f64 {
        self.samples.len() as f64 * 1000.0 / self.sample_rate as f64
    }
}

/// Load audio file and return mono samples with sample rate
pub fn load_audio_file<P: AsRef<Path>>(path: P) -> Result<AudioClip> {
    let path = path.as_ref();

    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_lowercase();

    match extension.as_str() {
        "wav" | "wave" => load_wav_file(path),
        _ => Err(ManiaError::InvalidAudioFormat(format!(
            "Unsupported audio format '{}' for {}",
            extension,
            path.display()
        ))),
    }
}

/// Load WAV file, downmixing all channels to mono
fn load_wav_file(path: &Path) -> Result<AudioClip> {
    let mut reader = WavReader::open(path)
        .map_err(|e| ManiaError::AudioFileError(format!("{}: {}", path.display(), e)))?;
    let spec = reader.spec();

    if spec.channels == 0 {
        return Err(ManiaError::InvalidAudioFormat(
            "WAV header declares zero channels".to_string(),
        ));
    }

    if spec.bits_per_sample > 32 {
        return Err(ManiaError::InvalidAudioFormat(format!(
            "Unsupported bit depth: {}",
            spec.bits_per_sample
        )));
    }

    let mut interleaved: Vec<f32> = Vec::with_capacity(reader.len() as usize);
    match spec.sample_format {
        hound::SampleFormat::Int => {
            let max_value = (1i64 << (spec.bits_per_sample - 1)) as f32;
            for sample in reader.samples::<i32>() {
                interleaved.push(sample? as f32 / max_value);
            }
        }
        hound::SampleFormat::Float => {
            for sample in reader.samples::<f32>() {
                interleaved.push(sample?);
            }
        }
    }

    let channels = spec.channels as usize;
    let samples = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    validate_samples(&samples, spec.sample_rate)?;

    Ok(AudioClip {
        samples,
        sample_rate: spec.sample_rate,
    })
}

/// Reject empty clips and implausible sample rates
pub fn validate_samples(samples: &[f32], sample_rate: u32) -> Result<()> {
    if samples.is_empty() {
        return Err(ManiaError::InvalidAudioFormat(
            "Audio contains no samples".to_string(),
        ));
    }
    if !(8000..=192_000).contains(&sample_rate) {
        return Err(ManiaError::InvalidAudioFormat(format!(
            "Unsupported sample rate {} Hz",
            sample_rate
        )));
    }
    Ok(())
}

/// First file in `dir` whose name starts with `audio`
pub fn find_audio_file<P: AsRef<Path>>(dir: P) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| n.starts_with("audio"))
        })
        .collect();
    candidates.sort();
    candidates.into_iter().next()
}

/// Audio descriptors of one analysis hop
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioDescriptorFrame {
    pub frame_index: usize,
    pub cepstral: Vec<f32>,
    pub onset_strength: f32,
    pub energy: f32,
}

/// Descriptor frames on a common frame axis
#[derive(Debug, Clone)]
pub struct DescriptorTrack {
    pub frames: Vec<AudioDescriptorFrame>,
    pub sample_rate: u32,
    pub hop_length: usize,
}

impl DescriptorTrack {
    pub fn num_frames(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// `floor((t / 1000) * sample_rate / hop_length)` clamped to the analyzed range
    pub fn frame_index_for_ms(&self, time_ms: f64) -> Option<usize> {
        frame_index_for_ms(time_ms, self.sample_rate, self.hop_length, self.frames.len())
    }

    pub fn frame_at_ms(&self, time_ms: f64) -> Option<&AudioDescriptorFrame> {
        self.frame_index_for_ms(time_ms).map(|idx| &self.frames[idx])
    }
}

/// Map a timestamp to a descriptor frame; times past the end reuse the last frame
pub fn frame_index_for_ms(
    time_ms: f64,
    sample_rate: u32,
    hop_length: usize,
    num_frames: usize,
) -> Option<usize> {
    if num_frames == 0 {
        return None;
    }
    let raw = ((time_ms / 1000.0) * sample_rate as f64 / hop_length as f64).floor();
    let idx = if raw.is_nan() || raw < 0.0 {
        0
    } else {
        raw as usize
    };
    Some(idx.min(num_frames - 1))
}

/// Compute cepstral coefficients, onset strength and RMS energy per hop
pub fn extract_descriptors(
    samples: &[f32],
    sample_rate: u32,
    config: &AudioConfig,
) -> Result<DescriptorTrack> {
    validate_samples(samples, sample_rate)?;

    let padded = spectral::pad_center(samples, config.n_fft);
    let stft_data = spectral::stft(&padded, config.n_fft, config.hop_length, "hann", sample_rate);
    let power = spectral::power_spectrogram(&stft_data);

    let bank = MelFilterBank::new(
        sample_rate,
        config.n_fft,
        config.n_mels,
        0.0,
        sample_rate as f32 / 2.0,
    );
    let mel_db = spectral::power_to_db(&bank.apply(&power), config.top_db);

    let cepstral = spectral::dct_ortho(&mel_db, config.n_mfcc);
    let onset: Vec<f32> = spectral::spectral_flux(&mel_db)
        .into_iter()
        .map(|flux| flux / bank.n_mels() as f32)
        .collect();
    let energy = spectral::frame_rms(&padded, config.n_fft, config.hop_length);

    // Common frame axis across the three computations
    let num_frames = cepstral.shape()[1].min(onset.len()).min(energy.len());
    log::debug!(
        "Extracted {} descriptor frames ({} samples @ {} Hz, hop {})",
        num_frames,
        samples.len(),
        sample_rate,
        config.hop_length
    );

    let frames = (0..num_frames)
        .map(|t| AudioDescriptorFrame {
            frame_index: t,
            cepstral: cepstral.column(t).to_vec(),
            onset_strength: onset[t],
            energy: energy[t],
        })
        .collect();

    Ok(DescriptorTrack {
        frames,
        sample_rate,
        hop_length: config.hop_length,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_index_clamps() {
        // 44100 Hz, hop 512 => one frame every ~11.6 ms
        assert_eq!(frame_index_for_ms(0.0, 44100, 512, 10), Some(0));
        assert_eq!(frame_index_for_ms(11.0, 44100, 512, 10), Some(0));
        assert_eq!(frame_index_for_ms(12.0, 44100, 512, 10), Some(1));
        assert_eq!(frame_index_for_ms(10_000.0, 44100, 512, 10), Some(9));
        assert_eq!(frame_index_for_ms(-50.0, 44100, 512, 10), Some(0));
        assert_eq!(frame_index_for_ms(5.0, 44100, 512, 0), None);
    }

    #[test]
    fn test_rejects_empty_audio() {
        let config = AudioConfig::default();
        assert!(matches!(
            extract_descriptors(&[], 44100, &config),
            Err(ManiaError::InvalidAudioFormat(_))
        ));
    }
}

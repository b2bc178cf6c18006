//! Spectral processing utilities (STFT, mel filter bank, cepstral basis)

use ndarray::Array2;
use rustfft::{num_complex::Complex32, FftPlanner};

/// STFT data structure
#[derive(Debug, Clone)]
pub struct StftData {
    /// Complex spectrum, shape (n_fft / 2 + 1, n_frames)
    pub s: Array2<Complex32>,
    pub freqs: Vec<f32>,
    pub times: Vec<f32>,
}

impl StftData {
    pub fn n_frames(&self) -> usize {
        self.s.shape()[1]
    }
}

/// Zero-pad a signal by `n_fft / 2` on both sides so frame `t` is centered on sample `t * hop`
pub fn pad_center(y: &[f32], n_fft: usize) -> Vec<f32> {
    let pad = n_fft / 2;
    let mut padded = vec![0.0; y.len() + 2 * pad];
    padded[pad..pad + y.len()].copy_from_slice(y);
    padded
}

/// Number of full frames that fit in `len` samples
pub fn frame_count(len: usize, frame_length: usize, hop_length: usize) -> usize {
    if len < frame_length {
        0
    } else {
        (len - frame_length) / hop_length + 1
    }
}

/// Compute STFT of audio signal
pub fn stft(y: &[f32], n_fft: usize, hop_length: usize, window: &str, sample_rate: u32) -> StftData {
    let mut planner = FftPlanner::new();
    let fft = planner.plan_fft_forward(n_fft);

    let n_frames = frame_count(y.len(), n_fft, hop_length);
    let mut s = Array2::<Complex32>::zeros((n_fft / 2 + 1, n_frames));

    let window_fn = generate_window(window, n_fft);
    let mut frame = vec![Complex32::new(0.0, 0.0); n_fft];

    for frame_idx in 0..n_frames {
        let start = frame_idx * hop_length;

        for (slot, (&sample, &win)) in frame
            .iter_mut()
            .zip(y[start..start + n_fft].iter().zip(&window_fn))
        {
            *slot = Complex32::new(sample * win, 0.0);
        }

        fft.process(&mut frame);

        // Store positive frequencies
        for (i, &val) in frame[..n_fft / 2 + 1].iter().enumerate() {
            s[[i, frame_idx]] = val;
        }
    }

    let freqs: Vec<f32> = (0..n_fft / 2 + 1)
        .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
        .collect();

    let times: Vec<f32> = (0..n_frames)
        .map(|i| i as f32 * hop_length as f32 / sample_rate as f32)
        .collect();

    StftData { s, freqs, times }
}

/// Generate window function
fn generate_window(window_type: &str, size: usize) -> Vec<f32> {
    match window_type {
        // Periodic Hann, the usual choice for spectral analysis
        "hann" => (0..size)
            .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
            .collect(),
        _ => vec![1.0; size], // Rectangular window as fallback
    }
}

/// Compute power spectrogram |S|^2
pub fn power_spectrogram(stft_data: &StftData) -> Array2<f32> {
    stft_data.s.map(|c| c.norm_sqr())
}

fn hz_to_mel(hz: f32) -> f32 {
    2595.0 * (1.0 + hz / 700.0).log10()
}

fn mel_to_hz(mel: f32) -> f32 {
    700.0 * (10.0f32.powf(mel / 2595.0) - 1.0)
}

/// Triangular mel filter bank with area normalization
#[derive(Debug, Clone)]
pub struct MelFilterBank {
    /// Shape (n_mels, n_fft / 2 + 1)
    pub weights: Array2<f32>,
}

impl MelFilterBank {
    pub fn new(sample_rate: u32, n_fft: usize, n_mels: usize, fmin: f32, fmax: f32) -> Self {
        let n_bins = n_fft / 2 + 1;
        let mel_min = hz_to_mel(fmin);
        let mel_max = hz_to_mel(fmax);

        let edges: Vec<f32> = (0..n_mels + 2)
            .map(|i| mel_to_hz(mel_min + (mel_max - mel_min) * i as f32 / (n_mels + 1) as f32))
            .collect();
        let bin_freqs: Vec<f32> = (0..n_bins)
            .map(|i| i as f32 * sample_rate as f32 / n_fft as f32)
            .collect();

        let mut weights = Array2::<f32>::zeros((n_mels, n_bins));
        for m in 0..n_mels {
            let (lo, center, hi) = (edges[m], edges[m + 1], edges[m + 2]);
            let norm = 2.0 / (hi - lo).max(f32::EPSILON);
            for (k, &f) in bin_freqs.iter().enumerate() {
                let rising = (f - lo) / (center - lo).max(f32::EPSILON);
                let falling = (hi - f) / (hi - center).max(f32::EPSILON);
                let w = rising.min(falling).max(0.0);
                weights[[m, k]] = w * norm;
            }
        }

        Self { weights }
    }

    pub fn n_mels(&self) -> usize {
        self.weights.shape()[0]
    }

    /// Project a power spectrogram (bins x frames) onto the mel bands
    pub fn apply(&self, power: &Array2<f32>) -> Array2<f32> {
        self.weights.dot(power)
    }
}

/// Convert power to decibels, keeping `top_db` of dynamic range below the peak
pub fn power_to_db(power: &Array2<f32>, top_db: f32) -> Array2<f32> {
    let mut db = power.map(|&p| 10.0 * p.max(1e-10).log10());
    let peak = db.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if peak.is_finite() {
        let floor = peak - top_db;
        db.mapv_inplace(|v| v.max(floor));
    }
    db
}

/// Orthonormal DCT-II along the band axis, keeping the first `n_coeffs` coefficients
pub fn dct_ortho(bands: &Array2<f32>, n_coeffs: usize) -> Array2<f32> {
    let n_bands = bands.shape()[0];
    let n_frames = bands.shape()[1];
    let n_coeffs = n_coeffs.min(n_bands);

    let mut basis = Array2::<f32>::zeros((n_coeffs, n_bands));
    for k in 0..n_coeffs {
        let scale = if k == 0 {
            (1.0 / n_bands as f32).sqrt()
        } else {
            (2.0 / n_bands as f32).sqrt()
        };
        for m in 0..n_bands {
            let angle =
                std::f32::consts::PI * k as f32 * (2 * m + 1) as f32 / (2 * n_bands) as f32;
            basis[[k, m]] = scale * angle.cos();
        }
    }

    if n_frames == 0 {
        return Array2::zeros((n_coeffs, 0));
    }
    basis.dot(bands)
}

/// Compute spectral flux (positive differences only), first frame is zero
pub fn spectral_flux(mag_spec: &Array2<f32>) -> Vec<f32> {
    let mut flux = vec![0.0; mag_spec.shape()[1]];

    for t in 1..mag_spec.shape()[1] {
        let mut frame_flux = 0.0;
        for f in 0..mag_spec.shape()[0] {
            let diff = mag_spec[[f, t]] - mag_spec[[f, t - 1]];
            if diff > 0.0 {
                frame_flux += diff;
            }
        }
        flux[t] = frame_flux;
    }

    flux
}

/// Root-mean-square energy per frame
pub fn frame_rms(y: &[f32], frame_length: usize, hop_length: usize) -> Vec<f32> {
    (0..frame_count(y.len(), frame_length, hop_length))
        .map(|frame_idx| {
            let start = frame_idx * hop_length;
            let frame = &y[start..start + frame_length];
            (frame.iter().map(|&x| x * x).sum::<f32>() / frame_length as f32).sqrt()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(10, 4, 2), 4);
        assert_eq!(frame_count(3, 4, 2), 0);
        // Centered padding yields one frame per hop plus one
        assert_eq!(frame_count(pad_center(&vec![0.0; 2048], 512).len(), 512, 256), 9);
    }

    #[test]
    fn test_dct_of_constant_is_dc_only() {
        let bands = Array2::from_elem((8, 3), 2.0f32);
        let c = dct_ortho(&bands, 4);
        assert_eq!(c.shape(), &[4, 3]);
        assert!((c[[0, 0]] - 2.0 * 8.0f32.sqrt()).abs() < 1e-4);
        for k in 1..4 {
            assert!(c[[k, 1]].abs() < 1e-4);
        }
    }

    #[test]
    fn test_mel_bank_rows_are_nonnegative() {
        let bank = MelFilterBank::new(22050, 1024, 40, 0.0, 11025.0);
        assert_eq!(bank.weights.shape(), &[40, 513]);
        assert!(bank.weights.iter().all(|&w| w >= 0.0));
        for m in 0..40 {
            assert!(bank.weights.row(m).sum() > 0.0, "band {} is empty", m);
        }
    }

    #[test]
    fn test_rms_of_constant_signal() {
        let rms = frame_rms(&[0.5; 100], 10, 10);
        assert_eq!(rms.len(), 10);
        assert!(rms.iter().all(|&r| (r - 0.5).abs() < 1e-6));
    }
}

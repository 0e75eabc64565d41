//! Frame → feature vector.
//!
//! ## Features
//!
//! | idx | name | range |
//! |-----|------|-------|
//! | 0 | RMS amplitude | 0..=1 |
//! | 1 | log energy (dBFS, floored) | -100..=0 |
//! | 2 | zero-crossing rate | 0..=1 |
//! | 3 | spectral centroid / Nyquist | 0..=1 |
//! | 4 | spectral flatness | 0..=1 |
//! | 5 | speech-band (300–3400 Hz) energy ratio | 0..=1 |
//!
//! Extraction is a pure function of the frame's samples and sample rate: the
//! FFT plan, Hann window and bin bounds are computed once in `new` and never
//! mutated, so identical frames always yield identical vectors.

use std::sync::Arc;

use rustfft::{num_complex::Complex, Fft, FftPlanner};

use crate::buffering::frame::AudioFrame;
use crate::error::{Result, VadError};

/// Number of values in every [`FeatureVector`].
pub const FEATURE_LEN: usize = 6;

pub const RMS: usize = 0;
pub const LOG_ENERGY_DB: usize = 1;
pub const ZERO_CROSSING_RATE: usize = 2;
pub const SPECTRAL_CENTROID: usize = 3;
pub const SPECTRAL_FLATNESS: usize = 4;
pub const SPEECH_BAND_RATIO: usize = 5;

/// Lowest reported log energy; digital silence maps here.
pub const ENERGY_FLOOR_DB: f32 = -100.0;

const SPEECH_BAND_LOW_HZ: f32 = 300.0;
const SPEECH_BAND_HIGH_HZ: f32 = 3_400.0;
/// Keeps log/ratio maths finite on all-zero spectra.
const POWER_EPSILON: f32 = 1e-12;

/// Fixed-size features derived from exactly one [`AudioFrame`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureVector {
    values: [f32; FEATURE_LEN],
    frame_index: u64,
}

impl FeatureVector {
    pub fn new(values: [f32; FEATURE_LEN], frame_index: u64) -> Self {
        Self {
            values,
            frame_index,
        }
    }

    pub fn values(&self) -> &[f32; FEATURE_LEN] {
        &self.values
    }

    pub fn get(&self, idx: usize) -> f32 {
        self.values[idx]
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }
}

/// Deterministic feature extractor for one frame size / sample rate.
pub struct FeatureExtractor {
    frame_size: usize,
    sample_rate: u32,
    fft: Arc<dyn Fft<f32>>,
    hann_window: Vec<f32>,
    /// Inclusive-exclusive bin range covering the speech band.
    speech_bins: (usize, usize),
}

impl FeatureExtractor {
    /// # Errors
    /// `VadError::Configuration` if `frame_size` or `sample_rate` is zero.
    pub fn new(frame_size: usize, sample_rate: u32) -> Result<Self> {
        if frame_size == 0 {
            return Err(VadError::config("frame_size", "must be greater than zero"));
        }
        if sample_rate == 0 {
            return Err(VadError::config("sample_rate", "must be greater than zero"));
        }

        let fft = FftPlanner::<f32>::new().plan_fft_forward(frame_size);
        let hann_window = build_hann_window(frame_size);

        let bin_hz = sample_rate as f32 / frame_size as f32;
        let n_bins = frame_size / 2 + 1;
        let low = ((SPEECH_BAND_LOW_HZ / bin_hz).ceil() as usize).min(n_bins);
        let high = ((SPEECH_BAND_HIGH_HZ / bin_hz).floor() as usize + 1).min(n_bins);

        Ok(Self {
            frame_size,
            sample_rate,
            fft,
            hann_window,
            speech_bins: (low, high.max(low)),
        })
    }

    pub fn frame_size(&self) -> usize {
        self.frame_size
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Compute the feature vector for `frame`.
    ///
    /// # Errors
    /// `VadError::InvalidFrame` if the frame's length or sample rate does not
    /// match this extractor.
    pub fn extract(&self, frame: &AudioFrame) -> Result<FeatureVector> {
        if frame.len() != self.frame_size {
            return Err(VadError::InvalidFrame(format!(
                "frame {} has {} samples, expected {}",
                frame.index(),
                frame.len(),
                self.frame_size
            )));
        }
        if frame.sample_rate() != self.sample_rate {
            return Err(VadError::InvalidFrame(format!(
                "frame {} is at {} Hz, expected {} Hz",
                frame.index(),
                frame.sample_rate(),
                self.sample_rate
            )));
        }

        let samples = frame.samples();
        let rms = compute_rms(samples);
        let log_energy = rms_to_dbfs(rms);
        let zcr = zero_crossing_rate(samples);

        let power = self.power_spectrum(samples);
        let centroid = spectral_centroid(&power);
        let flatness = spectral_flatness(&power);
        let band_ratio = self.speech_band_ratio(&power);

        let mut values = [0.0f32; FEATURE_LEN];
        values[RMS] = rms.min(1.0);
        values[LOG_ENERGY_DB] = log_energy;
        values[ZERO_CROSSING_RATE] = zcr;
        values[SPECTRAL_CENTROID] = centroid;
        values[SPECTRAL_FLATNESS] = flatness;
        values[SPEECH_BAND_RATIO] = band_ratio;

        Ok(FeatureVector::new(values, frame.index()))
    }

    /// One-sided power spectrum of the Hann-windowed frame.
    fn power_spectrum(&self, samples: &[f32]) -> Vec<f32> {
        let mut buf: Vec<Complex<f32>> = samples
            .iter()
            .zip(&self.hann_window)
            .map(|(s, w)| Complex::new(s * w, 0.0))
            .collect();
        self.fft.process(&mut buf);

        let n_bins = self.frame_size / 2 + 1;
        buf.iter().take(n_bins).map(|c| c.norm_sqr()).collect()
    }

    fn speech_band_ratio(&self, power: &[f32]) -> f32 {
        let total: f32 = power.iter().skip(1).sum();
        if total <= POWER_EPSILON {
            return 0.0;
        }
        let (low, high) = self.speech_bins;
        let band: f32 = power[low..high].iter().sum();
        (band / total).clamp(0.0, 1.0)
    }
}

impl std::fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureExtractor")
            .field("frame_size", &self.frame_size)
            .field("sample_rate", &self.sample_rate)
            .field("speech_bins", &self.speech_bins)
            .finish_non_exhaustive()
    }
}

pub(crate) fn compute_rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq = samples.iter().map(|s| s * s).sum::<f32>();
    (sum_sq / samples.len() as f32).sqrt()
}

fn rms_to_dbfs(rms: f32) -> f32 {
    if rms <= 0.0 {
        return ENERGY_FLOOR_DB;
    }
    (20.0 * rms.log10()).clamp(ENERGY_FLOOR_DB, 0.0)
}

fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

/// Power-weighted mean bin, normalised so the Nyquist bin is 1.0.
/// The DC bin is ignored.
fn spectral_centroid(power: &[f32]) -> f32 {
    if power.len() < 2 {
        return 0.0;
    }
    let mut weighted = 0.0f32;
    let mut total = 0.0f32;
    for (k, p) in power.iter().enumerate().skip(1) {
        weighted += k as f32 * p;
        total += p;
    }
    if total <= POWER_EPSILON {
        return 0.0;
    }
    let nyquist_bin = (power.len() - 1) as f32;
    (weighted / total / nyquist_bin).clamp(0.0, 1.0)
}

/// Wiener entropy: geometric mean over arithmetic mean of the power bins.
/// Noise-like frames approach 1, tonal/voiced frames approach 0.
fn spectral_flatness(power: &[f32]) -> f32 {
    let bins = &power[1.min(power.len())..];
    if bins.is_empty() {
        return 0.0;
    }
    let arith = bins.iter().sum::<f32>() / bins.len() as f32;
    if arith <= POWER_EPSILON {
        return 0.0;
    }
    let log_mean = bins
        .iter()
        .map(|p| (p + POWER_EPSILON).ln())
        .sum::<f32>()
        / bins.len() as f32;
    (log_mean.exp() / arith).clamp(0.0, 1.0)
}

fn build_hann_window(n: usize) -> Vec<f32> {
    use std::f32::consts::PI;
    (0..n)
        .map(|i| 0.5 * (1.0 - (2.0 * PI * i as f32 / n as f32).cos()))
        .collect()
}

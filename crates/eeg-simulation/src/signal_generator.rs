//! Synthetic EEG signal generator
//!
//! The default model shapes a random-phase spectrum with a Gaussian envelope
//! around a peak frequency and takes the inverse FFT, giving band-limited
//! noise that resembles an oscillatory EEG rhythm.

use eeg_core::{LabError, LabResult, SampleChunk, StreamInfo};
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rustfft::{num_complex::Complex, FftPlanner};
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// How samples are synthesized
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SignalModel {
    /// Gaussian-weighted random spectrum centred on `peak_freq` (Hz)
    Spectral { peak_freq: f32, fwhm: f32 },
    /// Independent uniform [0, 1) value per sample
    UniformNoise,
    /// White Gaussian noise
    Gaussian { std_dev: f32 },
}

impl Default for SignalModel {
    fn default() -> Self {
        SignalModel::Spectral {
            peak_freq: 14.0,
            fwhm: 15.0,
        }
    }
}

impl SignalModel {
    /// Check model parameters
    pub fn validate(&self) -> LabResult<()> {
        match *self {
            SignalModel::Spectral { peak_freq, fwhm } => {
                if !peak_freq.is_finite() {
                    return Err(LabError::config(format!("Peak frequency must be finite, got {}", peak_freq)));
                }
                if !fwhm.is_finite() || fwhm <= 0.0 {
                    return Err(LabError::config(format!("FWHM must be positive, got {}", fwhm)));
                }
            }
            SignalModel::UniformNoise => {}
            SignalModel::Gaussian { std_dev } => {
                if !std_dev.is_finite() || std_dev <= 0.0 {
                    return Err(LabError::config(format!(
                        "Gaussian standard deviation must be positive, got {}",
                        std_dev
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn description(&self) -> &'static str {
        match self {
            SignalModel::Spectral { .. } => "Gaussian-shaped random spectrum",
            SignalModel::UniformNoise => "Uniform noise",
            SignalModel::Gaussian { .. } => "Gaussian white noise",
        }
    }
}

/// Frequency assigned to each spectral coefficient
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyAxis {
    /// `n` points evenly spaced from 0 to the sample rate, both ends included
    #[default]
    Legacy,
    /// True FFT bin frequencies, `k * srate / n`
    FftBins,
}

/// Frequencies of `n` spectral coefficients at `sample_rate`
pub fn frequency_axis(n: usize, sample_rate: f32, axis: FrequencyAxis) -> Vec<f32> {
    match axis {
        FrequencyAxis::Legacy if n > 1 => {
            let step = sample_rate / (n - 1) as f32;
            (0..n).map(|k| k as f32 * step).collect()
        }
        FrequencyAxis::Legacy => vec![0.0; n],
        FrequencyAxis::FftBins => {
            let step = sample_rate / n as f32;
            (0..n).map(|k| k as f32 * step).collect()
        }
    }
}

/// Gaussian magnitude envelope over `hz`, centred on `peak_freq`
pub fn spectral_envelope(hz: &[f32], peak_freq: f32, fwhm: f32) -> Vec<f32> {
    // Normalized width
    let s = fwhm * (2.0 * PI - 1.0) / (4.0 * PI);
    hz.iter()
        .map(|f| {
            let x = (f - peak_freq) / s;
            (-0.5 * x * x).exp()
        })
        .collect()
}

/// Shared, lock-free scale factor
///
/// Changing the scale while a stream runs affects the next generated chunk.
#[derive(Debug, Clone)]
pub struct ScaleHandle(Arc<AtomicU32>);

impl ScaleHandle {
    fn new(scale: f32) -> Self {
        Self(Arc::new(AtomicU32::new(scale.to_bits())))
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn set(&self, scale: f32) {
        self.0.store(scale.to_bits(), Ordering::Relaxed);
    }
}

fn default_scale() -> f32 {
    1.0
}

/// Configuration for signal simulation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalConfig {
    /// Stream descriptor; provides channel count and sample rate
    pub stream: StreamInfo,
    /// Multiplier applied to every generated sample
    #[serde(default = "default_scale")]
    pub scale: f32,
    /// Random seed for reproducibility
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub model: SignalModel,
    #[serde(default)]
    pub frequency_axis: FrequencyAxis,
}

impl SignalConfig {
    /// Configuration around an existing descriptor with default synthesis settings
    pub fn new(stream: StreamInfo) -> Self {
        Self {
            stream,
            scale: default_scale(),
            seed: None,
            model: SignalModel::default(),
            frequency_axis: FrequencyAxis::default(),
        }
    }

    /// Eight-channel dummy amplifier at 512 Hz
    pub fn dummy_hiamp() -> Self {
        let channels: Vec<String> = ["Fz", "C3", "Cz", "C4", "Pz", "O1", "Oz", "O2"]
            .iter()
            .map(|c| c.to_string())
            .collect();
        Self::new(StreamInfo::eeg("DummyHIAMP", 512.0, &channels, "DummyHiamp2025"))
    }

    /// Validate configuration
    pub fn validate(&self) -> LabResult<()> {
        self.stream.validate_signal()?;
        if !self.scale.is_finite() {
            return Err(LabError::config(format!("Scale must be finite, got {}", self.scale)));
        }
        self.model.validate()
    }

    /// Export configuration to JSON
    pub fn to_json(&self) -> LabResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Import configuration from JSON
    pub fn from_json(json: &str) -> LabResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: impl AsRef<Path>) -> LabResult<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

impl Default for SignalConfig {
    fn default() -> Self {
        Self::dummy_hiamp()
    }
}

/// Multichannel synthetic signal generator
pub struct SignalGenerator {
    info: StreamInfo,
    model: SignalModel,
    frequency_axis: FrequencyAxis,
    scale: ScaleHandle,
    rng: rand::rngs::StdRng,
    // Caches plans per chunk length
    fft_planner: FftPlanner<f32>,
}

impl SignalGenerator {
    /// Create new generator with configuration
    pub fn new(config: SignalConfig) -> LabResult<Self> {
        config.validate()?;

        let rng = match config.seed {
            Some(seed) => rand::rngs::StdRng::seed_from_u64(seed),
            None => rand::rngs::StdRng::from_entropy(),
        };

        Ok(SignalGenerator {
            info: config.stream,
            model: config.model,
            frequency_axis: config.frequency_axis,
            scale: ScaleHandle::new(config.scale),
            rng,
            fft_planner: FftPlanner::new(),
        })
    }

    pub fn channel_count(&self) -> usize {
        self.info.channel_count
    }

    pub fn sample_rate(&self) -> f64 {
        self.info.nominal_srate
    }

    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    pub fn model(&self) -> &SignalModel {
        &self.model
    }

    /// Replace the synthesis model used by `next_chunk`
    pub fn set_model(&mut self, model: SignalModel) -> LabResult<()> {
        model.validate()?;
        self.model = model;
        Ok(())
    }

    pub fn scale(&self) -> f32 {
        self.scale.get()
    }

    pub fn set_scale(&self, scale: f32) {
        self.scale.set(scale);
    }

    /// Handle for changing the scale from another thread
    pub fn scale_handle(&self) -> ScaleHandle {
        self.scale.clone()
    }

    /// Generate `n_samples` time steps with the configured model
    pub fn next_chunk(&mut self, n_samples: usize) -> LabResult<SampleChunk> {
        let model = self.model;
        self.generate_model(n_samples, &model)
    }

    /// Generate `n_samples` time steps of spectrally shaped noise
    pub fn generate(&mut self, n_samples: usize, peak_freq: f32, fwhm: f32) -> LabResult<SampleChunk> {
        self.generate_model(n_samples, &SignalModel::Spectral { peak_freq, fwhm })
    }

    /// Generate `n_samples` time steps with an explicit model
    ///
    /// The chunk is timestamped 0.0; streamers stamp it on delivery.
    pub fn generate_model(&mut self, n_samples: usize, model: &SignalModel) -> LabResult<SampleChunk> {
        model.validate()?;
        let channel_count = self.info.channel_count;
        let mut data = vec![0.0f32; n_samples * channel_count];

        if n_samples > 0 {
            match *model {
                SignalModel::Spectral { peak_freq, fwhm } => {
                    self.fill_spectral(&mut data, n_samples, peak_freq, fwhm)?
                }
                SignalModel::UniformNoise => {
                    for value in data.iter_mut() {
                        *value = self.rng.gen::<f32>();
                    }
                }
                SignalModel::Gaussian { std_dev } => {
                    let normal = Normal::new(0.0, std_dev).map_err(|e| LabError::Synthesis {
                        reason: format!("Failed to create normal distribution: {}", e),
                    })?;
                    for value in data.iter_mut() {
                        *value = normal.sample(&mut self.rng);
                    }
                }
            }
        }

        // Read once so a concurrent change never splits a chunk
        let scale = self.scale.get();
        for value in data.iter_mut() {
            *value *= scale;
        }

        SampleChunk::new(data, channel_count, 0.0)
    }

    fn fill_spectral(&mut self, data: &mut [f32], n_samples: usize, peak_freq: f32, fwhm: f32) -> LabResult<()> {
        let channel_count = self.info.channel_count;
        let hz = frequency_axis(n_samples, self.info.nominal_srate as f32, self.frequency_axis);
        let envelope = spectral_envelope(&hz, peak_freq, fwhm);
        let ifft = self.fft_planner.plan_fft_inverse(n_samples);
        let norm = 1.0 / n_samples as f32;

        let mut buffer: Vec<Complex<f32>> = Vec::with_capacity(n_samples);
        for channel_idx in 0..channel_count {
            // Fourier coefficients of a random spectrum
            buffer.clear();
            for &gain in &envelope {
                let magnitude = self.rng.gen::<f32>();
                let phase = self.rng.gen_range(0.0..2.0 * PI);
                buffer.push(Complex::from_polar(magnitude, phase) * gain);
            }

            ifft.process(&mut buffer);

            for (sample_idx, coefficient) in buffer.iter().enumerate() {
                let value = coefficient.re * norm;
                if !value.is_finite() {
                    return Err(LabError::Synthesis {
                        reason: format!("Non-finite sample on channel {}", channel_idx),
                    });
                }
                data[sample_idx * channel_count + channel_idx] = value;
            }
        }

        Ok(())
    }
}

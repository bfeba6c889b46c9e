use crate::error::SyncError;

/// Decoded mono audio. Immutable once loaded.
#[derive(Clone, Debug)]
pub struct Waveform {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self, SyncError> {
        if sample_rate == 0 {
            return Err(SyncError::InvalidInput("sample rate must be positive".into()));
        }
        if samples.is_empty() {
            return Err(SyncError::InvalidInput("waveform has no samples".into()));
        }
        Ok(Self { samples, sample_rate })
    }

    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// How per-band spectral flux is collapsed into one value per frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Aggregate {
    /// Robust to a single band spiking; used for onset picking.
    Median,
    /// Used by the beat tracker's envelope.
    Mean,
}

/// Onset strength per analysis frame (non-negative).
#[derive(Clone, Debug, Default)]
pub struct OnsetEnvelope {
    pub values: Vec<f32>,
}

impl OnsetEnvelope {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// True when every frame is zero (silent or featureless input).
    pub fn is_flat_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }
}

/// Extractor output: two sorted frame-index sets on the same frame clock.
#[derive(Clone, Debug, Default)]
pub struct Detections {
    pub onset_frames: Vec<usize>,
    pub beat_frames: Vec<usize>,
    /// Global tempo estimate in BPM, 0.0 when no beats were tracked.
    pub tempo_bpm: f64,
    /// Length of the frame axis both index sets refer to.
    pub envelope_len: usize,
}

/// Fixed analysis configuration shared by the extractor and the fuser.
#[derive(Clone, Debug)]
pub struct AnalysisParams {
    pub n_fft: usize,
    pub hop_length: usize,
    pub n_mels: usize,
    /// dB range kept below the loudest mel bin.
    pub top_db: f32,

    // Peak picking windows, in seconds.
    pub pre_max: f32,
    pub post_max: f32,
    pub pre_avg: f32,
    pub post_avg: f32,
    pub wait: f32,
    pub delta: f32,

    // Beat tracking
    pub start_bpm: f64,
    pub std_bpm: f64,
    pub max_tempo: f64,
    pub tightness: f64,
    /// Autocorrelation window for tempo estimation, in seconds.
    pub ac_size: f64,
}

impl Default for AnalysisParams {
    fn default() -> Self {
        Self {
            n_fft: 2048,
            hop_length: 512,
            n_mels: 128,
            top_db: 80.0,
            pre_max: 0.03,
            post_max: 0.0,
            pre_avg: 0.10,
            post_avg: 0.10,
            wait: 0.03,
            delta: 0.07,
            start_bpm: 120.0,
            std_bpm: 1.0,
            max_tempo: 320.0,
            tightness: 100.0,
            ac_size: 8.0,
        }
    }
}

impl AnalysisParams {
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.hop_length == 0 {
            return Err(SyncError::InvalidInput("hop length must be positive".into()));
        }
        if self.n_fft < self.hop_length {
            return Err(SyncError::InvalidInput(format!(
                "FFT size {} is smaller than hop length {}",
                self.n_fft, self.hop_length
            )));
        }
        if self.n_mels == 0 {
            return Err(SyncError::InvalidInput("at least one mel band is required".into()));
        }
        Ok(())
    }

    /// Convert a duration in seconds to whole frames (floored).
    pub fn seconds_to_frames(&self, seconds: f64, sample_rate: u32) -> usize {
        (seconds * sample_rate as f64 / self.hop_length as f64).floor() as usize
    }

    pub fn frame_rate(&self, sample_rate: u32) -> f64 {
        sample_rate as f64 / self.hop_length as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_zero_rate() {
        assert!(Waveform::new(vec![], 44100).is_err());
        assert!(Waveform::new(vec![0.0], 0).is_err());
        let w = Waveform::new(vec![0.0; 22050], 22050).unwrap();
        assert!((w.duration() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn default_params_match_peak_windows() {
        let p = AnalysisParams::default();
        p.validate().unwrap();
        // 0.03s at 22050Hz with hop 512 is one frame, 0.10s is four
        assert_eq!(p.seconds_to_frames(p.pre_max as f64, 22050), 1);
        assert_eq!(p.seconds_to_frames(p.pre_avg as f64, 22050), 4);
    }

    #[test]
    fn hop_larger_than_fft_is_invalid() {
        let p = AnalysisParams {
            n_fft: 256,
            hop_length: 512,
            ..Default::default()
        };
        assert!(p.validate().is_err());
    }
}

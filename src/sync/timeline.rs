use serde::Serialize;

/// Strictly increasing transition timestamps, in seconds.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Timeline(Vec<f64>);

impl Timeline {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Seconds between the first and last timestamp.
    pub fn span(&self) -> f64 {
        match (self.0.first(), self.0.last()) {
            (Some(first), Some(last)) => last - first,
            _ => 0.0,
        }
    }
}

/// Frame index to seconds on the analysis clock.
pub fn frame_to_time(frame: usize, sample_rate: u32, hop_length: usize) -> f64 {
    frame as f64 * hop_length as f64 / sample_rate as f64
}

pub fn frames_to_time(frames: &[usize], sample_rate: u32, hop_length: usize) -> Vec<f64> {
    frames
        .iter()
        .map(|&f| frame_to_time(f, sample_rate, hop_length))
        .collect()
}

/// Union onset and beat times into one ascending timeline.
///
/// With `epsilon == 0.0` only bit-identical times collapse. A positive
/// `epsilon` also merges a time into its predecessor when they are at most
/// `epsilon` apart; the earlier time is kept.
pub fn fuse(onset_times: &[f64], beat_times: &[f64], epsilon: f64) -> Timeline {
    let mut all: Vec<f64> = onset_times
        .iter()
        .chain(beat_times.iter())
        .copied()
        .filter(|t| t.is_finite())
        .collect();
    all.sort_unstable_by(|a, b| a.total_cmp(b));

    let mut fused: Vec<f64> = Vec::with_capacity(all.len());
    for t in all {
        match fused.last() {
            Some(&prev) if t - prev <= epsilon => {}
            _ => fused.push(t),
        }
    }

    log::debug!(
        "Fused {} onsets and {} beats into {} events",
        onset_times.len(),
        beat_times.len(),
        fused.len()
    );
    Timeline(fused)
}

/// Convert both frame sets on the shared clock and fuse them.
pub fn fuse_frames(
    onset_frames: &[usize],
    beat_frames: &[usize],
    sample_rate: u32,
    hop_length: usize,
    epsilon: f64,
) -> Timeline {
    let onsets = frames_to_time(onset_frames, sample_rate, hop_length);
    let beats = frames_to_time(beat_frames, sample_rate, hop_length);
    fuse(&onsets, &beats, epsilon)
}

impl From<Vec<f64>> for Timeline {
    /// Builds a timeline from arbitrary times, sorting and dropping exact
    /// duplicates.
    fn from(times: Vec<f64>) -> Self {
        fuse(&times, &[], 0.0)
    }
}

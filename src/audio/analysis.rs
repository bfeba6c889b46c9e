use rustfft::{num_complex::Complex, FftPlanner};

use super::beat;
use super::features::{Aggregate, AnalysisParams, Detections, OnsetEnvelope, Waveform};
use crate::error::SyncError;

const AMIN: f32 = 1e-10;

/// Run the full extractor: onsets from the median envelope, beats from the
/// mean envelope. Both index sets live on the same `hop_length` frame clock.
pub fn extract(waveform: &Waveform, params: &AnalysisParams) -> Result<Detections, SyncError> {
    params.validate()?;
    let sr = waveform.sample_rate;

    let mel_db = mel_spectrogram_db(&waveform.samples, sr, params);
    let onset_env = onset_strength(&mel_db, params, Aggregate::Median);
    let beat_env = onset_strength(&mel_db, params, Aggregate::Mean);

    let onset_frames = onset_detect(&onset_env, sr, params);
    let (tempo_bpm, beat_frames) = beat::beat_track(&beat_env, sr, params);

    log::info!(
        "Extracted {} onsets, {} beats (tempo {:.1} BPM) over {} frames",
        onset_frames.len(),
        beat_frames.len(),
        tempo_bpm,
        onset_env.len()
    );

    Ok(Detections {
        onset_frames,
        beat_frames,
        tempo_bpm,
        envelope_len: onset_env.len(),
    })
}

/// Log-power mel spectrogram, frame-major (`[frame][band]`), in dB relative to
/// the loudest bin and floored at `top_db` below it.
pub fn mel_spectrogram_db(samples: &[f32], sample_rate: u32, params: &AnalysisParams) -> Vec<Vec<f32>> {
    let n_fft = params.n_fft;
    let hop = params.hop_length;
    let pad = n_fft / 2;
    let n_frames = 1 + samples.len() / hop;

    let mut planner = FftPlanner::<f32>::new();
    let fft = planner.plan_fft_forward(n_fft);
    let hann = hann_window(n_fft);
    let filters = mel_filterbank(sample_rate, n_fft, params.n_mels);
    // Each triangle only touches a narrow run of bins.
    let spans: Vec<(usize, usize)> = filters
        .iter()
        .map(|w| {
            let lo = w.iter().position(|&v| v > 0.0).unwrap_or(0);
            let hi = w.iter().rposition(|&v| v > 0.0).map_or(lo, |i| i + 1);
            (lo, hi)
        })
        .collect();

    let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];
    let mut power = vec![0.0f32; n_fft / 2 + 1];
    let mut mel: Vec<Vec<f32>> = Vec::with_capacity(n_frames);

    for frame in 0..n_frames {
        // Frame is centred on frame * hop; samples outside the signal are zero.
        let origin = (frame * hop) as isize - pad as isize;
        for (i, slot) in buffer.iter_mut().enumerate() {
            let idx = origin + i as isize;
            let s = if idx >= 0 && (idx as usize) < samples.len() {
                samples[idx as usize]
            } else {
                0.0
            };
            *slot = Complex::new(s * hann[i], 0.0);
        }
        fft.process(&mut buffer);

        for (p, c) in power.iter_mut().zip(buffer.iter()) {
            *p = c.norm_sqr();
        }

        let bands: Vec<f32> = filters
            .iter()
            .zip(spans.iter())
            .map(|(w, &(lo, hi))| w[lo..hi].iter().zip(&power[lo..hi]).map(|(a, b)| a * b).sum::<f32>())
            .collect();
        mel.push(bands);
    }

    power_to_db(&mut mel, params.top_db);
    mel
}

fn power_to_db(spec: &mut [Vec<f32>], top_db: f32) {
    let reference = spec
        .iter()
        .flat_map(|row| row.iter().copied())
        .fold(0.0f32, f32::max);
    let ref_db = 10.0 * reference.max(AMIN).log10();

    let mut max_db = f32::NEG_INFINITY;
    for row in spec.iter_mut() {
        for v in row.iter_mut() {
            *v = 10.0 * v.max(AMIN).log10() - ref_db;
            max_db = max_db.max(*v);
        }
    }

    let floor = max_db - top_db;
    for row in spec.iter_mut() {
        for v in row.iter_mut() {
            *v = v.max(floor);
        }
    }
}

/// Positive spectral flux between consecutive frames, aggregated across
/// bands. Output has one value per spectrogram frame; the leading frames are
/// zero so that indices line up with centred frame times.
pub fn onset_strength(mel_db: &[Vec<f32>], params: &AnalysisParams, aggregate: Aggregate) -> OnsetEnvelope {
    let n = mel_db.len();
    let lag = 1;
    let offset = lag + params.n_fft / (2 * params.hop_length);

    let mut values = vec![0.0f32; n];
    let mut scratch: Vec<f32> = Vec::new();

    for t in lag..n {
        let target = t - lag + offset;
        if target >= n {
            break;
        }
        scratch.clear();
        scratch.extend(
            mel_db[t]
                .iter()
                .zip(mel_db[t - lag].iter())
                .map(|(cur, prev)| (cur - prev).max(0.0)),
        );
        values[target] = match aggregate {
            Aggregate::Median => median(&mut scratch),
            Aggregate::Mean => scratch.iter().sum::<f32>() / scratch.len().max(1) as f32,
        };
    }

    OnsetEnvelope { values }
}

/// Pick onset peaks from the envelope and backtrack each one to the
/// preceding local minimum.
pub fn onset_detect(env: &OnsetEnvelope, sample_rate: u32, params: &AnalysisParams) -> Vec<usize> {
    if env.is_empty() || env.is_flat_zero() {
        return Vec::new();
    }

    let min = env.values.iter().copied().fold(f32::INFINITY, f32::min);
    let max = env.values.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let range = max - min;
    if range <= 0.0 {
        return Vec::new();
    }
    let normalized: Vec<f32> = env.values.iter().map(|v| (v - min) / range).collect();

    let frames = |secs: f32| params.seconds_to_frames(secs as f64, sample_rate);
    let peaks = peak_pick(
        &normalized,
        frames(params.pre_max),
        frames(params.post_max) + 1,
        frames(params.pre_avg),
        frames(params.post_avg) + 1,
        params.delta,
        frames(params.wait),
    );

    backtrack(&peaks, &env.values)
}

/// A sample `n` is a peak when it is the maximum of `x[n - pre_max .. n + post_max]`,
/// exceeds the mean of `x[n - pre_avg .. n + post_avg]` by `delta`, and lies more
/// than `wait` samples after the previous peak.
pub fn peak_pick(
    x: &[f32],
    pre_max: usize,
    post_max: usize,
    pre_avg: usize,
    post_avg: usize,
    delta: f32,
    wait: usize,
) -> Vec<usize> {
    let n = x.len();
    let mut peaks = Vec::new();
    let mut last: Option<usize> = None;

    for i in 0..n {
        let max_lo = i.saturating_sub(pre_max);
        let max_hi = (i + post_max).min(n).max(i + 1);
        let local_max = x[max_lo..max_hi].iter().copied().fold(f32::NEG_INFINITY, f32::max);
        if x[i] != local_max {
            continue;
        }

        let avg_lo = i.saturating_sub(pre_avg);
        let avg_hi = (i + post_avg).min(n).max(i + 1);
        let window = &x[avg_lo..avg_hi];
        let local_avg = window.iter().sum::<f32>() / window.len() as f32;
        if x[i] < local_avg + delta {
            continue;
        }

        if let Some(prev) = last {
            if i <= prev + wait {
                continue;
            }
        }
        peaks.push(i);
        last = Some(i);
    }

    peaks
}

/// Move each event back to the closest local minimum of `energy` at or before
/// it. Frame 0 always counts as a minimum. Output is sorted and deduplicated.
pub fn backtrack(events: &[usize], energy: &[f32]) -> Vec<usize> {
    let mut minima = vec![0usize];
    for i in 1..energy.len().saturating_sub(1) {
        if energy[i] <= energy[i - 1] && energy[i] < energy[i + 1] {
            minima.push(i);
        }
    }

    let mut out: Vec<usize> = events
        .iter()
        .map(|&e| {
            let idx = minima.partition_point(|&m| m <= e);
            minima[idx.saturating_sub(1)]
        })
        .collect();
    out.sort_unstable();
    out.dedup();
    out
}

/// Slaney-style mel filterbank with area normalisation, `[band][fft_bin]`.
pub fn mel_filterbank(sample_rate: u32, n_fft: usize, n_mels: usize) -> Vec<Vec<f32>> {
    let n_bins = n_fft / 2 + 1;
    let fmax = sample_rate as f64 / 2.0;
    let mel_max = hz_to_mel(fmax);

    let mel_points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(mel_max * i as f64 / (n_mels + 1) as f64))
        .collect();
    let fft_freqs: Vec<f64> = (0..n_bins)
        .map(|k| k as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    (0..n_mels)
        .map(|m| {
            let (lo, center, hi) = (mel_points[m], mel_points[m + 1], mel_points[m + 2]);
            let enorm = 2.0 / (hi - lo);
            fft_freqs
                .iter()
                .map(|&f| {
                    let lower = (f - lo) / (center - lo);
                    let upper = (hi - f) / (hi - center);
                    (lower.min(upper).max(0.0) * enorm) as f32
                })
                .collect()
        })
        .collect()
}

const MEL_F_SP: f64 = 200.0 / 3.0;
const MEL_MIN_LOG_HZ: f64 = 1000.0;

fn mel_log_step() -> f64 {
    6.4f64.ln() / 27.0
}

pub fn hz_to_mel(hz: f64) -> f64 {
    if hz < MEL_MIN_LOG_HZ {
        hz / MEL_F_SP
    } else {
        MEL_MIN_LOG_HZ / MEL_F_SP + (hz / MEL_MIN_LOG_HZ).ln() / mel_log_step()
    }
}

pub fn mel_to_hz(mel: f64) -> f64 {
    let min_log_mel = MEL_MIN_LOG_HZ / MEL_F_SP;
    if mel < min_log_mel {
        mel * MEL_F_SP
    } else {
        MEL_MIN_LOG_HZ * (mel_log_step() * (mel - min_log_mel)).exp()
    }
}

/// Median with the even-length convention of averaging the two middle values.
fn median(values: &mut [f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) * 0.5
    } else {
        values[mid]
    }
}

pub(crate) fn hann_window(size: usize) -> Vec<f32> {
    // Periodic window, as used for spectral analysis.
    (0..size)
        .map(|i| 0.5 * (1.0 - (2.0 * std::f32::consts::PI * i as f32 / size as f32).cos()))
        .collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Deterministic noise bursts at the given times, silence elsewhere.
    pub(crate) fn click_track(sample_rate: u32, seconds: f32, clicks: &[f32]) -> Waveform {
        let mut samples = vec![0.0f32; (sample_rate as f32 * seconds) as usize];
        let burst = (sample_rate as f32 * 0.02) as usize;
        let mut state: u32 = 0x1234_5678;
        for &t in clicks {
            let start = (t * sample_rate as f32) as usize;
            for i in 0..burst {
                state ^= state << 13;
                state ^= state >> 17;
                state ^= state << 5;
                let noise = (state as f32 / u32::MAX as f32) * 2.0 - 1.0;
                let decay = (-(i as f32) / (burst as f32 / 4.0)).exp();
                if let Some(s) = samples.get_mut(start + i) {
                    *s = 0.8 * noise * decay;
                }
            }
        }
        Waveform::new(samples, sample_rate).unwrap()
    }

    #[test]
    fn silence_has_no_detections() {
        let wave = Waveform::new(vec![0.0; 22050 * 5], 22050).unwrap();
        let det = extract(&wave, &AnalysisParams::default()).unwrap();
        assert!(det.onset_frames.is_empty());
        assert!(det.beat_frames.is_empty());
        assert_eq!(det.envelope_len, 1 + 22050 * 5 / 512);
    }

    #[test]
    fn onsets_land_near_clicks() {
        let clicks = [0.5f32, 1.0, 1.5, 2.0, 2.5, 3.0];
        let wave = click_track(22050, 4.0, &clicks);
        let params = AnalysisParams::default();
        let det = extract(&wave, &params).unwrap();

        let to_time = |f: usize| f as f32 * params.hop_length as f32 / 22050.0;
        let onset_times: Vec<f32> = det.onset_frames.iter().map(|&f| to_time(f)).collect();
        assert!(!onset_times.is_empty());

        for &c in &clicks {
            assert!(
                onset_times.iter().any(|&t| (t - c).abs() < 0.08),
                "no onset near click at {}s: {:?}",
                c,
                onset_times
            );
        }
        for &t in &onset_times {
            assert!(
                clicks.iter().any(|&c| (t - c).abs() < 0.08),
                "spurious onset at {}s",
                t
            );
        }
    }

    #[test]
    fn frames_sorted_and_in_bounds() {
        let wave = click_track(22050, 3.0, &[0.3, 0.9, 1.4, 2.2]);
        let det = extract(&wave, &AnalysisParams::default()).unwrap();
        for frames in [&det.onset_frames, &det.beat_frames] {
            assert!(frames.windows(2).all(|w| w[0] < w[1]));
            assert!(frames.iter().all(|&f| f < det.envelope_len));
        }
    }

    #[test]
    fn extraction_is_deterministic() {
        let wave = click_track(22050, 3.0, &[0.4, 1.1, 1.9, 2.5]);
        let params = AnalysisParams::default();
        let a = extract(&wave, &params).unwrap();
        let b = extract(&wave, &params).unwrap();
        assert_eq!(a.onset_frames, b.onset_frames);
        assert_eq!(a.beat_frames, b.beat_frames);
        assert_eq!(a.tempo_bpm.to_bits(), b.tempo_bpm.to_bits());
    }

    #[test]
    fn median_ignores_single_band_spike() {
        let params = AnalysisParams::default();
        let mut frames = vec![vec![-40.0f32; 9]; 8];
        // One band jumps by 60 dB at frame 4, everything else flat
        frames[4][3] = 20.0;
        let median_env = onset_strength(&frames, &params, Aggregate::Median);
        let mean_env = onset_strength(&frames, &params, Aggregate::Mean);
        assert!(median_env.is_flat_zero());
        assert!(mean_env.values.iter().any(|&v| v > 0.0));
    }

    #[test]
    fn envelope_offset_follows_centering() {
        let params = AnalysisParams::default();
        let mut frames = vec![vec![0.0f32; 4]; 10];
        for row in frames.iter_mut().skip(5) {
            row.iter_mut().for_each(|v| *v = 10.0);
        }
        let env = onset_strength(&frames, &params, Aggregate::Median);
        // flux between frames 4 and 5 lands at 4 + 1 + n_fft / (2 * hop)
        let peak = env
            .values
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap();
        assert_eq!(peak, 7);
        assert_eq!(env.len(), 10);
    }

    #[test]
    fn peak_pick_respects_wait() {
        let x = [0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 1.0, 0.0];
        assert_eq!(peak_pick(&x, 1, 1, 1, 1, 0.1, 0), vec![1, 3, 6]);
        assert_eq!(peak_pick(&x, 1, 1, 1, 1, 0.1, 2), vec![1, 6]);
    }

    #[test]
    fn backtrack_moves_to_preceding_minimum() {
        let energy = [0.0, 0.5, 0.2, 0.1, 0.6, 1.0, 0.3, 0.4, 0.9];
        // minima: 0 (always), 3, 6
        assert_eq!(backtrack(&[5, 8], &energy), vec![3, 6]);
        assert_eq!(backtrack(&[1], &energy), vec![0]);
        // two peaks sharing a minimum collapse
        assert_eq!(backtrack(&[4, 5], &energy), vec![3]);
    }

    #[test]
    fn mel_scale_roundtrips_breakpoint() {
        assert!((hz_to_mel(1000.0) - 15.0).abs() < 1e-9);
        assert!((mel_to_hz(hz_to_mel(4000.0)) - 4000.0).abs() < 1e-6);
    }

    #[test]
    fn filterbank_covers_spectrum() {
        let fb = mel_filterbank(22050, 2048, 40);
        assert_eq!(fb.len(), 40);
        assert!(fb.iter().all(|band| band.len() == 1025));
        assert!(fb.iter().all(|band| band.iter().any(|&w| w > 0.0)));
    }
}

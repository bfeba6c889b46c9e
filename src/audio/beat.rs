use rustfft::{num_complex::Complex, FftPlanner};

use super::analysis::hann_window;
use super::features::{AnalysisParams, OnsetEnvelope};

/// Estimate a global tempo and place beats on the envelope with dynamic
/// programming. Returns `(tempo_bpm, beat_frames)`; both are empty/zero when
/// the envelope carries no energy.
pub fn beat_track(env: &OnsetEnvelope, sample_rate: u32, params: &AnalysisParams) -> (f64, Vec<usize>) {
    if env.is_empty() || env.is_flat_zero() {
        return (0.0, Vec::new());
    }

    let tempo = estimate_tempo(env, sample_rate, params);
    if tempo <= 0.0 {
        return (0.0, Vec::new());
    }

    let frame_rate = params.frame_rate(sample_rate);
    let period = ((60.0 * frame_rate / tempo).round() as usize).max(1);

    let Some(localscore) = local_score(&env.values, period) else {
        return (tempo, Vec::new());
    };
    let (backlink, cumscore) = track_dp(&localscore, period, params.tightness);
    let last = last_beat(&cumscore);

    let mut beats = vec![last];
    let mut cursor = last;
    while let Some(prev) = backlink[cursor] {
        beats.push(prev);
        cursor = prev;
    }
    beats.reverse();

    let beats = trim_beats(&localscore, beats);
    log::debug!("Beat tracker: period={} frames, {} beats", period, beats.len());
    (tempo, beats)
}

/// Pick the autocorrelation lag with the best prior-weighted score from the
/// mean autocorrelation tempogram.
pub fn estimate_tempo(env: &OnsetEnvelope, sample_rate: u32, params: &AnalysisParams) -> f64 {
    let win = params.seconds_to_frames(params.ac_size, sample_rate).max(2);
    let tempogram = mean_tempogram(&env.values, win);

    let frame_rate = params.frame_rate(sample_rate);
    let log2_start = params.start_bpm.log2();

    let mut best: Option<(usize, f64)> = None;
    for (lag, &strength) in tempogram.iter().enumerate().skip(1) {
        let bpm = 60.0 * frame_rate / lag as f64;
        if bpm > params.max_tempo {
            continue;
        }
        let prior = -0.5 * ((bpm.log2() - log2_start) / params.std_bpm).powi(2);
        // FFT round-off can leave tiny negative correlations
        let score = (1e6 * strength.max(0.0) as f64).ln_1p() + prior;
        if best.map_or(true, |(_, s)| score > s) {
            best = Some((lag, score));
        }
    }

    best.map_or(0.0, |(lag, _)| 60.0 * frame_rate / lag as f64)
}

/// Per-frame windowed autocorrelation (lags `0..win`), each normalised by its
/// peak, averaged across frames.
fn mean_tempogram(env: &[f32], win: usize) -> Vec<f32> {
    let n_fft = (2 * win).next_power_of_two();
    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(n_fft);
    let inverse = planner.plan_fft_inverse(n_fft);
    let window = hann_window(win);
    let half = win / 2;

    let mut acc = vec![0.0f32; win];
    let mut buffer = vec![Complex::new(0.0f32, 0.0); n_fft];

    for frame in 0..env.len() {
        let origin = frame as isize - half as isize;
        buffer.iter_mut().for_each(|c| *c = Complex::new(0.0, 0.0));
        for (i, w) in window.iter().enumerate() {
            let idx = origin + i as isize;
            if idx >= 0 && (idx as usize) < env.len() {
                buffer[i] = Complex::new(env[idx as usize] * w, 0.0);
            }
        }

        forward.process(&mut buffer);
        for c in buffer.iter_mut() {
            *c = Complex::new(c.norm_sqr(), 0.0);
        }
        inverse.process(&mut buffer);

        let peak = buffer[..win].iter().map(|c| c.re.abs()).fold(0.0f32, f32::max);
        if peak > 0.0 {
            for (a, c) in acc.iter_mut().zip(buffer.iter()) {
                *a += c.re / peak;
            }
        }
    }

    let n = env.len().max(1) as f32;
    acc.iter_mut().for_each(|a| *a /= n);
    acc
}

/// Envelope scaled to unit standard deviation, smoothed with a Gaussian of
/// width tied to the beat period. `None` when the envelope is constant.
fn local_score(env: &[f32], period: usize) -> Option<Vec<f64>> {
    let n = env.len();
    if n < 2 {
        return None;
    }
    let mean = env.iter().map(|&v| v as f64).sum::<f64>() / n as f64;
    let var = env.iter().map(|&v| (v as f64 - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    let std = var.sqrt();
    if std <= 0.0 {
        return None;
    }

    let p = period as isize;
    let kernel: Vec<f64> = (-p..=p)
        .map(|k| (-0.5 * (k as f64 * 32.0 / period as f64).powi(2)).exp())
        .collect();

    let score: Vec<f64> = (0..n as isize)
        .map(|i| {
            kernel
                .iter()
                .enumerate()
                .filter_map(|(j, w)| {
                    let idx = i + j as isize - p;
                    (idx >= 0 && idx < n as isize).then(|| w * env[idx as usize] as f64 / std)
                })
                .sum::<f64>()
        })
        .collect();
    Some(score)
}

/// Forward pass: each frame's cumulative score is its local score plus the
/// best predecessor between half a period and two periods back, penalised by
/// squared log deviation from the period.
fn track_dp(localscore: &[f64], period: usize, tightness: f64) -> (Vec<Option<usize>>, Vec<f64>) {
    let n = localscore.len();
    let p = period as f64;
    let far = 2 * period as isize;
    let near = (p / 2.0).round() as isize;
    let offsets: Vec<isize> = (-far..=-near).collect();
    let txwt: Vec<f64> = offsets
        .iter()
        .map(|&o| -tightness * (-(o as f64) / p).ln().powi(2))
        .collect();

    let score_thresh = 0.01 * localscore.iter().copied().fold(0.0f64, f64::max);
    let mut backlink: Vec<Option<usize>> = vec![None; n];
    let mut cumscore = vec![0.0f64; n];
    let mut first_beat = true;

    for i in 0..n {
        let mut best_score = f64::NEG_INFINITY;
        let mut best_prev: Option<usize> = None;
        for (o, w) in offsets.iter().zip(txwt.iter()) {
            let idx = i as isize + o;
            let (candidate, prev) = if idx >= 0 {
                (cumscore[idx as usize] + w, Some(idx as usize))
            } else {
                (*w, None)
            };
            if candidate > best_score {
                best_score = candidate;
                best_prev = prev;
            }
        }
        if !best_score.is_finite() {
            best_score = 0.0;
        }

        cumscore[i] = localscore[i] + best_score;
        if first_beat && localscore[i] < score_thresh {
            backlink[i] = None;
        } else {
            backlink[i] = best_prev;
            first_beat = false;
        }
    }

    (backlink, cumscore)
}

/// Last local maximum of the cumulative score that reaches half the median
/// of all local maxima.
fn last_beat(cumscore: &[f64]) -> usize {
    let n = cumscore.len();
    let is_max = |i: usize| {
        let left = if i == 0 { cumscore[0] } else { cumscore[i - 1] };
        let right = if i + 1 == n { cumscore[i] } else { cumscore[i + 1] };
        cumscore[i] > left && cumscore[i] >= right
    };

    let mut maxima: Vec<f64> = (0..n).filter(|&i| is_max(i)).map(|i| cumscore[i]).collect();
    if maxima.is_empty() {
        return n.saturating_sub(1);
    }
    maxima.sort_unstable_by(|a, b| a.total_cmp(b));
    let mid = maxima.len() / 2;
    let median = if maxima.len() % 2 == 0 {
        (maxima[mid - 1] + maxima[mid]) / 2.0
    } else {
        maxima[mid]
    };
    let threshold = 0.5 * median;

    (0..n)
        .rev()
        .find(|&i| is_max(i) && cumscore[i] >= threshold)
        .unwrap_or(n - 1)
}

/// Drop weak beats at either end: those whose Hann-smoothed strength does not
/// exceed half the RMS of all smoothed strengths.
fn trim_beats(localscore: &[f64], beats: Vec<usize>) -> Vec<usize> {
    if beats.is_empty() {
        return beats;
    }
    const SMOOTH: [f64; 5] = [0.0, 0.5, 1.0, 0.5, 0.0];
    let strengths: Vec<f64> = beats.iter().map(|&b| localscore[b]).collect();
    let m = strengths.len() as isize;
    let smoothed: Vec<f64> = (0..m)
        .map(|i| {
            SMOOTH
                .iter()
                .enumerate()
                .filter_map(|(k, w)| {
                    let idx = i + k as isize - 2;
                    (idx >= 0 && idx < m).then(|| w * strengths[idx as usize])
                })
                .sum::<f64>()
        })
        .collect();
    let rms = (smoothed.iter().map(|v| v * v).sum::<f64>() / smoothed.len() as f64).sqrt();
    let threshold = 0.5 * rms;

    let Some(start) = smoothed.iter().position(|&v| v > threshold) else {
        return Vec::new();
    };
    let end = smoothed.iter().rposition(|&v| v > threshold).unwrap_or(start);
    beats[start..=end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 22050;

    fn pulse_train(len: usize, first: usize, spacing: usize) -> OnsetEnvelope {
        let mut values = vec![0.0f32; len];
        let mut i = first;
        while i < len {
            values[i] = 1.0;
            i += spacing;
        }
        OnsetEnvelope { values }
    }

    #[test]
    fn flat_envelope_has_no_beats() {
        let env = OnsetEnvelope { values: vec![0.0; 500] };
        let (tempo, beats) = beat_track(&env, SR, &AnalysisParams::default());
        assert_eq!(tempo, 0.0);
        assert!(beats.is_empty());
    }

    #[test]
    fn tempo_of_regular_pulse() {
        // 22 frames at 22050/512 fps is ~117 BPM
        let env = pulse_train(1000, 10, 22);
        let tempo = estimate_tempo(&env, SR, &AnalysisParams::default());
        assert!((110.0..125.0).contains(&tempo), "tempo {}", tempo);
    }

    #[test]
    fn beats_follow_pulses() {
        let env = pulse_train(1000, 10, 22);
        let (_, beats) = beat_track(&env, SR, &AnalysisParams::default());
        assert!(beats.len() >= 30, "only {} beats", beats.len());
        assert!(beats.windows(2).all(|w| w[0] < w[1]));
        for &b in &beats {
            assert!(b < env.len());
            assert_eq!((b + 22 - 10) % 22, 0, "beat {} off the pulse grid", b);
        }
    }

    #[test]
    fn trim_drops_weak_edges() {
        let mut localscore = vec![0.0; 100];
        for b in [10, 30, 50, 70] {
            localscore[b] = 1.0;
        }
        localscore[90] = 0.01;
        let trimmed = trim_beats(&localscore, vec![5, 10, 30, 50, 70, 90]);
        assert_eq!(trimmed, vec![10, 30, 50, 70]);
    }

    #[test]
    fn last_beat_skips_trailing_weak_peak() {
        let cumscore = [0.0, 5.0, 1.0, 6.0, 2.0, 7.0, 3.0, 0.5, 1.0];
        assert_eq!(last_beat(&cumscore), 5);
    }
}

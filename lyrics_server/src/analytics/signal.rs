//! Time-domain features: loudness, zero crossings, onsets, tempo and beats.

use serde::Serialize;

/// Analysis frame length in samples.
pub const FRAME_LEN: usize = 2048;
/// Hop between analysis frames in samples.
pub const HOP_LEN: usize = 512;

const MIN_BPM: f32 = 60.0;
const MAX_BPM: f32 = 200.0;

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| (s as f64) * (s as f64)).sum();
    (sum / samples.len() as f64).sqrt() as f32
}

/// RMS of each frame. A signal shorter than one frame yields one frame.
pub fn rms_frames(samples: &[f32], frame_len: usize, hop: usize) -> Vec<f32> {
    if samples.len() <= frame_len {
        return vec![rms(samples)];
    }
    (0..=(samples.len() - frame_len) / hop)
        .map(|i| rms(&samples[i * hop..i * hop + frame_len]))
        .collect()
}

/// Fraction of adjacent sample pairs that change sign.
pub fn zero_crossing_rate(samples: &[f32]) -> f32 {
    if samples.len() < 2 {
        return 0.0;
    }
    let crossings = samples
        .windows(2)
        .filter(|w| (w[0] >= 0.0) != (w[1] >= 0.0))
        .count();
    crossings as f32 / (samples.len() - 1) as f32
}

/// Half-wave rectified first difference of frame loudness.
pub fn onset_envelope(samples: &[f32], frame_len: usize, hop: usize) -> Vec<f32> {
    let frames = rms_frames(samples, frame_len, hop);
    let mut envelope = Vec::with_capacity(frames.len());
    envelope.push(0.0);
    envelope.extend(frames.windows(2).map(|w| (w[1] - w[0]).max(0.0)));
    envelope
}

/// Frames per second of an envelope computed with `hop`.
pub fn frame_rate(sample_rate: u32, hop: usize) -> f32 {
    sample_rate as f32 / hop as f32
}

fn smooth(envelope: &[f32]) -> Vec<f32> {
    (0..envelope.len())
        .map(|i| {
            let prev = if i > 0 { envelope[i - 1] } else { 0.0 };
            let next = envelope.get(i + 1).copied().unwrap_or(0.0);
            0.5 * prev + envelope[i] + 0.5 * next
        })
        .collect()
}

fn autocorrelation(envelope: &[f32], lag: usize) -> f32 {
    if lag >= envelope.len() {
        return 0.0;
    }
    let n = envelope.len() - lag;
    let sum: f32 = (0..n).map(|i| envelope[i] * envelope[i + lag]).sum();
    sum / n as f32
}

/// Log-normal preference centred on 120 BPM, one octave wide.
fn tempo_prior(bpm: f32) -> f32 {
    let octaves = (bpm / 120.0).log2();
    (-0.5 * octaves * octaves).exp()
}

/// Tempo in BPM from an onset envelope, searched over 60–200 BPM.
/// `None` when the envelope has no periodic energy.
pub fn estimate_tempo(envelope: &[f32], sample_rate: u32, hop: usize) -> Option<f32> {
    let fps = frame_rate(sample_rate, hop);
    let min_lag = (fps * 60.0 / MAX_BPM).floor().max(1.0) as usize;
    let max_lag = (fps * 60.0 / MIN_BPM).ceil() as usize;
    if envelope.len() <= max_lag + 1 {
        return None;
    }

    let smoothed = smooth(envelope);
    let scores: Vec<f32> = (min_lag - 1..=max_lag + 1)
        .map(|lag| autocorrelation(&smoothed, lag))
        .collect();

    let mut best: Option<(usize, f32)> = None;
    for lag in min_lag..=max_lag {
        let score = scores[lag - min_lag + 1] * tempo_prior(60.0 * fps / lag as f32);
        if score > best.map(|(_, s)| s).unwrap_or(0.0) {
            best = Some((lag, score));
        }
    }
    let (lag, _) = best?;

    // Parabolic refinement around the winning lag.
    let idx = lag - min_lag + 1;
    let (a, b, c) = (scores[idx - 1], scores[idx], scores[idx + 1]);
    let denom = a - 2.0 * b + c;
    let offset = if denom.abs() > f32::EPSILON {
        (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };
    Some(60.0 * fps / (lag as f32 + offset))
}

/// Beat positions in seconds for a known tempo, phase-aligned to the
/// strongest onsets.
pub fn beat_times(envelope: &[f32], sample_rate: u32, hop: usize, bpm: f32) -> Vec<f32> {
    if envelope.is_empty() || bpm <= 0.0 {
        return Vec::new();
    }
    let fps = frame_rate(sample_rate, hop);
    let period = fps * 60.0 / bpm;
    let positions = |phase: f32| {
        (0..)
            .map(move |k| (phase + k as f32 * period).round() as usize)
            .take_while(|&idx| idx < envelope.len())
    };

    let mut best_phase = 0.0;
    let mut best_score = f32::MIN;
    for step in 0..period.ceil() as usize {
        let phase = step as f32;
        let score: f32 = positions(phase).map(|idx| envelope[idx]).sum();
        if score > best_score {
            best_score = score;
            best_phase = phase;
        }
    }

    positions(best_phase)
        .map(|idx| round_to(idx as f32 / fps, 3))
        .collect()
}

/// Fraction of frames louder than `threshold`.
pub fn activity_ratio(frames: &[f32], threshold: f32) -> f32 {
    if frames.is_empty() {
        return 0.0;
    }
    frames.iter().filter(|&&f| f > threshold).count() as f32 / frames.len() as f32
}

/// Indices of local maxima in `envelope` above `mean + k * std`.
pub fn onset_peaks(envelope: &[f32]) -> Vec<usize> {
    if envelope.len() < 3 {
        return Vec::new();
    }
    let n = envelope.len() as f32;
    let mean = envelope.iter().sum::<f32>() / n;
    let var = envelope.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let threshold = mean + var.sqrt();
    (1..envelope.len() - 1)
        .filter(|&i| {
            envelope[i] > threshold && envelope[i] >= envelope[i - 1] && envelope[i] > envelope[i + 1]
        })
        .collect()
}

/// Share of signal energy below `cutoff_hz`, via a one-pole low-pass.
pub fn low_band_ratio(samples: &[f32], sample_rate: u32, cutoff_hz: f32) -> f32 {
    let total: f64 = samples.iter().map(|&s| (s as f64).powi(2)).sum();
    if total <= f64::EPSILON {
        return 0.0;
    }
    let dt = 1.0 / sample_rate as f32;
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let alpha = dt / (rc + dt);
    let mut y = 0.0f32;
    let mut low = 0.0f64;
    for &s in samples {
        y += alpha * (s - y);
        low += (y as f64).powi(2);
    }
    (low / total).min(1.0) as f32
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Quality {
    pub peak: f32,
    pub rms: f32,
    pub crest_factor: f32,
    pub clipping_ratio: f32,
}

/// Level statistics. Samples at or above 0.999 count as clipped.
pub fn quality(samples: &[f32]) -> Quality {
    let peak = samples.iter().fold(0.0f32, |m, s| m.max(s.abs()));
    let level = rms(samples);
    let clipped = samples.iter().filter(|s| s.abs() >= 0.999).count();
    Quality {
        peak: round_to(peak, 4),
        rms: round_to(level, 4),
        crest_factor: if level > 0.0 { round_to(peak / level, 3) } else { 0.0 },
        clipping_ratio: if samples.is_empty() {
            0.0
        } else {
            round_to(clipped as f32 / samples.len() as f32, 5)
        },
    }
}

/// Peak envelope with at most `points` values.
pub fn waveform(samples: &[f32], points: usize) -> Vec<f32> {
    if samples.is_empty() || points == 0 {
        return Vec::new();
    }
    let chunk = samples.len().div_ceil(points);
    samples
        .chunks(chunk)
        .map(|c| round_to(c.iter().fold(0.0f32, |m, s| m.max(s.abs())), 4))
        .collect()
}

pub fn round_to(value: f32, decimals: i32) -> f32 {
    let factor = 10f32.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const SR: u32 = 22_050;

    pub fn sine(freq: f32, amplitude: f32, seconds: f32) -> Vec<f32> {
        let n = (SR as f32 * seconds) as usize;
        (0..n)
            .map(|i| amplitude * (2.0 * std::f32::consts::PI * freq * i as f32 / SR as f32).sin())
            .collect()
    }

    pub fn click_train(bpm: f32, seconds: f32) -> Vec<f32> {
        let n = (SR as f32 * seconds) as usize;
        let mut samples = vec![0.0f32; n];
        let period = SR as f32 * 60.0 / bpm;
        let mut t = 0.0f32;
        while (t as usize) < n {
            let start = t as usize;
            for s in samples.iter_mut().skip(start).take(64) {
                *s = 0.9;
            }
            t += period;
        }
        samples
    }

    #[test]
    fn rms_of_a_sine_is_amplitude_over_root_two() {
        let level = rms(&sine(440.0, 0.5, 1.0));
        assert!((level - 0.3536).abs() < 0.001, "rms = {level}");
        assert_eq!(rms(&[]), 0.0);
    }

    #[test]
    fn zero_crossings_track_frequency() {
        let zcr = zero_crossing_rate(&sine(441.0, 0.5, 1.0));
        let expected = 2.0 * 441.0 / SR as f32;
        assert!((zcr - expected).abs() < 0.002, "zcr = {zcr}");
    }

    #[test]
    fn click_train_tempo_is_recovered() {
        let clicks = click_train(120.0, 12.0);
        let envelope = onset_envelope(&clicks, FRAME_LEN, HOP_LEN);
        let bpm = estimate_tempo(&envelope, SR, HOP_LEN).unwrap();
        assert!((bpm - 120.0).abs() < 5.0, "bpm = {bpm}");

        let beats = beat_times(&envelope, SR, HOP_LEN, bpm);
        assert!(beats.len() >= 20, "beats = {beats:?}");
        let gaps: Vec<f32> = beats.windows(2).map(|w| w[1] - w[0]).collect();
        let mean_gap = gaps.iter().sum::<f32>() / gaps.len() as f32;
        assert!((mean_gap - 0.5).abs() < 0.03, "mean gap = {mean_gap}");
    }

    #[test]
    fn silence_has_no_tempo() {
        let envelope = onset_envelope(&vec![0.0; SR as usize * 5], FRAME_LEN, HOP_LEN);
        assert_eq!(estimate_tempo(&envelope, SR, HOP_LEN), None);
    }

    #[test]
    fn quality_reports_clipping_and_crest() {
        let mut samples = sine(100.0, 0.5, 1.0);
        samples[10] = 1.0;
        samples[20] = -1.0;
        let q = quality(&samples);
        assert_eq!(q.peak, 1.0);
        assert!(q.clipping_ratio > 0.0);
        assert!(q.crest_factor > 2.5);
    }

    #[test]
    fn waveform_is_bounded() {
        let wave = waveform(&sine(50.0, 0.8, 3.0), 200);
        assert!(wave.len() <= 200);
        assert!(wave.iter().all(|&v| v <= 0.8001));
        assert!(waveform(&[], 200).is_empty());
    }

    #[test]
    fn low_band_ratio_separates_bass_from_treble() {
        let bass = low_band_ratio(&sine(60.0, 0.5, 1.0), SR, 250.0);
        let treble = low_band_ratio(&sine(4000.0, 0.5, 1.0), SR, 250.0);
        assert!(bass > 0.8, "bass = {bass}");
        assert!(treble < 0.05, "treble = {treble}");
    }
}

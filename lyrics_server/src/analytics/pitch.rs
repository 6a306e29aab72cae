//! Pitch features: note energies over C2–B6, chroma, key and fundamental
//! frequency.

use serde::Serialize;

use super::signal::{rms, round_to};

pub const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// MIDI number of C2, the lowest analysed note.
pub const LOWEST_MIDI: u8 = 36;
/// Five octaves, C2 through B6.
pub const NOTE_COUNT: usize = 60;

const CHROMA_FRAME: usize = 4096;
const MAX_CHROMA_FRAMES: usize = 600;

const PITCH_FRAME: usize = 2048;
const MAX_PITCH_FRAMES: usize = 400;
const MIN_F0: f32 = 50.0;
const MAX_F0: f32 = 400.0;

// Krumhansl-Schmuckler key profiles.
const MAJOR_PROFILE: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const MINOR_PROFILE: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];

pub fn midi_to_hz(midi: f32) -> f32 {
    440.0 * 2f32.powf((midi - 69.0) / 12.0)
}

fn hann(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| {
            0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (len - 1) as f32).cos()
        })
        .collect()
}

/// Power of one frequency in a frame (Goertzel).
pub fn goertzel_power(frame: &[f32], sample_rate: u32, freq: f32) -> f32 {
    let omega = 2.0 * std::f32::consts::PI * freq / sample_rate as f32;
    let coeff = 2.0 * omega.cos();
    let (mut s1, mut s2) = (0.0f32, 0.0f32);
    for &x in frame {
        let s0 = x + coeff * s1 - s2;
        s2 = s1;
        s1 = s0;
    }
    (s1 * s1 + s2 * s2 - coeff * s1 * s2).max(0.0)
}

/// Start offsets of at most `max_frames` evenly spread frames.
fn frame_starts(len: usize, frame: usize, max_frames: usize) -> Vec<usize> {
    if len < frame {
        return Vec::new();
    }
    let available = (len - frame) / frame + 1;
    let count = available.min(max_frames);
    let stride = (len - frame) as f64 / (count.max(2) - 1) as f64;
    (0..count)
        .map(|i| if count == 1 { 0 } else { (i as f64 * stride) as usize })
        .collect()
}

/// Energy of each semitone from C2 to B6, summed over the signal.
pub fn note_energies(samples: &[f32], sample_rate: u32) -> Vec<f32> {
    let mut energies = vec![0.0f32; NOTE_COUNT];
    let window = hann(CHROMA_FRAME);
    let mut frame = vec![0.0f32; CHROMA_FRAME];
    for start in frame_starts(samples.len(), CHROMA_FRAME, MAX_CHROMA_FRAMES) {
        for (i, slot) in frame.iter_mut().enumerate() {
            *slot = samples[start + i] * window[i];
        }
        for (note, energy) in energies.iter_mut().enumerate() {
            let freq = midi_to_hz((LOWEST_MIDI as usize + note) as f32);
            *energy += goertzel_power(&frame, sample_rate, freq);
        }
    }
    energies
}

/// Normalized 12-bin pitch-class profile (max = 1).
pub fn chroma(samples: &[f32], sample_rate: u32) -> [f32; 12] {
    chroma_from_energies(&note_energies(samples, sample_rate))
}

pub fn chroma_from_energies(energies: &[f32]) -> [f32; 12] {
    let mut bins = [0.0f32; 12];
    for (note, energy) in energies.iter().enumerate() {
        bins[(LOWEST_MIDI as usize + note) % 12] += energy;
    }
    let max = bins.iter().cloned().fold(0.0f32, f32::max);
    if max > 0.0 {
        for b in bins.iter_mut() {
            *b = round_to(*b / max, 4);
        }
    }
    bins
}

/// Share of note energy between two MIDI notes (inclusive).
pub fn register_share(energies: &[f32], low_midi: u8, high_midi: u8) -> f32 {
    let total: f32 = energies.iter().sum();
    if total <= 0.0 {
        return 0.0;
    }
    let in_range: f32 = energies
        .iter()
        .enumerate()
        .filter(|(note, _)| {
            let midi = LOWEST_MIDI as usize + note;
            midi >= low_midi as usize && midi <= high_midi as usize
        })
        .map(|(_, e)| e)
        .sum();
    in_range / total
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Major,
    Minor,
}

#[derive(Debug, Clone, Serialize)]
pub struct Key {
    pub tonic: &'static str,
    pub mode: Mode,
    pub confidence: f32,
}

impl Key {
    pub fn label(&self) -> String {
        match self.mode {
            Mode::Major => format!("{} major", self.tonic),
            Mode::Minor => format!("{} minor", self.tonic),
        }
    }
}

fn correlation(a: &[f32; 12], b: &[f32; 12]) -> f32 {
    let mean_a = a.iter().sum::<f32>() / 12.0;
    let mean_b = b.iter().sum::<f32>() / 12.0;
    let mut num = 0.0;
    let mut den_a = 0.0;
    let mut den_b = 0.0;
    for i in 0..12 {
        let da = a[i] - mean_a;
        let db = b[i] - mean_b;
        num += da * db;
        den_a += da * da;
        den_b += db * db;
    }
    if den_a <= 0.0 || den_b <= 0.0 {
        return 0.0;
    }
    num / (den_a * den_b).sqrt()
}

/// Best-matching key for a chroma vector. `None` for a flat chroma.
pub fn estimate_key(chroma: &[f32; 12]) -> Option<Key> {
    let mut best: Option<Key> = None;
    for tonic in 0..12 {
        for (mode, profile) in [(Mode::Major, &MAJOR_PROFILE), (Mode::Minor, &MINOR_PROFILE)] {
            let mut rotated = [0.0f32; 12];
            for (i, slot) in rotated.iter_mut().enumerate() {
                *slot = profile[(i + 12 - tonic) % 12];
            }
            let score = correlation(chroma, &rotated);
            if best.as_ref().map(|k| score > k.confidence).unwrap_or(score > 0.0) {
                best = Some(Key {
                    tonic: NOTE_NAMES[tonic],
                    mode,
                    confidence: score,
                });
            }
        }
    }
    best.map(|k| Key {
        confidence: round_to(k.confidence.clamp(0.0, 1.0), 3),
        ..k
    })
}

/// Fundamental of one frame by normalized autocorrelation.
fn frame_f0(frame: &[f32], sample_rate: u32) -> Option<f32> {
    let min_lag = (sample_rate as f32 / MAX_F0).floor() as usize;
    let max_lag = ((sample_rate as f32 / MIN_F0).ceil() as usize).min(frame.len() / 2);
    if min_lag + 2 >= max_lag {
        return None;
    }

    let score = |lag: usize| -> f32 {
        let n = frame.len() - lag;
        let (mut xy, mut xx, mut yy) = (0.0f32, 0.0f32, 0.0f32);
        for i in 0..n {
            xy += frame[i] * frame[i + lag];
            xx += frame[i] * frame[i];
            yy += frame[i + lag] * frame[i + lag];
        }
        if xx <= 0.0 || yy <= 0.0 {
            0.0
        } else {
            xy / (xx * yy).sqrt()
        }
    };

    let scores: Vec<f32> = (min_lag..=max_lag).map(score).collect();
    let peak = scores.iter().cloned().fold(f32::MIN, f32::max);
    if peak < 0.5 {
        return None;
    }

    // First lag near the peak, then climb to its local maximum. This keeps
    // the fundamental instead of a multiple of its period.
    let mut idx = scores.iter().position(|&s| s >= 0.9 * peak)?;
    while idx + 1 < scores.len() && scores[idx + 1] > scores[idx] {
        idx += 1;
    }

    let offset = if idx > 0 && idx + 1 < scores.len() {
        let (a, b, c) = (scores[idx - 1], scores[idx], scores[idx + 1]);
        let denom = a - 2.0 * b + c;
        if denom.abs() > f32::EPSILON {
            (0.5 * (a - c) / denom).clamp(-0.5, 0.5)
        } else {
            0.0
        }
    } else {
        0.0
    };
    let lag = (min_lag + idx) as f32 + offset;
    Some(sample_rate as f32 / lag)
}

/// Median fundamental frequency over voiced frames, 50–400 Hz.
pub fn estimate_f0(samples: &[f32], sample_rate: u32) -> Option<f32> {
    let voiced_floor = (rms(samples) * 0.5).max(1e-4);
    let mut estimates: Vec<f32> = frame_starts(samples.len(), PITCH_FRAME, MAX_PITCH_FRAMES)
        .into_iter()
        .map(|start| &samples[start..start + PITCH_FRAME])
        .filter(|frame| rms(frame) >= voiced_floor)
        .filter_map(|frame| frame_f0(frame, sample_rate))
        .collect();
    if estimates.is_empty() {
        return None;
    }
    estimates.sort_by(|a, b| a.total_cmp(b));
    Some(round_to(estimates[estimates.len() / 2], 1))
}

/// Rough voice classification from the median fundamental.
pub fn voice_type(f0: Option<f32>) -> &'static str {
    match f0 {
        Some(f) if (80.0..180.0).contains(&f) => "Male",
        Some(f) if f >= 180.0 => "Female",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::signal::tests::{sine, SR};

    #[test]
    fn a440_maps_to_key_of_a() {
        let chroma = chroma(&sine(440.0, 0.5, 1.0), SR);
        assert_eq!(chroma[9], 1.0);
        let key = estimate_key(&chroma).unwrap();
        assert_eq!(key.tonic, "A");
        assert!(key.confidence > 0.5);
    }

    #[test]
    fn flat_chroma_has_no_key() {
        assert!(estimate_key(&[0.0; 12]).is_none());
        assert!(estimate_key(&[1.0; 12]).is_none());
    }

    #[test]
    fn f0_of_a_low_sine() {
        let f0 = estimate_f0(&sine(220.0, 0.4, 1.0), SR).unwrap();
        assert!((f0 - 220.0).abs() < 3.0, "f0 = {f0}");
        let f0 = estimate_f0(&sine(110.0, 0.4, 1.0), SR).unwrap();
        assert!((f0 - 110.0).abs() < 2.0, "f0 = {f0}");
        assert!(estimate_f0(&vec![0.0; SR as usize], SR).is_none());
    }

    #[test]
    fn voice_type_thresholds() {
        assert_eq!(voice_type(Some(120.0)), "Male");
        assert_eq!(voice_type(Some(180.0)), "Female");
        assert_eq!(voice_type(Some(60.0)), "Unknown");
        assert_eq!(voice_type(None), "Unknown");
    }

    #[test]
    fn register_share_counts_only_the_range() {
        let mut energies = vec![0.0; NOTE_COUNT];
        energies[0] = 1.0; // C2
        energies[24] = 3.0; // C4
        assert_eq!(register_share(&energies, 60, 95), 0.75);
        assert_eq!(register_share(&[0.0; NOTE_COUNT], 60, 95), 0.0);
    }
}

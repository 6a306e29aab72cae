//! Per-stem descriptions and the whole-track summary.

use serde::Serialize;
use serde_json::{json, Value};

use super::pitch::{self, Key};
use super::signal::{self, round_to, Quality, FRAME_LEN, HOP_LEN};

/// Instruments described for every split. Guitar, violin and flute have no
/// stem of their own and are read from the "other" stem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StemKind {
    Vocal,
    Bass,
    Drums,
    Piano,
    Other,
    Guitar,
    Violin,
    Flute,
}

impl StemKind {
    pub const ALL: [StemKind; 8] = [
        StemKind::Vocal,
        StemKind::Bass,
        StemKind::Drums,
        StemKind::Piano,
        StemKind::Other,
        StemKind::Guitar,
        StemKind::Violin,
        StemKind::Flute,
    ];

    pub fn name(self) -> &'static str {
        match self {
            StemKind::Vocal => "vocal",
            StemKind::Bass => "bass",
            StemKind::Drums => "drums",
            StemKind::Piano => "piano",
            StemKind::Other => "other",
            StemKind::Guitar => "guitar",
            StemKind::Violin => "violin",
            StemKind::Flute => "flute",
        }
    }

    /// Separated stem the description is computed from.
    pub fn source_stem(self) -> &'static str {
        match self {
            StemKind::Vocal => "vocals",
            StemKind::Bass => "bass",
            StemKind::Drums => "drums",
            StemKind::Piano => "piano",
            StemKind::Other | StemKind::Guitar | StemKind::Violin | StemKind::Flute => "other",
        }
    }

    /// Playable MIDI range for instruments picked out of the "other" stem.
    fn register(self) -> Option<(u8, u8)> {
        match self {
            StemKind::Guitar => Some((40, 83)),
            StemKind::Violin => Some((55, 95)),
            StemKind::Flute => Some((60, 95)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Presence {
    High,
    Medium,
    Low,
}

impl Presence {
    pub fn from_rms(rms: f32) -> Self {
        if rms > 0.02 {
            Presence::High
        } else if rms > 0.01 {
            Presence::Medium
        } else {
            Presence::Low
        }
    }
}

pub fn confidence(rms: f32) -> f32 {
    round_to((rms * 50.0).min(1.0), 3)
}

fn dominant_pitch_class(chroma: &[f32; 12]) -> Option<&'static str> {
    let (idx, max) = chroma
        .iter()
        .enumerate()
        .fold((0, 0.0f32), |best, (i, &v)| if v > best.1 { (i, v) } else { best });
    (max > 0.0).then(|| pitch::NOTE_NAMES[idx])
}

fn key_json(key: Option<Key>) -> (Value, Value) {
    match key {
        Some(k) => (Value::String(k.label()), json!(k.confidence)),
        None => (Value::Null, Value::Null),
    }
}

/// Onsets per second and how evenly they are spaced (1 = metronomic).
fn rhythm_stats(peaks: &[usize], fps: f32, duration: f32) -> (f32, f32) {
    let density = if duration > 0.0 { peaks.len() as f32 / duration } else { 0.0 };
    let intervals: Vec<f32> = peaks.windows(2).map(|w| (w[1] - w[0]) as f32 / fps).collect();
    if intervals.len() < 2 {
        return (round_to(density, 3), 0.0);
    }
    let mean = intervals.iter().sum::<f32>() / intervals.len() as f32;
    let var = intervals.iter().map(|i| (i - mean) * (i - mean)).sum::<f32>() / intervals.len() as f32;
    let cv = if mean > 0.0 { var.sqrt() / mean } else { 1.0 };
    (round_to(density, 3), round_to((1.0 - cv).clamp(0.0, 1.0), 3))
}

/// Measurements of one stem shared by every instrument read from it.
pub struct StemFeatures {
    duration: f32,
    frames: Vec<f32>,
    envelope: Vec<f32>,
    peaks: Vec<usize>,
    energies: Vec<f32>,
    chroma: [f32; 12],
    rms: f32,
}

impl StemFeatures {
    pub fn measure(samples: &[f32], sample_rate: u32) -> Self {
        let envelope = signal::onset_envelope(samples, FRAME_LEN, HOP_LEN);
        let energies = pitch::note_energies(samples, sample_rate);
        Self {
            duration: samples.len() as f32 / sample_rate as f32,
            frames: signal::rms_frames(samples, FRAME_LEN, HOP_LEN),
            peaks: signal::onset_peaks(&envelope),
            chroma: pitch::chroma_from_energies(&energies),
            rms: signal::rms(samples),
            envelope,
            energies,
        }
    }
}

/// Describe one instrument from its (mono) stem samples.
#[cfg(test)]
pub fn describe_stem(kind: StemKind, samples: &[f32], sample_rate: u32) -> Value {
    describe_measured(kind, samples, &StemFeatures::measure(samples, sample_rate), sample_rate)
}

/// Describe one instrument from its stem and the stem's precomputed features.
pub fn describe_measured(
    kind: StemKind,
    samples: &[f32],
    features: &StemFeatures,
    sample_rate: u32,
) -> Value {
    let StemFeatures {
        duration,
        frames,
        envelope,
        peaks,
        energies,
        chroma,
        rms,
    } = features;
    let (duration, chroma) = (*duration, *chroma);

    let mut level = *rms;
    let register = kind.register().map(|(lo, hi)| pitch::register_share(energies, lo, hi));
    if let Some(share) = register {
        level *= share;
    }

    let mut description = json!({
        "instrument": kind.name(),
        "presence": Presence::from_rms(level),
        "confidence": confidence(level),
        "rms": round_to(level, 5),
        "activity_ratio": round_to(signal::activity_ratio(frames, 0.01), 3),
        "onset_count": peaks.len(),
        "tempo_bpm": signal::estimate_tempo(envelope, sample_rate, HOP_LEN).map(|b| round_to(b, 1)),
        "dominant_pitch_class": dominant_pitch_class(&chroma),
        "chroma": chroma.to_vec(),
    });

    let extra = match kind {
        StemKind::Vocal => {
            let f0 = pitch::estimate_f0(samples, sample_rate);
            json!({
                "f0_median_hz": f0,
                "voice_type": pitch::voice_type(f0),
                "zero_crossing_rate": round_to(signal::zero_crossing_rate(samples), 4),
            })
        }
        StemKind::Bass => json!({
            "low_band_ratio": round_to(signal::low_band_ratio(samples, sample_rate, 250.0), 3),
        }),
        StemKind::Drums => {
            let (density, regularity) =
                rhythm_stats(peaks, signal::frame_rate(sample_rate, HOP_LEN), duration);
            json!({
                "onset_density": density,
                "regularity": regularity,
            })
        }
        StemKind::Piano | StemKind::Other => {
            let (key, key_confidence) = key_json(pitch::estimate_key(&chroma));
            json!({
                "key": key,
                "key_confidence": key_confidence,
                "zero_crossing_rate": round_to(signal::zero_crossing_rate(samples), 4),
            })
        }
        StemKind::Guitar | StemKind::Violin | StemKind::Flute => json!({
            "source_stem": kind.source_stem(),
            "register_share": register.map(|s| round_to(s, 3)),
        }),
    };

    if let (Value::Object(base), Value::Object(more)) = (&mut description, extra) {
        base.extend(more);
    }
    description
}

/// Whole-track analysis stored as the song description.
#[derive(Debug, Clone, Serialize)]
pub struct TrackSummary {
    pub duration_sec: f32,
    pub bpm: Option<f32>,
    pub key: Option<String>,
    pub key_confidence: Option<f32>,
    pub waveform: Vec<f32>,
    pub beat_times: Vec<f32>,
    pub quality: Quality,
}

pub fn summarize_track(samples: &[f32], sample_rate: u32) -> TrackSummary {
    let envelope = signal::onset_envelope(samples, FRAME_LEN, HOP_LEN);
    let bpm = signal::estimate_tempo(&envelope, sample_rate, HOP_LEN);
    let beats = bpm
        .map(|b| signal::beat_times(&envelope, sample_rate, HOP_LEN, b))
        .unwrap_or_default();
    let key = pitch::estimate_key(&pitch::chroma(samples, sample_rate));

    TrackSummary {
        duration_sec: round_to(samples.len() as f32 / sample_rate as f32, 2),
        bpm: bpm.map(|b| round_to(b, 1)),
        key: key.as_ref().map(Key::label),
        key_confidence: key.map(|k| k.confidence),
        waveform: signal::waveform(samples, 200),
        beat_times: beats,
        quality: signal::quality(samples),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::signal::tests::{click_train, sine, SR};

    #[test]
    fn presence_thresholds() {
        assert_eq!(Presence::from_rms(0.03), Presence::High);
        assert_eq!(Presence::from_rms(0.015), Presence::Medium);
        assert_eq!(Presence::from_rms(0.01), Presence::Low);
        assert_eq!(confidence(0.01), 0.5);
        assert_eq!(confidence(0.5), 1.0);
    }

    #[test]
    fn silent_stem_is_low_presence() {
        let desc = describe_stem(StemKind::Piano, &vec![0.0; SR as usize], SR);
        assert_eq!(desc["presence"], "Low");
        assert_eq!(desc["confidence"], 0.0);
        assert!(desc["key"].is_null());
        assert!(desc["dominant_pitch_class"].is_null());
    }

    #[test]
    fn vocal_stem_reports_voice_type() {
        let desc = describe_stem(StemKind::Vocal, &sine(220.0, 0.3, 2.0), SR);
        assert_eq!(desc["instrument"], "vocal");
        assert_eq!(desc["presence"], "High");
        assert_eq!(desc["voice_type"], "Female");
        assert_eq!(desc["dominant_pitch_class"], "A");
    }

    #[test]
    fn drum_stem_reports_regular_onsets() {
        let desc = describe_stem(StemKind::Drums, &click_train(120.0, 10.0), SR);
        let density = desc["onset_density"].as_f64().unwrap();
        assert!((density - 2.0).abs() < 0.5, "density = {density}");
        assert!(desc["regularity"].as_f64().unwrap() > 0.8);
    }

    #[test]
    fn high_tone_lands_in_flute_register_not_guitar() {
        // A6 is above the guitar register used here.
        let tone = sine(1760.0, 0.3, 1.0);
        let flute = describe_stem(StemKind::Flute, &tone, SR);
        let guitar = describe_stem(StemKind::Guitar, &tone, SR);
        assert_eq!(flute["source_stem"], "other");
        assert!(flute["register_share"].as_f64().unwrap() > 0.9);
        assert!(guitar["register_share"].as_f64().unwrap() < 0.1);
    }

    #[test]
    fn track_summary_has_key_and_bounded_waveform() {
        let summary = summarize_track(&sine(440.0, 0.5, 3.0), SR);
        assert_eq!(summary.duration_sec, 3.0);
        assert!(summary.key.as_deref().unwrap().starts_with("A "));
        assert!(summary.waveform.len() <= 200);
        assert!((summary.quality.rms - 0.3536).abs() < 0.001);
    }
}

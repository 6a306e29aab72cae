//! Audio analytics over decoded PCM.
//!
//! Stems are decoded and measured once each; the eight instrument
//! descriptions are grouped by source stem and run concurrently on the
//! blocking pool.

pub mod describe;
pub mod pitch;
pub mod signal;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::task::JoinSet;

use crate::services::audio::{self, ANALYSIS_SAMPLE_RATE};
use crate::services::separator::Stems;

pub use describe::{describe_measured, summarize_track, StemFeatures, StemKind};

/// Decoded samples per source stem, or the reason decoding failed.
pub type DecodedStems = BTreeMap<&'static str, Result<Arc<Vec<f32>>, String>>;

/// Decode every stem referenced by [`StemKind::ALL`] concurrently.
pub async fn decode_stems(ffmpeg: &str, stems: &Stems, timeout: Duration) -> DecodedStems {
    let mut sources: Vec<&'static str> = StemKind::ALL.iter().map(|k| k.source_stem()).collect();
    sources.sort_unstable();
    sources.dedup();

    let mut tasks = JoinSet::new();
    let mut decoded = DecodedStems::new();
    for source in sources {
        let Some(path) = stems.get(source) else {
            decoded.insert(source, Err(format!("{source} stem missing")));
            continue;
        };
        let path = path.to_path_buf();
        let ffmpeg = ffmpeg.to_string();
        tasks.spawn(async move {
            let result = audio::decode_mono(&ffmpeg, &path, ANALYSIS_SAMPLE_RATE, timeout)
                .await
                .map(Arc::new)
                .map_err(|e| format!("{e:#}"));
            (source, result)
        });
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((source, result)) => {
                decoded.insert(source, result);
            }
            Err(e) => tracing::error!("Stem decode task failed: {e}"),
        }
    }
    decoded
}

/// Describe all eight instruments in parallel. A failure affects only the
/// instruments that depend on the failing stem; they get `{"error": ...}`.
pub async fn describe_all(decoded: &DecodedStems, sample_rate: u32) -> BTreeMap<&'static str, Value> {
    let mut tasks = JoinSet::new();
    let mut results = BTreeMap::new();

    let mut by_source: BTreeMap<&'static str, Vec<StemKind>> = BTreeMap::new();
    for kind in StemKind::ALL {
        by_source.entry(kind.source_stem()).or_default().push(kind);
    }

    for (source, kinds) in by_source {
        match decoded.get(source) {
            Some(Ok(samples)) => {
                let samples = Arc::clone(samples);
                tasks.spawn_blocking(move || {
                    let features = StemFeatures::measure(&samples, sample_rate);
                    kinds
                        .into_iter()
                        .map(|kind| (kind, describe_measured(kind, &samples, &features, sample_rate)))
                        .collect::<Vec<_>>()
                });
            }
            Some(Err(e)) => {
                for kind in kinds {
                    results.insert(kind.name(), json!({ "error": e }));
                }
            }
            None => {
                for kind in kinds {
                    results.insert(kind.name(), json!({ "error": "stem not decoded" }));
                }
            }
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(descriptions) => {
                for (kind, description) in descriptions {
                    results.insert(kind.name(), description);
                }
            }
            Err(e) => tracing::error!("Stem analysis task failed: {e}"),
        }
    }

    for kind in StemKind::ALL {
        results
            .entry(kind.name())
            .or_insert_with(|| json!({ "error": "analysis task panicked" }));
    }
    results
}

/// Decode and describe every stem of a split.
pub async fn analyze_stems_in_parallel(
    ffmpeg: &str,
    stems: &Stems,
    timeout: Duration,
) -> BTreeMap<&'static str, Value> {
    let decoded = decode_stems(ffmpeg, stems, timeout).await;
    describe_all(&decoded, ANALYSIS_SAMPLE_RATE).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analytics::signal::tests::{sine, SR};

    #[tokio::test]
    async fn failing_stem_only_affects_its_instruments() {
        let mut decoded = DecodedStems::new();
        decoded.insert("vocals", Ok(Arc::new(sine(200.0, 0.3, 1.0))));
        decoded.insert("bass", Ok(Arc::new(sine(55.0, 0.3, 1.0))));
        decoded.insert("drums", Ok(Arc::new(vec![0.0; SR as usize])));
        decoded.insert("piano", Ok(Arc::new(sine(261.6, 0.2, 1.0))));
        decoded.insert("other", Err("decode failed".to_string()));

        let results = describe_all(&decoded, SR).await;
        assert_eq!(results.len(), 8);
        assert_eq!(results["vocal"]["instrument"], "vocal");
        assert_eq!(results["bass"]["presence"], "High");
        assert_eq!(results["drums"]["presence"], "Low");
        for name in ["other", "guitar", "violin", "flute"] {
            assert_eq!(results[name]["error"], "decode failed");
        }
    }

    #[tokio::test]
    async fn instruments_sharing_a_stem_match_individual_descriptions() {
        let tone = sine(440.0, 0.3, 1.0);
        let mut decoded = DecodedStems::new();
        decoded.insert("other", Ok(Arc::new(tone.clone())));

        let results = describe_all(&decoded, SR).await;
        for kind in [StemKind::Other, StemKind::Guitar, StemKind::Violin, StemKind::Flute] {
            assert_eq!(results[kind.name()], describe::describe_stem(kind, &tone, SR));
        }
        assert_eq!(results["piano"]["error"], "stem not decoded");
    }

    #[tokio::test]
    async fn missing_stem_files_are_reported_not_decoded() {
        let stems = Stems {
            dir: std::path::PathBuf::from("/nonexistent"),
            files: BTreeMap::new(),
        };
        let results = analyze_stems_in_parallel("ffmpeg", &stems, Duration::from_secs(1)).await;
        assert_eq!(results["piano"]["error"], "piano stem missing");
        assert_eq!(results["guitar"]["error"], "other stem missing");
    }
}

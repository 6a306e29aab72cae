//! ffmpeg helpers: PCM decoding for analysis and compression for upload to
//! the transcription API.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::services::tools;

/// Sample rate used by every analysis routine.
pub const ANALYSIS_SAMPLE_RATE: u32 = 22_050;

/// Convert little-endian f32 bytes into samples. A trailing partial sample
/// is dropped.
pub fn samples_from_f32le(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Decode any audio file to mono f32 samples at `sample_rate`.
pub async fn decode_mono(
    ffmpeg: &str,
    path: &Path,
    sample_rate: u32,
    timeout: Duration,
) -> anyhow::Result<Vec<f32>> {
    let input = path.display().to_string();
    let rate = sample_rate.to_string();
    let output = tools::run(
        ffmpeg,
        [
            "-nostdin",
            "-v",
            "error",
            "-i",
            input.as_str(),
            "-ac",
            "1",
            "-ar",
            rate.as_str(),
            "-f",
            "f32le",
            "-",
        ],
        None,
        timeout,
    )
    .await?;
    Ok(samples_from_f32le(&output.stdout))
}

/// Re-encode a stem as mono 16 kHz 32 kbps mp3 to keep transcription
/// uploads small. Non-wav inputs are returned unchanged.
pub async fn compress_for_transcription(
    ffmpeg: &str,
    path: &Path,
    timeout: Duration,
) -> anyhow::Result<PathBuf> {
    let is_wav = path
        .extension()
        .map(|e| e.eq_ignore_ascii_case("wav"))
        .unwrap_or(false);
    if !is_wav {
        return Ok(path.to_path_buf());
    }

    let target = path.with_extension("mp3");
    let input = path.display().to_string();
    let output = target.display().to_string();
    tools::run(
        ffmpeg,
        [
            "-nostdin",
            "-y",
            "-v",
            "error",
            "-i",
            input.as_str(),
            "-ac",
            "1",
            "-ar",
            "16000",
            "-b:a",
            "32k",
            output.as_str(),
        ],
        None,
        timeout,
    )
    .await?;

    let size = tokio::fs::metadata(&target).await?.len();
    tracing::info!(
        file = %target.display(),
        size_mb = size as f64 / (1024.0 * 1024.0),
        "Compressed vocals for transcription"
    );
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32le_bytes_decode_in_order() {
        let mut bytes = Vec::new();
        for v in [0.0f32, 0.5, -1.0] {
            bytes.extend_from_slice(&v.to_le_bytes());
        }
        bytes.push(0xff);
        assert_eq!(samples_from_f32le(&bytes), vec![0.0, 0.5, -1.0]);
    }

    #[tokio::test]
    async fn mp3_input_is_not_recompressed() {
        let out = compress_for_transcription("ffmpeg", Path::new("/x/vocals.mp3"), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(out, Path::new("/x/vocals.mp3"));
    }
}

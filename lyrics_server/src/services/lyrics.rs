//! Timestamped lyrics: transcript segments and the LRC text format.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static LRC_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\[(\d{1,3}):(\d{1,2}(?:\.\d{1,3})?)\](.*)$").unwrap());

/// One transcribed phrase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub start: f64,
    pub end: f64,
    pub text: String,
}

/// Transcription of a vocal stem, stored as the song's `lyrics` column.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transcript {
    pub language: Option<String>,
    pub duration: Option<f64>,
    pub segments: Vec<Segment>,
}

impl Transcript {
    /// Read lyrics back from the database column. Older rows may hold a bare
    /// segment list.
    pub fn from_json(value: &serde_json::Value) -> Self {
        if let Some(list) = value.as_array() {
            return Transcript {
                segments: list
                    .iter()
                    .filter_map(|s| serde_json::from_value(s.clone()).ok())
                    .collect(),
                ..Default::default()
            };
        }
        serde_json::from_value(value.clone()).unwrap_or_default()
    }
}

/// `[mm:ss.xx]`
pub fn format_timestamp(seconds: f64) -> String {
    let seconds = seconds.max(0.0);
    let minutes = (seconds / 60.0).floor() as u64;
    let rest = seconds - minutes as f64 * 60.0;
    format!("[{minutes:02}:{rest:05.2}]")
}

/// Render segments as LRC, one line per segment, sorted by time. Empty
/// lines keep their timestamp.
pub fn segments_to_lrc(segments: &[Segment]) -> String {
    let mut lines: Vec<(f64, String)> = segments
        .iter()
        .filter(|s| s.start.is_finite())
        .map(|s| {
            let text = s.text.trim().replace('"', "").replace('\n', " ");
            (s.start, format!("{}{}", format_timestamp(s.start), text))
        })
        .collect();
    lines.sort_by(|a, b| a.0.total_cmp(&b.0));
    lines
        .into_iter()
        .map(|(_, line)| line)
        .collect::<Vec<_>>()
        .join("\n")
}

/// One parsed LRC line.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LrcLine {
    pub time: f64,
    pub text: String,
}

/// Parse LRC text. Metadata tags and lines without a timestamp are skipped.
pub fn parse_lrc(text: &str) -> Vec<LrcLine> {
    text.lines()
        .filter_map(|line| {
            let caps = LRC_LINE.captures(line.trim())?;
            let minutes: f64 = caps[1].parse().ok()?;
            let seconds: f64 = caps[2].parse().ok()?;
            Some(LrcLine {
                time: minutes * 60.0 + seconds,
                text: caps[3].trim().to_string(),
            })
        })
        .collect()
}

/// Strip a markdown code fence that chat models sometimes wrap output in.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.split_once('\n').map(|(_, body)| body).unwrap_or("");
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seg(start: f64, text: &str) -> Segment {
        Segment {
            start,
            end: start + 2.0,
            text: text.to_string(),
        }
    }

    #[test]
    fn timestamps_are_zero_padded() {
        assert_eq!(format_timestamp(0.0), "[00:00.00]");
        assert_eq!(format_timestamp(5.5), "[00:05.50]");
        assert_eq!(format_timestamp(83.257), "[01:23.26]");
        assert_eq!(format_timestamp(-3.0), "[00:00.00]");
    }

    #[test]
    fn lrc_lines_are_sorted_and_cleaned() {
        let lrc = segments_to_lrc(&[
            seg(12.0, " second \"line\"\n"),
            seg(1.25, "first"),
            seg(30.0, ""),
        ]);
        assert_eq!(lrc, "[00:01.25]first\n[00:12.00]second line\n[00:30.00]");
    }

    #[test]
    fn parse_reads_back_rendered_lines() {
        let parsed = parse_lrc("[ar:Someone]\n[00:01.25]first\nnoise\n[02:03.5] second ");
        assert_eq!(
            parsed,
            vec![
                LrcLine { time: 1.25, text: "first".to_string() },
                LrcLine { time: 123.5, text: "second".to_string() },
            ]
        );
    }

    #[test]
    fn code_fences_are_removed() {
        assert_eq!(strip_code_fence("```lrc\n[00:01.00]hi\n```"), "[00:01.00]hi");
        assert_eq!(strip_code_fence("  [00:01.00]hi "), "[00:01.00]hi");
    }

    #[test]
    fn transcript_accepts_bare_segment_lists() {
        let value = serde_json::json!([{"start": 0.0, "end": 1.0, "text": "a"}]);
        let transcript = Transcript::from_json(&value);
        assert_eq!(transcript.segments.len(), 1);
        assert!(transcript.language.is_none());
    }
}

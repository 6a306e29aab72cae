//! Source resolution and audio download through yt-dlp.
//!
//! YouTube links are downloaded directly. Spotify track links are resolved
//! to "title artist" through the Spotify Web API and then fetched from the
//! first YouTube search hit.

use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use url::Url;

use crate::config::AppConfig;
use crate::services::{spotify, tools};

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\\/*?:"<>|]"#).unwrap());

/// Where a submitted URL points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    YouTube,
    Spotify,
}

impl SourceKind {
    /// Classify a user-submitted URL, `None` when it is not supported.
    pub fn classify(url: &str) -> Option<Self> {
        let url = url.trim();
        if url.starts_with("spotify:track:") {
            return Some(SourceKind::Spotify);
        }
        let parsed = Url::parse(url).ok()?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return None;
        }
        let host = parsed.host_str()?.trim_end_matches('.');
        let host = host.strip_prefix("www.").unwrap_or(host);
        match host {
            "open.spotify.com" if spotify::track_id_from_url(&parsed).is_some() => {
                Some(SourceKind::Spotify)
            }
            "youtube.com" | "m.youtube.com" | "music.youtube.com" | "youtu.be" => {
                Some(SourceKind::YouTube)
            }
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::YouTube => "youtube",
            SourceKind::Spotify => "spotify",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "youtube" => Some(SourceKind::YouTube),
            "spotify" => Some(SourceKind::Spotify),
            _ => None,
        }
    }
}

/// Strip characters that are not allowed in file names on common filesystems.
pub fn sanitize_filename(name: &str, fallback: &str) -> String {
    let cleaned = UNSAFE_FILENAME_CHARS.replace_all(name, "");
    let cleaned = cleaned.trim();
    if cleaned.is_empty() || cleaned == "." || cleaned == ".." {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

/// A finished download.
#[derive(Debug, Clone)]
pub struct DownloadedTrack {
    pub title: String,
    pub path: PathBuf,
}

fn info_args(cookies: &Path, target: &str) -> Vec<String> {
    vec![
        "--cookies".to_string(),
        cookies.display().to_string(),
        "--no-playlist".to_string(),
        "--dump-single-json".to_string(),
        target.to_string(),
    ]
}

fn download_args(cookies: &Path, output_template: &Path, target: &str) -> Vec<String> {
    vec![
        "--cookies".to_string(),
        cookies.display().to_string(),
        "--no-playlist".to_string(),
        "-x".to_string(),
        "--audio-format".to_string(),
        "mp3".to_string(),
        "--audio-quality".to_string(),
        "0".to_string(),
        "-o".to_string(),
        output_template.display().to_string(),
        target.to_string(),
    ]
}

/// Pull the title out of `--dump-single-json` output. Search targets wrap
/// the hit in a playlist object with an `entries` array.
pub fn title_from_info(info: &serde_json::Value) -> Option<String> {
    let entry = info
        .get("entries")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .unwrap_or(info);
    entry
        .get("title")
        .and_then(|t| t.as_str())
        .map(|s| s.to_string())
}

/// Fetch `target` (a URL or `ytsearch1:` query) as mp3 into `output_dir`.
async fn fetch_with_yt_dlp(
    config: &AppConfig,
    target: &str,
    output_dir: &Path,
    fallback_title: &str,
    timeout: Duration,
) -> anyhow::Result<DownloadedTrack> {
    if !config.yt_cookies_path.is_file() {
        anyhow::bail!(
            "cookies file not found at {}",
            config.yt_cookies_path.display()
        );
    }
    tokio::fs::create_dir_all(output_dir).await?;

    let info = tools::run(
        &config.tools.yt_dlp,
        info_args(&config.yt_cookies_path, target),
        None,
        timeout,
    )
    .await?;
    let info: serde_json::Value = serde_json::from_slice(&info.stdout)
        .map_err(|e| anyhow::anyhow!("yt-dlp returned unreadable metadata: {e}"))?;

    let title = title_from_info(&info).unwrap_or_else(|| fallback_title.to_string());
    let file_stem = sanitize_filename(&title, fallback_title);
    let template = output_dir.join(format!("{file_stem}.%(ext)s"));
    let final_path = output_dir.join(format!("{file_stem}.mp3"));

    tracing::info!(target, file = %final_path.display(), "Downloading audio");
    tools::run(
        &config.tools.yt_dlp,
        download_args(&config.yt_cookies_path, &template, target),
        None,
        timeout,
    )
    .await?;

    if !final_path.is_file() {
        anyhow::bail!("yt-dlp finished but {} is missing", final_path.display());
    }

    Ok(DownloadedTrack {
        title,
        path: final_path,
    })
}

/// Download the audio of a YouTube video as mp3.
pub async fn download_from_youtube(
    config: &AppConfig,
    url: &str,
    output_dir: &Path,
    timeout: Duration,
) -> anyhow::Result<DownloadedTrack> {
    crate::metrics::download_started("youtube");
    fetch_with_yt_dlp(config, url, output_dir, "youtube_audio", timeout).await
}

/// Resolve a Spotify track to a YouTube search and download the first hit.
pub async fn download_from_spotify(
    config: &AppConfig,
    http: &reqwest::Client,
    url: &str,
    output_dir: &Path,
    timeout: Duration,
) -> anyhow::Result<DownloadedTrack> {
    crate::metrics::download_started("spotify");
    if !config.spotify_enabled() {
        anyhow::bail!("Spotify credentials are not configured");
    }

    let track_id = spotify::track_id(url)
        .ok_or_else(|| anyhow::anyhow!("not a Spotify track link: {url}"))?;
    let token = spotify::client_credentials_token(
        http,
        &config.spotify_client_id,
        &config.spotify_client_secret,
    )
    .await?;
    let track = spotify::fetch_track(http, &token, &track_id).await?;

    let query = format!("ytsearch1:{}", track.search_query());
    tracing::info!(track_id = %track_id, query = %query, "Resolved Spotify track");

    let mut downloaded =
        fetch_with_yt_dlp(config, &query, output_dir, "spotify_audio", timeout).await?;
    downloaded.title = track.display_title();
    Ok(downloaded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_supported_hosts() {
        let cases = [
            ("https://www.youtube.com/watch?v=dQw4w9WgXcQ", Some(SourceKind::YouTube)),
            ("https://youtu.be/dQw4w9WgXcQ", Some(SourceKind::YouTube)),
            ("https://music.youtube.com/watch?v=abc", Some(SourceKind::YouTube)),
            (
                "https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=x",
                Some(SourceKind::Spotify),
            ),
            ("spotify:track:4uLU6hMCjMI75M1A2tKUQC", Some(SourceKind::Spotify)),
            ("https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3", None),
            ("https://youtube.com.evil.example/watch?v=1", None),
            ("ftp://youtube.com/x", None),
            ("not a url", None),
        ];
        for (url, expected) in cases {
            assert_eq!(SourceKind::classify(url), expected, "{url}");
        }
    }

    #[test]
    fn classification_ignores_case_and_trailing_dot() {
        for url in [
            "https://WWW.YOUTUBE.COM/watch?v=dQw4w9WgXcQ",
            "HTTPS://youtu.be/dQw4w9WgXcQ",
            "https://YouTu.be/dQw4w9WgXcQ",
            "https://www.youtube.com./watch?v=dQw4w9WgXcQ",
        ] {
            assert_eq!(SourceKind::classify(url), Some(SourceKind::YouTube), "{url}");
        }
        assert_eq!(
            SourceKind::classify("https://OPEN.Spotify.com/track/4uLU6hMCjMI75M1A2tKUQC"),
            Some(SourceKind::Spotify)
        );
        assert_eq!(
            SourceKind::classify("https://open.spotify.com/playlist/x?ref=/track/abc"),
            None
        );
    }

    #[test]
    fn sanitize_strips_reserved_characters() {
        assert_eq!(
            sanitize_filename(r#" AC/DC: "Back in Black" <Live>? "#, "x"),
            "ACDC Back in Black Live"
        );
        assert_eq!(sanitize_filename("***", "youtube_audio"), "youtube_audio");
        assert_eq!(sanitize_filename("..", "youtube_audio"), "youtube_audio");
    }

    #[test]
    fn title_from_plain_and_search_metadata() {
        let video = serde_json::json!({"title": "Song A", "ext": "webm"});
        assert_eq!(title_from_info(&video).as_deref(), Some("Song A"));

        let search = serde_json::json!({
            "title": "query",
            "entries": [{"title": "Song B - Artist"}]
        });
        assert_eq!(title_from_info(&search).as_deref(), Some("Song B - Artist"));

        assert_eq!(title_from_info(&serde_json::json!({})), None);
    }

    #[test]
    fn download_args_pass_cookies_and_extract_mp3() {
        let args = download_args(
            Path::new("/app/cookies.txt"),
            Path::new("/tmp/job/Song.%(ext)s"),
            "https://youtu.be/x",
        );
        assert_eq!(&args[..2], ["--cookies", "/app/cookies.txt"]);
        assert!(args.windows(2).any(|w| w == ["--audio-format", "mp3"]));
        assert!(args.contains(&"-x".to_string()));
        assert_eq!(args.last().unwrap(), "https://youtu.be/x");
    }

    #[tokio::test]
    async fn missing_cookies_file_fails_before_running_tools() {
        let dir = tempfile::tempdir().unwrap();
        let config = AppConfig::for_tests(dir.path());
        let err = download_from_youtube(
            &config,
            "https://youtu.be/x",
            &dir.path().join("out"),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("cookies file not found"));
    }
}

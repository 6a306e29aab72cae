//! Spotify Web API: client-credentials auth and track lookup.

use base64::Engine;
use serde::Deserialize;
use url::Url;

const TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
const API_BASE: &str = "https://api.spotify.com/v1";

/// Extract the track ID from `open.spotify.com/.../track/<id>?...` or
/// `spotify:track:<id>`.
pub fn track_id(url: &str) -> Option<String> {
    let url = url.trim();
    match url.strip_prefix("spotify:track:") {
        Some(id) => valid_id(id),
        None => track_id_from_url(&Url::parse(url).ok()?),
    }
}

/// Track ID from the path segment following `track`.
pub fn track_id_from_url(url: &Url) -> Option<String> {
    let mut segments = url.path_segments()?;
    segments.find(|s| *s == "track")?;
    valid_id(segments.next()?)
}

fn valid_id(id: &str) -> Option<String> {
    let valid = !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric());
    valid.then(|| id.to_string())
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Artist {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Track {
    pub name: String,
    #[serde(default)]
    pub artists: Vec<Artist>,
}

impl Track {
    /// Search text used to find the track on YouTube: name and first artist.
    pub fn search_query(&self) -> String {
        match self.artists.first() {
            Some(artist) => format!("{} {}", self.name, artist.name),
            None => self.name.clone(),
        }
    }

    pub fn display_title(&self) -> String {
        match self.artists.first() {
            Some(artist) => format!("{} - {}", self.name, artist.name),
            None => self.name.clone(),
        }
    }
}

/// Obtain an app token via the client-credentials flow.
pub async fn client_credentials_token(
    http: &reqwest::Client,
    client_id: &str,
    client_secret: &str,
) -> anyhow::Result<String> {
    let basic = base64::engine::general_purpose::STANDARD
        .encode(format!("{client_id}:{client_secret}"));

    let resp = http
        .post(TOKEN_URL)
        .header("Authorization", format!("Basic {basic}"))
        .form(&[("grant_type", "client_credentials")])
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("Spotify token request failed: {status} {text}");
    }

    Ok(resp.json::<TokenResponse>().await?.access_token)
}

/// Fetch track metadata.
pub async fn fetch_track(
    http: &reqwest::Client,
    token: &str,
    track_id: &str,
) -> anyhow::Result<Track> {
    let resp = http
        .get(format!("{API_BASE}/tracks/{track_id}"))
        .bearer_auth(token)
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("Spotify track lookup failed: {status} {text}");
    }

    Ok(resp.json::<Track>().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn track_id_from_links_and_uris() {
        assert_eq!(
            track_id("https://open.spotify.com/track/4uLU6hMCjMI75M1A2tKUQC?si=abc").as_deref(),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            track_id("https://open.spotify.com/intl-de/track/4uLU6hMCjMI75M1A2tKUQC").as_deref(),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(
            track_id("spotify:track:4uLU6hMCjMI75M1A2tKUQC").as_deref(),
            Some("4uLU6hMCjMI75M1A2tKUQC")
        );
        assert_eq!(track_id("https://open.spotify.com/album/1DFixLWuPkv3KT3TnV35m3"), None);
        assert_eq!(track_id("https://open.spotify.com/track/"), None);
    }

    #[test]
    fn search_query_uses_first_artist() {
        let track: Track = serde_json::from_value(serde_json::json!({
            "name": "Never Gonna Give You Up",
            "artists": [{"name": "Rick Astley"}, {"name": "Someone Else"}]
        }))
        .unwrap();
        assert_eq!(track.search_query(), "Never Gonna Give You Up Rick Astley");
        assert_eq!(track.display_title(), "Never Gonna Give You Up - Rick Astley");
    }
}

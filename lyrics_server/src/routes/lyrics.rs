//! Lyric rewriting and music-prompt generation for a caller's own songs.

use axum::extract::State;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::models::song::Song;
use crate::routes::auth::CurrentUser;
use crate::routes::AppState;
use crate::services::lyrics::{self, LrcLine, Segment, Transcript};
use crate::services::song_service;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/rewrite", post(rewrite))
        .route("/prompt", post(prompt))
}

#[derive(Debug, Deserialize)]
pub struct RewriteRequest {
    pub song_id: i64,
    pub prompt: String,
    /// Store the rewritten lyrics on the song.
    #[serde(default)]
    pub save: bool,
}

#[derive(Debug, Serialize)]
pub struct RewriteResponse {
    pub lrc: String,
    pub lines: Vec<LrcLine>,
}

#[derive(Debug, Deserialize)]
pub struct PromptRequest {
    pub song_id: i64,
}

#[derive(Debug, Serialize)]
pub struct PromptResponse {
    pub prompt: String,
}

async fn owned_song(state: &AppState, owner_id: i64, song_id: i64) -> Result<Song, ApiError> {
    let mut conn = state.pool.get().await?;
    let song = song_service::get_song(&mut conn, song_id)
        .await?
        .ok_or_else(|| ApiError::NotFound("Song not found".into()))?;
    if song.owner_id != owner_id {
        return Err(ApiError::Forbidden("Not the owner of this song".into()));
    }
    Ok(song)
}

fn lyrics_of(song: &Song) -> Result<(Transcript, String), ApiError> {
    let transcript = Transcript::from_json(&song.lyrics);
    let lrc = lyrics::segments_to_lrc(&transcript.segments);
    if lrc.trim().is_empty() {
        return Err(ApiError::Conflict("Song has no lyrics".into()));
    }
    Ok((transcript, lrc))
}

/// Rebuild transcript segments from rewritten lines. Each line lasts until
/// the next one; the last one until the track ends.
fn lines_to_segments(lines: &[LrcLine], duration: Option<f64>) -> Vec<Segment> {
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let end = match lines.get(i + 1) {
                Some(next) => next.time,
                None => duration.filter(|d| *d > line.time).unwrap_or(line.time + 2.0),
            };
            Segment {
                start: line.time,
                end,
                text: line.text.clone(),
            }
        })
        .collect()
}

async fn rewrite(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<RewriteRequest>,
) -> Result<Json<RewriteResponse>, ApiError> {
    let instruction = req.prompt.trim();
    if instruction.is_empty() {
        return Err(ApiError::Unprocessable("Prompt must not be empty".into()));
    }

    let song = owned_song(&state, user.id, req.song_id).await?;
    let (transcript, lrc) = lyrics_of(&song)?;
    let language = transcript.language.as_deref().unwrap_or("the original language");
    let duration = transcript.duration.unwrap_or(0.0);

    let raw = state
        .groq
        .rewrite_lyrics(&state.config.groq_lyrics_model, &lrc, language, duration, instruction)
        .await?;
    let rewritten = lyrics::strip_code_fence(&raw).to_string();
    let lines = lyrics::parse_lrc(&rewritten);
    if lines.is_empty() {
        tracing::warn!(song_id = song.id, "Rewrite returned no timestamped lines");
        return Err(ApiError::Upstream("The AI service returned no usable lyrics.".into()));
    }

    if req.save {
        let updated = Transcript {
            language: transcript.language.clone(),
            duration: transcript.duration,
            segments: lines_to_segments(&lines, transcript.duration),
        };
        let value = serde_json::to_value(&updated).map_err(anyhow::Error::from)?;
        let mut conn = state.pool.get().await?;
        song_service::update_lyrics(&mut conn, song.id, value).await?;
        tracing::info!(song_id = song.id, lines = lines.len(), "Saved rewritten lyrics");
    }

    Ok(Json(RewriteResponse {
        lrc: rewritten,
        lines,
    }))
}

async fn prompt(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    Json(req): Json<PromptRequest>,
) -> Result<Json<PromptResponse>, ApiError> {
    if !state.groq.is_configured() {
        return Err(crate::services::groq::GroqError::NotConfigured.into());
    }
    let song = owned_song(&state, user.id, req.song_id).await?;
    let (_, lrc) = lyrics_of(&song)?;
    let prompt = state
        .groq
        .music_prompt_from_lrc(&state.config.groq_lyrics_model, &lrc)
        .await;
    Ok(Json(PromptResponse { prompt }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(time: f64, text: &str) -> LrcLine {
        LrcLine {
            time,
            text: text.to_string(),
        }
    }

    #[test]
    fn rewritten_lines_span_until_next_line() {
        let lines = vec![line(1.0, "first"), line(4.5, "second")];
        let segments = lines_to_segments(&lines, Some(10.0));
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].end, 4.5);
        assert_eq!(segments[1].end, 10.0);
        assert_eq!(segments[1].text, "second");
    }

    #[test]
    fn last_line_without_duration_gets_default_length() {
        let segments = lines_to_segments(&[line(3.0, "only")], None);
        assert_eq!(segments[0].end, 5.0);
    }

    #[test]
    fn song_without_lyrics_is_a_conflict() {
        let song = Song {
            id: 1,
            title: "t".into(),
            song_url: "u".into(),
            lyrics: serde_json::json!({}),
            description: None,
            owner_id: 1,
            create_date: None,
        };
        let err = lyrics_of(&song).unwrap_err();
        assert_eq!(err.status(), axum::http::StatusCode::CONFLICT);
    }
}

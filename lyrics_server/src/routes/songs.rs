//! Read-only song and split lookups.

use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::Serialize;

use crate::error::ApiError;
use crate::models::song::Song;
use crate::models::split::{BassInfo, Split};
use crate::routes::AppState;
use crate::services::song_service;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/songs/{song_id}", get(read_song))
        .route("/splits/{song_id}", get(read_split))
        .route("/splits/bass/{song_id}", get(read_bass))
}

#[derive(Debug, Serialize)]
pub struct SongResponse {
    pub id: i64,
    pub title: String,
    pub owner_id: i64,
    pub song_url: String,
    pub lyrics: serde_json::Value,
    pub description: Option<serde_json::Value>,
}

impl From<Song> for SongResponse {
    fn from(song: Song) -> Self {
        Self {
            id: song.id,
            title: song.title,
            owner_id: song.owner_id,
            song_url: song.song_url,
            lyrics: song.lyrics,
            description: song.description,
        }
    }
}

async fn read_song(
    State(state): State<AppState>,
    Path(song_id): Path<i64>,
) -> Result<Json<SongResponse>, ApiError> {
    let mut conn = state.pool.get().await?;
    song_service::get_song(&mut conn, song_id)
        .await?
        .map(|song| Json(song.into()))
        .ok_or_else(|| ApiError::NotFound("Song not found".into()))
}

async fn read_split(
    State(state): State<AppState>,
    Path(song_id): Path<i64>,
) -> Result<Json<Split>, ApiError> {
    let mut conn = state.pool.get().await?;
    song_service::get_split_by_song_id(&mut conn, song_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Splits for this song not found".into()))
}

async fn read_bass(
    State(state): State<AppState>,
    Path(song_id): Path<i64>,
) -> Result<Json<BassInfo>, ApiError> {
    let mut conn = state.pool.get().await?;
    song_service::get_split_bass_info_by_song_id(&mut conn, song_id)
        .await?
        .map(Json)
        .ok_or_else(|| ApiError::NotFound("Splits for this song not found".into()))
}

//! splits: Stem URLs and per-instrument descriptions for a song.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::splits;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = splits)]
pub struct Split {
    pub id: i64,
    pub song_id: i64,
    pub bass_audio_url: Option<String>,
    pub bass_description: Option<serde_json::Value>,
    pub vocals_audio_url: Option<String>,
    pub vocals_description: Option<serde_json::Value>,
    pub piano_audio_url: Option<String>,
    pub piano_description: Option<serde_json::Value>,
    pub other_audio_url: Option<String>,
    pub other_description: Option<serde_json::Value>,
    pub drum_audio_url: Option<String>,
    pub drum_description: Option<serde_json::Value>,
    pub guitar_description: Option<serde_json::Value>,
    pub flute_description: Option<serde_json::Value>,
    pub violin_description: Option<serde_json::Value>,
    pub create_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Insertable, Deserialize)]
#[diesel(table_name = splits)]
pub struct NewSplit {
    pub song_id: i64,
    pub bass_audio_url: Option<String>,
    pub bass_description: Option<serde_json::Value>,
    pub vocals_audio_url: Option<String>,
    pub vocals_description: Option<serde_json::Value>,
    pub piano_audio_url: Option<String>,
    pub piano_description: Option<serde_json::Value>,
    pub other_audio_url: Option<String>,
    pub other_description: Option<serde_json::Value>,
    pub drum_audio_url: Option<String>,
    pub drum_description: Option<serde_json::Value>,
    pub guitar_description: Option<serde_json::Value>,
    pub flute_description: Option<serde_json::Value>,
    pub violin_description: Option<serde_json::Value>,
}

/// Bass stem only.
#[derive(Debug, Serialize, Queryable)]
pub struct BassInfo {
    pub bass_audio_url: Option<String>,
    pub bass_description: Option<serde_json::Value>,
}

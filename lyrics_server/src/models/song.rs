//! songs: A processed track with its transcribed lyrics and analysis.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::songs;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = songs)]
pub struct Song {
    pub id: i64,
    pub title: String,
    pub song_url: String,
    pub lyrics: serde_json::Value,
    pub description: Option<serde_json::Value>,
    pub owner_id: i64,
    pub create_date: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable, Deserialize)]
#[diesel(table_name = songs)]
pub struct NewSong {
    pub title: String,
    pub song_url: String,
    pub lyrics: serde_json::Value,
    pub description: Option<serde_json::Value>,
    pub owner_id: i64,
}

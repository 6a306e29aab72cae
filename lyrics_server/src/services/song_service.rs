//! Songs and their stem splits.

use diesel::prelude::*;
use diesel_async::scoped_futures::ScopedFutureExt;
use diesel_async::{AsyncConnection, AsyncPgConnection, RunQueryDsl};

use crate::models::song::{NewSong, Song};
use crate::models::split::{BassInfo, NewSplit, Split};
use crate::schema::{songs, splits};

pub async fn create_song(conn: &mut AsyncPgConnection, new_song: NewSong) -> anyhow::Result<Song> {
    let result = diesel::insert_into(songs::table)
        .values(&new_song)
        .returning(Song::as_returning())
        .get_result(conn)
        .await?;
    Ok(result)
}

pub async fn get_song(conn: &mut AsyncPgConnection, song_id: i64) -> anyhow::Result<Option<Song>> {
    let result = songs::table
        .find(song_id)
        .select(Song::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Replace the stored lyrics of a song.
pub async fn update_lyrics(
    conn: &mut AsyncPgConnection,
    song_id: i64,
    lyrics: serde_json::Value,
) -> anyhow::Result<()> {
    diesel::update(songs::table.find(song_id))
        .set(songs::lyrics.eq(lyrics))
        .execute(conn)
        .await?;
    Ok(())
}

pub async fn create_split(conn: &mut AsyncPgConnection, new_split: NewSplit) -> anyhow::Result<Split> {
    let result = diesel::insert_into(splits::table)
        .values(&new_split)
        .returning(Split::as_returning())
        .get_result(conn)
        .await?;
    Ok(result)
}

/// Insert a song and its split in one transaction. `new_split.song_id` is
/// replaced by the id of the inserted song.
pub async fn create_song_with_split(
    conn: &mut AsyncPgConnection,
    new_song: NewSong,
    mut new_split: NewSplit,
) -> anyhow::Result<(Song, Split)> {
    conn.transaction::<_, anyhow::Error, _>(|conn| {
        async move {
            let song = create_song(conn, new_song).await?;
            new_split.song_id = song.id;
            let split = create_split(conn, new_split).await?;
            Ok((song, split))
        }
        .scope_boxed()
    })
    .await
}

/// Most recent split of a song.
pub async fn get_split_by_song_id(
    conn: &mut AsyncPgConnection,
    song_id: i64,
) -> anyhow::Result<Option<Split>> {
    let result = splits::table
        .filter(splits::song_id.eq(song_id))
        .order(splits::id.desc())
        .select(Split::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

pub async fn get_split_bass_info_by_song_id(
    conn: &mut AsyncPgConnection,
    song_id: i64,
) -> anyhow::Result<Option<BassInfo>> {
    let result = splits::table
        .filter(splits::song_id.eq(song_id))
        .order(splits::id.desc())
        .select((splits::bass_audio_url, splits::bass_description))
        .first::<BassInfo>(conn)
        .await
        .optional()?;
    Ok(result)
}

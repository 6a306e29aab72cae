//! Connection pool and schema migration.

use diesel_async::pooled_connection::deadpool::Pool;
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, SimpleAsyncConnection};

pub type DbPool = Pool<AsyncPgConnection>;

/// SQL migration for all service tables. Idempotent, run at every startup.
pub const MIGRATION_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id                  BIGSERIAL PRIMARY KEY,
    name                VARCHAR(255),
    username            VARCHAR(255) NOT NULL UNIQUE,
    email               VARCHAR(255) NOT NULL UNIQUE,
    hashed_password     VARCHAR(255) NOT NULL,
    is_active           BOOLEAN NOT NULL DEFAULT TRUE,
    profile_picture_url VARCHAR(1024),
    create_date         TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_users_name ON users (name);

CREATE TABLE IF NOT EXISTS songs (
    id              BIGSERIAL PRIMARY KEY,
    title           VARCHAR(512) NOT NULL DEFAULT 'Untitled',
    song_url        VARCHAR(1024) NOT NULL,
    lyrics          JSONB NOT NULL DEFAULT '{}'::jsonb,
    description     JSONB,
    owner_id        BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    create_date     TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_songs_title ON songs (title);
CREATE INDEX IF NOT EXISTS idx_songs_owner ON songs (owner_id);

CREATE TABLE IF NOT EXISTS splits (
    id                  BIGSERIAL PRIMARY KEY,
    song_id             BIGINT NOT NULL REFERENCES songs(id) ON DELETE CASCADE,
    bass_audio_url      VARCHAR(1024),
    bass_description    JSONB,
    vocals_audio_url    VARCHAR(1024),
    vocals_description  JSONB,
    piano_audio_url     VARCHAR(1024),
    piano_description   JSONB,
    other_audio_url     VARCHAR(1024),
    other_description   JSONB,
    drum_audio_url      VARCHAR(1024),
    drum_description    JSONB,
    guitar_description  JSONB,
    flute_description   JSONB,
    violin_description  JSONB,
    create_date         TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_splits_song ON splits (song_id);

CREATE TABLE IF NOT EXISTS processing_jobs (
    id              BIGSERIAL PRIMARY KEY,
    owner_id        BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    source_url      VARCHAR(2048) NOT NULL,
    source_kind     VARCHAR(16) NOT NULL,
    status          VARCHAR(16) NOT NULL DEFAULT 'pending',
    song_id         BIGINT REFERENCES songs(id) ON DELETE SET NULL,
    split_id        BIGINT REFERENCES splits(id) ON DELETE SET NULL,
    error           TEXT,
    started_at      TIMESTAMPTZ,
    finished_at     TIMESTAMPTZ,
    duration_ms     INTEGER,
    create_date     TIMESTAMPTZ DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_processing_jobs_status ON processing_jobs (status);
CREATE INDEX IF NOT EXISTS idx_processing_jobs_owner ON processing_jobs (owner_id);
CREATE INDEX IF NOT EXISTS idx_processing_jobs_created ON processing_jobs (create_date DESC);

CREATE TABLE IF NOT EXISTS job_steps (
    id              BIGSERIAL PRIMARY KEY,
    job_id          BIGINT NOT NULL REFERENCES processing_jobs(id) ON DELETE CASCADE,
    name            VARCHAR(64) NOT NULL,
    sequence        INTEGER NOT NULL DEFAULT 0,
    status          VARCHAR(16) NOT NULL DEFAULT 'running',
    detail          TEXT,
    duration_ms     INTEGER,
    started_at      TIMESTAMPTZ DEFAULT NOW(),
    finished_at     TIMESTAMPTZ
);

CREATE INDEX IF NOT EXISTS idx_job_steps_job ON job_steps (job_id);
"#;

/// Accept `postgresql://` URLs as handed out by hosting providers.
pub fn normalize_database_url(url: &str) -> String {
    match url.strip_prefix("postgresql://") {
        Some(rest) => format!("postgres://{rest}"),
        None => url.to_string(),
    }
}

/// Build the connection pool. Connections are opened lazily on first use.
pub fn build_pool(database_url: &str, max_size: usize) -> anyhow::Result<DbPool> {
    let manager =
        AsyncDieselConnectionManager::<AsyncPgConnection>::new(normalize_database_url(database_url));
    Pool::builder(manager)
        .max_size(max_size)
        .build()
        .map_err(|e| anyhow::anyhow!("failed to build database pool: {e}"))
}

/// Create or update all tables.
pub async fn run_migration(conn: &mut AsyncPgConnection) -> anyhow::Result<()> {
    conn.batch_execute(MIGRATION_SQL)
        .await
        .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn postgresql_scheme_is_rewritten() {
        assert_eq!(
            normalize_database_url("postgresql://u:p@db:5432/app"),
            "postgres://u:p@db:5432/app"
        );
        assert_eq!(
            normalize_database_url("postgres://u:p@db/app"),
            "postgres://u:p@db/app"
        );
    }

    #[test]
    fn migration_creates_every_table() {
        for table in ["users", "songs", "splits", "processing_jobs", "job_steps"] {
            assert!(
                MIGRATION_SQL.contains(&format!("CREATE TABLE IF NOT EXISTS {table} (")),
                "missing {table}"
            );
        }
    }

    #[tokio::test]
    async fn pool_builds_without_connecting() {
        let pool = build_pool("postgres://nobody@127.0.0.1:1/none", 2).unwrap();
        assert_eq!(pool.status().max_size, 2);
    }
}

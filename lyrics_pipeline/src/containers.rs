use dagger_sdk::{Container, Directory, Query, Service};

/// Database credentials shared by the Postgres service and its clients.
pub const DATABASE_URL: &str = "postgres://lyrics:lyrics_password@db:5432/lyrics_test";

/// Rust build container with libpq, ffmpeg and cargo caches.
pub fn rust_base(client: &Query, source: Directory) -> Container {
    client
        .container()
        .from("rust:1.88-bookworm")
        .with_exec(vec!["apt-get", "update"])
        .with_exec(vec![
            "apt-get", "install", "-y",
            "libpq-dev", "pkg-config", "build-essential", "postgresql-client", "ffmpeg", "curl",
        ])
        .with_mounted_cache(
            "/usr/local/cargo/registry",
            client.cache_volume("cargo-registry"),
        )
        .with_mounted_cache(
            "/usr/local/cargo/git",
            client.cache_volume("cargo-git"),
        )
        .with_mounted_cache(
            "/app/target",
            client.cache_volume("lyrics-cargo-target"),
        )
        .with_workdir("/app")
        .with_directory("/app", source)
        .with_env_variable("CARGO_TARGET_DIR", "/app/target")
        .with_env_variable("RUST_BACKTRACE", "1")
}

/// PostgreSQL 16 service for integration tests.
pub fn postgres(client: &Query) -> Service {
    client
        .container()
        .from("postgres:16-alpine")
        .with_env_variable("POSTGRES_DB", "lyrics_test")
        .with_env_variable("POSTGRES_USER", "lyrics")
        .with_env_variable("POSTGRES_PASSWORD", "lyrics_password")
        .with_exposed_port(5432)
        .as_service()
}

/// The production image built from the repository Dockerfile.
pub fn service_image(source: Directory) -> Container {
    source.docker_build()
}

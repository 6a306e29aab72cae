//! Service configuration: loaded from environment variables.

use std::path::PathBuf;

/// AWS credentials used to sign S3 uploads.
#[derive(Clone, Debug)]
pub struct AwsCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

/// Where separated stems and original tracks are published.
#[derive(Clone, Debug)]
pub enum StorageConfig {
    S3 {
        bucket: String,
        region: String,
        credentials: AwsCredentials,
    },
    /// Files are copied into `dir` and served under `/media`.
    Local {
        dir: PathBuf,
        public_base_url: String,
    },
}

/// Paths of the external tools invoked by the pipeline.
#[derive(Clone, Debug)]
pub struct ToolPaths {
    pub yt_dlp: String,
    pub spleeter: String,
    pub ffmpeg: String,
}

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HMAC key for access tokens.
    pub secret_key: String,
    /// Lifetime of an access token in minutes.
    pub access_token_expire_minutes: i64,
    /// OAuth client ID that Google ID tokens must be issued for.
    pub google_client_id: String,
    /// Netscape cookies file handed to yt-dlp.
    pub yt_cookies_path: PathBuf,
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub groq_api_key: String,
    pub groq_transcription_model: String,
    pub groq_lyrics_model: String,
    pub groq_chat_model: String,
    pub storage: StorageConfig,
    /// Scratch space for per-job downloads and stems.
    pub workspace_dir: PathBuf,
    /// Maximum number of jobs running at once.
    pub max_concurrent_jobs: usize,
    /// Upper bound for a single pipeline step.
    pub tool_timeout_secs: u64,
    /// How long `process_url?wait=true` blocks before giving up.
    pub job_wait_timeout_secs: u64,
    pub tools: ToolPaths,
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let secret_key = std::env::var("SECRET_KEY").unwrap_or_default();
        if secret_key.is_empty() {
            anyhow::bail!("SECRET_KEY must be set to sign access tokens");
        }

        let algorithm = env_or("ALGORITHM", "HS256");
        if !algorithm.eq_ignore_ascii_case("HS256") {
            anyhow::bail!("unsupported token algorithm {algorithm:?}, only HS256 is available");
        }

        let google_client_id = std::env::var("GOOGLE_CLIENT_ID").unwrap_or_default();
        let spotify_client_id = std::env::var("SPOTIPY_CLIENT_ID").unwrap_or_default();
        let spotify_client_secret = std::env::var("SPOTIPY_CLIENT_SECRET").unwrap_or_default();
        let groq_api_key = std::env::var("GROQ_API_KEY").unwrap_or_default();

        if google_client_id.is_empty() {
            tracing::warn!("GOOGLE_CLIENT_ID not set -- Google sign-in disabled");
        }
        if spotify_client_id.is_empty() || spotify_client_secret.is_empty() {
            tracing::warn!("SPOTIPY_CLIENT_ID/SPOTIPY_CLIENT_SECRET not set -- Spotify links rejected");
        }
        if groq_api_key.is_empty() {
            tracing::warn!("GROQ_API_KEY not set -- transcription, lyric rewriting and chat disabled");
        }

        let storage = match std::env::var("AWS_S3_BUCKET_NAME") {
            Ok(bucket) if !bucket.is_empty() => StorageConfig::S3 {
                bucket,
                region: env_or("AWS_REGION", "us-east-1"),
                credentials: AwsCredentials {
                    access_key_id: std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default(),
                    secret_access_key: std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default(),
                    session_token: std::env::var("AWS_SESSION_TOKEN")
                        .ok()
                        .filter(|t| !t.is_empty()),
                },
            },
            _ => {
                tracing::warn!("AWS_S3_BUCKET_NAME not set -- storing media on local disk");
                StorageConfig::Local {
                    dir: PathBuf::from(env_or("MEDIA_DIR", "./media")),
                    public_base_url: env_or("PUBLIC_BASE_URL", "http://localhost:8080")
                        .trim_end_matches('/')
                        .to_string(),
                }
            }
        };

        Ok(Self {
            secret_key,
            access_token_expire_minutes: env_parse("ACCESS_TOKEN_EXPIRE_MINUTES", 30),
            google_client_id,
            yt_cookies_path: PathBuf::from(env_or("YT_COOKIES_PATH", "/app/cookies.txt")),
            spotify_client_id,
            spotify_client_secret,
            groq_api_key,
            groq_transcription_model: env_or("GROQ_TRANSCRIPTION_MODEL", "whisper-large-v3-turbo"),
            groq_lyrics_model: env_or(
                "GROQ_LYRICS_MODEL",
                "meta-llama/llama-4-scout-17b-16e-instruct",
            ),
            groq_chat_model: env_or("GROQ_CHAT_MODEL", "llama3-8b-8192"),
            storage,
            workspace_dir: PathBuf::from(env_or("WORKSPACE_DIR", "./workspace")),
            max_concurrent_jobs: env_parse("MAX_CONCURRENT_JOBS", 1usize).max(1),
            tool_timeout_secs: env_parse("TOOL_TIMEOUT_SECS", 1800),
            job_wait_timeout_secs: env_parse("JOB_WAIT_TIMEOUT_SECS", 1800),
            tools: ToolPaths {
                yt_dlp: env_or("YT_DLP_BIN", "yt-dlp"),
                spleeter: env_or("SPLEETER_BIN", "spleeter"),
                ffmpeg: env_or("FFMPEG_BIN", "ffmpeg"),
            },
        })
    }

    pub fn spotify_enabled(&self) -> bool {
        !self.spotify_client_id.is_empty() && !self.spotify_client_secret.is_empty()
    }
}

#[cfg(test)]
impl AppConfig {
    /// Configuration with every integration disabled, for tests.
    pub fn for_tests(workspace: &std::path::Path) -> Self {
        Self {
            secret_key: "test-secret".to_string(),
            access_token_expire_minutes: 30,
            google_client_id: String::new(),
            yt_cookies_path: workspace.join("cookies.txt"),
            spotify_client_id: String::new(),
            spotify_client_secret: String::new(),
            groq_api_key: String::new(),
            groq_transcription_model: "whisper-large-v3-turbo".to_string(),
            groq_lyrics_model: "meta-llama/llama-4-scout-17b-16e-instruct".to_string(),
            groq_chat_model: "llama3-8b-8192".to_string(),
            storage: StorageConfig::Local {
                dir: workspace.join("media"),
                public_base_url: "http://localhost:8080".to_string(),
            },
            workspace_dir: workspace.join("jobs"),
            max_concurrent_jobs: 1,
            tool_timeout_secs: 5,
            job_wait_timeout_secs: 5,
            tools: ToolPaths {
                yt_dlp: "yt-dlp".to_string(),
                spleeter: "spleeter".to_string(),
                ffmpeg: "ffmpeg".to_string(),
            },
        }
    }
}

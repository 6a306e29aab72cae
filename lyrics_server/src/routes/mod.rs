//! HTTP routes: auth, song processing, songs, lyrics, chatbot, KPIs.

pub mod auth;
pub mod chat;
pub mod lyrics;
pub mod process;
pub mod songs;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::config::AppConfig;
use crate::dashboard::kpi;
use crate::db::DbPool;
use crate::error::ApiError;
use crate::services::groq::GroqClient;
use crate::services::pipeline::PipelineContext;
use crate::services::storage::{MediaStore, LOCAL_MEDIA_ROUTE};

/// Shared state for route handlers.
#[derive(Clone)]
pub struct AppState {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub http: reqwest::Client,
    pub groq: GroqClient,
    pub storage: MediaStore,
}

impl AppState {
    pub fn new(pool: DbPool, config: AppConfig) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("lyric-replacer/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(15))
            .build()?;
        let groq = GroqClient::new(http.clone(), config.groq_api_key.clone());
        let storage = MediaStore::new(config.storage.clone(), http.clone());
        Ok(Self {
            pool,
            config: Arc::new(config),
            http,
            groq,
            storage,
        })
    }

    /// Handles the background executor needs.
    pub fn pipeline(&self) -> PipelineContext {
        PipelineContext {
            pool: self.pool.clone(),
            config: self.config.clone(),
            http: self.http.clone(),
            groq: self.groq.clone(),
            storage: self.storage.clone(),
        }
    }
}

/// Build the application router.
pub fn app_router(state: AppState) -> Router {
    // Waiting submissions may block for the whole job.
    let request_timeout = Duration::from_secs(state.config.job_wait_timeout_secs + 60);
    let media_dir = state.storage.local_dir().map(|d| d.to_path_buf());

    let mut router = Router::new()
        .route("/", get(root))
        .route("/health", get(health))
        .nest("/auth", auth::router())
        .nest("/process", process::router())
        .merge(songs::router())
        .nest("/lyrics", lyrics::router())
        .nest("/chatbot", chat::router())
        // KPI API
        .route("/kpi/jobs/success_rate", get(kpi_success_rate))
        .route("/kpi/jobs/avg_duration", get(kpi_avg_duration))
        .route("/kpi/jobs/by_status", get(kpi_jobs_by_status))
        .with_state(state);

    if let Some(dir) = media_dir {
        router = router.nest_service(LOCAL_MEDIA_ROUTE, ServeDir::new(dir));
    }

    router
        .layer(TimeoutLayer::new(request_timeout))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn root() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "msg": "AI Lyrics Replacer is running!" }))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// ── KPI API ──

#[derive(serde::Deserialize)]
pub struct KpiQuery {
    pub days: Option<i32>,
}

async fn kpi_success_rate(
    State(state): State<AppState>,
    Query(query): Query<KpiQuery>,
) -> Result<Json<kpi::JobSuccessRate>, ApiError> {
    let mut conn = state.pool.get().await?;
    let rate = kpi::query_success_rate(&mut conn, kpi::clamp_days(query.days)).await?;
    Ok(Json(rate))
}

async fn kpi_avg_duration(
    State(state): State<AppState>,
    Query(query): Query<KpiQuery>,
) -> Result<Json<kpi::AvgJobDuration>, ApiError> {
    let mut conn = state.pool.get().await?;
    let avg = kpi::query_avg_duration(&mut conn, kpi::clamp_days(query.days)).await?;
    Ok(Json(avg))
}

async fn kpi_jobs_by_status(
    State(state): State<AppState>,
    Query(query): Query<KpiQuery>,
) -> Result<Json<Vec<kpi::JobsByStatus>>, ApiError> {
    let mut conn = state.pool.get().await?;
    let rows = kpi::query_jobs_by_status(&mut conn, kpi::clamp_days(query.days)).await?;
    Ok(Json(rows))
}

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{header, Request, StatusCode};
    use tower::ServiceExt;

    use super::*;
    use crate::db::build_pool;

    fn test_app(dir: &std::path::Path) -> Router {
        let pool = build_pool("postgres://nobody@127.0.0.1:1/none", 1).unwrap();
        let state = AppState::new(pool, AppConfig::for_tests(dir)).unwrap();
        app_router(state)
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn root_reports_running() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_app(dir.path())
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["msg"], "AI Lyrics Replacer is running!");
    }

    #[tokio::test]
    async fn health_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_app(dir.path())
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn protected_routes_require_bearer_token() {
        let dir = tempfile::tempdir().unwrap();
        for uri in ["/auth/users/me", "/process/jobs", "/process/jobs/1"] {
            let response = test_app(dir.path())
                .oneshot(Request::get(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::UNAUTHORIZED, "{uri}");
            assert_eq!(response.headers()[header::WWW_AUTHENTICATE], "Bearer");
            assert_eq!(body_json(response).await["detail"], "Could not validate credentials");
        }
    }

    #[tokio::test]
    async fn garbage_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_app(dir.path())
            .oneshot(
                Request::get("/auth/users/me")
                    .header(header::AUTHORIZATION, "Bearer not.a.token")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn chatbot_without_api_key_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let response = test_app(dir.path())
            .oneshot(
                Request::post("/chatbot/ask")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(r#"{"question":"What is a chord?"}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await["detail"],
            "The AI service is currently unavailable."
        );
    }

    #[tokio::test]
    async fn local_media_is_served() {
        let dir = tempfile::tempdir().unwrap();
        let media = dir.path().join("media/songs");
        std::fs::create_dir_all(&media).unwrap();
        std::fs::write(media.join("a.txt"), b"stem").unwrap();

        let response = test_app(dir.path())
            .oneshot(Request::get("/media/songs/a.txt").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"stem");
    }
}

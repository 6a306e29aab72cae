//! Music-theory chatbot.

use axum::extract::State;
use axum::response::Json;
use axum::routing::post;
use axum::Router;
use serde::{Deserialize, Serialize};

use crate::error::ApiError;
use crate::routes::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/ask", post(ask))
}

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub question: String,
}

#[derive(Debug, Serialize)]
pub struct ChatAnswer {
    pub answer: String,
}

async fn ask(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatAnswer>, ApiError> {
    let question = req.question.trim();
    if question.is_empty() {
        return Err(ApiError::Unprocessable("Question must not be empty".into()));
    }
    let answer = state
        .groq
        .ask_maestro(&state.config.groq_chat_model, question)
        .await?;
    Ok(Json(ChatAnswer { answer }))
}

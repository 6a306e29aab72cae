//! Groq API client: whisper transcription and chat completions.
//!
//! Used for vocal transcription, lyric rewriting, music-prompt generation
//! and the "Maestro" music chatbot.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::services::lyrics::{Segment, Transcript};

const API_BASE: &str = "https://api.groq.com/openai/v1";

const MAESTRO_PROMPT: &str = "You are 'Maestro', an expert AI music analyst integrated into a music \
analysis application. Your purpose is to provide users with deep, yet accessible, insights into all \
aspects of music.\n\n\
## Core Capabilities:\n\
1. **Deep Song Analysis:** Perform detailed analysis of any song, breaking down its structure (verse, \
chorus, bridge), instrumentation, production, and emotional tone.\n\
2. **Music Theory Expert:** Explain and identify concepts like **BPM**, **key**, **mode**, **time \
signature**, **notes**, **chord progressions**, **harmony**, **melody**, and **rhythm**.\n\
3. **Audio Feature Specialist:** Clearly explain technical audio features such as **acousticness**, \
**danceability**, **energy**, **instrumentalness**, **liveness**, and **valence**.\n\
4. **Global Music Encyclopedia:** Discuss artists, bands and singers from all genres and eras, their \
discographies, musical evolution, and signature styles.\n\n\
## How to Respond:\n\
- **Explain Clearly:** Define any musical term in simple words first.\n\
- **Explain the 'Why':** Describe what high or low values of a parameter mean for the listener.\n\
- **Use Diverse Examples:** Use well-known songs and artists from various genres and periods.\n\
- **Be Analytical:** Combine several parameters into one cohesive explanation.\n\
- **Be Concise and Focused:** Keep answers on the question. Use bold for key terms.";

const MUSIC_PROMPT_SYSTEM: &str = "You are a poetic music producer assistant.\n\n\
You will be given a set of lyrics in LRC format (timestamped lines). Analyze the lyrical content and \
convert it into a vivid, emotional, and descriptive prompt suitable for an AI music generation model \
(such as MusicGen).\n\n\
Your music prompt should reflect:\n\
- The genre or style implied by the lyrics\n\
- The overall mood or emotion\n\
- Relevant instruments or sound palette\n\
- Any setting or cultural vibe inferred from the lyrics\n\n\
Your output must be a single paragraph, rich in descriptive language, and include all important \
details.\n\n\
Generate only the music prompt.";

#[derive(Debug, thiserror::Error)]
pub enum GroqError {
    #[error("GROQ_API_KEY is not configured")]
    NotConfigured,
    #[error("Groq request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("Groq returned {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("Groq response had no content")]
    EmptyResponse,
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Sampling settings for one chat completion.
#[derive(Debug, Clone, Copy)]
pub struct ChatOptions {
    pub temperature: f32,
    pub max_tokens: Option<u32>,
    pub timeout: Duration,
}

#[derive(Clone)]
pub struct GroqClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    language: Option<String>,
    duration: Option<f64>,
    #[serde(default)]
    segments: Vec<RawSegment>,
}

#[derive(Debug, Deserialize)]
struct RawSegment {
    start: Option<f64>,
    end: Option<f64>,
    text: Option<String>,
}

fn normalize_segments(raw: Vec<RawSegment>) -> Vec<Segment> {
    raw.into_iter()
        .map(|seg| {
            let start = seg.start.unwrap_or(0.0);
            let text = seg.text.unwrap_or_default();
            let text = text.trim();
            Segment {
                start,
                end: seg.end.unwrap_or(start + 2.0),
                text: if text.is_empty() { ".".to_string() } else { text.to_string() },
            }
        })
        .collect()
}

/// System prompt for rewriting a whole LRC file in one request.
pub fn rewrite_system_prompt(language: &str, duration: f64, instruction: &str) -> String {
    format!(
        "You are a creative and poetic songwriting assistant. Your task is to rewrite the \
following song lyrics in LRC format, based on the user's instruction.\n\
Keep the timestamps and structure of the LRC file unchanged.\n\
Rewrite the lyrics in the same language: {language}.\n\
The total song duration is {duration} seconds.\n\
Apply the following user instruction to the entire lyrics: {instruction}\n\
Only return the new LRC content, do not add any explanation or extra text."
    )
}

impl GroqClient {
    pub fn new(http: reqwest::Client, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_key: api_key.into(),
            base_url: API_BASE.to_string(),
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }

    async fn check(resp: reqwest::Response) -> Result<reqwest::Response, GroqError> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        tracing::warn!("Groq API error: {} {}", status, body);
        Err(GroqError::Status { status, body })
    }

    async fn send_chat(
        &self,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<String, GroqError> {
        let resp = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .json(payload)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let body: ChatResponse = resp.json().await?;
        body.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .ok_or(GroqError::EmptyResponse)
    }

    async fn send_transcription(
        &self,
        model: &str,
        bytes: Vec<u8>,
        file_name: String,
        timeout: Duration,
    ) -> Result<Transcript, GroqError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", model.to_string())
            .text("response_format", "verbose_json");

        let resp = self
            .http
            .post(format!("{}/audio/transcriptions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(timeout)
            .multipart(form)
            .send()
            .await?;
        let resp = Self::check(resp).await?;
        let raw: VerboseTranscription = resp.json().await?;
        Ok(Transcript {
            language: raw.language,
            duration: raw.duration,
            segments: normalize_segments(raw.segments),
        })
    }

    /// Send a system + user message pair and return the trimmed reply.
    pub async fn chat(
        &self,
        model: &str,
        system: &str,
        user: &str,
        options: ChatOptions,
    ) -> Result<String, GroqError> {
        if !self.is_configured() {
            return Err(GroqError::NotConfigured);
        }

        let mut payload = serde_json::json!({
            "model": model,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
            "temperature": options.temperature,
            "top_p": 1.0,
            "stream": false,
        });
        if let Some(max) = options.max_tokens {
            payload["max_completion_tokens"] = max.into();
        }

        let result = self.send_chat(&payload, options.timeout).await;
        crate::metrics::groq_request("chat", result.is_ok());
        result
    }

    /// Transcribe an audio file with per-segment timestamps.
    pub async fn transcribe(
        &self,
        model: &str,
        path: &Path,
        timeout: Duration,
    ) -> Result<Transcript, GroqError> {
        if !self.is_configured() {
            return Err(GroqError::NotConfigured);
        }

        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.mp3".to_string());

        let result = self.send_transcription(model, bytes, file_name, timeout).await;
        crate::metrics::groq_request("transcription", result.is_ok());
        result
    }

    /// Rewrite a full LRC file according to `instruction`, keeping timestamps.
    pub async fn rewrite_lyrics(
        &self,
        model: &str,
        lrc: &str,
        language: &str,
        duration: f64,
        instruction: &str,
    ) -> Result<String, GroqError> {
        tracing::info!(language, duration, "Rewriting lyrics");
        let system = rewrite_system_prompt(language, duration, instruction);
        self.chat(
            model,
            &system,
            lrc,
            ChatOptions {
                temperature: 1.0,
                max_tokens: Some(2048),
                timeout: Duration::from_secs(120),
            },
        )
        .await
    }

    /// Turn lyrics into a descriptive prompt for a music generation model.
    /// Failures yield an empty prompt.
    pub async fn music_prompt_from_lrc(&self, model: &str, lrc: &str) -> String {
        let result = self
            .chat(
                model,
                MUSIC_PROMPT_SYSTEM,
                lrc,
                ChatOptions {
                    temperature: 1.0,
                    max_tokens: Some(128),
                    timeout: Duration::from_secs(60),
                },
            )
            .await;
        match result {
            Ok(prompt) => prompt,
            Err(e) => {
                tracing::warn!("Failed to generate music prompt: {e}");
                String::new()
            }
        }
    }

    /// Answer a music question in the Maestro persona.
    pub async fn ask_maestro(&self, model: &str, question: &str) -> Result<String, GroqError> {
        self.chat(
            model,
            MAESTRO_PROMPT,
            question,
            ChatOptions {
                temperature: 0.7,
                max_tokens: None,
                timeout: Duration::from_secs(30),
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_fill_missing_end_and_text() {
        let segments = normalize_segments(vec![
            RawSegment { start: Some(1.0), end: None, text: Some("  hello ".to_string()) },
            RawSegment { start: Some(4.0), end: Some(5.5), text: Some("   ".to_string()) },
            RawSegment { start: None, end: None, text: None },
        ]);
        assert_eq!(segments[0], Segment { start: 1.0, end: 3.0, text: "hello".to_string() });
        assert_eq!(segments[1].text, ".");
        assert_eq!(segments[1].end, 5.5);
        assert_eq!(segments[2].start, 0.0);
        assert_eq!(segments[2].end, 2.0);
    }

    #[test]
    fn rewrite_prompt_mentions_language_and_instruction() {
        let prompt = rewrite_system_prompt("en", 183.5, "make it about cats");
        assert!(prompt.contains("same language: en"));
        assert!(prompt.contains("183.5 seconds"));
        assert!(prompt.contains("make it about cats"));
    }

    #[tokio::test]
    async fn unconfigured_client_refuses_requests() {
        let client = GroqClient::new(reqwest::Client::new(), "");
        let err = client.ask_maestro("llama3-8b-8192", "What is BPM?").await.unwrap_err();
        assert!(matches!(err, GroqError::NotConfigured));
        assert_eq!(client.music_prompt_from_lrc("m", "[00:01.00]hi").await, "");
    }
}

//! Song processing pipeline: one job from source URL to stored song.
//!
//! download → upload_original → separate → upload_stems → transcribe →
//! analyze → persist. Each stage is recorded in `job_steps` and bounded by
//! the tool timeout. Intermediate files live in `<workspace>/<job_id>`.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;

use crate::analytics;
use crate::config::AppConfig;
use crate::db::DbPool;
use crate::models::job::ProcessingJob;
use crate::models::song::NewSong;
use crate::models::split::NewSplit;
use crate::services::downloader::{self, DownloadedTrack, SourceKind};
use crate::services::groq::GroqClient;
use crate::services::job_service::JobOutcome;
use crate::services::lyrics::Transcript;
use crate::services::separator::{self, Stems, STEM_NAMES};
use crate::services::step_executor::{self, StepStatus, STEP_NAMES};
use crate::services::storage::{self, MediaStore};
use crate::services::{audio, song_service};

/// Everything a job needs from the running service.
#[derive(Clone)]
pub struct PipelineContext {
    pub pool: DbPool,
    pub config: Arc<AppConfig>,
    pub http: reqwest::Client,
    pub groq: GroqClient,
    pub storage: MediaStore,
}

impl PipelineContext {
    pub fn job_workspace(&self, job_id: i64) -> PathBuf {
        self.config.workspace_dir.join(job_id.to_string())
    }

    fn tool_timeout(&self) -> Duration {
        Duration::from_secs(self.config.tool_timeout_secs)
    }
}

/// Intermediate results carried from one step to the next.
struct JobRun<'a> {
    ctx: &'a PipelineContext,
    job: &'a ProcessingJob,
    workspace: PathBuf,
    track: Option<DownloadedTrack>,
    song_url: Option<String>,
    stems: Option<Stems>,
    stem_urls: BTreeMap<&'static str, String>,
    transcript: Option<Transcript>,
    summary: Option<Value>,
    descriptions: BTreeMap<&'static str, Value>,
    persisted: Option<(i64, i64)>,
}

fn missing(what: &str) -> anyhow::Error {
    anyhow::anyhow!("{what} unavailable (earlier step did not produce it)")
}

impl<'a> JobRun<'a> {
    fn new(ctx: &'a PipelineContext, job: &'a ProcessingJob) -> Self {
        Self {
            ctx,
            job,
            workspace: ctx.job_workspace(job.id),
            track: None,
            song_url: None,
            stems: None,
            stem_urls: BTreeMap::new(),
            transcript: None,
            summary: None,
            descriptions: BTreeMap::new(),
            persisted: None,
        }
    }

    async fn run_step(&mut self, name: &str) -> anyhow::Result<String> {
        match name {
            "download" => self.download().await,
            "upload_original" => self.upload_original().await,
            "separate" => self.separate().await,
            "upload_stems" => self.upload_stems().await,
            "transcribe" => self.transcribe().await,
            "analyze" => self.analyze().await,
            "persist" => self.persist().await,
            other => anyhow::bail!("unknown step {other}"),
        }
    }

    async fn download(&mut self) -> anyhow::Result<String> {
        let config = &self.ctx.config;
        let kind = SourceKind::parse(&self.job.source_kind)
            .ok_or_else(|| anyhow::anyhow!("unknown source kind {}", self.job.source_kind))?;
        let dir = self.workspace.join("download");

        let track = match kind {
            SourceKind::YouTube => {
                downloader::download_from_youtube(
                    config,
                    &self.job.source_url,
                    &dir,
                    self.ctx.tool_timeout(),
                )
                .await?
            }
            SourceKind::Spotify => {
                downloader::download_from_spotify(
                    config,
                    &self.ctx.http,
                    &self.job.source_url,
                    &dir,
                    self.ctx.tool_timeout(),
                )
                .await?
            }
        };
        let detail = format!("Downloaded \"{}\"", track.title);
        self.track = Some(track);
        Ok(detail)
    }

    async fn upload_original(&mut self) -> anyhow::Result<String> {
        let track = self.track.as_ref().ok_or_else(|| missing("downloaded track"))?;
        let url = self.ctx.storage.upload_file(&track.path, None).await?;
        self.song_url = Some(url.clone());
        Ok(url)
    }

    async fn separate(&mut self) -> anyhow::Result<String> {
        let track = self.track.as_ref().ok_or_else(|| missing("downloaded track"))?;
        let stems = separator::split_stems(
            &self.ctx.config.tools.spleeter,
            &track.path,
            &self.workspace.join("stems"),
            self.ctx.tool_timeout(),
        )
        .await?;
        let detail = format!("Stems written to {}", stems.dir.display());
        self.stems = Some(stems);
        Ok(detail)
    }

    async fn upload_stems(&mut self) -> anyhow::Result<String> {
        let stems = self.stems.as_ref().ok_or_else(|| missing("stems"))?;
        let batch = uuid::Uuid::new_v4();
        for name in STEM_NAMES {
            let path = stems
                .get(name)
                .ok_or_else(|| anyhow::anyhow!("{name} stem missing"))?;
            let url = self
                .ctx
                .storage
                .upload_file(path, Some(storage::stem_key(&batch, name).as_str()))
                .await?;
            self.stem_urls.insert(name, url);
        }
        Ok(format!("Uploaded {} stems", self.stem_urls.len()))
    }

    async fn transcribe(&mut self) -> anyhow::Result<String> {
        let stems = self.stems.as_ref().ok_or_else(|| missing("stems"))?;
        let vocals = stems.get("vocals").ok_or_else(|| missing("vocals stem"))?;
        let compressed = audio::compress_for_transcription(
            &self.ctx.config.tools.ffmpeg,
            vocals,
            self.ctx.tool_timeout(),
        )
        .await?;
        let transcript = self
            .ctx
            .groq
            .transcribe(
                &self.ctx.config.groq_transcription_model,
                &compressed,
                self.ctx.tool_timeout(),
            )
            .await?;
        let detail = format!(
            "{} segments, language {}",
            transcript.segments.len(),
            transcript.language.as_deref().unwrap_or("unknown")
        );
        self.transcript = Some(transcript);
        Ok(detail)
    }

    async fn analyze(&mut self) -> anyhow::Result<String> {
        let track = self.track.as_ref().ok_or_else(|| missing("downloaded track"))?;
        let stems = self.stems.as_ref().ok_or_else(|| missing("stems"))?;
        let ffmpeg = &self.ctx.config.tools.ffmpeg;
        let timeout = self.ctx.tool_timeout();

        let samples =
            audio::decode_mono(ffmpeg, &track.path, audio::ANALYSIS_SAMPLE_RATE, timeout).await?;
        let summary = tokio::task::spawn_blocking(move || {
            analytics::summarize_track(&samples, audio::ANALYSIS_SAMPLE_RATE)
        })
        .await?;
        self.summary = Some(serde_json::to_value(&summary)?);

        self.descriptions = analytics::analyze_stems_in_parallel(ffmpeg, stems, timeout).await;
        let failed = self
            .descriptions
            .values()
            .filter(|d| d.get("error").is_some())
            .count();
        if failed > 0 {
            tracing::warn!(job_id = self.job.id, failed, "Some stem analyses failed");
        }

        Ok(format!(
            "bpm {}, key {}, {} of {} stems described",
            summary.bpm.map(|b| b.to_string()).unwrap_or_else(|| "?".into()),
            summary.key.as_deref().unwrap_or("?"),
            self.descriptions.len() - failed,
            self.descriptions.len()
        ))
    }

    async fn persist(&mut self) -> anyhow::Result<String> {
        let track = self.track.as_ref().ok_or_else(|| missing("downloaded track"))?;
        let song_url = self.song_url.clone().ok_or_else(|| missing("song url"))?;
        let transcript = self.transcript.as_ref().ok_or_else(|| missing("transcript"))?;
        let new_song = NewSong {
            title: track.title.clone(),
            song_url,
            lyrics: serde_json::to_value(transcript)?,
            description: self.summary.clone(),
            owner_id: self.job.owner_id,
        };
        let new_split = build_split(0, &self.stem_urls, &mut self.descriptions);

        let mut conn = self.ctx.pool.get().await?;
        let (song, split) =
            song_service::create_song_with_split(&mut conn, new_song, new_split).await?;

        self.persisted = Some((song.id, split.id));
        Ok(format!("song {} split {}", song.id, split.id))
    }
}

/// Map uploaded stem URLs and instrument descriptions onto a split row.
fn build_split(
    song_id: i64,
    urls: &BTreeMap<&'static str, String>,
    descriptions: &mut BTreeMap<&'static str, Value>,
) -> NewSplit {
    let url = |stem: &str| urls.get(stem).cloned();
    NewSplit {
        song_id,
        bass_audio_url: url("bass"),
        vocals_audio_url: url("vocals"),
        piano_audio_url: url("piano"),
        other_audio_url: url("other"),
        drum_audio_url: url("drums"),
        bass_description: descriptions.remove("bass"),
        vocals_description: descriptions.remove("vocal"),
        piano_description: descriptions.remove("piano"),
        other_description: descriptions.remove("other"),
        drum_description: descriptions.remove("drums"),
        guitar_description: descriptions.remove("guitar"),
        flute_description: descriptions.remove("flute"),
        violin_description: descriptions.remove("violin"),
    }
}

/// Step currently being run and its `job_steps` row, once inserted.
#[derive(Debug, Default)]
struct StepCursor {
    index: usize,
    step_id: Option<i64>,
}

/// Outcome of a job whose step `name` failed with `error`.
fn step_failure(name: &str, error: &anyhow::Error) -> JobOutcome {
    JobOutcome::Failed {
        error: format!("{name} failed: {error:#}"),
    }
}

/// Outcome of a job whose steps all passed.
fn completed(persisted: Option<(i64, i64)>) -> JobOutcome {
    match persisted {
        Some((song_id, split_id)) => JobOutcome::Succeeded { song_id, split_id },
        None => JobOutcome::Failed {
            error: "pipeline finished without storing a song".to_string(),
        },
    }
}

/// Run one step within the tool timeout.
async fn attempt_step(run: &mut JobRun<'_>, name: &str, timeout: Duration) -> anyhow::Result<String> {
    match tokio::time::timeout(timeout, run.run_step(name)).await {
        Ok(result) => result,
        Err(_) => Err(anyhow::anyhow!("Step timed out after {}s", timeout.as_secs())),
    }
}

/// Mark the step under `cursor` failed and every later step skipped.
async fn record_failure(
    conn: &mut diesel_async::AsyncPgConnection,
    job_id: i64,
    cursor: &StepCursor,
    duration_ms: i32,
    detail: String,
) -> anyhow::Result<()> {
    let step_id = match cursor.step_id {
        Some(id) => id,
        None => {
            let name = STEP_NAMES[cursor.index];
            step_executor::start_step(conn, job_id, name, step_executor::sequence_of(cursor.index))
                .await?
        }
    };
    step_executor::complete_step(conn, step_id, StepStatus::Failed, duration_ms, Some(detail))
        .await?;
    step_executor::skip_remaining(conn, job_id, cursor.index).await
}

/// Run every step of `job`, recording progress. Returns how the job ended;
/// the caller marks the job finished. When step bookkeeping itself fails the
/// current step is still recorded as failed and the rest as skipped.
pub async fn run_job(ctx: &PipelineContext, job: &ProcessingJob) -> anyhow::Result<JobOutcome> {
    let mut run = JobRun::new(ctx, job);
    let mut cursor = StepCursor::default();

    match run_steps(ctx, &mut run, &mut cursor).await {
        Ok(outcome) => Ok(outcome),
        Err(e) => {
            let detail = crate::services::tools::truncate_tail(&format!("{e:#}"), 4096);
            let recorded = match ctx.pool.get().await {
                Ok(mut conn) => record_failure(&mut conn, job.id, &cursor, 0, detail).await,
                Err(pool_err) => Err(pool_err.into()),
            };
            if let Err(record_err) = recorded {
                tracing::warn!(job_id = job.id, "Could not record aborted step: {record_err:#}");
            }
            Err(e)
        }
    }
}

async fn run_steps(
    ctx: &PipelineContext,
    run: &mut JobRun<'_>,
    cursor: &mut StepCursor,
) -> anyhow::Result<JobOutcome> {
    let job_id = run.job.id;
    let timeout = ctx.tool_timeout();
    let mut conn = ctx.pool.get().await?;

    for (index, name) in STEP_NAMES.iter().enumerate() {
        *cursor = StepCursor { index, step_id: None };
        let step_start = Instant::now();
        let step_id =
            step_executor::start_step(&mut conn, job_id, name, step_executor::sequence_of(index))
                .await?;
        cursor.step_id = Some(step_id);

        tracing::info!(job_id, step = %name, "Running step");

        // The pool connection is not held across the step itself.
        drop(conn);
        let result = attempt_step(run, name, timeout).await;
        conn = ctx.pool.get().await?;

        let step_duration = step_start.elapsed().as_millis().min(i32::MAX as u128) as i32;
        crate::metrics::step_duration(name, step_duration as u64);

        match result {
            Ok(detail) => {
                step_executor::complete_step(
                    &mut conn,
                    step_id,
                    StepStatus::Succeeded,
                    step_duration,
                    Some(detail),
                )
                .await?;
                tracing::info!(job_id, step = %name, duration_ms = step_duration, "Step passed");
            }
            Err(e) => {
                tracing::warn!(job_id, step = %name, "Step failed: {e:#}");
                let detail = crate::services::tools::truncate_tail(&format!("{e:#}"), 4096);
                if let Err(record_err) =
                    record_failure(&mut conn, job_id, cursor, step_duration, detail).await
                {
                    tracing::warn!(job_id, "Could not record failed step: {record_err:#}");
                }
                return Ok(step_failure(name, &e));
            }
        }
    }

    Ok(completed(run.persisted))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn split_maps_stems_and_instruments_to_columns() {
        let urls: BTreeMap<&'static str, String> = STEM_NAMES
            .iter()
            .map(|name| (*name, format!("https://cdn.test/{name}.wav")))
            .collect();
        let mut descriptions: BTreeMap<&'static str, Value> = analytics::StemKind::ALL
            .iter()
            .map(|kind| (kind.name(), json!({ "instrument": kind.name() })))
            .collect();

        let split = build_split(9, &urls, &mut descriptions);
        assert_eq!(split.song_id, 9);
        assert_eq!(split.drum_audio_url.as_deref(), Some("https://cdn.test/drums.wav"));
        assert_eq!(split.vocals_audio_url.as_deref(), Some("https://cdn.test/vocals.wav"));
        assert_eq!(split.vocals_description.unwrap()["instrument"], "vocal");
        assert_eq!(split.drum_description.unwrap()["instrument"], "drums");
        assert_eq!(split.violin_description.unwrap()["instrument"], "violin");
        assert!(descriptions.is_empty());
    }

    #[test]
    fn workspace_is_per_job() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        assert_eq!(ctx.job_workspace(17), dir.path().join("jobs").join("17"));
    }

    fn test_context(dir: &std::path::Path) -> PipelineContext {
        let config = AppConfig::for_tests(dir);
        let http = reqwest::Client::new();
        PipelineContext {
            pool: crate::db::build_pool("postgres://localhost/unused", 1).unwrap(),
            groq: GroqClient::new(http.clone(), ""),
            storage: MediaStore::new(config.storage.clone(), http.clone()),
            config: Arc::new(config),
            http,
        }
    }

    fn queued_job(source_kind: &str) -> ProcessingJob {
        ProcessingJob {
            id: 3,
            owner_id: 1,
            source_url: "https://youtu.be/x".to_string(),
            source_kind: source_kind.to_string(),
            status: "running".to_string(),
            song_id: None,
            split_id: None,
            error: None,
            started_at: None,
            finished_at: None,
            duration_ms: None,
            create_date: None,
        }
    }

    #[tokio::test]
    async fn failing_step_fails_the_job_with_step_name() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let job = queued_job("youtube");
        let mut run = JobRun::new(&ctx, &job);

        let err = attempt_step(&mut run, "upload_original", Duration::from_secs(5))
            .await
            .unwrap_err();
        match step_failure("upload_original", &err) {
            JobOutcome::Failed { error } => {
                assert!(error.starts_with("upload_original failed: "), "{error}");
                assert!(error.contains("downloaded track unavailable"), "{error}");
            }
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unknown_source_kind_fails_download() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = test_context(dir.path());
        let job = queued_job("soundcloud");
        let mut run = JobRun::new(&ctx, &job);

        let err = attempt_step(&mut run, "download", Duration::from_secs(5))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unknown source kind soundcloud"));
        assert!(run.track.is_none());
    }

    #[test]
    fn completed_run_requires_a_stored_song() {
        assert_eq!(
            completed(Some((4, 9))),
            JobOutcome::Succeeded { song_id: 4, split_id: 9 }
        );
        assert!(matches!(completed(None), JobOutcome::Failed { .. }));
    }
}

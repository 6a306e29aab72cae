//! Processing job persistence.

use std::time::Instant;

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::job::{JobStatus, NewProcessingJob, ProcessingJob};
use crate::models::job_step::JobStep;
use crate::schema::{job_steps, processing_jobs};
use crate::services::downloader::SourceKind;
use crate::services::step_executor::StepStatus;

/// Queue a new job for `owner_id`.
pub async fn create_job(
    conn: &mut AsyncPgConnection,
    owner_id: i64,
    source_url: &str,
    kind: SourceKind,
) -> anyhow::Result<ProcessingJob> {
    let new_job = NewProcessingJob {
        owner_id,
        source_url: source_url.to_string(),
        source_kind: kind.as_str().to_string(),
        status: JobStatus::Pending.as_str().to_string(),
    };
    let result = diesel::insert_into(processing_jobs::table)
        .values(&new_job)
        .returning(ProcessingJob::as_returning())
        .get_result(conn)
        .await?;
    crate::metrics::job_status_changed(JobStatus::Pending.as_str());
    Ok(result)
}

pub async fn get_job(conn: &mut AsyncPgConnection, job_id: i64) -> anyhow::Result<Option<ProcessingJob>> {
    let result = processing_jobs::table
        .find(job_id)
        .select(ProcessingJob::as_select())
        .first(conn)
        .await
        .optional()?;
    Ok(result)
}

/// Newest first.
pub async fn list_jobs_for_owner(
    conn: &mut AsyncPgConnection,
    owner_id: i64,
    limit: i64,
) -> anyhow::Result<Vec<ProcessingJob>> {
    let results = processing_jobs::table
        .filter(processing_jobs::owner_id.eq(owner_id))
        .order(processing_jobs::id.desc())
        .limit(limit)
        .select(ProcessingJob::as_select())
        .load(conn)
        .await?;
    Ok(results)
}

pub async fn list_steps(conn: &mut AsyncPgConnection, job_id: i64) -> anyhow::Result<Vec<JobStep>> {
    let results = job_steps::table
        .filter(job_steps::job_id.eq(job_id))
        .order(job_steps::sequence.asc())
        .select(JobStep::as_select())
        .load(conn)
        .await?;
    Ok(results)
}

pub async fn count_running(conn: &mut AsyncPgConnection) -> anyhow::Result<i64> {
    let count = processing_jobs::table
        .filter(processing_jobs::status.eq(JobStatus::Running.as_str()))
        .count()
        .get_result(conn)
        .await?;
    Ok(count)
}

type PendingJob = diesel::dsl::Filter<
    diesel::dsl::Find<processing_jobs::table, i64>,
    diesel::dsl::Eq<processing_jobs::status, &'static str>,
>;

/// The job row, only while it is still pending.
fn pending_job(job_id: i64) -> PendingJob {
    processing_jobs::table
        .find(job_id)
        .filter(processing_jobs::status.eq(JobStatus::Pending.as_str()))
}

/// Move the oldest pending job to `running` and return it. The update is
/// guarded on `status = 'pending'` so a job is claimed at most once.
pub async fn claim_next_pending(conn: &mut AsyncPgConnection) -> anyhow::Result<Option<ProcessingJob>> {
    let oldest: Option<i64> = processing_jobs::table
        .filter(processing_jobs::status.eq(JobStatus::Pending.as_str()))
        .order(processing_jobs::id.asc())
        .select(processing_jobs::id)
        .first(conn)
        .await
        .optional()?;

    let Some(job_id) = oldest else {
        return Ok(None);
    };

    let claimed = diesel::update(pending_job(job_id))
        .set((
            processing_jobs::status.eq(JobStatus::Running.as_str()),
            processing_jobs::started_at.eq(chrono::Utc::now()),
        ))
        .returning(ProcessingJob::as_returning())
        .get_result(conn)
        .await
        .optional()?;

    if claimed.is_some() {
        crate::metrics::job_status_changed(JobStatus::Running.as_str());
    }
    Ok(claimed)
}

/// How a finished job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Succeeded { song_id: i64, split_id: i64 },
    Failed { error: String },
}

/// Move a job to its terminal status with timing.
pub async fn finish_job(
    conn: &mut AsyncPgConnection,
    job_id: i64,
    outcome: &JobOutcome,
    start: Instant,
) -> anyhow::Result<()> {
    let duration = start.elapsed().as_millis().min(i32::MAX as u128) as i32;
    let now = chrono::Utc::now();

    let status = match outcome {
        JobOutcome::Succeeded { song_id, split_id } => {
            diesel::update(processing_jobs::table.find(job_id))
                .set((
                    processing_jobs::status.eq(JobStatus::Succeeded.as_str()),
                    processing_jobs::song_id.eq(Some(*song_id)),
                    processing_jobs::split_id.eq(Some(*split_id)),
                    processing_jobs::finished_at.eq(now),
                    processing_jobs::duration_ms.eq(duration),
                ))
                .execute(conn)
                .await?;
            JobStatus::Succeeded
        }
        JobOutcome::Failed { error } => {
            diesel::update(processing_jobs::table.find(job_id))
                .set((
                    processing_jobs::status.eq(JobStatus::Failed.as_str()),
                    processing_jobs::error.eq(Some(error.as_str())),
                    processing_jobs::finished_at.eq(now),
                    processing_jobs::duration_ms.eq(duration),
                ))
                .execute(conn)
                .await?;
            JobStatus::Failed
        }
    };

    crate::metrics::job_status_changed(status.as_str());
    crate::metrics::job_duration(duration as u64);

    tracing::info!(
        job_id,
        status = status.as_str(),
        duration_ms = duration,
        "Job finished"
    );
    Ok(())
}

/// Jobs still `running` when the service starts were cut off by a restart.
pub async fn fail_orphaned_jobs(conn: &mut AsyncPgConnection) -> anyhow::Result<usize> {
    let now = chrono::Utc::now();
    let orphaned: Vec<i64> = diesel::update(
        processing_jobs::table.filter(processing_jobs::status.eq(JobStatus::Running.as_str())),
    )
    .set((
        processing_jobs::status.eq(JobStatus::Failed.as_str()),
        processing_jobs::error.eq(Some("interrupted")),
        processing_jobs::finished_at.eq(now),
    ))
    .returning(processing_jobs::id)
    .get_results(conn)
    .await?;

    if !orphaned.is_empty() {
        diesel::update(
            job_steps::table
                .filter(job_steps::job_id.eq_any(orphaned.clone()))
                .filter(job_steps::status.eq(StepStatus::Running.as_str())),
        )
        .set((
            job_steps::status.eq(StepStatus::Failed.as_str()),
            job_steps::detail.eq(Some("interrupted")),
            job_steps::finished_at.eq(now),
        ))
        .execute(conn)
        .await?;
    }
    Ok(orphaned.len())
}

/// Poll until the job reaches a terminal status or `timeout` elapses.
/// Returns the last observed row.
pub async fn wait_for_job(
    pool: &crate::db::DbPool,
    job_id: i64,
    timeout: std::time::Duration,
) -> anyhow::Result<Option<ProcessingJob>> {
    let deadline = Instant::now() + timeout;
    loop {
        let job = {
            let mut conn = pool.get().await?;
            get_job(&mut conn, job_id).await?
        };
        let done = job
            .as_ref()
            .and_then(|j| j.job_status())
            .map(JobStatus::is_terminal)
            .unwrap_or(true);
        if done || Instant::now() >= deadline {
            return Ok(job);
        }
        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claim_only_updates_pending_rows() {
        let claim = diesel::update(pending_job(7))
            .set(processing_jobs::status.eq(JobStatus::Running.as_str()));
        let sql = diesel::debug_query::<diesel::pg::Pg, _>(&claim).to_string();
        assert!(sql.starts_with(r#"UPDATE "processing_jobs" SET "status" = $1"#), "{sql}");
        assert!(sql.contains(r#""processing_jobs"."id" = $2"#), "{sql}");
        assert!(sql.contains(r#""processing_jobs"."status" = $3"#), "{sql}");
        assert!(sql.ends_with(r#"-- binds: ["running", 7, "pending"]"#), "{sql}");
    }
}

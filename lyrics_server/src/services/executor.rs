//! Job executor: background task that polls for pending jobs and runs them.
//!
//! Claims `status = 'pending'` jobs up to the concurrency limit and runs the
//! processing pipeline for each on its own task.

use std::time::{Duration, Instant};

use crate::models::job::ProcessingJob;
use crate::services::job_service::{self, JobOutcome};
use crate::services::pipeline::{self, PipelineContext};

const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Run the executor loop forever. Spawned as a background tokio task.
pub async fn run_executor(ctx: PipelineContext) {
    tracing::info!(
        workspace = %ctx.config.workspace_dir.display(),
        max_concurrent = ctx.config.max_concurrent_jobs,
        "Job executor started"
    );

    match ctx.pool.get().await {
        Ok(mut conn) => match job_service::fail_orphaned_jobs(&mut conn).await {
            Ok(0) => {}
            Ok(count) => tracing::warn!(count, "Marked interrupted jobs as failed"),
            Err(e) => tracing::error!("Failed to recover interrupted jobs: {e}"),
        },
        Err(e) => tracing::error!("Executor could not reach the database: {e}"),
    }

    loop {
        if let Err(e) = poll_and_execute(&ctx).await {
            tracing::error!("Executor poll error: {e}");
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

/// Claim pending jobs while there are free slots and spawn them.
async fn poll_and_execute(ctx: &PipelineContext) -> anyhow::Result<()> {
    let mut conn = ctx.pool.get().await?;

    let running = job_service::count_running(&mut conn).await?;
    crate::metrics::running_jobs(running.max(0) as usize);

    let limit = ctx.config.max_concurrent_jobs as i64;
    for _ in running..limit {
        let Some(job) = job_service::claim_next_pending(&mut conn).await? else {
            break;
        };

        tracing::info!(
            job_id = job.id,
            source = %job.source_kind,
            url = %job.source_url,
            "Executing job"
        );

        let ctx = ctx.clone();
        tokio::spawn(async move { execute_job(ctx, job).await });
    }

    Ok(())
}

async fn execute_job(ctx: PipelineContext, job: ProcessingJob) {
    let start = Instant::now();

    let outcome = match pipeline::run_job(&ctx, &job).await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(job_id = job.id, "Job aborted: {e:#}");
            JobOutcome::Failed {
                error: format!("{e:#}"),
            }
        }
    };

    match ctx.pool.get().await {
        Ok(mut conn) => {
            if let Err(e) = job_service::finish_job(&mut conn, job.id, &outcome, start).await {
                tracing::error!(job_id = job.id, "Failed to record job result: {e}");
            }
        }
        Err(e) => tracing::error!(job_id = job.id, "Failed to record job result: {e}"),
    }

    let workspace = ctx.job_workspace(job.id);
    if let Err(e) = tokio::fs::remove_dir_all(&workspace).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(job_id = job.id, "Workspace cleanup failed: {e}");
        }
    }
}

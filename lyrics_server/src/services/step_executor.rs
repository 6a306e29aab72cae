//! Step bookkeeping: records each pipeline stage of a job in `job_steps`.

use diesel::prelude::*;
use diesel_async::{AsyncPgConnection, RunQueryDsl};

use crate::models::job_step::{JobStep, NewJobStep};
use crate::schema::job_steps;

/// Stages of a processing job, in execution order.
pub const STEP_NAMES: [&str; 7] = [
    "download",
    "upload_original",
    "separate",
    "upload_stems",
    "transcribe",
    "analyze",
    "persist",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepStatus {
    Running,
    Succeeded,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            StepStatus::Running => "running",
            StepStatus::Succeeded => "succeeded",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        }
    }
}

/// Record a step starting.
pub async fn start_step(
    conn: &mut AsyncPgConnection,
    job_id: i64,
    step_name: &str,
    sequence: i32,
) -> anyhow::Result<i64> {
    let new_step = NewJobStep {
        job_id,
        name: step_name.to_string(),
        sequence,
        status: StepStatus::Running.as_str().to_string(),
    };

    let result: JobStep = diesel::insert_into(job_steps::table)
        .values(&new_step)
        .returning(JobStep::as_returning())
        .get_result(conn)
        .await?;

    Ok(result.id)
}

/// Record a step completing.
pub async fn complete_step(
    conn: &mut AsyncPgConnection,
    step_id: i64,
    status: StepStatus,
    duration_ms: i32,
    detail: Option<String>,
) -> anyhow::Result<()> {
    diesel::update(job_steps::table.find(step_id))
        .set((
            job_steps::status.eq(status.as_str()),
            job_steps::duration_ms.eq(duration_ms),
            job_steps::detail.eq(detail),
            job_steps::finished_at.eq(chrono::Utc::now()),
        ))
        .execute(conn)
        .await?;

    Ok(())
}

/// Sequence number of the step at `index` (1-based).
pub fn sequence_of(index: usize) -> i32 {
    (index + 1) as i32
}

/// Steps that never run once the step at `failed_index` has failed.
pub fn steps_after(failed_index: usize) -> impl Iterator<Item = (i32, &'static str)> {
    STEP_NAMES
        .iter()
        .enumerate()
        .skip(failed_index + 1)
        .map(|(index, name)| (sequence_of(index), *name))
}

/// Record every step after `failed_index` as skipped.
pub async fn skip_remaining(
    conn: &mut AsyncPgConnection,
    job_id: i64,
    failed_index: usize,
) -> anyhow::Result<()> {
    for (sequence, name) in steps_after(failed_index) {
        let step_id = start_step(conn, job_id, name, sequence).await?;
        complete_step(
            conn,
            step_id,
            StepStatus::Skipped,
            0,
            Some("Skipped (previous step failed)".to_string()),
        )
        .await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{steps_after, STEP_NAMES};

    #[test]
    fn failure_skips_every_later_step() {
        let separate = STEP_NAMES.iter().position(|n| *n == "separate").unwrap();
        let skipped: Vec<_> = steps_after(separate).collect();
        assert_eq!(
            skipped,
            [
                (4, "upload_stems"),
                (5, "transcribe"),
                (6, "analyze"),
                (7, "persist"),
            ]
        );
    }

    #[test]
    fn failure_of_first_step_skips_the_rest_in_order() {
        let skipped: Vec<_> = steps_after(0).collect();
        assert_eq!(skipped.len(), STEP_NAMES.len() - 1);
        assert_eq!(skipped.first(), Some(&(2, "upload_original")));
        assert!(skipped.windows(2).all(|w| w[0].0 + 1 == w[1].0));
    }

    #[test]
    fn failure_of_last_step_skips_nothing() {
        assert_eq!(steps_after(STEP_NAMES.len() - 1).count(), 0);
    }
}

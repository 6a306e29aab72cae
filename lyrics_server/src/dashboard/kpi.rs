//! KPI queries over processing jobs.

use diesel::sql_types::{BigInt, Double, Nullable, Text};
use diesel::QueryableByName;
use diesel_async::{AsyncPgConnection, RunQueryDsl};
use serde::Serialize;

/// Window in days, bounded to 1..=3650.
pub fn clamp_days(days: Option<i32>) -> i32 {
    days.unwrap_or(30).clamp(1, 3650)
}

/// Job success rate over N days.
#[derive(Debug, Serialize, QueryableByName)]
pub struct JobSuccessRate {
    #[diesel(sql_type = BigInt)]
    pub total: i64,
    #[diesel(sql_type = BigInt)]
    pub succeeded: i64,
    #[diesel(sql_type = Double)]
    pub rate: f64,
}

pub async fn query_success_rate(
    conn: &mut AsyncPgConnection,
    days: i32,
) -> anyhow::Result<JobSuccessRate> {
    let result = diesel::sql_query(format!(
        "SELECT \
            COUNT(*) AS total, \
            COUNT(*) FILTER (WHERE status = 'succeeded') AS succeeded, \
            COALESCE(COUNT(*) FILTER (WHERE status = 'succeeded')::float / NULLIF(COUNT(*), 0), 0) AS rate \
         FROM processing_jobs \
         WHERE create_date >= NOW() - INTERVAL '{days} days' \
           AND status IN ('succeeded', 'failed')"
    ))
    .get_result(conn)
    .await?;
    Ok(result)
}

/// Average job duration over N days.
#[derive(Debug, Serialize, QueryableByName)]
pub struct AvgJobDuration {
    #[diesel(sql_type = Nullable<Double>)]
    pub avg_ms: Option<f64>,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

pub async fn query_avg_duration(
    conn: &mut AsyncPgConnection,
    days: i32,
) -> anyhow::Result<AvgJobDuration> {
    let result = diesel::sql_query(format!(
        "SELECT \
            AVG(duration_ms)::float AS avg_ms, \
            COUNT(*) AS count \
         FROM processing_jobs \
         WHERE create_date >= NOW() - INTERVAL '{days} days' \
           AND status = 'succeeded' \
           AND duration_ms IS NOT NULL"
    ))
    .get_result(conn)
    .await?;
    Ok(result)
}

/// Job count grouped by status.
#[derive(Debug, Serialize, QueryableByName)]
pub struct JobsByStatus {
    #[diesel(sql_type = Text)]
    pub status: String,
    #[diesel(sql_type = BigInt)]
    pub count: i64,
}

pub async fn query_jobs_by_status(
    conn: &mut AsyncPgConnection,
    days: i32,
) -> anyhow::Result<Vec<JobsByStatus>> {
    let results = diesel::sql_query(format!(
        "SELECT status, COUNT(*) AS count \
         FROM processing_jobs \
         WHERE create_date >= NOW() - INTERVAL '{days} days' \
         GROUP BY status \
         ORDER BY count DESC"
    ))
    .load(conn)
    .await?;
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn day_window_is_bounded() {
        assert_eq!(clamp_days(None), 30);
        assert_eq!(clamp_days(Some(0)), 1);
        assert_eq!(clamp_days(Some(-5)), 1);
        assert_eq!(clamp_days(Some(100_000)), 3650);
        assert_eq!(clamp_days(Some(7)), 7);
    }
}

//! job_steps: Individual stage within a processing job.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};

use crate::schema::job_steps;

#[derive(Debug, Clone, Queryable, Selectable, Serialize, Deserialize)]
#[diesel(table_name = job_steps)]
pub struct JobStep {
    pub id: i64,
    pub job_id: i64,
    pub name: String,
    pub sequence: i32,
    pub status: String,
    pub detail: Option<String>,
    pub duration_ms: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = job_steps)]
pub struct NewJobStep {
    pub job_id: i64,
    pub name: String,
    pub sequence: i32,
    pub status: String,
}

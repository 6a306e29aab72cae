//! Data models for users, songs, stem splits and processing jobs.

pub mod job;
pub mod job_step;
pub mod song;
pub mod split;
pub mod user;

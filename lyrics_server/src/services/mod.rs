//! Lyric Replacer services: accounts, media tooling and the processing pipeline.

pub mod audio;
pub mod auth_service;
pub mod downloader;
pub mod executor;
pub mod groq;
pub mod job_service;
pub mod lyrics;
pub mod pipeline;
pub mod separator;
pub mod song_service;
pub mod spotify;
pub mod step_executor;
pub mod storage;
pub mod tools;
pub mod user_service;

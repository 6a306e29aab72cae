//! Diesel table definitions.
//!
//! Tables: users, songs, splits, processing_jobs, job_steps.

diesel::table! {
    users (id) {
        id -> Int8,
        name -> Nullable<Varchar>,
        username -> Varchar,
        email -> Varchar,
        hashed_password -> Varchar,
        is_active -> Bool,
        profile_picture_url -> Nullable<Varchar>,
        create_date -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    songs (id) {
        id -> Int8,
        title -> Varchar,
        song_url -> Varchar,
        lyrics -> Jsonb,
        description -> Nullable<Jsonb>,
        owner_id -> Int8,
        create_date -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    splits (id) {
        id -> Int8,
        song_id -> Int8,
        bass_audio_url -> Nullable<Varchar>,
        bass_description -> Nullable<Jsonb>,
        vocals_audio_url -> Nullable<Varchar>,
        vocals_description -> Nullable<Jsonb>,
        piano_audio_url -> Nullable<Varchar>,
        piano_description -> Nullable<Jsonb>,
        other_audio_url -> Nullable<Varchar>,
        other_description -> Nullable<Jsonb>,
        drum_audio_url -> Nullable<Varchar>,
        drum_description -> Nullable<Jsonb>,
        guitar_description -> Nullable<Jsonb>,
        flute_description -> Nullable<Jsonb>,
        violin_description -> Nullable<Jsonb>,
        create_date -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    processing_jobs (id) {
        id -> Int8,
        owner_id -> Int8,
        source_url -> Varchar,
        source_kind -> Varchar,
        status -> Varchar,
        song_id -> Nullable<Int8>,
        split_id -> Nullable<Int8>,
        error -> Nullable<Text>,
        started_at -> Nullable<Timestamptz>,
        finished_at -> Nullable<Timestamptz>,
        duration_ms -> Nullable<Int4>,
        create_date -> Nullable<Timestamptz>,
    }
}

diesel::table! {
    job_steps (id) {
        id -> Int8,
        job_id -> Int8,
        name -> Varchar,
        sequence -> Int4,
        status -> Varchar,
        detail -> Nullable<Text>,
        duration_ms -> Nullable<Int4>,
        started_at -> Nullable<Timestamptz>,
        finished_at -> Nullable<Timestamptz>,
    }
}

diesel::joinable!(songs -> users (owner_id));
diesel::joinable!(splits -> songs (song_id));
diesel::joinable!(processing_jobs -> users (owner_id));
diesel::joinable!(job_steps -> processing_jobs (job_id));

diesel::allow_tables_to_appear_in_same_query!(users, songs, splits, processing_jobs, job_steps);

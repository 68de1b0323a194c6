//! Core data models for the upload gateway.
//!
//! `FileRecord` maps to the `files` table via `sqlx::FromRow`; the rest are
//! in-process values passed between the ingestion services and serialized
//! as JSON by the handlers.

pub mod digest;
pub mod file_record;
pub mod multipart;

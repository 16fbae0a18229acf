//! Core data models for the file attachment service.
//!
//! `FileRecord` maps to the `files` table via `sqlx::FromRow`; `Subject` is
//! the caller identity produced by the auth layer.

pub mod file;
pub mod subject;

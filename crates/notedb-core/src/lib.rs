//! notedb-core library.
//!
//! Serves change state from a content-addressed notes log while a migration
//! from a legacy relational store is in flight. Every read checks the legacy
//! row's consistency pointer against live refs, rebuilds the log when it is
//! stale, and caches parsed snapshots by the exact revision they came from.
//!
//! # Conventions
//!
//! - **Errors**: library paths return [`NotesError`]; configuration loading
//!   uses `anyhow::Result`.
//! - **Logging**: `tracing` events, parented to the span carried by
//!   [`notes::NotesArgs`].

pub mod config;
pub mod error;
pub mod legacy;
pub mod model;
pub mod notes;
pub mod refs;
pub mod repo;

pub use config::NotesConfig;
pub use error::{ErrorCode, NotesError};
pub use notes::{ChangeNotes, Factory, NotesArgs};

//! SurrealDB-backed database adapter for the vault save/load pipeline.
//!
//! Two tables, `manifests` and `contents`, mirror [`vault_core::ManifestRecord`]/
//! [`vault_core::ContentRecord`] exactly (see [`schema`]); [`handle::StateHandle`] implements
//! [`vault_core::ManifestSink`] and [`vault_core::ContentSource`] against them, committing one
//! manifest and its content rows per save in a single SurrealDB transaction.

mod config;
mod error;
mod handle;
mod migrations;
mod schema;

pub use config::{CloudConfig, ConnectionTarget};
pub use error::StateError;
pub use handle::StateHandle;
pub use schema::{ContentRow, ManifestRow};

//! Errors raised while talking to SurrealDB, and their conversion into [`vault_core::CoreError`].

use thiserror::Error;
use vault_core::CoreError;

/// Errors internal to this crate's SurrealDB plumbing: connection setup, query execution,
/// and schema migration. These never leak past the [`crate::handle::StateHandle`] boundary —
/// every public method converts a [`StateError`] into the matching [`CoreError`] variant so
/// callers only ever see the core's error taxonomy.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("database connection failed: {0}")]
    Connection(String),

    #[error("database query failed: {0}")]
    Query(String),

    #[error("schema setup failed: {0}")]
    SchemaSetup(String),

    #[error("manifest {0} not found")]
    ManifestNotFound(String),

    #[error("transaction failed: {0}")]
    Transaction(String),
}

impl From<surrealdb::Error> for StateError {
    fn from(err: surrealdb::Error) -> Self {
        StateError::Query(err.to_string())
    }
}

impl From<serde_json::Error> for StateError {
    fn from(err: serde_json::Error) -> Self {
        StateError::Query(format!("serialization error: {err}"))
    }
}

/// Map a [`StateError`] onto the core error taxonomy for a commit against `manifest_id`.
pub fn as_integrity_error(manifest_id: uuid::Uuid, err: StateError) -> CoreError {
    CoreError::IntegrityError {
        manifest_id,
        message: err.to_string(),
    }
}

/// Map a [`StateError`] onto the core error taxonomy for a manifest fetch.
pub fn as_not_registered(err: StateError) -> CoreError {
    CoreError::NotRegistered {
        kind: "manifest",
        key: err.to_string(),
    }
}

/// Map any other [`StateError`] onto [`CoreError::Backend`].
pub fn as_backend_error(err: StateError) -> CoreError {
    CoreError::Backend(err.to_string())
}

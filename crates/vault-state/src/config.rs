//! Connection configuration: the same three-tier env-var chain the teacher's
//! `SurrealRunLedger::from_env` uses, renamed to this project's prefix.
//!
//! 1. `VAULT_SURREAL_CLOUD_*` — a managed SurrealDB Cloud/server endpoint with credentials.
//! 2. `SURREALDB_URL` — any other reachable SurrealDB endpoint, used as-is.
//! 3. Neither set — a local on-disk `surrealkv://` store under `.vault/db`.

use crate::error::StateError;

/// Credentials and endpoint for a managed or self-hosted SurrealDB server reached over the
/// network, as opposed to the embedded `Mem`/`SurrealKV` engines.
#[derive(Debug, Clone)]
pub struct CloudConfig {
    pub endpoint: String,
    pub namespace: String,
    pub database: String,
    pub username: String,
    pub password: String,
    pub is_root: bool,
}

impl CloudConfig {
    /// Build a [`CloudConfig`] from `VAULT_SURREAL_CLOUD_*` environment variables. Fails
    /// (rather than panics) if `VAULT_SURREAL_CLOUD_ENDPOINT` is unset, so callers can treat
    /// an `Err` as "cloud config not provided" and fall through to the next tier.
    pub fn from_env() -> Result<Self, StateError> {
        let endpoint = std::env::var("VAULT_SURREAL_CLOUD_ENDPOINT")
            .map_err(|_| StateError::Connection("VAULT_SURREAL_CLOUD_ENDPOINT not set".to_string()))?;
        let namespace = std::env::var("VAULT_SURREAL_CLOUD_NAMESPACE").unwrap_or_else(|_| "vault".to_string());
        let database = std::env::var("VAULT_SURREAL_CLOUD_DATABASE").unwrap_or_else(|_| "main".to_string());
        let username = std::env::var("VAULT_SURREAL_CLOUD_USERNAME")
            .map_err(|_| StateError::Connection("VAULT_SURREAL_CLOUD_USERNAME not set".to_string()))?;
        let password = std::env::var("VAULT_SURREAL_CLOUD_PASSWORD")
            .map_err(|_| StateError::Connection("VAULT_SURREAL_CLOUD_PASSWORD not set".to_string()))?;
        let is_root = std::env::var("VAULT_SURREAL_CLOUD_ROOT")
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);

        Ok(CloudConfig {
            endpoint,
            namespace,
            database,
            username,
            password,
            is_root,
        })
    }
}

/// The resolved connection target, after walking the env-var chain.
pub enum ConnectionTarget {
    Cloud(CloudConfig),
    Url(String),
    LocalDefault,
}

impl ConnectionTarget {
    pub fn resolve() -> Self {
        if let Ok(cloud) = CloudConfig::from_env() {
            return ConnectionTarget::Cloud(cloud);
        }
        if let Ok(url) = std::env::var("SURREALDB_URL") {
            return ConnectionTarget::Url(url);
        }
        ConnectionTarget::LocalDefault
    }
}

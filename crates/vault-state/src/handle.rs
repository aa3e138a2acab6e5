//! `StateHandle`: the SurrealDB-backed [`vault_core::ManifestSink`]/[`vault_core::ContentSource`]
//! implementation.
//!
//! Connection setup mirrors the teacher's `SurrealRunLedger::in_memory`/`from_env` exactly:
//! an in-memory engine for tests, or the `VAULT_SURREAL_CLOUD_*`/`SURREALDB_URL`/local-disk
//! fallback chain for real deployments (see [`crate::config`]).

use async_trait::async_trait;
use surrealdb::engine::any::Any;
use surrealdb::opt::auth::{Database, Root};
use surrealdb::Surreal;
use tracing::{debug, info, instrument};
use uuid::Uuid;
use vault_core::{ContentRecord, ContentSource, CoreError, ManifestRecord, ManifestSink};

use crate::config::{CloudConfig, ConnectionTarget};
use crate::error::{as_backend_error, as_integrity_error, as_not_registered, StateError};
use crate::migrations;
use crate::schema::{ContentRow, ManifestRow};

/// A connected, schema-initialized SurrealDB handle.
pub struct StateHandle {
    db: Surreal<Any>,
}

impl StateHandle {
    /// Connect to an in-memory SurrealDB instance and initialize the schema. The usual
    /// choice for tests and examples.
    pub async fn in_memory() -> Result<Self, StateError> {
        let db = surrealdb::engine::any::connect("mem://")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;
        db.use_ns("vault")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;
        migrations::init_schema(&db).await?;
        info!("vault StateHandle connected (in-memory)");
        Ok(StateHandle { db })
    }

    /// Connect following the env-var chain documented in [`crate::config`].
    #[instrument(skip_all)]
    pub async fn from_env() -> Result<Self, StateError> {
        match ConnectionTarget::resolve() {
            ConnectionTarget::Cloud(config) => Self::connect_cloud(config).await,
            ConnectionTarget::Url(url) => Self::connect_url(&url).await,
            ConnectionTarget::LocalDefault => Self::connect_local_default().await,
        }
    }

    async fn connect_cloud(config: CloudConfig) -> Result<Self, StateError> {
        let db = surrealdb::engine::any::connect(&config.endpoint)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        if config.is_root {
            db.signin(Root {
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("root auth failed: {e}")))?;
        } else {
            db.signin(Database {
                namespace: &config.namespace,
                database: &config.database,
                username: &config.username,
                password: &config.password,
            })
            .await
            .map_err(|e| StateError::Connection(format!("database auth failed: {e}")))?;
        }

        db.use_ns(&config.namespace)
            .use_db(&config.database)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;

        migrations::init_schema(&db).await?;
        info!("vault StateHandle connected (cloud)");
        Ok(StateHandle { db })
    }

    async fn connect_url(url: &str) -> Result<Self, StateError> {
        let db = surrealdb::engine::any::connect(url)
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;
        db.use_ns("vault")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;
        migrations::init_schema(&db).await?;
        info!(url, "vault StateHandle connected");
        Ok(StateHandle { db })
    }

    async fn connect_local_default() -> Result<Self, StateError> {
        let path = ".vault/db";
        std::fs::create_dir_all(path)
            .map_err(|e| StateError::Connection(format!("failed to create database directory {path}: {e}")))?;
        let url = format!("surrealkv://{path}");
        info!(url = %url, "no cloud config or SURREALDB_URL found, using local persistence");

        let db = surrealdb::engine::any::connect(&url)
            .await
            .map_err(|e| StateError::Connection(format!("failed to connect to {url}: {e}")))?;
        db.use_ns("vault")
            .use_db("main")
            .await
            .map_err(|e| StateError::Connection(e.to_string()))?;
        migrations::init_schema(&db).await?;
        Ok(StateHandle { db })
    }

    /// Fetch the content rows belonging to one manifest, ordered the way they were stored.
    async fn fetch_contents(&self, manifest_id: Uuid) -> Result<Vec<ContentRecord>, StateError> {
        let mid = manifest_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM contents WHERE manifest_id = $mid ORDER BY created_at ASC")
            .bind(("mid", mid))
            .await?;
        let rows: Vec<ContentRow> = res.take(0)?;
        rows.into_iter()
            .map(|row| row.into_record().map_err(StateError::Query))
            .collect()
    }
}

#[async_trait]
impl ManifestSink for StateHandle {
    /// Insert one manifest and all its content rows in a single SurrealDB transaction: both
    /// become visible together, or neither does, satisfying spec.md §3's "Creation is
    /// transactional" invariant. Grounded in the teacher's `handle.rs`/`surreal_ledger.rs`
    /// `db.create(...)` calls, extended to a `BEGIN TRANSACTION … COMMIT TRANSACTION` block
    /// since those call sites never needed multi-row atomicity.
    #[instrument(skip_all, fields(manifest_id = %manifest.id, contents = contents.len()))]
    async fn commit_manifest(&self, manifest: ManifestRecord, contents: Vec<ContentRecord>) -> Result<(), CoreError> {
        let manifest_row = ManifestRow::from_record(&manifest);
        let content_rows: Vec<ContentRow> = contents
            .iter()
            .map(ContentRow::from_record)
            .collect::<Result<_, _>>()
            .map_err(|e| as_integrity_error(manifest.id, StateError::Query(e.to_string())))?;

        debug!("committing manifest transaction");

        let sql = r#"
            BEGIN TRANSACTION;
            CREATE manifests CONTENT $manifest;
            FOR $content IN $contents {
                CREATE contents CONTENT $content;
            };
            COMMIT TRANSACTION;
        "#;

        self.db
            .query(sql)
            .bind(("manifest", manifest_row))
            .bind(("contents", content_rows))
            .await
            .map_err(|e| as_integrity_error(manifest.id, StateError::Transaction(e.to_string())))?
            .check()
            .map_err(|e| as_integrity_error(manifest.id, StateError::Transaction(e.to_string())))?;

        Ok(())
    }
}

#[async_trait]
impl ContentSource for StateHandle {
    #[instrument(skip_all, fields(%manifest_id))]
    async fn fetch_manifest(&self, manifest_id: Uuid) -> Result<ManifestRecord, CoreError> {
        let mid = manifest_id.to_string();
        let mut res = self
            .db
            .query("SELECT * FROM manifests WHERE manifest_id = $mid")
            .bind(("mid", mid))
            .await
            .map_err(|e| as_backend_error(StateError::Query(e.to_string())))?;

        let rows: Vec<ManifestRow> = res.take(0).map_err(|e| as_backend_error(StateError::Query(e.to_string())))?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| as_not_registered(StateError::ManifestNotFound(manifest_id.to_string())))?;

        let mut header = row
            .into_header()
            .map_err(|e| as_backend_error(StateError::Query(e)))?;

        let contents = self
            .fetch_contents(manifest_id)
            .await
            .map_err(as_backend_error)?;
        header.contents = Some(contents);
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use vault_core::SerializerKind;

    fn sample_manifest_and_contents() -> (ManifestRecord, Vec<ContentRecord>) {
        let manifest_id = Uuid::new_v4();
        let mut tags = BTreeMap::new();
        tags.insert("source".to_string(), "test".to_string());
        let manifest = ManifestRecord::new(manifest_id, Uuid::new_v4(), "vault.test@v1".to_string(), tags);
        let contents = vec![ContentRecord {
            id: Uuid::new_v4(),
            manifest_id,
            content_key: "body".to_string(),
            content_type: "application/json".to_string(),
            content_encoding: None,
            content_hash: "deadbeef".to_string(),
            content_hash_algorithm: "sha256".to_string(),
            content_size: 4,
            serializer_name: "vault.json.value@v1".to_string(),
            serializer_config: "null".to_string(),
            serializer_kind: SerializerKind::Value,
            storage_name: "vault.memory@v1".to_string(),
            storage_config: "{\"key\":\"deadbeef\"}".to_string(),
            created_at: chrono::Utc::now(),
        }];
        (manifest, contents)
    }

    #[tokio::test]
    async fn commits_manifest_and_contents_atomically() {
        let handle = StateHandle::in_memory().await.unwrap();
        let (manifest, contents) = sample_manifest_and_contents();
        let manifest_id = manifest.id;

        handle.commit_manifest(manifest, contents).await.unwrap();

        let fetched = handle.fetch_manifest(manifest_id).await.unwrap();
        assert_eq!(fetched.id, manifest_id);
        let fetched_contents = fetched.contents.unwrap();
        assert_eq!(fetched_contents.len(), 1);
        assert_eq!(fetched_contents[0].content_key, "body");
        assert_eq!(fetched_contents[0].storage_config, "{\"key\":\"deadbeef\"}");
    }

    #[tokio::test]
    async fn missing_manifest_is_not_registered() {
        let handle = StateHandle::in_memory().await.unwrap();
        let err = handle.fetch_manifest(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, CoreError::NotRegistered { .. }));
    }
}

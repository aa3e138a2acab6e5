//! Schema migrations for the two tables this crate owns.
//!
//! Grounded in the teacher's `migrations::init_runs_table`/`init_run_events_table`: each
//! table is `DEFINE`d with explicit fields and indexes in one multi-statement query, and the
//! whole thing is safe to run more than once (`DEFINE TABLE`/`DEFINE FIELD`/`DEFINE INDEX`
//! are themselves idempotent in SurrealDB), matching the doc comment on the teacher's
//! `init_schema` ("Safe to call multiple times").

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::StateError;

/// Bring the `manifests`/`contents` schema into being. Idempotent.
pub async fn init_schema(db: &Surreal<Any>) -> Result<(), StateError> {
    info!("initializing vault schema");
    init_manifests_table(db).await?;
    init_contents_table(db).await?;
    info!("vault schema initialization complete");
    Ok(())
}

async fn init_manifests_table(db: &Surreal<Any>) -> Result<(), StateError> {
    debug!("initializing manifests table");

    let sql = r#"
        DEFINE TABLE manifests SCHEMAFULL
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE FIELD manifest_id ON manifests TYPE string;
        DEFINE FIELD class_id ON manifests TYPE string;
        DEFINE FIELD unpacker_name ON manifests TYPE string;
        DEFINE FIELD tags ON manifests FLEXIBLE TYPE object;
        DEFINE FIELD created_at ON manifests TYPE datetime;

        DEFINE INDEX idx_manifest_id ON manifests FIELDS manifest_id UNIQUE;
        DEFINE INDEX idx_manifest_class_id ON manifests FIELDS class_id;
        DEFINE INDEX idx_manifest_created_at ON manifests FIELDS created_at;
    "#;

    db.query(sql).await.map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    debug!("manifests table initialized");
    Ok(())
}

async fn init_contents_table(db: &Surreal<Any>) -> Result<(), StateError> {
    debug!("initializing contents table");

    // `(manifest_id, content_key)` uniqueness mirrors spec.md §3's invariant directly;
    // `manifest_id` alone is also indexed since every fetch is "all contents of one manifest".
    let sql = r#"
        DEFINE TABLE contents SCHEMAFULL
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update NONE
                FOR delete NONE;

        DEFINE FIELD content_id ON contents TYPE string;
        DEFINE FIELD manifest_id ON contents TYPE string;
        DEFINE FIELD content_key ON contents TYPE string;
        DEFINE FIELD content_type ON contents TYPE string;
        DEFINE FIELD content_encoding ON contents TYPE option<string>;
        DEFINE FIELD content_hash ON contents TYPE string;
        DEFINE FIELD content_hash_algorithm ON contents TYPE string;
        DEFINE FIELD content_size ON contents TYPE int;
        DEFINE FIELD serializer_name ON contents TYPE string;
        DEFINE FIELD serializer_config ON contents FLEXIBLE TYPE option<object>;
        DEFINE FIELD serializer_kind ON contents TYPE int;
        DEFINE FIELD storage_name ON contents TYPE string;
        DEFINE FIELD storage_config ON contents FLEXIBLE TYPE object;
        DEFINE FIELD created_at ON contents TYPE datetime;

        DEFINE INDEX idx_content_id ON contents FIELDS content_id UNIQUE;
        DEFINE INDEX idx_content_manifest_key ON contents FIELDS manifest_id, content_key UNIQUE;
        DEFINE INDEX idx_content_manifest_id ON contents FIELDS manifest_id;
        DEFINE INDEX idx_content_hash ON contents FIELDS content_hash;
    "#;

    db.query(sql).await.map_err(|e| StateError::SchemaSetup(e.to_string()))?;
    debug!("contents table initialized");
    Ok(())
}

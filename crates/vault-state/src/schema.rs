//! Row types mapped onto the two SurrealDB tables, `manifests` and `contents`.
//!
//! These mirror [`vault_core::ManifestRecord`]/[`vault_core::ContentRecord`] field-for-field;
//! the only difference is that `tags`/`serializer_config`/`storage_config` are stored as
//! SurrealDB's native `object`/`FLEXIBLE TYPE object` columns (so the engine validates them
//! as JSON on write) rather than opaque strings, and are converted to/from raw JSON strings
//! at the [`crate::handle::StateHandle`] boundary. `serde_json`'s `preserve_order` feature is
//! enabled workspace-wide so `Value`'s object map is an `IndexMap`, not a `BTreeMap` — object
//! key order survives this round trip rather than being re-sorted alphabetically.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use uuid::Uuid;
use vault_core::{ContentRecord, ManifestRecord, SerializerKind};

/// A `manifests` table row. `id` is a plain string (SurrealDB's own `id` field is a record
/// ID of shape `manifests:<id>`; we key on our own UUID string alongside it so callers never
/// have to parse a SurrealDB `Thing`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRow {
    pub manifest_id: String,
    pub class_id: String,
    pub unpacker_name: String,
    pub tags: Json,
    pub created_at: DateTime<Utc>,
}

impl ManifestRow {
    pub fn from_record(record: &ManifestRecord) -> Self {
        ManifestRow {
            manifest_id: record.id.to_string(),
            class_id: record.class_id.to_string(),
            unpacker_name: record.unpacker_name.clone(),
            tags: serde_json::to_value(&record.tags).unwrap_or(Json::Object(Default::default())),
            created_at: record.created_at,
        }
    }

    pub fn into_header(self) -> Result<ManifestRecord, String> {
        let id = Uuid::parse_str(&self.manifest_id).map_err(|e| e.to_string())?;
        let class_id = Uuid::parse_str(&self.class_id).map_err(|e| e.to_string())?;
        let tags = serde_json::from_value(self.tags).map_err(|e| e.to_string())?;
        Ok(ManifestRecord::header(id, class_id, self.unpacker_name, tags, self.created_at))
    }
}

/// A `contents` table row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRow {
    pub content_id: String,
    pub manifest_id: String,
    pub content_key: String,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub content_hash: String,
    pub content_hash_algorithm: String,
    pub content_size: i64,
    pub serializer_name: String,
    pub serializer_config: Option<Json>,
    pub serializer_kind: i32,
    pub storage_name: String,
    pub storage_config: Json,
    pub created_at: DateTime<Utc>,
}

/// `serde_json::from_str("null")` yields `Json::Null`, which SurrealDB's `option<object>`
/// column rejects as a value distinct from "field absent" — normalize both to `None`.
fn non_null_json(value: Json) -> Option<Json> {
    if value.is_null() {
        None
    } else {
        Some(value)
    }
}

impl ContentRow {
    pub fn from_record(record: &ContentRecord) -> Result<Self, serde_json::Error> {
        Ok(ContentRow {
            content_id: record.id.to_string(),
            manifest_id: record.manifest_id.to_string(),
            content_key: record.content_key.clone(),
            content_type: record.content_type.clone(),
            content_encoding: record.content_encoding.clone(),
            content_hash: record.content_hash.clone(),
            content_hash_algorithm: record.content_hash_algorithm.clone(),
            content_size: record.content_size,
            serializer_name: record.serializer_name.clone(),
            serializer_config: non_null_json(serde_json::from_str(&record.serializer_config)?),
            serializer_kind: match record.serializer_kind {
                SerializerKind::Value => 1,
                SerializerKind::Stream => 2,
            },
            storage_name: record.storage_name.clone(),
            storage_config: serde_json::from_str(&record.storage_config)?,
            created_at: record.created_at,
        })
    }

    pub fn into_record(self) -> Result<ContentRecord, String> {
        let id = Uuid::parse_str(&self.content_id).map_err(|e| e.to_string())?;
        let manifest_id = Uuid::parse_str(&self.manifest_id).map_err(|e| e.to_string())?;
        let serializer_kind = match self.serializer_kind {
            1 => SerializerKind::Value,
            2 => SerializerKind::Stream,
            other => return Err(format!("unknown serializer_kind discriminant {other}")),
        };
        Ok(ContentRecord {
            id,
            manifest_id,
            content_key: self.content_key,
            content_type: self.content_type,
            content_encoding: self.content_encoding,
            content_hash: self.content_hash,
            content_hash_algorithm: self.content_hash_algorithm,
            content_size: self.content_size,
            serializer_name: self.serializer_name,
            serializer_config: self.serializer_config.unwrap_or(Json::Null).to_string(),
            serializer_kind,
            storage_name: self.storage_name,
            storage_config: self.storage_config.to_string(),
            created_at: self.created_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn manifest_row_round_trips() {
        let mut tags = BTreeMap::new();
        tags.insert("env".to_string(), "prod".to_string());
        let record = ManifestRecord::new(Uuid::new_v4(), Uuid::new_v4(), "vault.test@v1".to_string(), tags);
        let row = ManifestRow::from_record(&record);
        let header = row.into_header().unwrap();
        assert_eq!(header.id, record.id);
        assert_eq!(header.class_id, record.class_id);
        assert_eq!(header.tags.get("env").unwrap(), "prod");
    }

    #[test]
    fn content_row_round_trips() {
        let record = ContentRecord {
            id: Uuid::new_v4(),
            manifest_id: Uuid::new_v4(),
            content_key: "body".to_string(),
            content_type: "application/json".to_string(),
            content_encoding: None,
            content_hash: "deadbeef".to_string(),
            content_hash_algorithm: "sha256".to_string(),
            content_size: 17,
            serializer_name: "vault.json.value@v1".to_string(),
            serializer_config: "null".to_string(),
            serializer_kind: SerializerKind::Value,
            storage_name: "vault.memory@v1".to_string(),
            storage_config: "\"deadbeef\"".to_string(),
            created_at: Utc::now(),
        };
        let row = ContentRow::from_record(&record).unwrap();
        let back = row.into_record().unwrap();
        assert_eq!(back.content_key, "body");
        assert_eq!(back.storage_config, "\"deadbeef\"");
    }

    #[test]
    fn content_row_round_trip_preserves_multi_key_config_order() {
        let storage_config = r#"{"zeta":1,"alpha":2,"mu":3,"beta":4}"#;
        let record = ContentRecord {
            id: Uuid::new_v4(),
            manifest_id: Uuid::new_v4(),
            content_key: "body".to_string(),
            content_type: "application/json".to_string(),
            content_encoding: None,
            content_hash: "deadbeef".to_string(),
            content_hash_algorithm: "sha256".to_string(),
            content_size: 17,
            serializer_name: "vault.json.value@v1".to_string(),
            serializer_config: storage_config.to_string(),
            serializer_kind: SerializerKind::Value,
            storage_name: "vault.memory@v1".to_string(),
            storage_config: storage_config.to_string(),
            created_at: Utc::now(),
        };
        let row = ContentRow::from_record(&record).unwrap();
        let back = row.into_record().unwrap();
        assert_eq!(back.storage_config, storage_config);
        assert_eq!(back.serializer_config, storage_config);
    }
}

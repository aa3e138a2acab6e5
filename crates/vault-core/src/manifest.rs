//! The durable records a save produces: one [`ManifestRecord`] per saved object, owning an
//! ordered sequence of [`ContentRecord`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::serializer::SerializerKind;
use crate::storage::TagMap;

/// The durable handle to one saved object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestRecord {
    pub id: Uuid,
    pub class_id: Uuid,
    pub unpacker_name: String,
    pub tags: TagMap,
    pub created_at: DateTime<Utc>,
    /// `None` means the contents haven't been fetched yet (a manifest header read without
    /// its rows); the loader fetches them in bulk before repacking. `Some(vec![])` means the
    /// manifest genuinely has no contents.
    pub contents: Option<Vec<ContentRecord>>,
}

impl ManifestRecord {
    pub fn new(id: Uuid, class_id: Uuid, unpacker_name: String, tags: TagMap) -> Self {
        ManifestRecord {
            id,
            class_id,
            unpacker_name,
            tags,
            created_at: Utc::now(),
            contents: Some(Vec::new()),
        }
    }

    /// A header-only manifest whose contents must be fetched separately.
    pub fn header(
        id: Uuid,
        class_id: Uuid,
        unpacker_name: String,
        tags: TagMap,
        created_at: DateTime<Utc>,
    ) -> Self {
        ManifestRecord {
            id,
            class_id,
            unpacker_name,
            tags,
            created_at,
            contents: None,
        }
    }
}

/// One serialized payload belonging to a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: Uuid,
    pub manifest_id: Uuid,
    pub content_key: String,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub content_hash: String,
    pub content_hash_algorithm: String,
    pub content_size: i64,
    pub serializer_name: String,
    pub serializer_config: String,
    pub serializer_kind: SerializerKind,
    pub storage_name: String,
    pub storage_config: String,
    pub created_at: DateTime<Utc>,
}

//! An in-memory, content-addressed [`Storage`] — the default backend for tests and examples.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value as Json};
use vault_core::{ByteStream, CoreError, Digest, GetDigest, Storage, TagMap};

/// Keys blobs by their content hash, so writing the same bytes twice yields the same
/// locator — the "idempotent storage keys" property from spec.md §8 falls out for free.
pub struct MemoryStorage {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        MemoryStorage {
            blobs: Mutex::new(HashMap::new()),
        }
    }

    fn locator_for(hash: &str) -> Json {
        json!({ "key": hash })
    }

    fn key_from_locator(locator: &Json) -> Result<&str, CoreError> {
        locator
            .get("key")
            .and_then(Json::as_str)
            .ok_or_else(|| CoreError::Backend("memory storage locator missing 'key'".to_string()))
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &str {
        "vault.memory@v1"
    }

    async fn write_data(&self, data: Vec<u8>, digest: &Digest, _tags: &TagMap) -> Result<Json, CoreError> {
        let key = digest.content_hash.clone();
        self.blobs.lock().unwrap().insert(key.clone(), data);
        Ok(Self::locator_for(&key))
    }

    async fn read_data(&self, locator: &Json) -> Result<Vec<u8>, CoreError> {
        let key = Self::key_from_locator(locator)?;
        self.blobs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| CoreError::NoStorageData {
                storage_name: self.name().to_string(),
            })
    }

    async fn write_data_stream(&self, mut data_stream: ByteStream, get_digest: GetDigest, tags: &TagMap) -> Result<Json, CoreError> {
        let mut buf = Vec::new();
        while let Some(chunk) = data_stream.next().await {
            buf.extend_from_slice(&chunk.map_err(|e| CoreError::Backend(e.to_string()))?);
        }
        let digest = get_digest.get(false)?.into_digest();
        self.write_data(buf, &digest, tags).await
    }

    fn read_data_stream(&self, locator: &Json) -> ByteStream {
        let key = match Self::key_from_locator(locator) {
            Ok(k) => k.to_string(),
            Err(e) => {
                return Box::pin(futures::stream::once(async move {
                    Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
                }))
            }
        };
        let data = self.blobs.lock().unwrap().get(&key).cloned();
        match data {
            Some(bytes) => Box::pin(futures::stream::once(async move { Ok(bytes::Bytes::from(bytes)) })),
            None => {
                let storage_name = self.name().to_string();
                Box::pin(futures::stream::once(async move {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no data in {storage_name} for locator"),
                    ))
                }))
            }
        }
    }
}

//! The storage interface: put/get bytes and byte-streams against opaque locators.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde_json::Value as Json;

use crate::digest::{Digest, GetDigest};
use crate::error::CoreError;

/// Flat string tags threaded from `save_soon(tags = ...)` through to every storage call.
pub type TagMap = BTreeMap<String, String>;

pub type ByteStream = Pin<Box<dyn Stream<Item = std::io::Result<bytes::Bytes>> + Send>>;

/// A pluggable storage backend.
///
/// The locator type is fixed to [`serde_json::Value`] at the trait-object boundary: a
/// generic associated `Locator` type would make `Storage` non-object-safe, and the core
/// needs `Arc<dyn Storage>` to put heterogeneous backends in one [`crate::registry::Registry`].
/// Concrete drivers that want a structured locator (e.g. a struct with a bucket + key) derive
/// `Serialize`/`Deserialize` on it and convert at the boundary — see `vault-builtin`'s
/// `FileStorage` for the pattern.
///
/// Streaming write semantics (canonical, "temp→rename"): a driver that needs the final hash
/// to choose a destination key (content-addressed paths) must (1) call
/// `get_digest.get(true)` to pick a provisional/temporary location, (2) consume the stream,
/// writing each chunk to that temporary location, (3) call `get_digest.get(false)` for the
/// final key, (4) atomically move/copy to the final location, (5) delete the temporary
/// object even if any of the above fails. A read of a final locator after such a failure
/// MUST fail with [`CoreError::NoStorageData`] rather than return partial bytes.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Globally unique, versioned name (e.g. `"vault.file@v1"`).
    fn name(&self) -> &str;

    async fn write_data(
        &self,
        data: Vec<u8>,
        digest: &Digest,
        tags: &TagMap,
    ) -> Result<Json, CoreError>;

    async fn read_data(&self, locator: &Json) -> Result<Vec<u8>, CoreError>;

    async fn write_data_stream(
        &self,
        data_stream: ByteStream,
        get_digest: GetDigest,
        tags: &TagMap,
    ) -> Result<Json, CoreError>;

    fn read_data_stream(&self, locator: &Json) -> ByteStream;

    /// Serialize the locator to the `storage_config` JSON string. Default: JSON of the
    /// locator value itself.
    fn serialize_config(&self, locator: &Json) -> String {
        locator.to_string()
    }

    /// Inverse of [`Storage::serialize_config`].
    fn deserialize_config(&self, config: &str) -> Result<Json, CoreError> {
        serde_json::from_str(config).map_err(|e| CoreError::Backend(format!("invalid storage_config JSON: {e}")))
    }
}

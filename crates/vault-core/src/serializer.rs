//! Codec interfaces: typed value↔bytes and async value-stream↔byte-stream transforms.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// The wire envelope a [`Serializer`] produces for one value.
#[derive(Debug, Clone)]
pub struct SerializedData {
    pub data: Vec<u8>,
    pub content_type: String,
    pub content_encoding: Option<String>,
    /// Opaque configuration the serializer persists alongside the bytes so it can
    /// reconstruct its own decoding state later (e.g. a CSV dialect or an Arrow schema hint).
    pub config: Option<Json>,
}

/// The streaming counterpart of [`SerializedData`]: `data` becomes an async byte stream.
pub struct SerializedDataStream {
    pub data_stream: Pin<Box<dyn Stream<Item = std::io::Result<bytes::Bytes>> + Send>>,
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub config: Option<Json>,
}

/// A typed (value ↔ bytes) codec.
///
/// Implementations declare a versioned [`Serializer::name`] (checked against
/// `name@vN` at registry construction, see [`crate::component`]) and the Rust types they can
/// handle via [`Serializer::content_types`] for MIME-based inference. Per-type inference is
/// resolved by the registry's `TypeId`-keyed map (see [`crate::registry`]) rather than by a
/// method on the trait, since Rust has no runtime ancestor-chain walk to fall back on.
#[async_trait]
pub trait Serializer<T>: Send + Sync {
    /// Globally unique, versioned name (e.g. `"vault.json.value@v1"`).
    fn name(&self) -> &str;

    /// MIME content types this serializer can produce/consume, for content-type based
    /// registry lookups.
    fn content_types(&self) -> &[&str] {
        &[]
    }

    fn serialize_data(&self, value: &T) -> Result<SerializedData, crate::error::CoreError>;

    fn deserialize_data(&self, content: &SerializedData) -> Result<T, crate::error::CoreError>;

    /// Serialize the serializer's own `config` value (from [`SerializedData::config`]) to a
    /// JSON string for the `serializer_config` column. Default: the value serialized as-is.
    fn serialize_config(&self, config: Option<&Json>) -> String {
        match config {
            Some(v) => v.to_string(),
            None => "null".to_string(),
        }
    }

    /// Inverse of [`Serializer::serialize_config`].
    fn deserialize_config(&self, config: &str) -> Result<Option<Json>, crate::error::CoreError> {
        let v: Json = serde_json::from_str(config)
            .map_err(|e| crate::error::CoreError::SerializerContract {
                serializer_name: self.name().to_string(),
                message: format!("invalid serializer_config JSON: {e}"),
            })?;
        Ok(if v.is_null() { None } else { Some(v) })
    }
}

/// The streaming counterpart of [`Serializer`]: operates on an async sequence of values
/// producing/consuming an async sequence of byte chunks.
#[async_trait]
pub trait StreamSerializer<T>: Send + Sync {
    fn name(&self) -> &str;

    fn content_types(&self) -> &[&str] {
        &[]
    }

    fn serialize_data_stream(
        &self,
        stream: Pin<Box<dyn Stream<Item = T> + Send>>,
    ) -> Result<SerializedDataStream, crate::error::CoreError>;

    fn deserialize_data_stream(
        &self,
        content_type: &str,
        content_encoding: Option<&str>,
        config: Option<&Json>,
        data_stream: Pin<Box<dyn Stream<Item = std::io::Result<bytes::Bytes>> + Send>>,
    ) -> Pin<Box<dyn Stream<Item = Result<T, crate::error::CoreError>> + Send>>;

    fn serialize_config(&self, config: Option<&Json>) -> String {
        match config {
            Some(v) => v.to_string(),
            None => "null".to_string(),
        }
    }

    fn deserialize_config(&self, config: &str) -> Result<Option<Json>, crate::error::CoreError> {
        let v: Json = serde_json::from_str(config)
            .map_err(|e| crate::error::CoreError::SerializerContract {
                serializer_name: self.name().to_string(),
                message: format!("invalid serializer_config JSON: {e}"),
            })?;
        Ok(if v.is_null() { None } else { Some(v) })
    }
}

/// Marker used by the registry to remember whether a content's codec was a `Serializer` or
/// a `StreamSerializer` — persisted verbatim as `serializer_kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SerializerKind {
    Value,
    Stream,
}

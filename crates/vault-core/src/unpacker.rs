//! The unpacker protocol: the pure function-pair that decomposes a storable object into
//! named contents and recomposes it from them.

use std::any::Any;
use std::pin::Pin;
use std::sync::Arc;

use base64::Engine;
use futures::Stream;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::registry::Registry;

/// One entry in the map an [`Unpacker::unpack`] returns: either a value to serialize whole,
/// or a stream of values to serialize incrementally. Both variants may carry an explicit
/// codec/storage override; absent an override, the saver infers one from the registry.
pub enum UnpackedContent {
    Value {
        value: Box<dyn Any + Send>,
        serializer_name: Option<String>,
        storage_name: Option<String>,
    },
    Stream {
        value_stream: Pin<Box<dyn Stream<Item = Box<dyn Any + Send>> + Send>>,
        serializer_name: Option<String>,
        storage_name: Option<String>,
    },
}

/// What the loader hands back to [`Unpacker::repack`] for one content entry: the
/// materialized value (or lazy stream) plus the names of the codec/storage that produced it.
pub enum LoadedContent {
    Value {
        value: Box<dyn Any + Send>,
        serializer_name: String,
        storage_name: String,
    },
    Stream {
        value_stream: Pin<Box<dyn Stream<Item = Result<Box<dyn Any + Send>, CoreError>> + Send>>,
        serializer_name: String,
        storage_name: String,
    },
}

/// An object's decomposition into named contents, in the order it should be persisted and
/// re-read. An [`IndexMap`] (rather than a hash map) is used specifically so this order is
/// deterministic — the saver persists `ContentRecord`s in this iteration order and the
/// testable property "content row order mirrors unpacker map iteration order" depends on it.
pub type UnpackedContents = IndexMap<String, UnpackedContent>;
pub type LoadedContents = IndexMap<String, LoadedContent>;

/// Binds one storable class to the pair of pure functions that decompose/recompose it.
///
/// `S` is the storable type; `unpack`/`repack` are pure with respect to everything except
/// the registry, which they may consult to pick nested codecs for sub-values.
pub trait Unpacker<S>: Send + Sync {
    fn name(&self) -> &str;

    fn unpack(&self, obj: &S, registry: &Registry) -> Result<UnpackedContents, CoreError>;

    fn repack(&self, contents: LoadedContents, registry: &Registry) -> Result<S, CoreError>;
}

/// The inline-body convention used by unpackers to represent arbitrarily nested objects as
/// one JSON document with tagged back-references into sibling content entries.
///
/// The saver/loader never interpret this; only unpackers construct and walk it. Kept here
/// (rather than in a driver crate) because it's the one data format named directly by the
/// specification of the unpacker protocol, not an implementation detail of any one driver.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "__ref__", rename_all = "snake_case")]
pub enum BodyRef {
    /// The payload is embedded directly in the body as base64.
    Content {
        content_base64: String,
        content_encoding: Option<String>,
        content_type: String,
        serializer_name: String,
    },
    /// The payload lives in another entry of the same unpacked-contents map.
    Ref { r#ref: String },
}

impl BodyRef {
    pub fn inline(
        bytes: &[u8],
        content_type: impl Into<String>,
        content_encoding: Option<String>,
        serializer_name: impl Into<String>,
    ) -> Self {
        BodyRef::Content {
            content_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
            content_encoding,
            content_type: content_type.into(),
            serializer_name: serializer_name.into(),
        }
    }

    pub fn reference(key: impl Into<String>) -> Self {
        BodyRef::Ref { r#ref: key.into() }
    }

    /// Decode an inline [`BodyRef::Content`] back to raw bytes. Fails if called on a `Ref`.
    pub fn decode_inline(&self) -> Result<Vec<u8>, CoreError> {
        match self {
            BodyRef::Content { content_base64, .. } => base64::engine::general_purpose::STANDARD
                .decode(content_base64)
                .map_err(|e| CoreError::UnpackerContract {
                    unpacker_name: "<body-ref>".to_string(),
                    message: format!("invalid base64 in inline content: {e}"),
                }),
            BodyRef::Ref { r#ref } => Err(CoreError::UnpackerContract {
                unpacker_name: "<body-ref>".to_string(),
                message: format!("expected inline content, found a reference to {ref:?}"),
            }),
        }
    }
}

/// A resolved `(key -> value)` pairing, usable by a `repack` implementation once it has
/// walked a body document and dereferenced every `BodyRef::Ref`.
pub type ResolvedBody = Arc<serde_json::Value>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_ref_round_trips_through_json() {
        let r = BodyRef::inline(b"[1,2,3]", "application/json", None, "vault.json.value@v1");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["__ref__"], "content");
        let back: BodyRef = serde_json::from_value(json).unwrap();
        assert_eq!(back.decode_inline().unwrap(), b"[1,2,3]");
    }

    #[test]
    fn ref_variant_fails_to_decode_inline() {
        let r = BodyRef::reference("inner");
        assert!(r.decode_inline().is_err());
    }
}

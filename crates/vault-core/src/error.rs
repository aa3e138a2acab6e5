//! The core error taxonomy and the typed error groups raised by the saver and loader.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// A single failure from anywhere in the save/load pipeline.
///
/// Every kind here corresponds to a row in the error taxonomy: registry misses, contract
/// violations from user-supplied components, and the one internal condition
/// (`IncompleteStream`) that the saver converts to `StorageDidNotConsumeStream` before it
/// ever reaches a caller, since an incomplete stream after a driver's `write_data_stream`
/// returns is a bug in that driver, not in caller input.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A component (serializer, storage, unpacker) was registered with a name that doesn't
    /// match `^[a-z][a-z0-9_.-]*@v\d+$`.
    #[error("component name {name:?} does not match the required `name@vN` pattern")]
    BadComponentName { name: String },

    /// A lookup by name, type, or content-type missed in the registry.
    #[error("no {kind} registered for {key}")]
    NotRegistered { kind: &'static str, key: String },

    /// `load_soon`'s class hint was not a supertype of the manifest's actual class.
    #[error("expected class {expected}, but manifest {manifest_id} stores {actual}")]
    TypeMismatch {
        manifest_id: Uuid,
        expected: String,
        actual: String,
    },

    /// `GetDigest::get(allow_incomplete = false)` was called before the wrapped stream
    /// reached EOF. Internal: the saver catches this itself and re-raises as
    /// [`CoreError::StorageDidNotConsumeStream`].
    #[error("the stream has not been fully consumed")]
    IncompleteStream,

    /// A storage driver finished `write_data_stream` without draining the wrapped source.
    #[error("storage {storage_name:?} did not fully consume the data stream for content {content_key:?}")]
    StorageDidNotConsumeStream {
        storage_name: String,
        content_key: String,
    },

    /// A storage read was attempted against a locator that no longer resolves to data.
    #[error("no data found in storage {storage_name:?} for the given locator")]
    NoStorageData { storage_name: String },

    /// A uniqueness or other constraint was violated committing to the database.
    #[error("integrity error committing manifest {manifest_id}: {message}")]
    IntegrityError { manifest_id: Uuid, message: String },

    /// A `Serializer`/`StreamSerializer` impl returned an envelope that violates its
    /// contract (e.g. missing a required field, or claiming a content type it didn't use).
    #[error("serializer {serializer_name:?} violated its contract: {message}")]
    SerializerContract {
        serializer_name: String,
        message: String,
    },

    /// An `Unpacker` impl returned a content entry that was neither a value nor a stream,
    /// or `repack` failed to reconstruct an object from its contents.
    #[error("unpacker {unpacker_name:?} violated its contract: {message}")]
    UnpackerContract {
        unpacker_name: String,
        message: String,
    },

    /// The underlying storage/database driver failed for reasons opaque to the core.
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// One failure alongside the identity of the thing that failed to save or load, so an
/// aggregated error can still be inspected member-by-member instead of collapsing to a
/// single string.
#[derive(Debug)]
pub struct Failure {
    pub key: String,
    pub error: CoreError,
}

/// Raised when one or more objects failed to save in a [`crate::saver::SaverContext`].
///
/// Deliberately not a single formatted string: callers that want to react differently to
/// `NotRegistered` vs `SerializerContract` failures can match on `.failures()` themselves.
#[derive(Debug)]
pub struct SaveErrors {
    pub failures: Vec<Failure>,
    pub attempted: usize,
}

impl fmt::Display for SaveErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to save {} out of {} items",
            self.failures.len(),
            self.attempted
        )
    }
}

impl std::error::Error for SaveErrors {}

impl SaveErrors {
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }
}

/// Raised when one or more manifests failed to load in a [`crate::loader::LoaderContext`].
#[derive(Debug)]
pub struct LoadErrors {
    pub failures: Vec<Failure>,
    pub attempted: usize,
}

impl fmt::Display for LoadErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "failed to load {} out of {} items",
            self.failures.len(),
            self.attempted
        )
    }
}

impl std::error::Error for LoadErrors {}

impl LoadErrors {
    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }
}

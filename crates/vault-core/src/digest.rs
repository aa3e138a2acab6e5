//! Content digests and the streaming hash/size accumulator.
//!
//! A [`Digest`] is the content-addressing primitive: hash, size, and MIME metadata for a
//! finite byte buffer. A [`StreamDigest`] is the same thing for a byte stream that may not
//! yet have been fully consumed — its `is_complete` flag tracks that.

use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures::Stream;
use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};

use crate::error::CoreError;

/// The hash algorithm name persisted alongside every digest.
///
/// The core always hashes with SHA-256; this is a constant rather than a per-call choice
/// because the `content_hash_algorithm` column exists precisely so a reader never has to
/// guess, not so callers can mix algorithms within one deployment.
pub const HASH_ALGORITHM: &str = "sha256";

/// Hash + size + MIME metadata for a byte sequence that has been fully materialized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest {
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub content_hash_algorithm: String,
    pub content_hash: String,
    pub content_size: i64,
}

impl Digest {
    /// Compute the digest of an in-memory buffer.
    pub fn of_bytes(data: &[u8], content_type: impl Into<String>, content_encoding: Option<String>) -> Self {
        let hash = Sha256::digest(data);
        Digest {
            content_type: content_type.into(),
            content_encoding,
            content_hash_algorithm: HASH_ALGORITHM.to_string(),
            content_hash: hex::encode(hash),
            content_size: data.len() as i64,
        }
    }
}

/// The same metadata as [`Digest`], plus whether the underlying stream has reached EOF.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDigest {
    pub content_type: String,
    pub content_encoding: Option<String>,
    pub content_hash_algorithm: String,
    pub content_hash: String,
    pub content_size: i64,
    pub is_complete: bool,
}

impl StreamDigest {
    pub fn into_digest(self) -> Digest {
        Digest {
            content_type: self.content_type,
            content_encoding: self.content_encoding,
            content_hash_algorithm: self.content_hash_algorithm,
            content_hash: self.content_hash,
            content_size: self.content_size,
        }
    }
}

struct Accumulator {
    hasher: Sha256,
    size: i64,
    complete: bool,
}

/// Wraps a `Stream<Item = Result<bytes::Bytes, E>>`-shaped byte source so the hash and byte
/// count are built up incrementally as the stream is polled by a downstream consumer (e.g. a
/// storage driver uploading chunks), without buffering the whole payload in memory.
///
/// Call [`DigestingStream::digest_handle`] before consuming the stream to get a
/// [`GetDigest`] closure you can call after (or, with `allow_incomplete: true`, during)
/// consumption.
pub struct DigestingStream<S> {
    inner: S,
    content_type: String,
    content_encoding: Option<String>,
    acc: Arc<Mutex<Accumulator>>,
}

impl<S> DigestingStream<S> {
    pub fn new(inner: S, content_type: impl Into<String>, content_encoding: Option<String>) -> Self {
        DigestingStream {
            inner,
            content_type: content_type.into(),
            content_encoding,
            acc: Arc::new(Mutex::new(Accumulator {
                hasher: Sha256::new(),
                size: 0,
                complete: false,
            })),
        }
    }

    /// Return a [`GetDigest`] handle that can be invoked independently of the stream
    /// (typically handed to a storage driver alongside the stream itself).
    pub fn digest_handle(&self) -> GetDigest {
        GetDigest {
            acc: Arc::clone(&self.acc),
            content_type: self.content_type.clone(),
            content_encoding: self.content_encoding.clone(),
        }
    }
}

impl<S, E> Stream for DigestingStream<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
{
    type Item = Result<bytes::Bytes, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(chunk))) => {
                let mut acc = self.acc.lock().unwrap();
                acc.hasher.update(&chunk);
                acc.size += chunk.len() as i64;
                Poll::Ready(Some(Ok(chunk)))
            }
            Poll::Ready(None) => {
                self.acc.lock().unwrap().complete = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}

/// A cloneable accessor for the digest being built up by a [`DigestingStream`].
///
/// Mirrors the `GetStreamDigest` protocol from the original implementation: calling it with
/// `allow_incomplete = false` before the stream has reached EOF fails with
/// [`CoreError::IncompleteStream`], since a storage driver needing the final hash to pick a
/// destination key must first fully drain the stream.
#[derive(Clone)]
pub struct GetDigest {
    acc: Arc<Mutex<Accumulator>>,
    content_type: String,
    content_encoding: Option<String>,
}

impl GetDigest {
    pub fn get(&self, allow_incomplete: bool) -> Result<StreamDigest, CoreError> {
        let acc = self.acc.lock().unwrap();
        if !allow_incomplete && !acc.complete {
            return Err(CoreError::IncompleteStream);
        }
        Ok(StreamDigest {
            content_type: self.content_type.clone(),
            content_encoding: self.content_encoding.clone(),
            content_hash_algorithm: HASH_ALGORITHM.to_string(),
            content_hash: hex::encode(acc.hasher.clone().finalize()),
            content_size: acc.size,
            is_complete: acc.complete,
        })
    }
}

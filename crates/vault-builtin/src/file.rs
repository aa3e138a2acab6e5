//! A filesystem [`Storage`] using the canonical temp-write-then-rename pattern.
//!
//! Grounded directly in `aivcs-core::cas::fs::FsCasStore`: git-style two-hex-char sharding,
//! and `tempfile::NamedTempFile::new_in` + `.persist()` for the atomic write — the exact same
//! crate and call sequence the teacher uses for this exact concern. The blocking temp-file
//! dance runs inside `tokio::task::spawn_blocking`, since `tempfile`'s API is synchronous and
//! this is an async `Storage` impl, unlike the teacher's synchronous `CasStore`.

use std::io::Write as _;
use std::path::PathBuf;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value as Json};
use tokio::io::AsyncReadExt;
use vault_core::{ByteStream, CoreError, Digest, GetDigest, Storage, TagMap};

/// Filesystem-backed content-addressed store.
///
/// Layout: `<root>/objects/<first 2 hex chars>/<remaining hex chars>[.<ext>]`. The extension
/// is a best-effort hint inferred from the content type via `mime_guess`
/// (`labox._internal._temp_path.make_file_name_from_digest`'s behavior) — it's informational
/// only, since `storage_config` always carries the exact relative path needed to read the
/// blob back.
pub struct FileStorage {
    root: PathBuf,
}

impl FileStorage {
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, CoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(root.join("objects"))
            .await
            .map_err(|e| CoreError::Backend(format!("failed to create objects dir: {e}")))?;
        Ok(FileStorage { root })
    }

    fn blob_relpath(hash: &str, content_type: &str) -> String {
        let ext = mime_guess::get_mime_extensions_str(content_type)
            .and_then(|exts| exts.first())
            .map(|e| format!(".{e}"))
            .unwrap_or_default();
        format!("objects/{}/{}{}", &hash[..2], &hash[2..], ext)
    }

    fn locator(relpath: &str) -> Json {
        json!({ "path": relpath })
    }

    fn path_from_locator(&self, locator: &Json) -> Result<PathBuf, CoreError> {
        let relpath = locator
            .get("path")
            .and_then(Json::as_str)
            .ok_or_else(|| CoreError::Backend("file storage locator missing 'path'".to_string()))?;
        Ok(self.root.join(relpath))
    }

    /// Writes `data` to a `NamedTempFile` created alongside `final_path` and renames it into
    /// place, same as `FsCasStore::put`. Runs on a blocking thread; `tempfile`'s `Write`/
    /// `persist` API has no async counterpart.
    fn persist_blob(shard_dir: PathBuf, final_path: PathBuf, data: Vec<u8>) -> Result<(), CoreError> {
        std::fs::create_dir_all(&shard_dir).map_err(|e| CoreError::Backend(format!("failed to create shard dir: {e}")))?;
        let mut temp =
            tempfile::NamedTempFile::new_in(&shard_dir).map_err(|e| CoreError::Backend(format!("failed to create temp file: {e}")))?;
        temp.write_all(&data)
            .map_err(|e| CoreError::Backend(format!("failed to write temp file: {e}")))?;
        temp.persist(&final_path)
            .map_err(|e| CoreError::Backend(format!("failed to rename into place: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Storage for FileStorage {
    fn name(&self) -> &str {
        "vault.file@v1"
    }

    async fn write_data(&self, data: Vec<u8>, digest: &Digest, _tags: &TagMap) -> Result<Json, CoreError> {
        let relpath = Self::blob_relpath(&digest.content_hash, &digest.content_type);
        let final_path = self.root.join(&relpath);
        if final_path.exists() {
            return Ok(Self::locator(&relpath));
        }
        let shard_dir = final_path.parent().expect("blob path always has a parent").to_path_buf();

        tokio::task::spawn_blocking(move || Self::persist_blob(shard_dir, final_path, data))
            .await
            .map_err(|e| CoreError::Backend(format!("temp-file write task panicked: {e}")))??;

        Ok(Self::locator(&relpath))
    }

    async fn read_data(&self, locator: &Json) -> Result<Vec<u8>, CoreError> {
        let path = self.path_from_locator(locator)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                CoreError::NoStorageData {
                    storage_name: self.name().to_string(),
                }
            } else {
                CoreError::Backend(format!("failed to read {}: {e}", path.display()))
            }
        })
    }

    /// Drains the stream into memory (the final, hash-derived destination isn't known until
    /// the whole thing has been read anyway), then does the same temp-write-then-rename as
    /// [`FileStorage::write_data`].
    async fn write_data_stream(&self, mut data_stream: ByteStream, get_digest: GetDigest, tags: &TagMap) -> Result<Json, CoreError> {
        let mut buf = Vec::new();
        while let Some(chunk) = data_stream.next().await {
            buf.extend_from_slice(&chunk.map_err(|e| CoreError::Backend(e.to_string()))?);
        }
        let digest = get_digest.get(false)?;
        self.write_data(buf, &digest.into_digest(), tags).await
    }

    fn read_data_stream(&self, locator: &Json) -> ByteStream {
        let path = match self.path_from_locator(locator) {
            Ok(p) => p,
            Err(e) => {
                return Box::pin(futures::stream::once(async move {
                    Err(std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string()))
                }))
            }
        };
        let storage_name = self.name().to_string();
        Box::pin(futures::stream::unfold(None, move |state| {
            let path = path.clone();
            let storage_name = storage_name.clone();
            async move {
                let mut file = match state {
                    Some(file) => file,
                    None => match tokio::fs::File::open(&path).await {
                        Ok(f) => f,
                        Err(e) => {
                            let kind = if e.kind() == std::io::ErrorKind::NotFound {
                                std::io::ErrorKind::NotFound
                            } else {
                                std::io::ErrorKind::Other
                            };
                            return Some((
                                Err(std::io::Error::new(kind, format!("{storage_name}: {e}"))),
                                None,
                            ));
                        }
                    },
                };
                let mut buf = vec![0u8; 64 * 1024];
                match file.read(&mut buf).await {
                    Ok(0) => None,
                    Ok(n) => {
                        buf.truncate(n);
                        Some((Ok(bytes::Bytes::from(buf)), Some(file)))
                    }
                    Err(e) => Some((Err(e), None)),
                }
            }
        }))
    }
}

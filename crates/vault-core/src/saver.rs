//! The save pipeline: unpack an object, serialize and store each of its contents
//! concurrently, then commit the resulting manifest.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn, Span};
use uuid::Uuid;

use crate::digest::{Digest, DigestingStream};
use crate::error::{CoreError, Failure, SaveErrors};
use crate::manifest::{ContentRecord, ManifestRecord};
use crate::registry::Registry;
use crate::serializer::SerializerKind;
use crate::storable::Storable;
use crate::storage::TagMap;
use crate::unpacker::{UnpackedContent, UnpackedContents};

/// Where a [`SaverContext`] commits the manifests and content rows it produces.
///
/// `vault-state` implements this against its two SurrealDB tables; a test double can keep
/// everything in memory. The sink owns transactional semantics: a failed
/// `commit_manifest` call must leave no partial manifest row behind.
#[async_trait]
pub trait ManifestSink: Send + Sync {
    async fn commit_manifest(
        &self,
        manifest: ManifestRecord,
        contents: Vec<ContentRecord>,
    ) -> Result<(), CoreError>;
}

/// Per-call overrides to `save_soon`. Every field defaults to "let the registry decide".
#[derive(Debug, Clone, Default)]
pub struct SaveOptions {
    pub tags: TagMap,
    pub unpacker_name: Option<String>,
    pub storage_name: Option<String>,
}

/// Accumulates concurrent save operations and reports a [`SaveErrors`] aggregate once
/// joined, rather than failing the whole batch at the first error.
///
/// One [`tokio::task::JoinSet`] fans out across objects passed to [`SaverContext::save_soon`];
/// within each object's save, a second `JoinSet` fans out across its unpacked contents, so a
/// manifest with ten contents stores all ten concurrently instead of one at a time.
pub struct SaverContext {
    registry: Registry,
    sink: Arc<dyn ManifestSink>,
    tasks: JoinSet<Result<Uuid, Failure>>,
    attempted: usize,
}

impl SaverContext {
    pub fn new(registry: Registry, sink: Arc<dyn ManifestSink>) -> Self {
        SaverContext {
            registry,
            sink,
            tasks: JoinSet::new(),
            attempted: 0,
        }
    }

    /// Enqueue an object for saving; returns immediately. The manifest ID it will be saved
    /// under is not known to the caller until [`SaverContext::join`] resolves — the saver
    /// assigns it internally so it can label the manifest and every content row before any
    /// I/O starts.
    pub fn save_soon<S>(&mut self, obj: S, opts: SaveOptions)
    where
        S: Storable + Send + Sync + 'static,
    {
        self.attempted += 1;
        let registry = self.registry.clone();
        let sink = Arc::clone(&self.sink);
        let label = S::unpacker_name().to_string();
        self.tasks.spawn(async move {
            save_one(&registry, sink.as_ref(), obj, opts)
                .await
                .map_err(|error| Failure { key: label, error })
        });
    }

    /// Drain every enqueued save, returning the manifest IDs that succeeded or a
    /// [`SaveErrors`] naming every failure alongside how many objects were attempted.
    pub async fn join(mut self) -> Result<Vec<Uuid>, SaveErrors> {
        let mut ids = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(id)) => ids.push(id),
                Ok(Err(failure)) => {
                    warn!(key = %failure.key, error = %failure.error, "object failed to save");
                    failures.push(failure);
                }
                Err(join_err) => failures.push(Failure {
                    key: "<task panic>".to_string(),
                    error: CoreError::Backend(join_err.to_string()),
                }),
            }
        }
        if failures.is_empty() {
            debug!(saved = ids.len(), "saver context joined, all objects committed");
            Ok(ids)
        } else {
            warn!(
                failed = failures.len(),
                attempted = self.attempted,
                "saver context joined with failures"
            );
            Err(SaveErrors {
                failures,
                attempted: self.attempted,
            })
        }
    }
}

/// Save a single object outside of a [`SaverContext`] batch; convenience wrapper for callers
/// that only ever save one thing at a time.
#[instrument(skip_all, fields(class = %S::class_id(), manifest_id = tracing::field::Empty))]
pub async fn save_soon<S>(
    registry: &Registry,
    sink: &dyn ManifestSink,
    obj: S,
    opts: SaveOptions,
) -> Result<Uuid, CoreError>
where
    S: Storable + Send + Sync + 'static,
{
    save_one(registry, sink, obj, opts).await
}

async fn save_one<S>(
    registry: &Registry,
    sink: &dyn ManifestSink,
    obj: S,
    opts: SaveOptions,
) -> Result<Uuid, CoreError>
where
    S: Storable + Send + Sync + 'static,
{
    let manifest_id = Uuid::new_v4();
    let class_id = S::class_id();
    let unpacker_name = opts.unpacker_name.unwrap_or_else(|| S::unpacker_name().to_string());
    let unpacker = registry.get_unpacker::<S>(&unpacker_name)?;
    let unpacked: UnpackedContents = unpacker.unpack(&obj, registry)?;

    let contents = save_contents(registry, manifest_id, unpacked, opts.storage_name.as_deref()).await?;

    let manifest = ManifestRecord::new(manifest_id, class_id.as_uuid(), unpacker_name, opts.tags);
    sink.commit_manifest(manifest, contents).await?;
    Span::current().record("manifest_id", tracing::field::display(manifest_id));
    debug!(%manifest_id, class = %class_id, "manifest committed");
    Ok(manifest_id)
}

/// Serialize and store every unpacked content entry concurrently, then return the resulting
/// rows in the same order the unpacker produced them (not the order tasks happen to finish
/// in) — the saved content row order is a documented property of the format.
async fn save_contents(
    registry: &Registry,
    manifest_id: Uuid,
    unpacked: UnpackedContents,
    default_storage_name: Option<&str>,
) -> Result<Vec<ContentRecord>, CoreError> {
    let mut tasks: JoinSet<Result<(usize, ContentRecord), CoreError>> = JoinSet::new();

    for (position, (key, content)) in unpacked.into_iter().enumerate() {
        let registry = registry.clone();
        let default_storage_name = default_storage_name.map(|s| s.to_string());
        tasks.spawn(async move {
            let record = save_one_content(&registry, manifest_id, key, content, default_storage_name.as_deref()).await?;
            Ok((position, record))
        });
    }

    let mut collected = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(entry)) => collected.push(entry),
            Ok(Err(e)) => return Err(e),
            Err(join_err) => return Err(CoreError::Backend(join_err.to_string())),
        }
    }
    collected.sort_by_key(|(position, _)| *position);
    Ok(collected.into_iter().map(|(_, record)| record).collect())
}

async fn save_one_content(
    registry: &Registry,
    manifest_id: Uuid,
    content_key: String,
    content: UnpackedContent,
    default_storage_name: Option<&str>,
) -> Result<ContentRecord, CoreError> {
    match content {
        UnpackedContent::Value {
            value,
            serializer_name,
            storage_name,
        } => {
            save_value_content(
                registry,
                manifest_id,
                content_key,
                value,
                serializer_name,
                storage_name.as_deref().or(default_storage_name),
            )
            .await
        }
        UnpackedContent::Stream {
            value_stream,
            serializer_name,
            storage_name,
        } => {
            save_stream_content(
                registry,
                manifest_id,
                content_key,
                value_stream,
                serializer_name,
                storage_name.as_deref().or(default_storage_name),
            )
            .await
        }
    }
}

async fn save_value_content(
    registry: &Registry,
    manifest_id: Uuid,
    content_key: String,
    value: Box<dyn Any + Send>,
    serializer_name: Option<String>,
    storage_name: Option<&str>,
) -> Result<ContentRecord, CoreError> {
    let serializer = registry.resolve_serializer_for_value(serializer_name.as_deref(), value.as_ref())?;
    let serialized = serializer.serialize_any(value.as_ref())?;
    let storage = registry.resolve_storage(storage_name)?;

    let digest = Digest::of_bytes(&serialized.data, &serialized.content_type, serialized.content_encoding.clone());
    let locator = storage.write_data(serialized.data, &digest, &TagMap::new()).await?;
    debug!(
        %content_key,
        storage = storage.name(),
        serializer = serializer.name(),
        size = digest.content_size,
        "content saved"
    );

    Ok(ContentRecord {
        id: Uuid::new_v4(),
        manifest_id,
        content_key,
        content_type: digest.content_type,
        content_encoding: digest.content_encoding,
        content_hash: digest.content_hash,
        content_hash_algorithm: digest.content_hash_algorithm,
        content_size: digest.content_size,
        serializer_name: serializer.name(),
        serializer_config: serializer.serialize_config(serialized.config.as_ref()),
        serializer_kind: SerializerKind::Value,
        storage_name: storage.name().to_string(),
        storage_config: storage.serialize_config(&locator),
        created_at: chrono::Utc::now(),
    })
}

async fn save_stream_content(
    registry: &Registry,
    manifest_id: Uuid,
    content_key: String,
    value_stream: std::pin::Pin<Box<dyn futures::Stream<Item = Box<dyn Any + Send>> + Send>>,
    serializer_name: Option<String>,
    storage_name: Option<&str>,
) -> Result<ContentRecord, CoreError> {
    // Per-type codec inference needs a concrete `TypeId`, which a stream only offers once it
    // yields its first item. Without an explicit name, peek that one item, infer the codec
    // from it, then prepend it back so the codec still sees the full sequence.
    let (serializer, value_stream) = match serializer_name {
        Some(name) => {
            let serializer = registry.get_stream_serializer_erased(&name)?;
            (serializer, value_stream)
        }
        None => {
            use futures::StreamExt;
            let mut value_stream = value_stream;
            let first = value_stream.next().await.ok_or_else(|| CoreError::UnpackerContract {
                unpacker_name: "<unpacker>".to_string(),
                message: format!(
                    "stream content {content_key:?} has no serializer_name and yielded no items, so its codec cannot be inferred"
                ),
            })?;
            let serializer = registry.get_stream_serializer_by_type_erased(first.as_ref().type_id(), "<inferred from stream>")?;
            let prepended = futures::stream::once(async move { first }).chain(value_stream);
            (serializer, Box::pin(prepended) as std::pin::Pin<Box<dyn futures::Stream<Item = Box<dyn Any + Send>> + Send>>)
        }
    };
    let serialized = serializer.serialize_any_stream(value_stream)?;

    let digesting = DigestingStream::new(serialized.data_stream, serialized.content_type.clone(), serialized.content_encoding.clone());
    let get_digest = digesting.digest_handle();
    let storage = registry.resolve_storage(storage_name)?;

    let locator = storage
        .write_data_stream(Box::pin(digesting), get_digest.clone(), &TagMap::new())
        .await?;
    let digest = get_digest.get(false).map_err(|_| {
        warn!(%content_key, storage = storage.name(), "storage driver returned without draining the stream");
        CoreError::StorageDidNotConsumeStream {
            storage_name: storage.name().to_string(),
            content_key: content_key.clone(),
        }
    })?;
    debug!(
        %content_key,
        storage = storage.name(),
        serializer = serializer.name(),
        size = digest.content_size,
        "stream content saved"
    );

    Ok(ContentRecord {
        id: Uuid::new_v4(),
        manifest_id,
        content_key,
        content_type: digest.content_type,
        content_encoding: digest.content_encoding,
        content_hash: digest.content_hash,
        content_hash_algorithm: digest.content_hash_algorithm,
        content_size: digest.content_size,
        serializer_name: serializer.name(),
        serializer_config: serializer.serialize_config(serialized.config.as_ref()),
        serializer_kind: SerializerKind::Stream,
        storage_name: storage.name().to_string(),
        storage_config: storage.serialize_config(&locator),
        created_at: chrono::Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::validate_component_name;
    use crate::digest::GetDigest;
    use crate::error::CoreError as E;
    use crate::serializer::{SerializedData, SerializedDataStream, Serializer, StreamSerializer};
    use crate::storable::ClassId;
    use crate::storage::{ByteStream, Storage};
    use crate::unpacker::{LoadedContents, Unpacker, UnpackedContents};
    use async_trait::async_trait;
    use serde_json::Value as Json;
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    struct Note {
        body: String,
    }

    impl Storable for Note {
        fn class_id() -> ClassId {
            ClassId::parse("deadbeef").unwrap()
        }
        fn unpacker_name() -> &'static str {
            "vault.test.note@v1"
        }
    }

    struct NoteUnpacker;

    impl Unpacker<Note> for NoteUnpacker {
        fn name(&self) -> &str {
            "vault.test.note@v1"
        }

        fn unpack(&self, obj: &Note, _registry: &Registry) -> Result<UnpackedContents, E> {
            let mut contents = UnpackedContents::new();
            contents.insert(
                "body".to_string(),
                UnpackedContent::Value {
                    value: Box::new(obj.body.clone()),
                    serializer_name: None,
                    storage_name: None,
                },
            );
            Ok(contents)
        }

        fn repack(&self, mut contents: LoadedContents, _registry: &Registry) -> Result<Note, E> {
            match contents.shift_remove("body") {
                Some(crate::unpacker::LoadedContent::Value { value, .. }) => {
                    let body = *value.downcast::<String>().map_err(|_| E::UnpackerContract {
                        unpacker_name: "vault.test.note@v1".to_string(),
                        message: "expected a String body".to_string(),
                    })?;
                    Ok(Note { body })
                }
                _ => Err(E::UnpackerContract {
                    unpacker_name: "vault.test.note@v1".to_string(),
                    message: "missing body content".to_string(),
                }),
            }
        }
    }

    struct PlainStringSerializer;

    impl Serializer<String> for PlainStringSerializer {
        fn name(&self) -> &str {
            "vault.test.plain@v1"
        }

        fn serialize_data(&self, value: &String) -> Result<SerializedData, E> {
            Ok(SerializedData {
                data: value.as_bytes().to_vec(),
                content_type: "text/plain".to_string(),
                content_encoding: None,
                config: None,
            })
        }

        fn deserialize_data(&self, content: &SerializedData) -> Result<String, E> {
            Ok(String::from_utf8_lossy(&content.data).into_owned())
        }
    }

    struct LineStreamSerializer;

    impl StreamSerializer<String> for LineStreamSerializer {
        fn name(&self) -> &str {
            "vault.test.lines@v1"
        }

        fn serialize_data_stream(
            &self,
            stream: std::pin::Pin<Box<dyn futures::Stream<Item = String> + Send>>,
        ) -> Result<SerializedDataStream, E> {
            use futures::StreamExt;
            let bytes_stream = stream.map(|line| Ok(bytes::Bytes::from(format!("{line}\n"))));
            Ok(SerializedDataStream {
                data_stream: Box::pin(bytes_stream),
                content_type: "text/x-lines".to_string(),
                content_encoding: None,
                config: None,
            })
        }

        fn deserialize_data_stream(
            &self,
            _content_type: &str,
            _content_encoding: Option<&str>,
            _config: Option<&Json>,
            _data_stream: ByteStream,
        ) -> std::pin::Pin<Box<dyn futures::Stream<Item = Result<String, E>> + Send>> {
            unimplemented!("not exercised in these tests")
        }
    }

    struct MemoryStorage {
        blobs: StdMutex<BTreeMap<String, Vec<u8>>>,
    }

    impl MemoryStorage {
        fn new() -> Self {
            MemoryStorage {
                blobs: StdMutex::new(BTreeMap::new()),
            }
        }
    }

    #[async_trait]
    impl Storage for MemoryStorage {
        fn name(&self) -> &str {
            "vault.test.memory@v1"
        }

        async fn write_data(&self, data: Vec<u8>, digest: &crate::digest::Digest, _tags: &TagMap) -> Result<Json, E> {
            let key = digest.content_hash.clone();
            self.blobs.lock().unwrap().insert(key.clone(), data);
            Ok(Json::String(key))
        }

        async fn read_data(&self, locator: &Json) -> Result<Vec<u8>, E> {
            let key = locator.as_str().unwrap();
            self.blobs
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| E::NoStorageData {
                    storage_name: "vault.test.memory@v1".to_string(),
                })
        }

        async fn write_data_stream(&self, mut data_stream: ByteStream, get_digest: GetDigest, tags: &TagMap) -> Result<Json, E> {
            use futures::StreamExt;
            let mut buf = Vec::new();
            while let Some(chunk) = data_stream.next().await {
                buf.extend_from_slice(&chunk.map_err(|e| E::Backend(e.to_string()))?);
            }
            let digest = get_digest.get(false)?;
            self.write_data(buf, &digest.into_digest(), tags).await
        }

        fn read_data_stream(&self, _locator: &Json) -> ByteStream {
            unimplemented!("not exercised in these tests")
        }
    }

    fn build_registry() -> Registry {
        Registry::builder()
            .register_storable::<Note>("Note")
            .register_serializer::<String, _>(PlainStringSerializer)
            .unwrap()
            .register_unpacker::<Note, _>(NoteUnpacker)
            .unwrap()
            .with_default_storage(MemoryStorage::new())
            .unwrap()
            .build()
    }

    struct RecordingSink {
        committed: StdMutex<Vec<(ManifestRecord, Vec<ContentRecord>)>>,
    }

    #[async_trait]
    impl ManifestSink for RecordingSink {
        async fn commit_manifest(&self, manifest: ManifestRecord, contents: Vec<ContentRecord>) -> Result<(), E> {
            self.committed.lock().unwrap().push((manifest, contents));
            Ok(())
        }
    }

    #[tokio::test]
    async fn saves_a_single_value_content() {
        let registry = build_registry();
        let sink = Arc::new(RecordingSink {
            committed: StdMutex::new(Vec::new()),
        });
        let id = save_soon(
            &registry,
            sink.as_ref(),
            Note { body: "hello".to_string() },
            SaveOptions::default(),
        )
        .await
        .unwrap();

        let committed = sink.committed.lock().unwrap();
        assert_eq!(committed.len(), 1);
        let (manifest, contents) = &committed[0];
        assert_eq!(manifest.id, id);
        assert_eq!(contents.len(), 1);
        assert_eq!(contents[0].content_key, "body");
        assert_eq!(contents[0].serializer_name, "vault.test.plain@v1");
    }

    #[tokio::test]
    async fn context_aggregates_failures_without_aborting_the_batch() {
        validate_component_name("vault.test.note@v1").unwrap();
        let registry = build_registry();
        let sink: Arc<dyn ManifestSink> = Arc::new(RecordingSink {
            committed: StdMutex::new(Vec::new()),
        });

        let mut ctx = SaverContext::new(registry, sink);
        ctx.save_soon(Note { body: "ok".to_string() }, SaveOptions::default());
        ctx.save_soon(
            Note { body: "also ok".to_string() },
            SaveOptions {
                unpacker_name: Some("vault.test.missing@v1".to_string()),
                ..Default::default()
            },
        );

        let result = ctx.join().await;
        let errors = result.unwrap_err();
        assert_eq!(errors.attempted, 2);
        assert_eq!(errors.failures().len(), 1);
    }

    #[tokio::test]
    async fn stream_content_without_a_serializer_name_infers_one_by_peeking_the_first_item() {
        let registry = Registry::builder()
            .register_storable::<Note>("Note")
            .register_stream_serializer::<String, _>(LineStreamSerializer)
            .unwrap()
            .with_default_storage(MemoryStorage::new())
            .unwrap()
            .build();

        let lines = vec!["first".to_string(), "second".to_string(), "third".to_string()];
        let value_stream: std::pin::Pin<Box<dyn futures::Stream<Item = Box<dyn Any + Send>> + Send>> =
            Box::pin(futures::stream::iter(lines.clone().into_iter().map(|l| Box::new(l) as Box<dyn Any + Send>)));

        let record = save_stream_content(&registry, Uuid::new_v4(), "body".to_string(), value_stream, None, None)
            .await
            .unwrap();

        assert_eq!(record.serializer_name, "vault.test.lines@v1");
        assert_eq!(record.content_type, "text/x-lines");
        // The peeked first item must survive in the persisted bytes, not just the rest.
        let stored = registry.resolve_storage(None).unwrap();
        let locator: Json = serde_json::from_str(&record.storage_config).unwrap();
        let bytes = stored.read_data(&locator).await.unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "first\nsecond\nthird\n");
    }
}

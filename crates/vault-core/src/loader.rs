//! The load pipeline: fetch a manifest and its content rows, materialize each content
//! concurrently, then repack the original object.

use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::error::{CoreError, Failure, LoadErrors};
use crate::manifest::{ContentRecord, ManifestRecord};
use crate::registry::Registry;
use crate::serializer::{SerializedData, SerializerKind};
use crate::storable::Storable;
use crate::unpacker::{LoadedContent, LoadedContents};

/// Where a [`LoaderContext`] fetches manifests and their content rows from.
///
/// `vault-state` implements this against its two SurrealDB tables; a test double can serve
/// everything from memory. `fetch_manifest` must return the manifest with
/// [`ManifestRecord::contents`] populated (`Some`, possibly empty) — a loader never calls
/// back into the source to fetch contents separately.
#[async_trait]
pub trait ContentSource: Send + Sync {
    async fn fetch_manifest(&self, manifest_id: Uuid) -> Result<ManifestRecord, CoreError>;
}

/// A loaded object whose concrete type is only known to the caller that enqueued it.
///
/// [`LoaderContext`] can have many different storable types in flight within the same batch
/// (each [`LoaderContext::load_soon`] call names its own `S`), so the batch's results are
/// necessarily heterogeneous; [`LoadedObject::downcast`] recovers the concrete type at the
/// point the caller already knows it.
pub struct LoadedObject {
    pub manifest_id: Uuid,
    pub value: Box<dyn Any + Send>,
}

impl LoadedObject {
    pub fn downcast<S: 'static>(self) -> Result<S, CoreError> {
        self.value.downcast::<S>().map(|boxed| *boxed).map_err(|_| CoreError::Backend(format!(
            "loaded object for manifest {} could not be downcast to the requested type",
            self.manifest_id
        )))
    }
}

/// Accumulates concurrent load operations and reports a [`LoadErrors`] aggregate once
/// joined, mirroring [`crate::saver::SaverContext`].
///
/// One `JoinSet` fans out across manifests passed to [`LoaderContext::load_soon`]; within
/// each manifest's load, a second `JoinSet` fans out across its content rows.
pub struct LoaderContext {
    registry: Registry,
    source: Arc<dyn ContentSource>,
    tasks: JoinSet<Result<LoadedObject, Failure>>,
    attempted: usize,
}

impl LoaderContext {
    pub fn new(registry: Registry, source: Arc<dyn ContentSource>) -> Self {
        LoaderContext {
            registry,
            source,
            tasks: JoinSet::new(),
            attempted: 0,
        }
    }

    /// Enqueue a manifest for loading as storable type `S`; returns immediately.
    pub fn load_soon<S>(&mut self, manifest_id: Uuid)
    where
        S: Storable + Send + Sync + 'static,
    {
        self.attempted += 1;
        let registry = self.registry.clone();
        let source = Arc::clone(&self.source);
        self.tasks.spawn(async move {
            load_one::<S>(&registry, source.as_ref(), manifest_id)
                .await
                .map(|obj| LoadedObject {
                    manifest_id,
                    value: Box::new(obj),
                })
                .map_err(|error| Failure {
                    key: manifest_id.to_string(),
                    error,
                })
        });
    }

    /// Drain every enqueued load, returning the loaded objects that succeeded or a
    /// [`LoadErrors`] naming every failure alongside how many manifests were attempted.
    pub async fn join(mut self) -> Result<Vec<LoadedObject>, LoadErrors> {
        let mut objects = Vec::new();
        let mut failures = Vec::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok(Ok(obj)) => objects.push(obj),
                Ok(Err(failure)) => {
                    warn!(key = %failure.key, error = %failure.error, "manifest failed to load");
                    failures.push(failure);
                }
                Err(join_err) => failures.push(Failure {
                    key: "<task panic>".to_string(),
                    error: CoreError::Backend(join_err.to_string()),
                }),
            }
        }
        if failures.is_empty() {
            debug!(loaded = objects.len(), "loader context joined, all manifests loaded");
            Ok(objects)
        } else {
            warn!(
                failed = failures.len(),
                attempted = self.attempted,
                "loader context joined with failures"
            );
            Err(LoadErrors {
                failures,
                attempted: self.attempted,
            })
        }
    }
}

/// Load a single manifest outside of a [`LoaderContext`] batch; convenience wrapper for
/// callers that only ever load one thing at a time.
#[instrument(skip_all, fields(%manifest_id))]
pub async fn load_soon<S>(registry: &Registry, source: &dyn ContentSource, manifest_id: Uuid) -> Result<S, CoreError>
where
    S: Storable + Send + Sync + 'static,
{
    load_one::<S>(registry, source, manifest_id).await
}

async fn load_one<S>(registry: &Registry, source: &dyn ContentSource, manifest_id: Uuid) -> Result<S, CoreError>
where
    S: Storable + Send + Sync + 'static,
{
    let manifest = source.fetch_manifest(manifest_id).await?;

    if manifest.class_id != S::class_id().as_uuid() {
        return Err(CoreError::TypeMismatch {
            manifest_id,
            expected: S::class_id().to_string(),
            actual: manifest.class_id.to_string(),
        });
    }

    let unpacker = registry.get_unpacker::<S>(&manifest.unpacker_name)?;
    let records = manifest.contents.ok_or_else(|| CoreError::Backend(format!(
        "manifest {manifest_id} was fetched without its contents"
    )))?;

    let loaded = load_contents(registry, records).await?;
    debug!(%manifest_id, unpacker = %manifest.unpacker_name, "manifest loaded");
    unpacker.repack(loaded, registry)
}

/// Materialize every content row concurrently, then return them keyed by `content_key` in
/// the same order the rows were stored — mirroring [`crate::saver::save_contents`].
async fn load_contents(registry: &Registry, records: Vec<ContentRecord>) -> Result<LoadedContents, CoreError> {
    let mut tasks: JoinSet<Result<(usize, String, LoadedContent), CoreError>> = JoinSet::new();

    for (position, record) in records.into_iter().enumerate() {
        let registry = registry.clone();
        tasks.spawn(async move {
            let key = record.content_key.clone();
            let content = load_one_content(&registry, record).await?;
            Ok((position, key, content))
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
    collected.sort_by_key(|(position, _, _)| *position);

    let mut out = LoadedContents::new();
    for (_, key, content) in collected {
        out.insert(key, content);
    }
    Ok(out)
}

async fn load_one_content(registry: &Registry, record: ContentRecord) -> Result<LoadedContent, CoreError> {
    let storage = registry.get_storage(&record.storage_name)?;
    let locator = storage.deserialize_config(&record.storage_config)?;

    match record.serializer_kind {
        SerializerKind::Value => {
            let data = storage.read_data(&locator).await?;
            let serializer = registry.get_serializer_erased(&record.serializer_name)?;
            let config = serializer.deserialize_config(&record.serializer_config)?;
            let serialized = SerializedData {
                data,
                content_type: record.content_type.clone(),
                content_encoding: record.content_encoding.clone(),
                config,
            };
            let value = serializer.deserialize_any(&serialized)?;
            debug!(content_key = %record.content_key, storage = %record.storage_name, "content loaded");
            Ok(LoadedContent::Value {
                value,
                serializer_name: record.serializer_name,
                storage_name: record.storage_name,
            })
        }
        SerializerKind::Stream => {
            let byte_stream = storage.read_data_stream(&locator);
            let serializer = registry.get_stream_serializer_erased(&record.serializer_name)?;
            let config = serializer.deserialize_config(&record.serializer_config)?;
            let value_stream = serializer.deserialize_any_stream(
                &record.content_type,
                record.content_encoding.as_deref(),
                config.as_ref(),
                byte_stream,
            );
            debug!(content_key = %record.content_key, storage = %record.storage_name, "stream content opened");
            Ok(LoadedContent::Stream {
                value_stream,
                serializer_name: record.serializer_name,
                storage_name: record.storage_name,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::component::validate_component_name;
    use crate::digest::{Digest, GetDigest};
    use crate::registry::Registry;
    use crate::saver::{save_soon, ManifestSink, SaveOptions};
    use crate::serializer::Serializer;
    use crate::storable::ClassId;
    use crate::storage::{ByteStream, Storage, TagMap};
    use crate::unpacker::{UnpackedContent, UnpackedContents, Unpacker};
    use std::collections::BTreeMap;
    use std::sync::Mutex as StdMutex;

    #[derive(Debug, PartialEq)]
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

        fn unpack(&self, obj: &Note, _registry: &Registry) -> Result<UnpackedContents, CoreError> {
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

        fn repack(&self, mut contents: LoadedContents, _registry: &Registry) -> Result<Note, CoreError> {
            match contents.shift_remove("body") {
                Some(LoadedContent::Value { value, .. }) => {
                    let body = *value.downcast::<String>().map_err(|_| CoreError::UnpackerContract {
                        unpacker_name: "vault.test.note@v1".to_string(),
                        message: "expected a String body".to_string(),
                    })?;
                    Ok(Note { body })
                }
                _ => Err(CoreError::UnpackerContract {
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

        fn serialize_data(&self, value: &String) -> Result<crate::serializer::SerializedData, CoreError> {
            Ok(crate::serializer::SerializedData {
                data: value.as_bytes().to_vec(),
                content_type: "text/plain".to_string(),
                content_encoding: None,
                config: None,
            })
        }

        fn deserialize_data(&self, content: &crate::serializer::SerializedData) -> Result<String, CoreError> {
            Ok(String::from_utf8_lossy(&content.data).into_owned())
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

        async fn write_data(&self, data: Vec<u8>, digest: &Digest, _tags: &TagMap) -> Result<serde_json::Value, CoreError> {
            let key = digest.content_hash.clone();
            self.blobs.lock().unwrap().insert(key.clone(), data);
            Ok(serde_json::Value::String(key))
        }

        async fn read_data(&self, locator: &serde_json::Value) -> Result<Vec<u8>, CoreError> {
            let key = locator.as_str().unwrap();
            self.blobs
                .lock()
                .unwrap()
                .get(key)
                .cloned()
                .ok_or_else(|| CoreError::NoStorageData {
                    storage_name: "vault.test.memory@v1".to_string(),
                })
        }

        async fn write_data_stream(&self, _data_stream: ByteStream, _get_digest: GetDigest, _tags: &TagMap) -> Result<serde_json::Value, CoreError> {
            unimplemented!("not exercised in these tests")
        }

        fn read_data_stream(&self, _locator: &serde_json::Value) -> ByteStream {
            unimplemented!("not exercised in these tests")
        }
    }

    struct InMemorySink {
        manifests: StdMutex<BTreeMap<Uuid, ManifestRecord>>,
    }

    #[async_trait]
    impl ManifestSink for InMemorySink {
        async fn commit_manifest(&self, mut manifest: ManifestRecord, contents: Vec<ContentRecord>) -> Result<(), CoreError> {
            manifest.contents = Some(contents);
            self.manifests.lock().unwrap().insert(manifest.id, manifest);
            Ok(())
        }
    }

    #[async_trait]
    impl ContentSource for InMemorySink {
        async fn fetch_manifest(&self, manifest_id: Uuid) -> Result<ManifestRecord, CoreError> {
            self.manifests
                .lock()
                .unwrap()
                .get(&manifest_id)
                .cloned()
                .ok_or_else(|| CoreError::NotRegistered {
                    kind: "manifest",
                    key: manifest_id.to_string(),
                })
        }
    }

    fn build_registry() -> Registry {
        validate_component_name("vault.test.note@v1").unwrap();
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

    #[tokio::test]
    async fn round_trips_a_value_content() {
        let registry = build_registry();
        let sink = Arc::new(InMemorySink {
            manifests: StdMutex::new(BTreeMap::new()),
        });

        let id = save_soon(
            &registry,
            sink.as_ref(),
            Note { body: "round trip".to_string() },
            SaveOptions::default(),
        )
        .await
        .unwrap();

        let note: Note = load_soon::<Note>(&registry, sink.as_ref(), id).await.unwrap();
        assert_eq!(note.body, "round trip");
    }

    #[tokio::test]
    async fn context_reports_missing_manifests_without_aborting_the_batch() {
        let registry = build_registry();
        let sink = Arc::new(InMemorySink {
            manifests: StdMutex::new(BTreeMap::new()),
        });
        let id = save_soon(
            &registry,
            sink.as_ref(),
            Note { body: "present".to_string() },
            SaveOptions::default(),
        )
        .await
        .unwrap();

        let mut ctx = LoaderContext::new(registry, sink as Arc<dyn ContentSource>);
        ctx.load_soon::<Note>(id);
        ctx.load_soon::<Note>(Uuid::new_v4());

        let errors = ctx.join().await.unwrap_err();
        assert_eq!(errors.attempted, 2);
        assert_eq!(errors.failures().len(), 1);
    }
}

//! The read-only resolver from names/types/MIME content-types to codecs, storages,
//! storables, and unpackers.
//!
//! Rust has no runtime module introspection or ancestor-chain walk, so the original
//! "build from module exports, merge registries, explicit kwargs win" design collapses to an
//! explicit builder: [`RegistryBuilder::merge`] folds in other registries (ascending
//! priority, earliest first), and everything passed directly to a `register_*` call wins
//! over anything merged in, mirroring `_merge_infos_with_ascending_priority`'s contract.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::pin::Pin;
use std::sync::Arc;

use futures::Stream;
use serde_json::Value as Json;
use uuid::Uuid;

use crate::component::validate_component_name;
use crate::error::CoreError;
use crate::serializer::{SerializedData, SerializedDataStream, Serializer, StreamSerializer};
use crate::storable::{ClassId, Storable};
use crate::storage::Storage;
use crate::unpacker::Unpacker;

/// A parsed `type/subtype[+suffix][;params]` MIME string.
///
/// Parameter order is significant for equality — `a/b;x=1;y=2` and `a/b;y=2;x=1` are
/// distinct keys, since the spec this registry implements requires it.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentType {
    pub type_: String,
    pub subtype: String,
    pub suffix: String,
    pub parameters: Vec<(String, String)>,
}

pub fn parse_content_type(s: &str) -> Result<ContentType, CoreError> {
    let (type_part, params_part) = match s.split_once(';') {
        Some((t, p)) => (t, Some(p)),
        None => (s, None),
    };
    let (type_, rest) = type_part
        .split_once('/')
        .ok_or_else(|| bad_content_type(s))?;
    let (subtype, suffix) = match rest.split_once('+') {
        Some((sub, suf)) => (sub, suf),
        None => (rest, ""),
    };
    if type_.is_empty() || subtype.is_empty() {
        return Err(bad_content_type(s));
    }

    let mut parameters = Vec::new();
    if let Some(params) = params_part {
        for param in params.split(';') {
            let param = param.trim();
            if param.is_empty() {
                continue;
            }
            let (key, value) = param.split_once('=').unwrap_or((param, ""));
            parameters.push((key.trim().to_string(), value.trim().to_string()));
        }
    }

    Ok(ContentType {
        type_: type_.to_string(),
        subtype: subtype.to_string(),
        suffix: suffix.to_string(),
        parameters,
    })
}

fn bad_content_type(s: &str) -> CoreError {
    CoreError::SerializerContract {
        serializer_name: "<content-type-parser>".to_string(),
        message: format!("invalid content type: {s:?}"),
    }
}

// ---------------------------------------------------------------------------
// Type-erased codec storage
// ---------------------------------------------------------------------------

pub(crate) trait ErasedSerializer: Send + Sync {
    fn name(&self) -> String;
    fn content_types(&self) -> Vec<String>;
    fn serialize_any(&self, value: &(dyn Any + Send)) -> Result<SerializedData, CoreError>;
    fn deserialize_any(&self, content: &SerializedData) -> Result<Box<dyn Any + Send>, CoreError>;
    fn serialize_config(&self, config: Option<&Json>) -> String;
    fn deserialize_config(&self, config: &str) -> Result<Option<Json>, CoreError>;
}

struct SerializerErasure<T, S> {
    inner: Arc<S>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S> ErasedSerializer for SerializerErasure<T, S>
where
    T: Any + Send + Sync + 'static,
    S: Serializer<T> + 'static,
{
    fn name(&self) -> String {
        self.inner.name().to_string()
    }

    fn content_types(&self) -> Vec<String> {
        self.inner.content_types().iter().map(|s| s.to_string()).collect()
    }

    fn serialize_any(&self, value: &(dyn Any + Send)) -> Result<SerializedData, CoreError> {
        let typed = value
            .downcast_ref::<T>()
            .expect("registry only dispatches to the type a serializer was registered for");
        self.inner.serialize_data(typed)
    }

    fn deserialize_any(&self, content: &SerializedData) -> Result<Box<dyn Any + Send>, CoreError> {
        Ok(Box::new(self.inner.deserialize_data(content)?))
    }

    fn serialize_config(&self, config: Option<&Json>) -> String {
        self.inner.serialize_config(config)
    }

    fn deserialize_config(&self, config: &str) -> Result<Option<Json>, CoreError> {
        self.inner.deserialize_config(config)
    }
}

pub(crate) type BoxValueStream = Pin<Box<dyn Stream<Item = Box<dyn Any + Send>> + Send>>;
pub(crate) type BoxByteStream = Pin<Box<dyn Stream<Item = std::io::Result<bytes::Bytes>> + Send>>;
pub(crate) type BoxErasedValueStream = Pin<Box<dyn Stream<Item = Result<Box<dyn Any + Send>, CoreError>> + Send>>;

pub(crate) trait ErasedStreamSerializer: Send + Sync {
    fn name(&self) -> String;
    fn content_types(&self) -> Vec<String>;
    fn serialize_any_stream(&self, stream: BoxValueStream) -> Result<SerializedDataStream, CoreError>;
    fn deserialize_any_stream(
        &self,
        content_type: &str,
        content_encoding: Option<&str>,
        config: Option<&Json>,
        data_stream: BoxByteStream,
    ) -> BoxErasedValueStream;
    fn serialize_config(&self, config: Option<&Json>) -> String;
    fn deserialize_config(&self, config: &str) -> Result<Option<Json>, CoreError>;
}

struct StreamSerializerErasure<T, S> {
    inner: Arc<S>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S> ErasedStreamSerializer for StreamSerializerErasure<T, S>
where
    T: Any + Send + Sync + 'static,
    S: StreamSerializer<T> + 'static,
{
    fn name(&self) -> String {
        self.inner.name().to_string()
    }

    fn content_types(&self) -> Vec<String> {
        self.inner.content_types().iter().map(|s| s.to_string()).collect()
    }

    fn serialize_any_stream(&self, stream: BoxValueStream) -> Result<SerializedDataStream, CoreError> {
        use futures::StreamExt;
        let typed = stream.map(|boxed| {
            *boxed
                .downcast::<T>()
                .expect("registry only dispatches to the type a stream serializer was registered for")
        });
        self.inner.serialize_data_stream(Box::pin(typed))
    }

    fn deserialize_any_stream(
        &self,
        content_type: &str,
        content_encoding: Option<&str>,
        config: Option<&Json>,
        data_stream: BoxByteStream,
    ) -> BoxErasedValueStream {
        use futures::StreamExt;
        let typed = self
            .inner
            .deserialize_data_stream(content_type, content_encoding, config, data_stream);
        Box::pin(typed.map(|res| res.map(|v| Box::new(v) as Box<dyn Any + Send>)))
    }

    fn serialize_config(&self, config: Option<&Json>) -> String {
        self.inner.serialize_config(config)
    }

    fn deserialize_config(&self, config: &str) -> Result<Option<Json>, CoreError> {
        self.inner.deserialize_config(config)
    }
}

// ---------------------------------------------------------------------------
// Storable + unpacker bookkeeping
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct StorableInfo {
    type_name: &'static str,
    unpacker_name: String,
}

/// Holds an `Arc<dyn Unpacker<S>>` behind `Any` so unpackers for different storable types can
/// live in the same name-keyed map; downcast back via [`Registry::get_unpacker`].
type ErasedUnpacker = Arc<dyn Any + Send + Sync>;

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

#[derive(Default)]
struct RegistryInfo {
    storable_by_id: HashMap<Uuid, StorableInfo>,
    serializer_by_name: HashMap<String, Arc<dyn ErasedSerializer>>,
    serializer_by_type: HashMap<TypeId, Arc<dyn ErasedSerializer>>,
    serializer_by_content_type: HashMap<ContentType, Arc<dyn ErasedSerializer>>,
    stream_serializer_by_name: HashMap<String, Arc<dyn ErasedStreamSerializer>>,
    stream_serializer_by_type: HashMap<TypeId, Arc<dyn ErasedStreamSerializer>>,
    stream_serializer_by_content_type: HashMap<ContentType, Arc<dyn ErasedStreamSerializer>>,
    storage_by_name: HashMap<String, Arc<dyn Storage>>,
    unpacker_by_name: HashMap<String, ErasedUnpacker>,
    unpacker_by_type: HashMap<TypeId, ErasedUnpacker>,
    default_storage: Option<Arc<dyn Storage>>,
}

impl RegistryInfo {
    /// Overlay `other` under `self`: anything already present in `self` wins (used to give
    /// explicitly-registered components priority over merged-in registries).
    fn overlay_onto(mut self, other: &RegistryInfo) -> Self {
        for (k, v) in &other.storable_by_id {
            self.storable_by_id.entry(*k).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.serializer_by_name {
            self.serializer_by_name.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.serializer_by_type {
            self.serializer_by_type.entry(*k).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.serializer_by_content_type {
            self.serializer_by_content_type.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.stream_serializer_by_name {
            self.stream_serializer_by_name.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.stream_serializer_by_type {
            self.stream_serializer_by_type.entry(*k).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.stream_serializer_by_content_type {
            self.stream_serializer_by_content_type
                .entry(k.clone())
                .or_insert_with(|| v.clone());
        }
        for (k, v) in &other.storage_by_name {
            self.storage_by_name.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.unpacker_by_name {
            self.unpacker_by_name.entry(k.clone()).or_insert_with(|| v.clone());
        }
        for (k, v) in &other.unpacker_by_type {
            self.unpacker_by_type.entry(*k).or_insert_with(|| v.clone());
        }
        if self.default_storage.is_none() {
            self.default_storage = other.default_storage.clone();
        }
        self
    }
}

/// An immutable, `Arc`-shared resolver from names/types/MIME content-types to codecs,
/// storages, storables, and unpackers. Read-only after [`RegistryBuilder::build`].
#[derive(Clone)]
pub struct Registry {
    info: Arc<RegistryInfo>,
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("storables", &self.info.storable_by_id.len())
            .field("serializers", &self.info.serializer_by_name.len())
            .field("stream_serializers", &self.info.stream_serializer_by_name.len())
            .field("storages", &self.info.storage_by_name.len())
            .field("unpackers", &self.info.unpacker_by_name.len())
            .finish()
    }
}

impl Registry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    pub fn get_default_storage(&self) -> Result<Arc<dyn Storage>, CoreError> {
        self.info.default_storage.clone().ok_or(CoreError::NotRegistered {
            kind: "default storage",
            key: "<none set>".to_string(),
        })
    }

    pub fn has_storable(&self, class_id: ClassId) -> bool {
        self.info.storable_by_id.contains_key(&class_id.as_uuid())
    }

    pub fn unpacker_name_for_class(&self, class_id: ClassId) -> Result<&str, CoreError> {
        self.info
            .storable_by_id
            .get(&class_id.as_uuid())
            .map(|info| info.unpacker_name.as_str())
            .ok_or_else(|| CoreError::NotRegistered {
                kind: "storable class",
                key: class_id.to_string(),
            })
    }

    pub fn storable_type_name(&self, class_id: ClassId) -> Result<&str, CoreError> {
        self.info
            .storable_by_id
            .get(&class_id.as_uuid())
            .map(|info| info.type_name)
            .ok_or_else(|| CoreError::NotRegistered {
                kind: "storable class",
                key: class_id.to_string(),
            })
    }

    pub fn get_storage(&self, name: &str) -> Result<Arc<dyn Storage>, CoreError> {
        self.info
            .storage_by_name
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::NotRegistered {
                kind: "storage",
                key: name.to_string(),
            })
    }

    pub fn get_unpacker<S: 'static>(&self, name: &str) -> Result<Arc<dyn Unpacker<S>>, CoreError> {
        let erased = self.info.unpacker_by_name.get(name).ok_or_else(|| CoreError::NotRegistered {
            kind: "unpacker",
            key: name.to_string(),
        })?;
        erased
            .clone()
            .downcast::<Arc<dyn Unpacker<S>>>()
            .map(|b| (*b).clone())
            .map_err(|_| CoreError::NotRegistered {
                kind: "unpacker (type mismatch)",
                key: name.to_string(),
            })
    }

    pub fn infer_unpacker<S: 'static>(&self) -> Result<Arc<dyn Unpacker<S>>, CoreError> {
        let erased = self
            .info
            .unpacker_by_type
            .get(&TypeId::of::<S>())
            .ok_or_else(|| CoreError::NotRegistered {
                kind: "unpacker",
                key: std::any::type_name::<S>().to_string(),
            })?;
        erased
            .clone()
            .downcast::<Arc<dyn Unpacker<S>>>()
            .map(|b| (*b).clone())
            .map_err(|_| CoreError::NotRegistered {
                kind: "unpacker (type mismatch)",
                key: std::any::type_name::<S>().to_string(),
            })
    }

    pub(crate) fn get_serializer_erased(&self, name: &str) -> Result<Arc<dyn ErasedSerializer>, CoreError> {
        self.info
            .serializer_by_name
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::NotRegistered {
                kind: "serializer",
                key: name.to_string(),
            })
    }

    pub(crate) fn get_serializer_by_type_erased(&self, type_id: TypeId, type_name: &str) -> Result<Arc<dyn ErasedSerializer>, CoreError> {
        self.info
            .serializer_by_type
            .get(&type_id)
            .cloned()
            .ok_or_else(|| CoreError::NotRegistered {
                kind: "serializer",
                key: type_name.to_string(),
            })
    }

    pub fn get_serializer_by_content_type(&self, content_type: &str) -> Result<String, CoreError> {
        let parsed = parse_content_type(content_type)?;
        self.info
            .serializer_by_content_type
            .get(&parsed)
            .map(|s| s.name())
            .ok_or_else(|| CoreError::NotRegistered {
                kind: "serializer",
                key: content_type.to_string(),
            })
    }

    pub(crate) fn get_stream_serializer_erased(&self, name: &str) -> Result<Arc<dyn ErasedStreamSerializer>, CoreError> {
        self.info
            .stream_serializer_by_name
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::NotRegistered {
                kind: "stream serializer",
                key: name.to_string(),
            })
    }

    pub(crate) fn get_stream_serializer_by_type_erased(
        &self,
        type_id: TypeId,
        type_name: &str,
    ) -> Result<Arc<dyn ErasedStreamSerializer>, CoreError> {
        self.info
            .stream_serializer_by_type
            .get(&type_id)
            .cloned()
            .ok_or_else(|| CoreError::NotRegistered {
                kind: "stream serializer",
                key: type_name.to_string(),
            })
    }

    /// Resolve a codec for one unpacked value: the content's explicit override if it named
    /// one, otherwise the registry's per-type inference.
    pub(crate) fn resolve_serializer_for_value(
        &self,
        explicit_name: Option<&str>,
        value: &(dyn Any + Send),
    ) -> Result<Arc<dyn ErasedSerializer>, CoreError> {
        match explicit_name {
            Some(name) => self.get_serializer_erased(name),
            None => self.get_serializer_by_type_erased(value.type_id(), "<inferred from value>"),
        }
    }

    pub(crate) fn resolve_storage(&self, explicit_name: Option<&str>) -> Result<Arc<dyn Storage>, CoreError> {
        match explicit_name {
            Some(name) => self.get_storage(name),
            None => self.get_default_storage(),
        }
    }
}

/// Builds an immutable [`Registry`].
///
/// Merge priority is ascending: [`RegistryBuilder::merge`] calls overlay earlier merges, and
/// anything registered directly on this builder (`register_*`/`with_default_storage`) takes
/// priority over every merged registry, mirroring the original implementation's
/// `_merge_infos_with_ascending_priority` contract.
pub struct RegistryBuilder {
    merged: RegistryInfo,
    own: RegistryInfo,
    default_storage_flag: DefaultStorageChoice,
}

enum DefaultStorageChoice {
    Unset,
    Explicit(Arc<dyn Storage>),
    UseLastRegistered,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        RegistryBuilder {
            merged: RegistryInfo::default(),
            own: RegistryInfo::default(),
            default_storage_flag: DefaultStorageChoice::Unset,
        }
    }

    /// Merge another registry's contents in. Later merges overlay earlier ones; all merges
    /// are overlaid *under* anything registered directly on this builder.
    pub fn merge(mut self, other: &Registry) -> Self {
        self.merged = (*other.info).shallow_clone().overlay_onto(&self.merged);
        self
    }

    pub fn register_storable<S: Storable>(mut self, type_name: &'static str) -> Self {
        self.own.storable_by_id.insert(
            S::class_id().as_uuid(),
            StorableInfo {
                type_name,
                unpacker_name: S::unpacker_name().to_string(),
            },
        );
        self
    }

    pub fn register_serializer<T, S>(mut self, serializer: S) -> Result<Self, CoreError>
    where
        T: Any + Send + Sync + 'static,
        S: Serializer<T> + 'static,
    {
        validate_component_name(serializer.name())?;
        let name = serializer.name().to_string();
        let content_types: Vec<String> = serializer.content_types().iter().map(|s| s.to_string()).collect();
        let erased: Arc<dyn ErasedSerializer> = Arc::new(SerializerErasure::<T, S> {
            inner: Arc::new(serializer),
            _marker: PhantomData,
        });
        self.own.serializer_by_name.insert(name, erased.clone());
        self.own.serializer_by_type.insert(TypeId::of::<T>(), erased.clone());
        for ct in content_types {
            if let Ok(parsed) = parse_content_type(&ct) {
                self.own.serializer_by_content_type.insert(parsed, erased.clone());
            }
        }
        Ok(self)
    }

    pub fn register_stream_serializer<T, S>(mut self, serializer: S) -> Result<Self, CoreError>
    where
        T: Any + Send + Sync + 'static,
        S: StreamSerializer<T> + 'static,
    {
        validate_component_name(serializer.name())?;
        let name = serializer.name().to_string();
        let content_types: Vec<String> = serializer.content_types().iter().map(|s| s.to_string()).collect();
        let erased: Arc<dyn ErasedStreamSerializer> = Arc::new(StreamSerializerErasure::<T, S> {
            inner: Arc::new(serializer),
            _marker: PhantomData,
        });
        self.own.stream_serializer_by_name.insert(name, erased.clone());
        self.own.stream_serializer_by_type.insert(TypeId::of::<T>(), erased.clone());
        for ct in content_types {
            if let Ok(parsed) = parse_content_type(&ct) {
                self.own.stream_serializer_by_content_type.insert(parsed, erased.clone());
            }
        }
        Ok(self)
    }

    pub fn register_storage<St: Storage + 'static>(mut self, storage: St) -> Result<Self, CoreError> {
        validate_component_name(storage.name())?;
        self.own
            .storage_by_name
            .insert(storage.name().to_string(), Arc::new(storage));
        Ok(self)
    }

    pub fn register_unpacker<S, U>(mut self, unpacker: U) -> Result<Self, CoreError>
    where
        S: 'static,
        U: Unpacker<S> + 'static,
    {
        validate_component_name(unpacker.name())?;
        let name = unpacker.name().to_string();
        let arc: Arc<dyn Unpacker<S>> = Arc::new(unpacker);
        let erased: ErasedUnpacker = Arc::new(arc.clone());
        self.own.unpacker_by_name.insert(name, erased.clone());
        self.own.unpacker_by_type.insert(TypeId::of::<S>(), erased);
        Ok(self)
    }

    /// Designate the default storage used whenever an unpacked content has no explicit
    /// storage override. Also inserts it into the by-name map (even if it was already
    /// there), so it's the highest-priority storage of that name if no other registrant
    /// overrides it — mirroring `_add_default_storage`.
    pub fn with_default_storage<St: Storage + 'static>(mut self, storage: St) -> Result<Self, CoreError> {
        validate_component_name(storage.name())?;
        let arc: Arc<dyn Storage> = Arc::new(storage);
        self.own.storage_by_name.insert(arc.name().to_string(), arc.clone());
        self.default_storage_flag = DefaultStorageChoice::Explicit(arc);
        Ok(self)
    }

    /// Use the last explicitly-registered storage (by registration order) as the default,
    /// mirroring the original's `default_storage=True` shorthand.
    pub fn with_last_storage_as_default(mut self) -> Self {
        self.default_storage_flag = DefaultStorageChoice::UseLastRegistered;
        self
    }

    pub fn build(self) -> Registry {
        let mut info = self.own.overlay_onto(&self.merged);
        info.default_storage = match self.default_storage_flag {
            DefaultStorageChoice::Explicit(s) => Some(s),
            DefaultStorageChoice::UseLastRegistered => info.storage_by_name.values().last().cloned(),
            DefaultStorageChoice::Unset => info.default_storage,
        };
        Registry { info: Arc::new(info) }
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl RegistryInfo {
    fn shallow_clone(&self) -> Self {
        RegistryInfo {
            storable_by_id: self.storable_by_id.clone(),
            serializer_by_name: self.serializer_by_name.clone(),
            serializer_by_type: self.serializer_by_type.clone(),
            serializer_by_content_type: self.serializer_by_content_type.clone(),
            stream_serializer_by_name: self.stream_serializer_by_name.clone(),
            stream_serializer_by_type: self.stream_serializer_by_type.clone(),
            stream_serializer_by_content_type: self.stream_serializer_by_content_type.clone(),
            storage_by_name: self.storage_by_name.clone(),
            unpacker_by_name: self.unpacker_by_name.clone(),
            unpacker_by_type: self.unpacker_by_type.clone(),
            default_storage: self.default_storage.clone(),
        }
    }
}

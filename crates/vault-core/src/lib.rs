//! Backend-agnostic save/load pipeline for content-addressed object persistence.
//!
//! A user-defined [`storable::Storable`] type is decomposed by an [`unpacker::Unpacker`]
//! into independently serialized, independently stored pieces; a [`saver::SaverContext`]
//! writes those pieces through a [`storage::Storage`] driver chosen by a [`registry::Registry`]
//! and commits a [`manifest::ManifestRecord`] describing them; a [`loader::LoaderContext`]
//! reverses the process. Nothing in this crate names a concrete codec, storage, or database —
//! those live in driver crates (see `vault-builtin`) and a state-layer crate (`vault-state`)
//! implementing [`saver::ManifestSink`]/[`loader::ContentSource`].

pub mod component;
pub mod digest;
pub mod error;
pub mod loader;
pub mod manifest;
pub mod registry;
pub mod saver;
pub mod serializer;
pub mod storable;
pub mod storage;
pub mod unpacker;

pub use component::validate_component_name;
pub use digest::{Digest, DigestingStream, GetDigest, StreamDigest, HASH_ALGORITHM};
pub use error::{CoreError, Failure, LoadErrors, SaveErrors};
pub use loader::{load_soon, ContentSource, LoadedObject, LoaderContext};
pub use manifest::{ContentRecord, ManifestRecord};
pub use registry::{ContentType, Registry, RegistryBuilder};
pub use saver::{save_soon, ManifestSink, SaveOptions, SaverContext};
pub use serializer::{SerializedData, SerializedDataStream, Serializer, SerializerKind, StreamSerializer};
pub use storable::{ClassId, Storable};
pub use storage::{ByteStream, Storage, TagMap};
pub use unpacker::{BodyRef, LoadedContent, LoadedContents, ResolvedBody, Unpacker, UnpackedContent, UnpackedContents};

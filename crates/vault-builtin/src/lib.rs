//! In-tree codec and storage drivers for exercising the vault save/load pipeline.
//!
//! These are reference implementations, not the only way to satisfy `vault_core`'s
//! `Serializer`/`StreamSerializer`/`Storage` traits — applications are free to register their
//! own alongside or instead of these via `vault_core::RegistryBuilder`.

mod file;
mod json;
mod memory;

pub use file::FileStorage;
pub use json::{JsonStreamSerializer, JsonValueSerializer};
pub use memory::MemoryStorage;

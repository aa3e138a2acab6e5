//! Storable classes: a user type paired with a stable [`ClassId`] and an [`Unpacker`] name.

use uuid::Uuid;

use crate::error::CoreError;

/// A 128-bit identifier assigned statically to each storable type.
///
/// Grounded in the original implementation's `validate_class_id`/`pad_uuid_str`: class IDs
/// are authored as short hex strings (8-32 chars) and padded with trailing zero bytes to a
/// full 16-byte UUID, so `"deadbeef"` and `"deadbeef00000000000000000000000"` name the same
/// class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(Uuid);

impl ClassId {
    /// Parse a class ID from its canonical hex source string, padding to 16 bytes.
    pub fn parse(id_str: &str) -> Result<Self, CoreError> {
        if id_str.len() < 8 || id_str.len() > 32 {
            return Err(invalid_class_id(id_str));
        }
        let mut bytes = hex::decode(id_str).map_err(|_| invalid_class_id(id_str))?;
        if bytes.len() > 16 {
            return Err(invalid_class_id(id_str));
        }
        bytes.resize(16, 0);
        let mut arr = [0u8; 16];
        arr.copy_from_slice(&bytes);
        Ok(ClassId(Uuid::from_bytes(arr)))
    }

    pub fn from_uuid(id: Uuid) -> Self {
        ClassId(id)
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl std::fmt::Display for ClassId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn invalid_class_id(id_str: &str) -> CoreError {
    CoreError::BadComponentName {
        name: format!("class id {id_str:?} is not an 8-32 character hex string"),
    }
}

/// Static configuration every storable type must provide: its [`ClassId`] and the name of
/// the [`crate::unpacker::Unpacker`] that knows how to decompose/recompose it.
pub trait Storable {
    fn class_id() -> ClassId;
    fn unpacker_name() -> &'static str;
}

//! Component name validation.
//!
//! Every serializer, stream serializer, storage, and unpacker declares a globally unique
//! `name` of the form `name@vN`. The registry rejects anything else at registration time so
//! a stale or hand-typed name never silently shadows another component.

use crate::error::CoreError;

/// Validate a component name against `^[a-z][a-z0-9_.-]*@v\d+(\..*)?$`.
pub fn validate_component_name(name: &str) -> Result<(), CoreError> {
    if is_valid_component_name(name) {
        Ok(())
    } else {
        Err(CoreError::BadComponentName {
            name: name.to_string(),
        })
    }
}

fn is_valid_component_name(name: &str) -> bool {
    let Some((base, version)) = name.rsplit_once("@v") else {
        return false;
    };

    let mut base_chars = base.chars();
    let Some(first) = base_chars.next() else {
        return false;
    };
    if !first.is_ascii_lowercase() {
        return false;
    }
    if !base_chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '.' | '-')) {
        return false;
    }

    // version is `\d+(\..*)?`
    let digits_end = version.find(|c: char| !c.is_ascii_digit()).unwrap_or(version.len());
    if digits_end == 0 {
        return false;
    }
    match version[digits_end..].chars().next() {
        None => true,
        Some('.') => true,
        _ => false,
    }
}

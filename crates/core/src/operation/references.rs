//! Literal reference checks applied to every incoming body.

use crate::{CoordinationError, CoordinationResult};
use serde_json::Value;

/// Rejects literal references that would make the server fetch over plain HTTP or a non-web
/// scheme.
///
/// Accepted forms: relative (`Type/id`), contained (`#id`), transaction placeholders
/// (`urn:uuid:…`) and absolute `https://` URLs.
///
/// # Errors
///
/// Returns [`CoordinationError::InvalidInput`] naming the first offending reference.
pub fn validate_references(value: &Value) -> CoordinationResult<()> {
    match value {
        Value::Object(object) => {
            if let Some(Value::String(reference)) = object.get("reference") {
                check(reference)?;
            }
            object.values().try_for_each(validate_references)
        }
        Value::Array(items) => items.iter().try_for_each(validate_references),
        _ => Ok(()),
    }
}

fn check(reference: &str) -> CoordinationResult<()> {
    let allowed = reference.starts_with('#')
        || reference.starts_with("urn:uuid:")
        || reference.starts_with("https://")
        || !reference.contains(':');
    if allowed {
        Ok(())
    } else {
        Err(CoordinationError::InvalidInput(format!(
            "literal reference '{reference}' must be relative or use https"
        )))
    }
}

//! AuditEvent wire model: the immutable journal entry written alongside every audited access.

use crate::datatypes::{Coding, Extension, Meta, Reference};
use crate::resource::{impl_fhir_resource, ResourceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// The kind of access being journaled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AuditEventAction {
    #[serde(rename = "C")]
    Create,
    #[serde(rename = "R")]
    Read,
    #[serde(rename = "U")]
    Update,
    #[serde(rename = "D")]
    Delete,
    #[serde(rename = "E")]
    Execute,
}

impl AuditEventAction {
    pub const fn code(self) -> &'static str {
        match self {
            Self::Create => "C",
            Self::Read => "R",
            Self::Update => "U",
            Self::Delete => "D",
            Self::Execute => "E",
        }
    }
}

impl fmt::Display for AuditEventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Actor taking part in the event. `policy` lists the rules that granted access.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEventAgent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub who: Option<Reference>,

    pub requestor: bool,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub policy: Vec<String>,
}

/// Structured detail attached to an entity, e.g. the search query that found it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEventDetail {
    #[serde(rename = "type")]
    pub type_: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,
}

/// The resource the event is about.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditEventEntity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub what: Option<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub detail: Vec<AuditEventDetail>,
}

/// The system that observed and recorded the event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditEventSource {
    pub observer: Reference,
}

/// AuditEvent resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(rename = "type")]
    pub type_: Coding,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<AuditEventAction>,

    pub recorded: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agent: Vec<AuditEventAgent>,

    pub source: AuditEventSource,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entity: Vec<AuditEventEntity>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl_fhir_resource!(AuditEvent, ResourceType::AuditEvent);

impl AuditEvent {
    /// Literal references of every entity this event is about.
    pub fn entity_references(&self) -> impl Iterator<Item = &str> {
        self.entity
            .iter()
            .filter_map(|e| e.what.as_ref()?.reference.as_deref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_serialises_as_single_letter_code() {
        assert_eq!(
            serde_json::to_value(AuditEventAction::Update).unwrap(),
            serde_json::json!("U")
        );
        assert_eq!(AuditEventAction::Read.to_string(), "R");
    }
}

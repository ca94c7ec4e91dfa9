//! FHIR data types shared by every resource model.
//!
//! Only the members the coordination workflow reads or writes are modelled explicitly. Complex
//! types that may carry further members (`Reference`, `Extension`) keep them in a flattened map
//! so that nothing a client sent is lost on the way back out.

use crate::resource::ResourceType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ============================================================================
// Identifier
// ============================================================================

/// A business identifier (`system` + `value`), used to identify organisations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

impl Identifier {
    /// Creates a fully specified identifier.
    pub fn new(system: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            value: Some(value.into()),
        }
    }

    /// Parses the `system|value` token notation used in search parameters and configuration.
    ///
    /// # Errors
    ///
    /// Returns [`crate::FhirError::InvalidInput`] if either half is missing or empty.
    pub fn parse_token(token: &str) -> crate::FhirResult<Self> {
        match token.split_once('|') {
            Some((system, value)) if !system.trim().is_empty() && !value.trim().is_empty() => {
                Ok(Self::new(system.trim(), value.trim()))
            }
            _ => Err(crate::FhirError::InvalidInput(format!(
                "identifier token must be 'system|value', got '{token}'"
            ))),
        }
    }

    /// Renders the identifier as a `system|value` token.
    pub fn to_token(&self) -> String {
        format!(
            "{}|{}",
            self.system.as_deref().unwrap_or_default(),
            self.value.as_deref().unwrap_or_default()
        )
    }

    /// Two identifiers match when both are fully specified and equal.
    ///
    /// A partially specified identifier never matches anything, including itself: authorisation
    /// decisions must not be made on a missing system or value.
    pub fn matches(&self, other: &Identifier) -> bool {
        match (&self.system, &self.value, &other.system, &other.value) {
            (Some(s1), Some(v1), Some(s2), Some(v2)) => s1 == s2 && v1 == v2,
            _ => false,
        }
    }
}

// ============================================================================
// Reference
// ============================================================================

/// A reference from one resource to another.
///
/// A reference is *literal* when it carries a `reference` string (`Task/123`, `urn:uuid:…`,
/// `https://…`) and *logical* when it identifies its target by [`Identifier`] only.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Reference {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<String>,

    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub type_: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<Identifier>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Reference {
    /// A literal reference (`Type/id`, `urn:uuid:…` or an absolute URL).
    pub fn literal(reference: impl Into<String>) -> Self {
        Self {
            reference: Some(reference.into()),
            ..Default::default()
        }
    }

    /// A literal relative reference to `{resource_type}/{id}`.
    pub fn to_resource(resource_type: ResourceType, id: &str) -> Self {
        let mut reference = Self::literal(format!("{resource_type}/{id}"));
        reference.type_ = Some(resource_type.to_string());
        reference
    }

    /// A logical reference to an organisation.
    pub fn organization(identifier: Identifier) -> Self {
        Self {
            type_: Some("Organization".to_string()),
            identifier: Some(identifier),
            ..Default::default()
        }
    }

    /// Returns the id when this is a relative literal reference to the given resource type.
    ///
    /// Version suffixes (`Task/1/_history/2`) are ignored.
    pub fn local_id(&self, resource_type: ResourceType) -> Option<&str> {
        let reference = self.reference.as_deref()?;
        let rest = reference.strip_prefix(resource_type.as_str())?.strip_prefix('/')?;
        let id = rest.split('/').next()?;
        if id.is_empty() {
            None
        } else {
            Some(id)
        }
    }

    /// Whether the reference points at a resource inside the same transaction.
    pub fn is_placeholder(&self) -> bool {
        self.reference
            .as_deref()
            .is_some_and(|r| r.starts_with("urn:uuid:"))
    }

    /// Whether the reference identifies the given organisation by identifier.
    pub fn identifies(&self, identifier: &Identifier) -> bool {
        self.identifier
            .as_ref()
            .is_some_and(|own| own.matches(identifier))
    }
}

// ============================================================================
// Period
// ============================================================================

/// A time window with an optional start and end.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

impl Period {
    /// An open-ended window beginning at `start`.
    pub fn starting(start: DateTime<Utc>) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }

    /// Start is inclusive and end is exclusive; a missing bound is unbounded.
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        let started = self.start.map_or(true, |start| start <= instant);
        let not_ended = self.end.map_or(true, |end| instant < end);
        started && not_ended
    }
}

// ============================================================================
// Coding / CodeableConcept
// ============================================================================

/// A code from a code system.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Coding {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
}

impl Coding {
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            system: Some(system.into()),
            code: Some(code.into()),
            display: None,
        }
    }
}

/// A concept expressed as one or more codings plus optional text.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeableConcept {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub coding: Vec<Coding>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl CodeableConcept {
    pub fn from_coding(coding: Coding) -> Self {
        Self {
            coding: vec![coding],
            text: None,
        }
    }
}

// ============================================================================
// Extension / Meta
// ============================================================================

/// An extension element. Only `valueReference` and `valueString` are modelled.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Extension {
    pub url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_reference: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_string: Option<String>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl Extension {
    pub fn with_reference(url: impl Into<String>, reference: Reference) -> Self {
        Self {
            url: url.into(),
            value_reference: Some(reference),
            ..Default::default()
        }
    }
}

/// Resource metadata maintained by the store, plus declared profiles.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Meta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub profile: Vec<String>,
}

impl Meta {
    pub fn has_profile(&self, profile: &str) -> bool {
        self.profile.iter().any(|p| p == profile)
    }
}

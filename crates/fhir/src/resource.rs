//! Resource typing and the JSON parse/render facade.
//!
//! Resource models do not store their own `resourceType` member. [`Resources::render`] writes it
//! and [`Resources::parse`] checks it against the target model before deserialising, so a
//! `CarePlan` body can never be accepted where a `Task` is expected.

use crate::datatypes::{Extension, Meta, Reference};
use crate::{FhirError, FhirResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// ResourceType
// ============================================================================

/// The closed set of resource types this server understands.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceType {
    Task,
    CarePlan,
    CareTeam,
    Patient,
    Condition,
    ServiceRequest,
    Questionnaire,
    QuestionnaireResponse,
    AuditEvent,
}

impl ResourceType {
    pub const ALL: [ResourceType; 9] = [
        ResourceType::Task,
        ResourceType::CarePlan,
        ResourceType::CareTeam,
        ResourceType::Patient,
        ResourceType::Condition,
        ResourceType::ServiceRequest,
        ResourceType::Questionnaire,
        ResourceType::QuestionnaireResponse,
        ResourceType::AuditEvent,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Task => "Task",
            Self::CarePlan => "CarePlan",
            Self::CareTeam => "CareTeam",
            Self::Patient => "Patient",
            Self::Condition => "Condition",
            Self::ServiceRequest => "ServiceRequest",
            Self::Questionnaire => "Questionnaire",
            Self::QuestionnaireResponse => "QuestionnaireResponse",
            Self::AuditEvent => "AuditEvent",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceType {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|rt| rt.as_str() == s)
            .ok_or_else(|| FhirError::UnsupportedResourceType(s.to_string()))
    }
}

// ============================================================================
// FhirResource
// ============================================================================

/// Common behaviour of every resource model.
pub trait FhirResource: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {
    const RESOURCE_TYPE: ResourceType;

    fn id(&self) -> Option<&str>;
    fn set_id(&mut self, id: Option<String>);
    fn meta(&self) -> Option<&Meta>;
    fn extensions(&self) -> &[Extension];
    fn extensions_mut(&mut self) -> &mut Vec<Extension>;

    /// Relative literal reference to this resource, if it has been assigned an id.
    fn reference(&self) -> Option<Reference> {
        self.id()
            .map(|id| Reference::to_resource(Self::RESOURCE_TYPE, id))
    }

    fn extension(&self, url: &str) -> Option<&Extension> {
        self.extensions().iter().find(|e| e.url == url)
    }

    /// Replaces every extension with the same url by `extension`.
    fn set_extension(&mut self, extension: Extension) {
        let extensions = self.extensions_mut();
        extensions.retain(|e| e.url != extension.url);
        extensions.push(extension);
    }

    fn remove_extension(&mut self, url: &str) {
        self.extensions_mut().retain(|e| e.url != url);
    }

    fn has_profile(&self, profile: &str) -> bool {
        self.meta().is_some_and(|m| m.has_profile(profile))
    }
}

/// Implements [`FhirResource`] for a model with `id`, `meta` and `extension` fields.
macro_rules! impl_fhir_resource {
    ($model:ty, $resource_type:expr) => {
        impl $crate::resource::FhirResource for $model {
            const RESOURCE_TYPE: $crate::resource::ResourceType = $resource_type;

            fn id(&self) -> Option<&str> {
                self.id.as_deref()
            }

            fn set_id(&mut self, id: Option<String>) {
                self.id = id;
            }

            fn meta(&self) -> Option<&$crate::datatypes::Meta> {
                self.meta.as_ref()
            }

            fn extensions(&self) -> &[$crate::datatypes::Extension] {
                &self.extension
            }

            fn extensions_mut(&mut self) -> &mut Vec<$crate::datatypes::Extension> {
                &mut self.extension
            }
        }
    };
}

pub(crate) use impl_fhir_resource;

// ============================================================================
// Public Resources operations
// ============================================================================

/// JSON parse/render operations for resource models.
///
/// This is a zero-sized type used for namespacing. All methods are associated functions.
pub struct Resources;

impl Resources {
    /// Parse a resource model from a JSON value.
    ///
    /// This uses `serde_path_to_error` to surface a best-effort path (e.g. `owner.identifier`)
    /// to the failing member when the JSON does not match the model.
    ///
    /// # Errors
    ///
    /// Returns [`FhirError`] if:
    /// - the value is not a JSON object,
    /// - `resourceType` is missing or names a different type,
    /// - any modelled member has an unexpected shape.
    pub fn parse<T: FhirResource>(value: Value) -> FhirResult<T> {
        let Value::Object(mut object) = value else {
            return Err(FhirError::InvalidInput(format!(
                "{} must be a JSON object",
                T::RESOURCE_TYPE
            )));
        };

        match object.remove("resourceType") {
            Some(Value::String(found)) if found == T::RESOURCE_TYPE.as_str() => {}
            Some(Value::String(found)) => {
                return Err(FhirError::InvalidInput(format!(
                    "expected resourceType {}, got {found}",
                    T::RESOURCE_TYPE
                )))
            }
            _ => {
                return Err(FhirError::InvalidInput(format!(
                    "{} is missing resourceType",
                    T::RESOURCE_TYPE
                )))
            }
        }

        serde_path_to_error::deserialize::<_, T>(Value::Object(object)).map_err(|err| {
            let path = err.path().to_string();
            let source = err.into_inner();
            let path = if path.is_empty() || path == "." {
                "<root>".to_string()
            } else {
                path
            };
            FhirError::Translation(format!(
                "{} schema mismatch at {path}: {source}",
                T::RESOURCE_TYPE
            ))
        })
    }

    /// Parse a resource model from JSON text.
    pub fn parse_str<T: FhirResource>(json: &str) -> FhirResult<T> {
        let value: Value = serde_json::from_str(json)?;
        Self::parse(value)
    }

    /// Render a resource model as a JSON value with `resourceType` set.
    pub fn render<T: FhirResource>(resource: &T) -> FhirResult<Value> {
        let value = serde_json::to_value(resource)?;
        let Value::Object(object) = value else {
            return Err(FhirError::Translation(format!(
                "{} did not serialise to an object",
                T::RESOURCE_TYPE
            )));
        };

        let mut rendered = serde_json::Map::with_capacity(object.len() + 1);
        rendered.insert(
            "resourceType".to_string(),
            Value::String(T::RESOURCE_TYPE.to_string()),
        );
        rendered.extend(object);
        Ok(Value::Object(rendered))
    }

    /// Reads the `resourceType` member of an arbitrary JSON resource.
    pub fn resource_type_of(value: &Value) -> FhirResult<ResourceType> {
        value
            .get("resourceType")
            .and_then(Value::as_str)
            .ok_or_else(|| FhirError::InvalidInput("resource is missing resourceType".into()))?
            .parse()
    }
}

//! FHIR wire/boundary support for the care coordination resource server.
//!
//! This crate provides **wire models** and **format/translation helpers** for the resources that
//! organisations exchange while collaborating on a shared care plan:
//! - workflow resources (Task, CarePlan, CareTeam)
//! - supporting clinical resources (Patient, Condition, ServiceRequest, Questionnaire,
//!   QuestionnaireResponse)
//! - the audit journal (AuditEvent) and transport envelopes (Bundle)
//!
//! This crate focuses on:
//! - FHIR JSON alignment for the subset of elements the coordination workflow relies on
//! - strict parsing with field-level error paths
//! - lossless round-trips: members the models do not name are retained verbatim
//!
//! It performs no I/O. Storage, authorisation and workflow live in `carelink-core`.

pub mod audit_event;
pub mod bundle;
pub mod care_plan;
pub mod care_team;
pub mod clinical;
pub mod datatypes;
pub mod resource;
pub mod task;

// Re-export facades
pub use resource::{FhirResource, ResourceType, Resources};

// Re-export public domain-level types
pub use audit_event::{
    AuditEvent, AuditEventAction, AuditEventAgent, AuditEventDetail, AuditEventEntity,
    AuditEventSource,
};
pub use bundle::{
    Bundle, BundleEntry, BundleMarker, BundleRequest, BundleResponse, BundleSearch, BundleType,
    HttpVerb, SearchMode,
};
pub use care_plan::{CarePlan, CarePlanActivity};
pub use care_team::{CareTeam, CareTeamParticipant};
pub use clinical::{Condition, Patient, Questionnaire, QuestionnaireResponse, ServiceRequest};
pub use datatypes::{CodeableConcept, Coding, Extension, Identifier, Meta, Period, Reference};
pub use task::{Task, TaskParameter, TaskStatus};

/// Errors returned by the `fhir` boundary crate.
#[derive(Debug, thiserror::Error)]
pub enum FhirError {
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("translation error: {0}")]
    Translation(String),

    #[error("unsupported resource type: {0}")]
    UnsupportedResourceType(String),
}

/// Type alias for Results that can fail with a [`FhirError`].
pub type FhirResult<T> = Result<T, FhirError>;

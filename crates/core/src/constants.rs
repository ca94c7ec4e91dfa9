//! Constants used throughout the carelink core crate.

/// Extension recording the organisation that created a resource.
pub const CREATOR_EXTENSION_URL: &str =
    "https://carelink.dev/fhir/StructureDefinition/resource-creator";

/// Profile that marks a Task as taking part in the coordination workflow.
pub const TASK_PROFILE_URL: &str =
    "https://carelink.dev/fhir/StructureDefinition/care-coordination-task";

/// Code system of AuditEvent.type.
pub const AUDIT_EVENT_TYPE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/audit-event-type";

/// AuditEvent.type code for RESTful operations.
pub const AUDIT_EVENT_TYPE_REST: &str = "rest";

/// AuditEvent.entity.detail type carrying the search query that produced a result.
pub const AUDIT_DETAIL_QUERY: &str = "query";

/// Task.input type system used for questionnaire references.
pub const TASK_INPUT_TYPE_SYSTEM: &str = "http://terminology.hl7.org/CodeSystem/task-input-type";

/// Default maximum number of resources a single search may return.
pub const DEFAULT_SEARCH_CEILING: usize = 1000;

/// Default base URL used to build notification source URLs.
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000/fhir";

/// Notification topic that receives every notification.
pub const WILDCARD_TOPIC: &str = "*";

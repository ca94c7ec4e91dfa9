//! Task wire model.
//!
//! A Task is the unit of delegated work between organisations. The workflow state machine in
//! `carelink-core` drives `status`; this module only models the resource.

use crate::datatypes::{CodeableConcept, Extension, Meta, Reference};
use crate::resource::{impl_fhir_resource, ResourceType};
use crate::FhirError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::str::FromStr;

/// Task lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TaskStatus {
    Draft,
    Requested,
    Received,
    Accepted,
    Rejected,
    Ready,
    Cancelled,
    InProgress,
    OnHold,
    Failed,
    Completed,
    EnteredInError,
}

impl TaskStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Requested => "requested",
            Self::Received => "received",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
            Self::Ready => "ready",
            Self::Cancelled => "cancelled",
            Self::InProgress => "in-progress",
            Self::OnHold => "on-hold",
            Self::Failed => "failed",
            Self::Completed => "completed",
            Self::EnteredInError => "entered-in-error",
        }
    }

    /// No transition leaves a terminal status.
    pub const fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Rejected | Self::Cancelled | Self::Failed | Self::Completed | Self::EnteredInError
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = FhirError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(Value::String(s.to_string()))
            .map_err(|_| FhirError::InvalidInput(format!("invalid task status: {s}")))
    }
}

/// A Task `input` or `output` parameter.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskParameter {
    #[serde(rename = "type")]
    pub type_: CodeableConcept,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_reference: Option<Reference>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl TaskParameter {
    pub fn reference(type_: CodeableConcept, reference: Reference) -> Self {
        Self {
            type_,
            value_reference: Some(reference),
            other: Map::new(),
        }
    }
}

/// Task resource.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    pub status: TaskStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub based_on: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub part_of: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub focus: Option<Reference>,

    #[serde(rename = "for", default, skip_serializing_if = "Option::is_none")]
    pub for_: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requester: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason_code: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub input: Vec<TaskParameter>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub output: Vec<TaskParameter>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl_fhir_resource!(Task, ResourceType::Task);

impl Task {
    /// A Task with only a status; every other member empty.
    pub fn new(status: TaskStatus) -> Self {
        Self {
            id: None,
            meta: None,
            extension: Vec::new(),
            status,
            intent: None,
            based_on: Vec::new(),
            part_of: Vec::new(),
            focus: None,
            for_: None,
            requester: None,
            owner: None,
            reason_code: None,
            input: Vec::new(),
            output: Vec::new(),
            other: Map::new(),
        }
    }

    /// A Task without `partOf` is a primary task.
    pub fn is_primary(&self) -> bool {
        self.part_of.is_empty()
    }

    /// The single CarePlan this Task is based on, if any.
    pub fn care_plan(&self) -> Option<&Reference> {
        self.based_on.first()
    }
}

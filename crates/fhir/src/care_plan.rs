//! CarePlan wire model.

use crate::datatypes::{Extension, Meta, Reference};
use crate::resource::{impl_fhir_resource, ResourceType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One activity of a CarePlan; for this workflow always a reference to a Task.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CarePlanActivity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference: Option<Reference>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

/// CarePlan resource. Owns exactly one CareTeam and lists its Tasks as activities.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CarePlan {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub care_team: Vec<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub activity: Vec<CarePlanActivity>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl_fhir_resource!(CarePlan, ResourceType::CarePlan);

impl CarePlan {
    /// The CareTeam owned by this plan.
    pub fn care_team_reference(&self) -> Option<&Reference> {
        self.care_team.first()
    }

    /// Whether an activity already points at `reference`.
    pub fn has_activity(&self, reference: &str) -> bool {
        self.activity.iter().any(|a| {
            a.reference
                .as_ref()
                .and_then(|r| r.reference.as_deref())
                .is_some_and(|r| r == reference)
        })
    }

    /// Appends an activity unless one with the same literal reference exists.
    pub fn add_activity(&mut self, reference: Reference) {
        if let Some(literal) = reference.reference.as_deref() {
            if self.has_activity(literal) {
                return;
            }
        }
        self.activity.push(CarePlanActivity {
            reference: Some(reference),
            other: Map::new(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_activity_is_idempotent() {
        let mut plan = CarePlan::default();
        plan.add_activity(Reference::literal("Task/1"));
        plan.add_activity(Reference::literal("Task/1"));
        plan.add_activity(Reference::literal("Task/2"));
        assert_eq!(plan.activity.len(), 2);
        assert!(plan.has_activity("Task/2"));
        assert!(!plan.has_activity("Task/3"));
    }
}

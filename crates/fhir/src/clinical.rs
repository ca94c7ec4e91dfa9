//! Supporting clinical resources referenced by Tasks and CarePlans.
//!
//! The concrete clinical validation rules are out of scope; these models carry the members that
//! authorisation and workflow selection read (subjects, codes, questionnaire links) and keep
//! everything else verbatim.

use crate::datatypes::{CodeableConcept, Extension, Identifier, Meta, Reference};
use crate::resource::{impl_fhir_resource, ResourceType};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Patient resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Patient {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub identifier: Vec<Identifier>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl_fhir_resource!(Patient, ResourceType::Patient);

/// Condition resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl_fhir_resource!(Condition, ResourceType::Condition);

/// ServiceRequest resource. Its `code` selects the workflow for the Task that focuses on it.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reason_code: Vec<CodeableConcept>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl_fhir_resource!(ServiceRequest, ResourceType::ServiceRequest);

/// Questionnaire definition. Carries no patient data.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Questionnaire {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl_fhir_resource!(Questionnaire, ResourceType::Questionnaire);

/// Answers to a Questionnaire, attached to a Task as output.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionnaireResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub questionnaire: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl_fhir_resource!(QuestionnaireResponse, ResourceType::QuestionnaireResponse);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Resources;
    use serde_json::json;

    #[test]
    fn service_request_exposes_codes() {
        let request: ServiceRequest = Resources::parse(json!({
            "resourceType": "ServiceRequest",
            "status": "active",
            "code": {"coding": [{"system": "http://snomed.info/sct", "code": "719858009"}]},
            "reasonCode": [{"coding": [{"system": "http://snomed.info/sct", "code": "84114007"}]}]
        }))
        .expect("parse");

        assert_eq!(
            request.code.unwrap().coding[0].code.as_deref(),
            Some("719858009")
        );
        assert_eq!(request.reason_code.len(), 1);
    }

    #[test]
    fn questionnaire_round_trips_items() {
        let input = json!({
            "resourceType": "Questionnaire",
            "url": "http://example.org/Questionnaire/enrollment",
            "status": "active",
            "item": [{"linkId": "1", "type": "boolean", "text": "Consent given?"}]
        });
        let questionnaire: Questionnaire = Resources::parse(input.clone()).expect("parse");
        assert_eq!(Resources::render(&questionnaire).expect("render"), input);
    }
}

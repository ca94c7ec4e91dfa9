//! Search parameter evaluation for the in-memory store.

use super::SearchParams;
use crate::{StoreError, StoreResult};
use fhir::{Identifier, ResourceType};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

pub(super) type ResourceMap = HashMap<ResourceType, BTreeMap<String, Value>>;

/// How a search parameter is evaluated against the JSON found at its path.
#[derive(Clone, Copy, Debug)]
enum Kind {
    Reference,
    Token,
}

/// Parameter definitions: JSON path (arrays are flattened at every step) plus kind.
fn definition(resource_type: ResourceType, name: &str) -> Option<(&'static [&'static str], Kind)> {
    use Kind::*;
    use ResourceType as RT;

    let definition: (&'static [&'static str], Kind) = match (resource_type, name) {
        (RT::Task, "based-on") => (&["basedOn"], Reference),
        (RT::Task, "part-of") => (&["partOf"], Reference),
        (RT::Task, "owner") => (&["owner"], Reference),
        (RT::Task, "requester") => (&["requester"], Reference),
        (RT::Task, "focus") => (&["focus"], Reference),
        (RT::Task, "output-reference") => (&["output", "valueReference"], Reference),
        (RT::Task, "status") => (&["status"], Token),
        (RT::CarePlan, "care-team") => (&["careTeam"], Reference),
        (RT::CarePlan, "activity-reference") => (&["activity", "reference"], Reference),
        (RT::CarePlan, "subject") => (&["subject"], Reference),
        (RT::CareTeam, "subject") => (&["subject"], Reference),
        (RT::CareTeam, "participant") => (&["participant", "member"], Reference),
        (RT::AuditEvent, "entity") => (&["entity", "what"], Reference),
        (RT::AuditEvent, "action") => (&["action"], Token),
        (RT::Condition | RT::ServiceRequest | RT::QuestionnaireResponse, "subject") => {
            (&["subject"], Reference)
        }
        (RT::Patient, "identifier") => (&["identifier"], Token),
        (RT::Questionnaire, "url") => (&["url"], Token),
        _ => return None,
    };
    Some(definition)
}

fn values_at<'a>(value: &'a Value, path: &[&str]) -> Vec<&'a Value> {
    let Some((head, rest)) = path.split_first() else {
        return match value {
            Value::Array(items) => items.iter().collect(),
            other => vec![other],
        };
    };

    match value {
        Value::Array(items) => items.iter().flat_map(|item| values_at(item, path)).collect(),
        Value::Object(object) => object
            .get(*head)
            .map(|child| values_at(child, rest))
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn strip_history(reference: &str) -> &str {
    reference
        .split_once("/_history/")
        .map_or(reference, |(base, _)| base)
}

fn identifier_matches(node: Option<&Value>, token: &str) -> bool {
    let Ok(expected) = Identifier::parse_token(token) else {
        return false;
    };
    node.and_then(|n| serde_json::from_value::<Identifier>(n.clone()).ok())
        .is_some_and(|found| found.matches(&expected))
}

fn reference_matches(node: &Value, expected: &str) -> bool {
    if expected.contains('|') {
        return identifier_matches(node.get("identifier"), expected);
    }
    node.get("reference")
        .and_then(Value::as_str)
        .is_some_and(|found| strip_history(found) == strip_history(expected))
}

fn token_matches(node: &Value, expected: &str) -> bool {
    match node {
        Value::String(found) => found == expected,
        Value::Object(_) => identifier_matches(Some(node), expected),
        _ => false,
    }
}

fn parameter_matches(resource: &Value, path: &[&str], kind: Kind, value: &str) -> bool {
    let nodes = values_at(resource, path);
    value.split(',').any(|alternative| {
        nodes.iter().any(|node| match kind {
            Kind::Reference => reference_matches(node, alternative),
            Kind::Token => token_matches(node, alternative),
        })
    })
}

/// A parsed `_include=Type:param` directive.
struct Include {
    path: &'static [&'static str],
}

/// The evaluated form of a [`SearchParams`] for one resource type.
pub(super) struct Query<'a> {
    resource_type: ResourceType,
    ids: Option<Vec<&'a str>>,
    count: Option<usize>,
    filters: Vec<(&'static [&'static str], Kind, &'a str)>,
    includes: Vec<Include>,
}

impl<'a> Query<'a> {
    /// Resolves every parameter up front; unknown parameters are an error rather than ignored.
    pub(super) fn compile(
        resource_type: ResourceType,
        params: &'a SearchParams,
    ) -> StoreResult<Self> {
        let mut query = Query {
            resource_type,
            ids: None,
            count: None,
            filters: Vec::new(),
            includes: Vec::new(),
        };

        for (name, value) in params.iter() {
            match name {
                "_id" => query.ids = Some(value.split(',').collect()),
                "_count" => {
                    let count = value.parse::<usize>().map_err(|_| {
                        StoreError::InvalidSearch(format!("_count must be a number, got '{value}'"))
                    })?;
                    query.count = Some(count);
                }
                "_include" => {
                    let (source, param) = value.split_once(':').ok_or_else(|| {
                        StoreError::InvalidSearch(format!("malformed _include '{value}'"))
                    })?;
                    if source != resource_type.as_str() {
                        return Err(StoreError::InvalidSearch(format!(
                            "_include source {source} does not match {resource_type}"
                        )));
                    }
                    match definition(resource_type, param) {
                        Some((path, Kind::Reference)) => query.includes.push(Include { path }),
                        _ => {
                            return Err(StoreError::InvalidSearch(format!(
                                "cannot include {value}"
                            )))
                        }
                    }
                }
                _ => {
                    let (path, kind) = definition(resource_type, name).ok_or_else(|| {
                        StoreError::InvalidSearch(format!(
                            "unknown search parameter {resource_type}.{name}"
                        ))
                    })?;
                    query.filters.push((path, kind, value));
                }
            }
        }

        Ok(query)
    }

    fn matches(&self, id: &str, resource: &Value) -> bool {
        if let Some(ids) = &self.ids {
            if !ids.contains(&id) {
                return false;
            }
        }
        self.filters
            .iter()
            .all(|(path, kind, value)| parameter_matches(resource, path, *kind, value))
    }

    /// Ids of every matching resource, ignoring `_count`.
    pub(super) fn matching_ids(&self, data: &ResourceMap) -> Vec<String> {
        data.get(&self.resource_type)
            .map(|resources| {
                resources
                    .iter()
                    .filter(|(id, resource)| self.matches(id, resource))
                    .map(|(id, _)| id.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(super) fn count(&self) -> Option<usize> {
        self.count
    }

    /// Local `Type/id` references reachable through the `_include` paths.
    pub(super) fn included(&self, resource: &Value) -> Vec<(ResourceType, String)> {
        self.includes
            .iter()
            .flat_map(|include| values_at(resource, include.path))
            .filter_map(|node| node.get("reference")?.as_str())
            .filter_map(|reference| {
                let (rt, id) = strip_history(reference).split_once('/')?;
                Some((rt.parse().ok()?, id.to_string()))
            })
            .collect()
    }
}

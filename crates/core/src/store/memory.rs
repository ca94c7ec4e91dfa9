//! In-memory resource store for development and testing.
//!
//! Transactions are applied to a copy of the data that replaces the live data only once every
//! entry has succeeded, so a failing entry leaves the store untouched.

use super::matching::{Query, ResourceMap};
use super::{ResourceStore, SearchParams};
use crate::{StoreError, StoreResult};
use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use fhir::{
    Bundle, BundleEntry, BundleResponse, BundleSearch, BundleType, HttpVerb, ResourceType,
    SearchMode,
};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// What a transaction entry will do, resolved before anything is written.
enum Target {
    Write {
        resource_type: ResourceType,
        id: String,
    },
    Delete {
        resource_type: ResourceType,
        id: String,
    },
    ConditionalDelete {
        resource_type: ResourceType,
        params: SearchParams,
    },
}

/// In-memory resource store implementation.
#[derive(Default)]
pub struct InMemoryResourceStore {
    resources: RwLock<ResourceMap>,
}

impl InMemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored resources of one type.
    pub async fn count(&self, resource_type: ResourceType) -> usize {
        self.resources
            .read()
            .await
            .get(&resource_type)
            .map_or(0, |resources| resources.len())
    }

    /// Every stored resource of one type, ordered by id.
    pub async fn all(&self, resource_type: ResourceType) -> Vec<Value> {
        self.resources
            .read()
            .await
            .get(&resource_type)
            .map(|resources| resources.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn invalid(index: usize, reason: impl Into<String>) -> StoreError {
    StoreError::InvalidEntry {
        index,
        reason: reason.into(),
    }
}

fn parse_type(index: usize, name: &str) -> StoreResult<ResourceType> {
    name.parse()
        .map_err(|_| invalid(index, format!("unsupported resource type {name}")))
}

/// Parses `Type/id`.
fn parse_instance_url(index: usize, url: &str) -> StoreResult<(ResourceType, String)> {
    match url.trim_start_matches('/').split('/').collect::<Vec<_>>().as_slice() {
        [resource_type, id] if !id.is_empty() => {
            Ok((parse_type(index, resource_type)?, id.to_string()))
        }
        _ => Err(invalid(index, format!("expected Type/id, got '{url}'"))),
    }
}

fn plan(index: usize, entry: &BundleEntry) -> StoreResult<Target> {
    let request = entry
        .request
        .as_ref()
        .ok_or_else(|| invalid(index, "entry has no request"))?;
    let url = request.url.as_str();

    match request.method {
        HttpVerb::Post => Ok(Target::Write {
            resource_type: parse_type(index, url.trim_start_matches('/'))?,
            id: Uuid::new_v4().to_string(),
        }),
        HttpVerb::Put => {
            let (resource_type, id) = parse_instance_url(index, url)?;
            Ok(Target::Write { resource_type, id })
        }
        HttpVerb::Delete => match url.split_once('?') {
            Some((resource_type, query)) => Ok(Target::ConditionalDelete {
                resource_type: parse_type(index, resource_type.trim_start_matches('/'))?,
                params: SearchParams::parse(query)
                    .map_err(|err| invalid(index, err.to_string()))?,
            }),
            None => {
                let (resource_type, id) = parse_instance_url(index, url)?;
                Ok(Target::Delete { resource_type, id })
            }
        },
        HttpVerb::Get => Err(invalid(index, "GET is not allowed in a transaction")),
    }
}

/// Replaces `urn:uuid` references with the `Type/id` they were assigned in this transaction.
fn resolve_references(
    value: &mut Value,
    full_urls: &HashMap<String, String>,
) -> Result<(), String> {
    match value {
        Value::Object(object) => {
            if let Some(Value::String(reference)) = object.get_mut("reference") {
                if reference.starts_with("urn:uuid:") {
                    let resolved = full_urls
                        .get(reference.as_str())
                        .ok_or_else(|| format!("unresolved reference {reference}"))?;
                    *reference = resolved.clone();
                }
            }
            for (key, child) in object.iter_mut() {
                if key != "reference" {
                    resolve_references(child, full_urls)?;
                }
            }
            Ok(())
        }
        Value::Array(items) => items
            .iter_mut()
            .try_for_each(|item| resolve_references(item, full_urls)),
        _ => Ok(()),
    }
}

fn version_of(resource: &Value) -> u64 {
    resource
        .pointer("/meta/versionId")
        .and_then(Value::as_str)
        .and_then(|v| v.parse().ok())
        .unwrap_or(0)
}

fn response(status: &str, location: Option<String>, resource: Option<Value>) -> BundleEntry {
    BundleEntry {
        resource,
        response: Some(BundleResponse {
            status: status.to_string(),
            location,
        }),
        ..Default::default()
    }
}

fn apply_write(
    data: &mut ResourceMap,
    index: usize,
    entry: &BundleEntry,
    resource_type: ResourceType,
    id: &str,
    full_urls: &HashMap<String, String>,
) -> StoreResult<BundleEntry> {
    let mut resource = entry
        .resource
        .clone()
        .ok_or_else(|| invalid(index, "write entry has no resource"))?;

    let declared = resource.get("resourceType").and_then(Value::as_str);
    if declared != Some(resource_type.as_str()) {
        return Err(invalid(
            index,
            format!("resource does not match request type {resource_type}"),
        ));
    }
    resolve_references(&mut resource, full_urls).map_err(|reason| invalid(index, reason))?;

    let Value::Object(object) = &mut resource else {
        return Err(invalid(index, "resource must be a JSON object"));
    };

    let resources = data.entry(resource_type).or_default();
    let previous = resources.get(id).map(version_of);
    let version = previous.map_or(1, |v| v + 1);

    object.insert("id".to_string(), Value::String(id.to_string()));
    let meta = object
        .entry("meta")
        .or_insert_with(|| json!({}));
    let Value::Object(meta) = meta else {
        return Err(invalid(index, "meta must be a JSON object"));
    };
    meta.insert("versionId".to_string(), Value::String(version.to_string()));
    meta.insert(
        "lastUpdated".to_string(),
        Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
    );

    resources.insert(id.to_string(), resource.clone());

    let status = if previous.is_some() { "200 OK" } else { "201 Created" };
    Ok(response(
        status,
        Some(format!("{resource_type}/{id}/_history/{version}")),
        Some(resource),
    ))
}

fn search_in(
    data: &ResourceMap,
    resource_type: ResourceType,
    params: &SearchParams,
) -> StoreResult<Bundle> {
    let query = Query::compile(resource_type, params)?;
    let mut ids = query.matching_ids(data);
    let total = ids.len();
    if let Some(count) = query.count() {
        ids.truncate(count);
    }

    let mut bundle = Bundle::new(BundleType::Searchset);
    bundle.total = Some(total as u64);

    let empty = Default::default();
    let resources = data.get(&resource_type).unwrap_or(&empty);
    let mut seen = HashSet::new();
    let mut included = Vec::new();

    for id in ids {
        let Some(resource) = resources.get(&id) else {
            continue;
        };
        for target in query.included(resource) {
            if seen.insert(target.clone()) {
                included.push(target);
            }
        }
        bundle.entry.push(BundleEntry {
            full_url: Some(format!("{resource_type}/{id}")),
            resource: Some(resource.clone()),
            search: Some(BundleSearch {
                mode: Some(SearchMode::Match),
            }),
            ..Default::default()
        });
    }

    for (target_type, id) in included {
        if let Some(resource) = data.get(&target_type).and_then(|r| r.get(&id)) {
            bundle.entry.push(BundleEntry {
                full_url: Some(format!("{target_type}/{id}")),
                resource: Some(resource.clone()),
                search: Some(BundleSearch {
                    mode: Some(SearchMode::Include),
                }),
                ..Default::default()
            });
        }
    }

    Ok(bundle)
}

#[async_trait]
impl ResourceStore for InMemoryResourceStore {
    async fn read(&self, resource_type: ResourceType, id: &str) -> StoreResult<Option<Value>> {
        Ok(self
            .resources
            .read()
            .await
            .get(&resource_type)
            .and_then(|resources| resources.get(id))
            .cloned())
    }

    async fn search(
        &self,
        resource_type: ResourceType,
        params: &SearchParams,
    ) -> StoreResult<Bundle> {
        let data = self.resources.read().await;
        search_in(&data, resource_type, params)
    }

    async fn submit(&self, transaction: Bundle) -> StoreResult<Bundle> {
        if transaction.bundle_type != BundleType::Transaction {
            return Err(StoreError::InvalidTransaction(
                "bundle type must be transaction".into(),
            ));
        }

        let mut live = self.resources.write().await;
        let mut working = live.clone();

        // First pass: assign ids so that entries can reference each other in any order.
        let mut targets = Vec::with_capacity(transaction.entry.len());
        let mut full_urls = HashMap::new();
        for (index, entry) in transaction.entry.iter().enumerate() {
            let target = plan(index, entry)?;
            if let (Some(full_url), Target::Write { resource_type, id }) = (&entry.full_url, &target)
            {
                full_urls.insert(full_url.clone(), format!("{resource_type}/{id}"));
            }
            targets.push(target);
        }

        let mut result = Bundle::new(BundleType::TransactionResponse);
        for (index, (entry, target)) in transaction.entry.iter().zip(targets).enumerate() {
            let outcome = match target {
                Target::Write { resource_type, id } => {
                    apply_write(&mut working, index, entry, resource_type, &id, &full_urls)?
                }
                Target::Delete { resource_type, id } => {
                    if let Some(resources) = working.get_mut(&resource_type) {
                        resources.remove(&id);
                    }
                    response("204 No Content", None, None)
                }
                Target::ConditionalDelete {
                    resource_type,
                    params,
                } => {
                    let ids = Query::compile(resource_type, &params)
                        .map_err(|err| invalid(index, err.to_string()))?
                        .matching_ids(&working);
                    if let Some(resources) = working.get_mut(&resource_type) {
                        for id in ids {
                            resources.remove(&id);
                        }
                    }
                    response("204 No Content", None, None)
                }
            };
            result.entry.push(outcome);
        }

        *live = working;
        tracing::debug!(entries = result.entry.len(), "committed transaction");
        Ok(result)
    }
}

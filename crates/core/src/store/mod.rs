//! Resource store contract.
//!
//! The store is an external collaborator: a document store that can read a resource by type and
//! id, run a search, and apply a transaction bundle atomically. [`ResourceStore`] is the seam;
//! [`InMemoryResourceStore`] is a complete implementation for tests and local development.

mod matching;
mod memory;

pub use memory::InMemoryResourceStore;

use crate::{CoordinationError, CoordinationResult, StoreResult};
use async_trait::async_trait;
use fhir::{Bundle, FhirResource, ResourceType, Resources};
use serde_json::Value;
use std::fmt;

/// Operations consumed from the resource store.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Fetch one resource. `Ok(None)` signals that it does not exist.
    async fn read(&self, resource_type: ResourceType, id: &str) -> StoreResult<Option<Value>>;

    /// Run a search. Matches carry search mode `match`, `_include`d resources mode `include`,
    /// and `total` counts every match before `_count` is applied.
    async fn search(&self, resource_type: ResourceType, params: &SearchParams)
        -> StoreResult<Bundle>;

    /// Apply a `transaction` bundle all-or-nothing and return the `transaction-response`.
    async fn submit(&self, transaction: Bundle) -> StoreResult<Bundle>;
}

// ============================================================================
// SearchParams
// ============================================================================

/// Ordered search parameters. Values are kept verbatim; commas inside a value mean OR.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SearchParams {
    params: Vec<(String, String)>,
}

impl SearchParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            params: pairs.into_iter().collect(),
        }
    }

    /// Parses an unencoded query string such as `entity=Task/1&action=R`.
    pub fn parse(query: &str) -> CoordinationResult<Self> {
        let mut params = Self::new();
        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                CoordinationError::InvalidInput(format!("malformed search parameter '{pair}'"))
            })?;
            if name.is_empty() {
                return Err(CoordinationError::InvalidInput(format!(
                    "malformed search parameter '{pair}'"
                )));
            }
            params.add(name, value);
        }
        Ok(params)
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.add(name, value);
        self
    }

    pub fn add(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.push((name.into(), value.into()));
    }

    pub fn id(id: &str) -> Self {
        Self::new().with("_id", id)
    }

    pub fn include(self, include: &str) -> Self {
        self.with("_include", include)
    }

    /// Replaces any existing `_count`.
    pub fn count(self, count: usize) -> Self {
        let mut params = self.without("_count");
        params.add("_count", count.to_string());
        params
    }

    pub fn without(mut self, name: &str) -> Self {
        self.params.retain(|(n, _)| n != name);
        self
    }

    /// First value of `name`.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.params
            .iter()
            .filter(move |(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.params.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}

impl fmt::Display for SearchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.params.iter().enumerate() {
            if i > 0 {
                f.write_str("&")?;
            }
            write!(f, "{name}={value}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Typed helpers
// ============================================================================

/// Read and parse one resource.
pub async fn read_resource<R: FhirResource>(
    store: &dyn ResourceStore,
    id: &str,
) -> CoordinationResult<Option<R>> {
    let reference = format!("{}/{id}", R::RESOURCE_TYPE);
    store
        .read(R::RESOURCE_TYPE, id)
        .await
        .map_err(CoordinationError::store("read", reference))?
        .map(Resources::parse)
        .transpose()
        .map_err(CoordinationError::from)
}

/// Read and parse one resource, failing with `NotFound` if it does not exist.
pub async fn require_resource<R: FhirResource>(
    store: &dyn ResourceStore,
    id: &str,
) -> CoordinationResult<R> {
    read_resource(store, id)
        .await?
        .ok_or_else(|| CoordinationError::NotFound {
            resource_type: R::RESOURCE_TYPE,
            id: id.to_string(),
        })
}

/// Run a search and parse the resulting bundle.
pub async fn search_bundle(
    store: &dyn ResourceStore,
    resource_type: ResourceType,
    params: &SearchParams,
) -> CoordinationResult<Bundle> {
    store
        .search(resource_type, params)
        .await
        .map_err(CoordinationError::store("search", format!("{resource_type}?{params}")))
}

/// Run a search and parse the matched resources.
pub async fn search_resources<R: FhirResource>(
    store: &dyn ResourceStore,
    params: &SearchParams,
) -> CoordinationResult<Vec<R>> {
    let bundle = search_bundle(store, R::RESOURCE_TYPE, params).await?;
    bundle
        .matches()
        .cloned()
        .map(|value| Resources::parse(value).map_err(CoordinationError::from))
        .collect()
}

/// Parse the included resources of type `R` from a search result.
pub fn included_resources<R: FhirResource>(bundle: &Bundle) -> CoordinationResult<Vec<R>> {
    bundle
        .included()
        .filter(|value| Resources::resource_type_of(value).ok() == Some(R::RESOURCE_TYPE))
        .cloned()
        .map(|value| Resources::parse(value).map_err(CoordinationError::from))
        .collect()
}

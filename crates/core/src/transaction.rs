//! Transaction builder.
//!
//! Operation handlers stage their writes on a shared [`TransactionBuilder`]. Every staging call
//! returns the position of the new entry; a handler keeps that index and uses it to find its own
//! result in the committed `transaction-response`, whatever other entries were interleaved.

use crate::store::SearchParams;
use crate::{CoordinationError, CoordinationResult};
use fhir::{
    Bundle, BundleEntry, BundleRequest, BundleType, FhirResource, HttpVerb, ResourceType,
    Resources,
};
use uuid::Uuid;

/// A fresh `urn:uuid` full URL for a resource created in this transaction.
pub fn new_full_url() -> String {
    format!("urn:uuid:{}", Uuid::new_v4())
}

/// Ordered, append-only list of staged writes.
#[derive(Debug, Default)]
pub struct TransactionBuilder {
    entries: Vec<BundleEntry>,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(
        &mut self,
        method: HttpVerb,
        url: String,
        full_url: Option<String>,
        resource: Option<serde_json::Value>,
    ) -> usize {
        self.entries.push(BundleEntry {
            full_url,
            resource,
            request: Some(BundleRequest {
                method,
                url,
                if_none_exist: None,
            }),
            ..Default::default()
        });
        self.entries.len() - 1
    }

    /// Stage a POST of `resource` under `full_url`.
    pub fn create<R: FhirResource>(
        &mut self,
        resource: &R,
        full_url: &str,
    ) -> CoordinationResult<usize> {
        let mut resource = resource.clone();
        resource.set_id(None);
        let body = Resources::render(&resource)?;
        Ok(self.push(
            HttpVerb::Post,
            R::RESOURCE_TYPE.to_string(),
            Some(full_url.to_string()),
            Some(body),
        ))
    }

    /// Stage a PUT of `resource` at `{Type}/{id}`; creates the resource if it does not exist.
    pub fn update<R: FhirResource>(&mut self, resource: &R) -> CoordinationResult<usize> {
        let id = resource.id().ok_or_else(|| {
            CoordinationError::InvalidInput(format!(
                "cannot update {} without an id",
                R::RESOURCE_TYPE
            ))
        })?;
        let url = format!("{}/{id}", R::RESOURCE_TYPE);
        let body = Resources::render(resource)?;
        Ok(self.push(HttpVerb::Put, url, None, Some(body)))
    }

    pub fn delete(&mut self, resource_type: ResourceType, id: &str) -> usize {
        self.push(HttpVerb::Delete, format!("{resource_type}/{id}"), None, None)
    }

    /// Stage a delete of every resource matching `params`.
    pub fn conditional_delete(
        &mut self,
        resource_type: ResourceType,
        params: &SearchParams,
    ) -> usize {
        self.push(HttpVerb::Delete, format!("{resource_type}?{params}"), None, None)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[BundleEntry] {
        &self.entries
    }

    /// The resource staged under `full_url`, for lookups of placeholders not yet in the store.
    pub fn staged(&self, full_url: &str) -> Option<&serde_json::Value> {
        self.entries
            .iter()
            .find(|e| e.full_url.as_deref() == Some(full_url))
            .and_then(|e| e.resource.as_ref())
    }

    /// The latest resource staged under `reference`, matched on the full URL of a create or the
    /// `{Type}/{id}` of an update. Edits land in the same entry.
    pub fn pending_mut(&mut self, reference: &str) -> Option<&mut serde_json::Value> {
        self.entries
            .iter_mut()
            .rev()
            .find(|e| {
                e.full_url.as_deref() == Some(reference)
                    || e.request
                        .as_ref()
                        .is_some_and(|r| r.method == HttpVerb::Put && r.url == reference)
            })
            .and_then(|e| e.resource.as_mut())
    }

    pub fn into_bundle(self) -> Bundle {
        let mut bundle = Bundle::new(BundleType::Transaction);
        bundle.entry = self.entries;
        bundle
    }
}

/// The committed entry staged at `index`.
pub fn result_entry(result: &Bundle, index: usize) -> CoordinationResult<&BundleEntry> {
    result.entry.get(index).ok_or_else(|| {
        CoordinationError::MalformedTransactionResult(format!(
            "expected an entry at index {index}, response has {}",
            result.entry.len()
        ))
    })
}

/// Parses the committed resource staged at `index`.
pub fn result_resource<R: FhirResource>(result: &Bundle, index: usize) -> CoordinationResult<R> {
    let entry = result_entry(result, index)?;
    let resource = entry.resource.clone().ok_or_else(|| {
        CoordinationError::MalformedTransactionResult(format!(
            "entry {index} carries no {}",
            R::RESOURCE_TYPE
        ))
    })?;
    Ok(Resources::parse(resource)?)
}

//! Resource operation framework.
//!
//! One generic handler per operation (create, read, update, search, delete), instantiated per
//! resource type at startup. A handler authorises the request, stages its writes and AuditEvents
//! on the shared [`TransactionBuilder`], and returns a [`ResultFn`] that turns the committed
//! transaction into the caller's response and the notification payloads.

mod behavior;
mod care_plan;
mod create;
mod delete;
mod read;
mod references;
mod search;
mod task;
mod update;

pub use behavior::{PlainResource, ResourceBehavior};
pub use care_plan::{CarePlanBehavior, CareTeamBehavior};
pub use create::CreateOperation;
pub use delete::DeleteOperation;
pub use read::ReadOperation;
pub use references::validate_references;
pub use search::SearchOperation;
pub use task::TaskBehavior;
pub use update::UpdateOperation;

use crate::audit::{stage_audit, AuditRecord};
use crate::policy::PolicyContext;
use crate::principal::Principal;
use crate::store::{ResourceStore, SearchParams};
use crate::transaction::{result_entry, TransactionBuilder};
use crate::workflow::WorkflowProvider;
use crate::{CoordinationError, CoordinationResult, CoreConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fhir::{Bundle, BundleEntry, FhirResource, HttpVerb, ResourceType, Resources};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Everything a handler needs besides the request: who is calling, and the collaborators.
#[derive(Clone)]
pub struct OperationContext {
    pub principal: Principal,
    pub store: Arc<dyn ResourceStore>,
    pub config: Arc<CoreConfig>,
    pub workflows: Arc<dyn WorkflowProvider>,
    /// One clock reading per request.
    pub now: DateTime<Utc>,
}

impl OperationContext {
    pub fn policy_context(&self) -> PolicyContext<'_> {
        PolicyContext {
            store: self.store.as_ref(),
            config: &self.config,
            now: self.now,
        }
    }

    /// Stages the AuditEvent for an access by this context's principal.
    pub fn audit(
        &self,
        tx: &mut TransactionBuilder,
        record: &AuditRecord<'_>,
    ) -> CoordinationResult<usize> {
        stage_audit(tx, &self.config, &self.principal, record, self.now)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Create,
    Read,
    Update,
    Search,
    Delete,
}

impl OperationKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Search => "search",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An incoming operation, independent of the transport that carried it.
#[derive(Clone, Debug)]
pub struct OperationRequest {
    pub method: HttpVerb,
    pub resource_type: ResourceType,
    pub resource_id: Option<String>,
    pub query: SearchParams,
    pub body: Option<Value>,
    /// `urn:uuid` full URL when the request came from a transaction bundle entry.
    pub full_url: Option<String>,
    /// Honour a client-supplied id on create (PUT semantics).
    pub upsert: bool,
}

impl OperationRequest {
    fn new(method: HttpVerb, resource_type: ResourceType) -> Self {
        Self {
            method,
            resource_type,
            resource_id: None,
            query: SearchParams::new(),
            body: None,
            full_url: None,
            upsert: false,
        }
    }

    pub fn create(resource_type: ResourceType, body: Value) -> Self {
        Self {
            body: Some(body),
            ..Self::new(HttpVerb::Post, resource_type)
        }
    }

    pub fn read(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Self {
            resource_id: Some(id.into()),
            ..Self::new(HttpVerb::Get, resource_type)
        }
    }

    pub fn update(resource_type: ResourceType, id: impl Into<String>, body: Value) -> Self {
        Self {
            resource_id: Some(id.into()),
            body: Some(body),
            ..Self::new(HttpVerb::Put, resource_type)
        }
    }

    pub fn search(resource_type: ResourceType, query: SearchParams) -> Self {
        Self {
            query,
            ..Self::new(HttpVerb::Get, resource_type)
        }
    }

    pub fn delete(resource_type: ResourceType, id: impl Into<String>) -> Self {
        Self {
            resource_id: Some(id.into()),
            ..Self::new(HttpVerb::Delete, resource_type)
        }
    }

    pub fn with_upsert(mut self, upsert: bool) -> Self {
        self.upsert = upsert;
        self
    }

    pub fn with_full_url(mut self, full_url: Option<String>) -> Self {
        self.full_url = full_url;
        self
    }

    /// Which handler serves this request. A create with `upsert` and a body id is an update.
    pub fn kind(&self) -> OperationKind {
        match (self.method, self.resource_id.is_some()) {
            (HttpVerb::Get, true) => OperationKind::Read,
            (HttpVerb::Get, false) => OperationKind::Search,
            (HttpVerb::Put, _) => OperationKind::Update,
            (HttpVerb::Delete, _) => OperationKind::Delete,
            (HttpVerb::Post, _) if self.upsert && self.body_id().is_some() => OperationKind::Update,
            (HttpVerb::Post, _) => OperationKind::Create,
        }
    }

    pub(crate) fn body_id(&self) -> Option<&str> {
        self.body.as_ref()?.get("id")?.as_str()
    }

    pub(crate) fn require_id(&self) -> CoordinationResult<&str> {
        self.resource_id.as_deref().ok_or_else(|| {
            CoordinationError::InvalidInput(format!(
                "{} requires a resource id",
                self.resource_type
            ))
        })
    }

    pub(crate) fn require_body(&self) -> CoordinationResult<&Value> {
        self.body.as_ref().ok_or_else(|| {
            CoordinationError::InvalidInput(format!(
                "{} requires a resource body",
                self.resource_type
            ))
        })
    }
}

/// The caller-facing outcome of one operation.
#[derive(Clone, Debug)]
pub struct OperationResult {
    /// Response entry: the resource (a searchset Bundle for searches) plus status.
    pub entry: BundleEntry,
    /// Changed resources to hand to notification dispatch.
    pub notifications: Vec<Value>,
}

/// Resolves a handler's outcome once its transaction has been committed.
pub type ResultFn = Box<dyn FnOnce(&Bundle) -> CoordinationResult<OperationResult> + Send>;

#[async_trait]
pub trait Operation: Send + Sync {
    async fn handle(
        &self,
        ctx: &OperationContext,
        request: &OperationRequest,
        tx: &mut TransactionBuilder,
    ) -> CoordinationResult<ResultFn>;
}

/// Builds the response entry for a committed write of `resource`.
fn response_entry<R: FhirResource>(
    config: &CoreConfig,
    resource: &R,
    committed: &BundleEntry,
) -> CoordinationResult<BundleEntry> {
    Ok(BundleEntry {
        full_url: resource
            .id()
            .map(|id| config.resource_url(&format!("{}/{id}", R::RESOURCE_TYPE))),
        resource: Some(Resources::render(resource)?),
        response: committed.response.clone(),
        ..Default::default()
    })
}

/// The [`ResultFn`] of a create or update: the written resource is both the response and the
/// first notification; the resources at `also_notify` follow.
fn committed_write<R: FhirResource>(
    config: Arc<CoreConfig>,
    index: usize,
    also_notify: Vec<usize>,
) -> ResultFn {
    Box::new(move |result: &Bundle| {
        let committed = result_entry(result, index)?;
        let resource: R = crate::transaction::result_resource(result, index)?;
        let entry = response_entry(&config, &resource, committed)?;

        let mut notifications = Vec::with_capacity(also_notify.len() + 1);
        notifications.extend(entry.resource.clone());
        for staged in also_notify {
            let resource = result_entry(result, staged)?.resource.clone().ok_or_else(|| {
                CoordinationError::MalformedTransactionResult(format!(
                    "entry {staged} carries no resource"
                ))
            })?;
            notifications.push(resource);
        }

        Ok(OperationResult {
            entry,
            notifications,
        })
    })
}

/// Rejects the request with a forbidden-class error. The failed rules are only logged.
fn deny<R: FhirResource>(
    ctx: &OperationContext,
    kind: OperationKind,
    reasons: &[String],
) -> CoordinationError {
    tracing::warn!(
        resource_type = %R::RESOURCE_TYPE,
        operation = %kind,
        principal = ?ctx.principal.organizations(),
        reasons = ?reasons,
        "access denied"
    );
    CoordinationError::Forbidden(R::RESOURCE_TYPE)
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_routes_upsert_with_id_to_update() {
        let body = json!({"resourceType": "Patient", "id": "p1"});
        let plain = OperationRequest::create(ResourceType::Patient, body.clone());
        assert_eq!(plain.kind(), OperationKind::Create);
        assert_eq!(plain.clone().with_upsert(true).kind(), OperationKind::Update);

        let no_id =
            OperationRequest::create(ResourceType::Patient, json!({"resourceType": "Patient"}))
                .with_upsert(true);
        assert_eq!(no_id.kind(), OperationKind::Create);

        assert_eq!(OperationRequest::read(ResourceType::Task, "1").kind(), OperationKind::Read);
        assert_eq!(
            OperationRequest::search(ResourceType::Task, SearchParams::new()).kind(),
            OperationKind::Search
        );
    }
}

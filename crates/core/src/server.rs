//! The resource server facade used by transport adapters.
//!
//! Routes each request to the handler registered for its operation and resource type, commits
//! everything the handler staged as one transaction, and publishes the changed resources.

use crate::notification::{Notification, NotificationRegistry};
use crate::operation::{
    CarePlanBehavior, CareTeamBehavior, CreateOperation, DeleteOperation, Operation,
    OperationContext, OperationKind, OperationRequest, PlainResource, ReadOperation,
    ResourceBehavior, SearchOperation, TaskBehavior, UpdateOperation,
};
use crate::policy::{Policies, PolicySet};
use crate::principal::Principal;
use crate::store::{ResourceStore, SearchParams};
use crate::transaction::TransactionBuilder;
use crate::workflow::WorkflowProvider;
use crate::{CoordinationError, CoordinationResult, CoreConfig};
use chrono::Utc;
use fhir::{Bundle, BundleEntry, BundleType, FhirResource, ResourceType, Resources};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

type OperationTable = HashMap<(OperationKind, ResourceType), Arc<dyn Operation>>;

fn register<R: FhirResource>(
    table: &mut OperationTable,
    policies: PolicySet<R>,
    behavior: Arc<dyn ResourceBehavior<R>>,
) {
    let resource_type = R::RESOURCE_TYPE;
    table.insert(
        (OperationKind::Create, resource_type),
        Arc::new(CreateOperation::new(policies.clone(), Arc::clone(&behavior))),
    );
    table.insert(
        (OperationKind::Update, resource_type),
        Arc::new(UpdateOperation::new(policies.clone(), behavior)),
    );
    register_delete_and_reads(table, policies);
}

/// Types that only come into being as a side effect of another write.
fn register_without_create<R: FhirResource>(
    table: &mut OperationTable,
    policies: PolicySet<R>,
    behavior: Arc<dyn ResourceBehavior<R>>,
) {
    table.insert(
        (OperationKind::Update, R::RESOURCE_TYPE),
        Arc::new(UpdateOperation::without_create(policies.clone(), behavior)),
    );
    register_delete_and_reads(table, policies);
}

fn register_delete_and_reads<R: FhirResource>(table: &mut OperationTable, policies: PolicySet<R>) {
    table.insert(
        (OperationKind::Delete, R::RESOURCE_TYPE),
        Arc::new(DeleteOperation::new(policies.clone())),
    );
    register_read_only(table, policies);
}

fn register_read_only<R: FhirResource>(table: &mut OperationTable, policies: PolicySet<R>) {
    table.insert(
        (OperationKind::Read, R::RESOURCE_TYPE),
        Arc::new(ReadOperation::new(policies.clone())),
    );
    table.insert(
        (OperationKind::Search, R::RESOURCE_TYPE),
        Arc::new(SearchOperation::new(policies)),
    );
}

/// Entry point for every resource operation.
pub struct ResourceServer {
    store: Arc<dyn ResourceStore>,
    config: Arc<CoreConfig>,
    workflows: Arc<dyn WorkflowProvider>,
    notifications: Arc<NotificationRegistry>,
    operations: OperationTable,
}

impl ResourceServer {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        config: Arc<CoreConfig>,
        workflows: Arc<dyn WorkflowProvider>,
        notifications: Arc<NotificationRegistry>,
    ) -> Self {
        let policies = Policies::standard();
        let mut operations = OperationTable::new();
        register(&mut operations, policies.task, Arc::new(TaskBehavior));
        register(&mut operations, policies.care_plan, Arc::new(CarePlanBehavior));
        // CareTeams are created with their CarePlan.
        register_without_create(&mut operations, policies.care_team, Arc::new(CareTeamBehavior));
        register(&mut operations, policies.patient, Arc::new(PlainResource));
        register(&mut operations, policies.condition, Arc::new(PlainResource));
        register(&mut operations, policies.service_request, Arc::new(PlainResource));
        register(&mut operations, policies.questionnaire, Arc::new(PlainResource));
        register(
            &mut operations,
            policies.questionnaire_response,
            Arc::new(PlainResource),
        );
        // The audit journal is written only as a side effect of other operations.
        register_read_only(&mut operations, policies.audit_event);

        Self {
            store,
            config,
            workflows,
            notifications,
            operations,
        }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn notifications(&self) -> &Arc<NotificationRegistry> {
        &self.notifications
    }

    pub fn supports(&self, kind: OperationKind, resource_type: ResourceType) -> bool {
        self.operations.contains_key(&(kind, resource_type))
    }

    fn context(&self, principal: Principal) -> OperationContext {
        OperationContext {
            principal,
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            workflows: Arc::clone(&self.workflows),
            now: Utc::now(),
        }
    }

    fn operation(&self, request: &OperationRequest) -> CoordinationResult<&Arc<dyn Operation>> {
        let kind = request.kind();
        self.operations
            .get(&(kind, request.resource_type))
            .ok_or_else(|| CoordinationError::UnsupportedOperation {
                method: kind.as_str(),
                resource_type: request.resource_type.to_string(),
            })
    }

    /// Executes one operation in its own transaction.
    ///
    /// # Returns
    ///
    /// The response entry: the resource read or written (a searchset Bundle for searches) and
    /// the response status.
    ///
    /// # Errors
    ///
    /// Returns [`CoordinationError`] if the request is invalid, denied, rejected by the task
    /// workflow, or the store fails. Nothing is written in any of these cases.
    pub async fn handle(
        &self,
        principal: Principal,
        request: OperationRequest,
    ) -> CoordinationResult<BundleEntry> {
        let ctx = self.context(principal);
        let operation = self.operation(&request)?;

        let mut tx = TransactionBuilder::new();
        let result_fn = operation.handle(&ctx, &request, &mut tx).await?;
        let committed = self.commit(tx).await?;
        let outcome = result_fn(&committed)?;

        tracing::info!(
            operation = %request.kind(),
            resource_type = %request.resource_type,
            "operation committed"
        );
        self.dispatch(outcome.notifications).await;
        Ok(outcome.entry)
    }

    /// Executes every entry of a transaction Bundle in one shared transaction.
    ///
    /// Entries may refer to each other through their `urn:uuid` full URLs. Either all entries
    /// are committed or none is.
    ///
    /// # Errors
    ///
    /// Returns the first entry's failure; see [`ResourceServer::handle`].
    pub async fn handle_bundle(
        &self,
        principal: Principal,
        bundle: Bundle,
    ) -> CoordinationResult<Bundle> {
        if bundle.bundle_type != BundleType::Transaction {
            return Err(CoordinationError::InvalidInput(
                "only transaction bundles are accepted".into(),
            ));
        }

        let ctx = self.context(principal);
        let mut tx = TransactionBuilder::new();
        let mut result_fns = Vec::with_capacity(bundle.entry.len());
        for (index, entry) in bundle.entry.iter().enumerate() {
            let request = entry_request(index, entry)?;
            let operation = self.operation(&request)?;
            result_fns.push(operation.handle(&ctx, &request, &mut tx).await?);
        }
        let committed = self.commit(tx).await?;

        let mut response = Bundle::new(BundleType::TransactionResponse);
        let mut notifications = Vec::new();
        for result_fn in result_fns {
            let outcome = result_fn(&committed)?;
            response.entry.push(outcome.entry);
            notifications.extend(outcome.notifications);
        }

        tracing::info!(entries = response.entry.len(), "transaction bundle committed");
        self.dispatch(notifications).await;
        Ok(response)
    }

    async fn commit(&self, tx: TransactionBuilder) -> CoordinationResult<Bundle> {
        if tx.is_empty() {
            return Ok(Bundle::new(BundleType::TransactionResponse));
        }
        self.store
            .submit(tx.into_bundle())
            .await
            .map_err(CoordinationError::store("submit", "transaction"))
    }

    /// Publishes each changed resource once, in its latest committed version.
    async fn dispatch(&self, resources: Vec<Value>) {
        let mut latest: Vec<Notification> = Vec::with_capacity(resources.len());
        for resource in resources {
            let (Ok(resource_type), Some(id)) = (
                Resources::resource_type_of(&resource),
                resource.get("id").and_then(Value::as_str),
            ) else {
                tracing::warn!("committed resource without type or id, not notified");
                continue;
            };
            let source_url = self.config.resource_url(&format!("{resource_type}/{id}"));
            let notification = Notification {
                source_url,
                resource,
            };
            match latest
                .iter_mut()
                .find(|n| n.source_url == notification.source_url)
            {
                Some(existing) => *existing = notification,
                None => latest.push(notification),
            }
        }

        for notification in &latest {
            if let Some(resource_type) = notification.resource_type() {
                self.notifications
                    .notify(resource_type.as_str(), notification)
                    .await;
            }
        }
    }
}

/// Translates a transaction Bundle entry into an operation request.
fn entry_request(index: usize, entry: &BundleEntry) -> CoordinationResult<OperationRequest> {
    let request = entry.request.as_ref().ok_or_else(|| {
        CoordinationError::InvalidInput(format!("bundle entry {index} has no request"))
    })?;
    let (path, query) = request.url.split_once('?').unwrap_or((request.url.as_str(), ""));
    let mut segments = path.trim_matches('/').split('/');
    let resource_type: ResourceType = segments.next().unwrap_or_default().parse()?;
    let resource_id = segments.next().filter(|id| !id.is_empty()).map(str::to_string);
    if segments.next().is_some() {
        return Err(CoordinationError::InvalidInput(format!(
            "bundle entry {index} has an unsupported url '{}'",
            request.url
        )));
    }

    let query = SearchParams::parse(query)?;
    let upsert = query.get("_upsert") == Some("true");
    Ok(OperationRequest {
        method: request.method,
        resource_type,
        resource_id,
        query: query.without("_upsert"),
        body: entry.resource.clone(),
        full_url: entry.full_url.clone(),
        upsert,
    })
}

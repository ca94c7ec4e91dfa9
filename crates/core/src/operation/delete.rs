use super::{
    deny, Operation, OperationContext, OperationKind, OperationRequest, OperationResult, ResultFn,
};
use crate::policy::PolicySet;
use crate::store::{require_resource, SearchParams};
use crate::transaction::{result_entry, TransactionBuilder};
use crate::CoordinationResult;
use async_trait::async_trait;
use fhir::{BundleEntry, FhirResource, ResourceType};

/// Generic delete handler.
///
/// Deletes the resource together with every AuditEvent that names it. The delete itself is not
/// audited: the journal entries describing the resource are removed with it.
pub struct DeleteOperation<R: FhirResource> {
    policies: PolicySet<R>,
}

impl<R: FhirResource> DeleteOperation<R> {
    pub fn new(policies: PolicySet<R>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl<R: FhirResource> Operation for DeleteOperation<R> {
    async fn handle(
        &self,
        ctx: &OperationContext,
        request: &OperationRequest,
        tx: &mut TransactionBuilder,
    ) -> CoordinationResult<ResultFn> {
        let id = request.require_id()?;
        let resource: R = require_resource(ctx.store.as_ref(), id).await?;

        let decision = self
            .policies
            .delete
            .has_access(&ctx.policy_context(), &resource, &ctx.principal)
            .await?;
        if !decision.allowed {
            return Err(deny::<R>(ctx, OperationKind::Delete, &decision.reasons));
        }

        let reference = format!("{}/{id}", R::RESOURCE_TYPE);
        tx.conditional_delete(
            ResourceType::AuditEvent,
            &SearchParams::new().with("entity", reference.as_str()),
        );
        let index = tx.delete(R::RESOURCE_TYPE, id);
        tracing::info!(resource = %reference, "staged delete");

        Ok(Box::new(move |result| {
            let committed = result_entry(result, index)?;
            Ok(OperationResult {
                entry: BundleEntry {
                    response: committed.response.clone(),
                    ..Default::default()
                },
                notifications: Vec::new(),
            })
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::context;
    use super::super::{CreateOperation, PlainResource, ReadOperation};
    use super::*;
    use crate::policy::Policies;
    use crate::store::{InMemoryResourceStore, ResourceStore};
    use crate::CoordinationError;
    use fhir::Patient;
    use serde_json::json;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_delete_removes_resource_and_its_audit_trail() {
        let store = Arc::new(InMemoryResourceStore::new());
        let ctx = context(Arc::clone(&store), "1");
        let policies = Policies::standard().patient;

        let mut tx = TransactionBuilder::new();
        let created = CreateOperation::new(policies.clone(), Arc::new(PlainResource))
            .handle(
                &ctx,
                &OperationRequest::create(
                    ResourceType::Patient,
                    json!({"resourceType": "Patient"}),
                ),
                &mut tx,
            )
            .await
            .expect("create");
        let result = store.submit(tx.into_bundle()).await.expect("commit");
        let patient = created(&result).expect("outcome").entry.resource.expect("resource");
        let id = patient["id"].as_str().expect("id").to_string();
        assert_eq!(store.count(ResourceType::AuditEvent).await, 1);

        let mut tx = TransactionBuilder::new();
        let deleted = DeleteOperation::new(policies.clone())
            .handle(&ctx, &OperationRequest::delete(ResourceType::Patient, id.as_str()), &mut tx)
            .await
            .expect("delete");
        let result = store.submit(tx.into_bundle()).await.expect("commit");
        let outcome = deleted(&result).expect("outcome");
        assert_eq!(
            outcome.entry.response.and_then(|r| r.status_code()),
            Some(204)
        );
        assert_eq!(store.count(ResourceType::Patient).await, 0);
        assert_eq!(store.count(ResourceType::AuditEvent).await, 0);

        let err = ReadOperation::<Patient>::new(policies)
            .handle(
                &ctx,
                &OperationRequest::read(ResourceType::Patient, id),
                &mut TransactionBuilder::new(),
            )
            .await
            .err()
            .expect("gone");
        assert!(matches!(err, CoordinationError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_only_the_creator_may_delete() {
        let store = Arc::new(InMemoryResourceStore::new());
        let mut tx = TransactionBuilder::new();
        tx.update(&Patient {
            id: Some("p1".into()),
            ..Default::default()
        })
        .expect("stage");
        store.submit(tx.into_bundle()).await.expect("seed");

        let ctx = context(Arc::clone(&store), "1");
        let err = DeleteOperation::<Patient>::new(Policies::standard().patient)
            .handle(
                &ctx,
                &OperationRequest::delete(ResourceType::Patient, "p1"),
                &mut TransactionBuilder::new(),
            )
            .await
            .err()
            .expect("no creator marker, no delete");
        assert!(matches!(err, CoordinationError::Forbidden(ResourceType::Patient)));
    }
}

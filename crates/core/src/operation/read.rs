use super::{
    deny, Operation, OperationContext, OperationKind, OperationRequest, OperationResult, ResultFn,
};
use crate::audit::AuditRecord;
use crate::policy::PolicySet;
use crate::store::require_resource;
use crate::transaction::TransactionBuilder;
use crate::CoordinationResult;
use async_trait::async_trait;
use fhir::{AuditEventAction, BundleEntry, BundleResponse, FhirResource, Resources};

/// Generic read handler. The AuditEvent is committed in the transaction that returns the data.
pub struct ReadOperation<R: FhirResource> {
    policies: PolicySet<R>,
}

impl<R: FhirResource> ReadOperation<R> {
    pub fn new(policies: PolicySet<R>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl<R: FhirResource> Operation for ReadOperation<R> {
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
            .read
            .has_access(&ctx.policy_context(), &resource, &ctx.principal)
            .await?;
        if !decision.allowed {
            return Err(deny::<R>(ctx, OperationKind::Read, &decision.reasons));
        }

        let reference = format!("{}/{id}", R::RESOURCE_TYPE);
        ctx.audit(
            tx,
            &AuditRecord::new(AuditEventAction::Read, reference.as_str())
                .with_reasons(decision.reasons),
        )?;

        let entry = BundleEntry {
            full_url: Some(ctx.config.resource_url(&reference)),
            resource: Some(Resources::render(&resource)?),
            response: Some(BundleResponse {
                status: "200 OK".to_string(),
                location: None,
            }),
            ..Default::default()
        };
        Ok(Box::new(move |_| {
            Ok(OperationResult {
                entry,
                notifications: Vec::new(),
            })
        }))
    }
}

use super::{
    committed_write, deny, validate_references, CreateOperation, Operation, OperationContext,
    OperationKind, OperationRequest, ResourceBehavior, ResultFn,
};
use crate::audit::AuditRecord;
use crate::creator::carry_forward_creator;
use crate::policy::PolicySet;
use crate::store::{search_resources, SearchParams};
use crate::transaction::TransactionBuilder;
use crate::{CoordinationError, CoordinationResult};
use async_trait::async_trait;
use fhir::{AuditEventAction, FhirResource, Resources};
use std::sync::Arc;

/// Generic update handler.
///
/// An update of a resource that does not exist is handed to the create handler, which writes it
/// under the requested id. Types built [`without_create`](Self::without_create) refuse it.
pub struct UpdateOperation<R: FhirResource> {
    policies: PolicySet<R>,
    behavior: Arc<dyn ResourceBehavior<R>>,
    create: Option<CreateOperation<R>>,
}

impl<R: FhirResource> UpdateOperation<R> {
    pub fn new(policies: PolicySet<R>, behavior: Arc<dyn ResourceBehavior<R>>) -> Self {
        let create = CreateOperation::new(policies.clone(), Arc::clone(&behavior));
        Self {
            policies,
            behavior,
            create: Some(create),
        }
    }

    /// Updates existing resources only.
    pub fn without_create(policies: PolicySet<R>, behavior: Arc<dyn ResourceBehavior<R>>) -> Self {
        Self {
            policies,
            behavior,
            create: None,
        }
    }
}

#[async_trait]
impl<R: FhirResource> Operation for UpdateOperation<R> {
    async fn handle(
        &self,
        ctx: &OperationContext,
        request: &OperationRequest,
        tx: &mut TransactionBuilder,
    ) -> CoordinationResult<ResultFn> {
        let body = request.require_body()?;
        validate_references(body)?;
        let mut incoming: R = Resources::parse(body.clone())?;

        let id = match (request.resource_id.as_deref(), incoming.id()) {
            (Some(path), Some(body)) if path != body => {
                return Err(CoordinationError::InvalidInput(format!(
                    "resource id '{body}' does not match the request id '{path}'"
                )))
            }
            (Some(path), _) => path.to_string(),
            (None, Some(body)) => body.to_string(),
            (None, None) => {
                return Err(CoordinationError::InvalidInput(format!(
                    "{} update requires a resource id",
                    R::RESOURCE_TYPE
                )))
            }
        };
        incoming.set_id(Some(id.clone()));

        let existing = search_resources::<R>(ctx.store.as_ref(), &SearchParams::id(&id))
            .await?
            .into_iter()
            .next();
        let Some(existing) = existing else {
            let Some(create) = &self.create else {
                return Err(CoordinationError::UnsupportedOperation {
                    method: "create",
                    resource_type: R::RESOURCE_TYPE.to_string(),
                });
            };
            tracing::debug!(
                resource_type = %R::RESOURCE_TYPE,
                id = %id,
                "update target absent, creating"
            );
            return create.stage(ctx, incoming, Some(id), None, tx).await;
        };

        self.behavior.validate_update(&existing, &incoming)?;

        let decision = self
            .policies
            .update
            .has_access(&ctx.policy_context(), &existing, &ctx.principal)
            .await?;
        if !decision.allowed {
            return Err(deny::<R>(ctx, OperationKind::Update, &decision.reasons));
        }

        carry_forward_creator(&existing, &mut incoming);
        let also_notify = self
            .behavior
            .prepare_update(ctx, &existing, &mut incoming, tx)
            .await?;

        let index = tx.update(&incoming)?;
        let reference = format!("{}/{id}", R::RESOURCE_TYPE);
        ctx.audit(
            tx,
            &AuditRecord::new(AuditEventAction::Update, reference.as_str())
                .with_reasons(decision.reasons),
        )?;

        tracing::debug!(resource = %reference, "staged update");
        Ok(committed_write::<R>(Arc::clone(&ctx.config), index, also_notify))
    }
}

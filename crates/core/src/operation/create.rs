use super::{
    committed_write, deny, validate_references, OperationContext, OperationKind, OperationRequest,
    Operation, ResourceBehavior, ResultFn,
};
use crate::audit::AuditRecord;
use crate::creator::set_creator;
use crate::policy::PolicySet;
use crate::transaction::{new_full_url, TransactionBuilder};
use crate::{CoordinationError, CoordinationResult};
use async_trait::async_trait;
use fhir::{AuditEventAction, FhirResource, Resources};
use std::sync::Arc;

/// Generic create handler.
pub struct CreateOperation<R: FhirResource> {
    policies: PolicySet<R>,
    behavior: Arc<dyn ResourceBehavior<R>>,
}

impl<R: FhirResource> CreateOperation<R> {
    pub fn new(policies: PolicySet<R>, behavior: Arc<dyn ResourceBehavior<R>>) -> Self {
        Self { policies, behavior }
    }

    /// Stages the creation of an already parsed resource.
    ///
    /// With `put_id` the resource is written with PUT under that id (upsert, or an update of a
    /// resource that does not exist yet); otherwise the store assigns the id.
    pub(crate) async fn stage(
        &self,
        ctx: &OperationContext,
        mut resource: R,
        put_id: Option<String>,
        full_url: Option<String>,
        tx: &mut TransactionBuilder,
    ) -> CoordinationResult<ResultFn> {
        resource.set_id(put_id.clone());
        self.behavior.validate_create(&resource)?;
        set_creator(&mut resource, &ctx.principal)?;

        let decision = self
            .policies
            .create
            .has_access(&ctx.policy_context(), &resource, &ctx.principal)
            .await?;
        if !decision.allowed {
            return Err(deny::<R>(ctx, OperationKind::Create, &decision.reasons));
        }

        let full_url = match &put_id {
            Some(id) => format!("{}/{id}", R::RESOURCE_TYPE),
            None => match full_url {
                Some(url) if url.starts_with("urn:uuid:") => url,
                Some(url) => {
                    return Err(CoordinationError::InvalidInput(format!(
                        "fullUrl of a created {} must be a urn:uuid, got '{url}'",
                        R::RESOURCE_TYPE
                    )))
                }
                None => new_full_url(),
            },
        };

        let also_notify = self
            .behavior
            .prepare_create(ctx, &mut resource, &full_url, tx)
            .await?;

        let index = match put_id {
            Some(_) => tx.update(&resource)?,
            None => tx.create(&resource, &full_url)?,
        };
        ctx.audit(
            tx,
            &AuditRecord::new(AuditEventAction::Create, full_url.as_str())
                .with_reasons(decision.reasons),
        )?;

        tracing::debug!(resource = %full_url, "staged create");
        Ok(committed_write::<R>(Arc::clone(&ctx.config), index, also_notify))
    }
}

#[async_trait]
impl<R: FhirResource> Operation for CreateOperation<R> {
    async fn handle(
        &self,
        ctx: &OperationContext,
        request: &OperationRequest,
        tx: &mut TransactionBuilder,
    ) -> CoordinationResult<ResultFn> {
        let body = request.require_body()?;
        validate_references(body)?;
        let resource: R = Resources::parse(body.clone())?;
        let put_id = if request.upsert {
            resource.id().map(str::to_string)
        } else {
            None
        };
        self.stage(ctx, resource, put_id, request.full_url.clone(), tx)
            .await
    }
}

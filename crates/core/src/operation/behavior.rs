//! Per-type hooks plugged into the generic create and update handlers.

use super::OperationContext;
use crate::transaction::TransactionBuilder;
use crate::CoordinationResult;
use async_trait::async_trait;
use fhir::FhirResource;

/// Validation and side-effect hooks for one resource type.
///
/// `validate_*` run before the policy check, so malformed input is reported as such even to
/// callers who would be denied. `prepare_*` run after the policy check and may stage further
/// writes; they return the transaction indices of resources that must be notified.
#[async_trait]
pub trait ResourceBehavior<R: FhirResource>: Send + Sync {
    fn validate_create(&self, _resource: &R) -> CoordinationResult<()> {
        Ok(())
    }

    /// `full_url` is the reference other staged entries use for the resource being created.
    async fn prepare_create(
        &self,
        _ctx: &OperationContext,
        _resource: &mut R,
        _full_url: &str,
        _tx: &mut TransactionBuilder,
    ) -> CoordinationResult<Vec<usize>> {
        Ok(Vec::new())
    }

    fn validate_update(&self, _existing: &R, _incoming: &R) -> CoordinationResult<()> {
        Ok(())
    }

    async fn prepare_update(
        &self,
        _ctx: &OperationContext,
        _existing: &R,
        _incoming: &mut R,
        _tx: &mut TransactionBuilder,
    ) -> CoordinationResult<Vec<usize>> {
        Ok(Vec::new())
    }
}

/// No hooks: the resource is stored as sent.
pub struct PlainResource;

impl<R: FhirResource> ResourceBehavior<R> for PlainResource {}

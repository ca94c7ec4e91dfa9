use super::{Operation, OperationContext, OperationRequest, OperationResult, ResultFn};
use crate::audit::AuditRecord;
use crate::config::SearchOverflow;
use crate::policy::PolicySet;
use crate::store::search_bundle;
use crate::transaction::TransactionBuilder;
use crate::{CoordinationError, CoordinationResult};
use async_trait::async_trait;
use fhir::{
    AuditEventAction, Bundle, BundleEntry, BundleResponse, BundleSearch, BundleType, FhirResource,
    Resources, SearchMode,
};

/// Generic search handler.
///
/// The store is asked for at most `search_ceiling` resources; every match is run through the
/// read policy and only allowed resources are returned and audited. Denied matches are dropped
/// silently, so the reported total counts allowed resources only.
pub struct SearchOperation<R: FhirResource> {
    policies: PolicySet<R>,
}

impl<R: FhirResource> SearchOperation<R> {
    pub fn new(policies: PolicySet<R>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl<R: FhirResource> Operation for SearchOperation<R> {
    async fn handle(
        &self,
        ctx: &OperationContext,
        request: &OperationRequest,
        tx: &mut TransactionBuilder,
    ) -> CoordinationResult<ResultFn> {
        let ceiling = ctx.config.search_ceiling();
        let requested = request
            .query
            .get("_count")
            .map(|count| {
                count.parse::<usize>().map_err(|_| {
                    CoordinationError::InvalidInput(format!(
                        "_count must be a number, got '{count}'"
                    ))
                })
            })
            .transpose()?;
        let count = requested.map_or(ceiling, |requested| requested.min(ceiling));
        let params = request.query.clone().count(count);

        let found = search_bundle(ctx.store.as_ref(), R::RESOURCE_TYPE, &params).await?;
        let total = found.total.unwrap_or(0);
        if total > ceiling as u64 {
            match ctx.config.search_overflow() {
                SearchOverflow::Reject => {
                    return Err(CoordinationError::SearchCeilingExceeded {
                        resource_type: R::RESOURCE_TYPE,
                        ceiling,
                    })
                }
                SearchOverflow::Warn => tracing::warn!(
                    resource_type = %R::RESOURCE_TYPE,
                    total,
                    ceiling,
                    "search results truncated at the ceiling"
                ),
            }
        }

        let policy_ctx = ctx.policy_context();
        let mut entries = Vec::new();
        for value in found.matches() {
            let resource: R = Resources::parse(value.clone())?;
            let decision = self
                .policies
                .read
                .has_access(&policy_ctx, &resource, &ctx.principal)
                .await?;
            let Some(id) = resource.id().filter(|_| decision.allowed) else {
                tracing::debug!(
                    resource_type = %R::RESOURCE_TYPE,
                    reasons = ?decision.reasons,
                    "search result filtered out"
                );
                continue;
            };

            let reference = format!("{}/{id}", R::RESOURCE_TYPE);
            ctx.audit(
                tx,
                &AuditRecord::new(AuditEventAction::Read, reference.as_str())
                    .with_reasons(decision.reasons)
                    .with_query(&request.query),
            )?;
            entries.push(BundleEntry {
                full_url: Some(ctx.config.resource_url(&reference)),
                resource: Some(Resources::render(&resource)?),
                search: Some(BundleSearch {
                    mode: Some(SearchMode::Match),
                }),
                ..Default::default()
            });
        }

        let mut searchset = Bundle::new(BundleType::Searchset);
        searchset.total = Some(entries.len() as u64);
        searchset.entry = entries;
        let searchset =
            serde_json::to_value(&searchset).map_err(CoordinationError::Serialization)?;
        let entry = BundleEntry {
            resource: Some(searchset),
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

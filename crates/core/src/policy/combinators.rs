use super::{Decision, Policy, PolicyContext};
use crate::principal::Principal;
use crate::CoordinationResult;
use async_trait::async_trait;
use fhir::FhirResource;
use std::sync::Arc;

/// Allows when any child allows. A failing child counts as a deny.
pub struct AnyMatch<R: FhirResource> {
    policies: Vec<Arc<dyn Policy<R>>>,
}

impl<R: FhirResource> AnyMatch<R> {
    pub fn new(policies: Vec<Arc<dyn Policy<R>>>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl<R: FhirResource> Policy<R> for AnyMatch<R> {
    async fn has_access(
        &self,
        ctx: &PolicyContext<'_>,
        resource: &R,
        principal: &Principal,
    ) -> CoordinationResult<Decision> {
        let mut reasons = Vec::new();
        for policy in &self.policies {
            match policy.has_access(ctx, resource, principal).await {
                Ok(decision) if decision.allowed => reasons.extend(decision.reasons),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(
                        resource_type = %R::RESOURCE_TYPE,
                        error = %err,
                        "policy evaluation failed, treating as deny"
                    );
                }
            }
        }

        if reasons.is_empty() {
            Ok(Decision::deny("no policy matched"))
        } else {
            Ok(Decision {
                allowed: true,
                reasons,
            })
        }
    }
}

/// Allows only when every child allows; stops at the first deny.
pub struct AllMatch<R: FhirResource> {
    policies: Vec<Arc<dyn Policy<R>>>,
}

impl<R: FhirResource> AllMatch<R> {
    pub fn new(policies: Vec<Arc<dyn Policy<R>>>) -> Self {
        Self { policies }
    }
}

#[async_trait]
impl<R: FhirResource> Policy<R> for AllMatch<R> {
    async fn has_access(
        &self,
        ctx: &PolicyContext<'_>,
        resource: &R,
        principal: &Principal,
    ) -> CoordinationResult<Decision> {
        if self.policies.is_empty() {
            return Ok(Decision::deny("no policies configured"));
        }

        let mut reasons = Vec::new();
        for policy in &self.policies {
            let decision = policy.has_access(ctx, resource, principal).await?;
            if !decision.allowed {
                return Ok(decision);
            }
            reasons.extend(decision.reasons);
        }
        Ok(Decision {
            allowed: true,
            reasons,
        })
    }
}

/// Constant allow, for resources without a confidentiality boundary.
pub struct AnyonePolicy;

#[async_trait]
impl<R: FhirResource> Policy<R> for AnyonePolicy {
    async fn has_access(
        &self,
        _ctx: &PolicyContext<'_>,
        _resource: &R,
        _principal: &Principal,
    ) -> CoordinationResult<Decision> {
        Ok(Decision::allow("Anyone"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::test_support::{config, context, org};
    use crate::store::InMemoryResourceStore;
    use crate::{CoordinationError, StoreError};
    use fhir::Questionnaire;

    struct Fixed(Decision);

    #[async_trait]
    impl Policy<Questionnaire> for Fixed {
        async fn has_access(
            &self,
            _ctx: &PolicyContext<'_>,
            _resource: &Questionnaire,
            _principal: &Principal,
        ) -> CoordinationResult<Decision> {
            Ok(self.0.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl Policy<Questionnaire> for Failing {
        async fn has_access(
            &self,
            _ctx: &PolicyContext<'_>,
            _resource: &Questionnaire,
            _principal: &Principal,
        ) -> CoordinationResult<Decision> {
            Err(CoordinationError::store("search", "Task")(StoreError::Unavailable(
                "timeout".into(),
            )))
        }
    }

    #[tokio::test]
    async fn test_any_match_unions_reasons_and_survives_failing_child() {
        let store = InMemoryResourceStore::new();
        let cfg = config();
        let ctx = context(&store, &cfg);
        let principal = Principal::organization(org("1"));

        let policy = AnyMatch::new(vec![
            Arc::new(Failing) as Arc<dyn Policy<Questionnaire>>,
            Arc::new(Fixed(Decision::deny("nope"))),
            Arc::new(Fixed(Decision::allow("A"))),
            Arc::new(Fixed(Decision::allow("B"))),
        ]);
        let decision = policy
            .has_access(&ctx, &Questionnaire::default(), &principal)
            .await
            .expect("decision");
        assert!(decision.allowed);
        assert_eq!(decision.reasons, vec!["A".to_string(), "B".to_string()]);

        let denied = AnyMatch::new(vec![Arc::new(Failing) as Arc<dyn Policy<Questionnaire>>])
            .has_access(&ctx, &Questionnaire::default(), &principal)
            .await
            .expect("decision");
        assert!(!denied.allowed);
    }

    #[tokio::test]
    async fn test_all_match_requires_every_child() {
        let store = InMemoryResourceStore::new();
        let cfg = config();
        let ctx = context(&store, &cfg);
        let principal = Principal::organization(org("1"));

        let both = AllMatch::new(vec![
            Arc::new(Fixed(Decision::allow("A"))) as Arc<dyn Policy<Questionnaire>>,
            Arc::new(AnyonePolicy),
        ]);
        let decision = both
            .has_access(&ctx, &Questionnaire::default(), &principal)
            .await
            .expect("decision");
        assert_eq!(decision.reasons, vec!["A".to_string(), "Anyone".to_string()]);

        let one_denies = AllMatch::new(vec![
            Arc::new(AnyonePolicy) as Arc<dyn Policy<Questionnaire>>,
            Arc::new(Fixed(Decision::deny("nope"))),
        ]);
        assert!(!one_denies
            .has_access(&ctx, &Questionnaire::default(), &principal)
            .await
            .expect("decision")
            .allowed);
    }
}

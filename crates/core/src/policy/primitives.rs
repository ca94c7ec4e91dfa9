//! Primitive policies.

use super::{Decision, Policy, PolicyContext};
use crate::creator::creator_of;
use crate::principal::Principal;
use crate::store::{
    included_resources, read_resource, search_bundle, search_resources, SearchParams,
};
use crate::CoordinationResult;
use async_trait::async_trait;
use fhir::{CarePlan, CareTeam, FhirResource, ResourceType, Task};
use std::marker::PhantomData;
use std::sync::Arc;

// ============================================================================
// CareTeam membership
// ============================================================================

/// A resource whose access is governed by a CareTeam.
#[async_trait]
pub trait CareTeamSource: FhirResource {
    async fn care_team(&self, ctx: &PolicyContext<'_>) -> CoordinationResult<Option<CareTeam>>;
}

#[async_trait]
impl CareTeamSource for CareTeam {
    async fn care_team(&self, _ctx: &PolicyContext<'_>) -> CoordinationResult<Option<CareTeam>> {
        Ok(Some(self.clone()))
    }
}

#[async_trait]
impl CareTeamSource for CarePlan {
    async fn care_team(&self, ctx: &PolicyContext<'_>) -> CoordinationResult<Option<CareTeam>> {
        match self.id.as_deref() {
            Some(id) => {
                let params = SearchParams::id(id).include("CarePlan:care-team");
                let bundle = search_bundle(ctx.store, ResourceType::CarePlan, &params).await?;
                Ok(included_resources::<CareTeam>(&bundle)?.into_iter().next())
            }
            // Not stored yet: follow the reference directly.
            None => match self
                .care_team_reference()
                .and_then(|r| r.local_id(ResourceType::CareTeam))
            {
                Some(team_id) => read_resource(ctx.store, team_id).await,
                None => Ok(None),
            },
        }
    }
}

/// Allows when the principal is an active participant of the resource's CareTeam.
pub struct CareTeamMemberPolicy<R> {
    _resource: PhantomData<fn() -> R>,
}

impl<R> CareTeamMemberPolicy<R> {
    pub fn new() -> Self {
        Self {
            _resource: PhantomData,
        }
    }
}

impl<R> Default for CareTeamMemberPolicy<R> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<R: CareTeamSource> Policy<R> for CareTeamMemberPolicy<R> {
    async fn has_access(
        &self,
        ctx: &PolicyContext<'_>,
        resource: &R,
        principal: &Principal,
    ) -> CoordinationResult<Decision> {
        let Some(team) = resource.care_team(ctx).await? else {
            return Ok(Decision::deny("no CareTeam"));
        };

        let member = principal
            .organizations()
            .iter()
            .any(|identifier| team.is_active_member(identifier, ctx.now));
        if member {
            Ok(Decision::allow("CareTeamMember"))
        } else {
            Ok(Decision::deny("not an active CareTeam member"))
        }
    }
}

// ============================================================================
// Authorship and locality
// ============================================================================

/// Allows the organisation recorded by the creator marker.
pub struct CreatorPolicy;

#[async_trait]
impl<R: FhirResource> Policy<R> for CreatorPolicy {
    async fn has_access(
        &self,
        _ctx: &PolicyContext<'_>,
        resource: &R,
        principal: &Principal,
    ) -> CoordinationResult<Decision> {
        match creator_of(resource) {
            Some(creator) if principal.is_referenced_by(creator) => Ok(Decision::allow("Creator")),
            Some(_) => Ok(Decision::deny("not the creator")),
            None => Ok(Decision::deny("no creator recorded")),
        }
    }
}

/// Allows the organisations operating this deployment.
pub struct LocalOrganizationPolicy;

#[async_trait]
impl<R: FhirResource> Policy<R> for LocalOrganizationPolicy {
    async fn has_access(
        &self,
        ctx: &PolicyContext<'_>,
        _resource: &R,
        principal: &Principal,
    ) -> CoordinationResult<Decision> {
        if principal.is_any_of(ctx.config.local_organizations()) {
            Ok(Decision::allow("LocalOrganization"))
        } else {
            Ok(Decision::deny("not a local organization"))
        }
    }
}

// ============================================================================
// Task roles
// ============================================================================

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TaskRoles {
    Owner,
    Requester,
    OwnerOrRequester,
}

/// Allows the principal named as the Task's owner and/or requester.
pub struct TaskRolePolicy {
    roles: TaskRoles,
}

impl TaskRolePolicy {
    pub fn new(roles: TaskRoles) -> Self {
        Self { roles }
    }
}

#[async_trait]
impl Policy<Task> for TaskRolePolicy {
    async fn has_access(
        &self,
        _ctx: &PolicyContext<'_>,
        task: &Task,
        principal: &Principal,
    ) -> CoordinationResult<Decision> {
        let is = |reference: &Option<fhir::Reference>| {
            reference
                .as_ref()
                .is_some_and(|r| principal.is_referenced_by(r))
        };

        let check_owner = matches!(self.roles, TaskRoles::Owner | TaskRoles::OwnerOrRequester);
        let check_requester =
            matches!(self.roles, TaskRoles::Requester | TaskRoles::OwnerOrRequester);

        if check_owner && is(&task.owner) {
            Ok(Decision::allow("TaskOwner"))
        } else if check_requester && is(&task.requester) {
            Ok(Decision::allow("TaskRequester"))
        } else {
            Ok(Decision::deny(format!("principal does not hold Task role {:?}", self.roles)))
        }
    }
}

// ============================================================================
// Related resources
// ============================================================================

/// Builds the search that finds the related resources of a resource, if it has any.
pub type RelatedSearch<R> = Arc<dyn Fn(&R) -> Option<SearchParams> + Send + Sync>;

/// Allows when `policy` allows access to any resource found by `search`.
pub struct RelatedResourcePolicy<R, T: FhirResource> {
    name: &'static str,
    search: RelatedSearch<R>,
    policy: Arc<dyn Policy<T>>,
}

impl<R, T: FhirResource> RelatedResourcePolicy<R, T> {
    pub fn new(name: &'static str, search: RelatedSearch<R>, policy: Arc<dyn Policy<T>>) -> Self {
        Self {
            name,
            search,
            policy,
        }
    }
}

#[async_trait]
impl<R: FhirResource, T: FhirResource> Policy<R> for RelatedResourcePolicy<R, T> {
    async fn has_access(
        &self,
        ctx: &PolicyContext<'_>,
        resource: &R,
        principal: &Principal,
    ) -> CoordinationResult<Decision> {
        let Some(params) = (self.search)(resource) else {
            return Ok(Decision::deny(format!("{}: nothing to look up", self.name)));
        };

        let related = search_resources::<T>(ctx.store, &params).await?;
        for candidate in &related {
            let decision = self.policy.has_access(ctx, candidate, principal).await?;
            if decision.allowed {
                let reasons = decision
                    .reasons
                    .into_iter()
                    .map(|reason| format!("{}/{reason}", self.name))
                    .collect();
                return Ok(Decision {
                    allowed: true,
                    reasons,
                });
            }
        }

        tracing::debug!(
            policy = self.name,
            candidates = related.len(),
            "no related resource grants access"
        );
        Ok(Decision::deny(format!("{}: no related resource grants access", self.name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::test_support::{config, context, org};
    use crate::store::{InMemoryResourceStore, ResourceStore};
    use crate::transaction::TransactionBuilder;
    use chrono::Duration;
    use fhir::{CareTeamParticipant, Reference, TaskStatus};

    fn team_with(participants: Vec<CareTeamParticipant>) -> CareTeam {
        CareTeam {
            participant: participants,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_care_team_member_denies_expired_only_membership() {
        let store = InMemoryResourceStore::new();
        let cfg = config();
        let ctx = context(&store, &cfg);
        let policy = CareTeamMemberPolicy::<CareTeam>::new();

        let mut expired = CareTeamParticipant::organization(org("2"), ctx.now - Duration::days(3));
        expired.period.as_mut().unwrap().end = Some(ctx.now - Duration::days(1));
        let team = team_with(vec![
            expired,
            CareTeamParticipant::organization(org("1"), ctx.now - Duration::days(3)),
        ]);

        let org2 = Principal::organization(org("2"));
        assert!(!policy.has_access(&ctx, &team, &org2).await.unwrap().allowed);

        let org1 = Principal::organization(org("1"));
        let decision = policy.has_access(&ctx, &team, &org1).await.unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.reasons, vec!["CareTeamMember".to_string()]);
    }

    #[tokio::test]
    async fn test_care_plan_membership_resolves_team_through_include() {
        let store = InMemoryResourceStore::new();
        let cfg = config();

        let mut tx = TransactionBuilder::new();
        let now = chrono::Utc::now();
        let team = team_with(vec![CareTeamParticipant::organization(org("1"), now)]);
        tx.create(&team, "urn:uuid:team").unwrap();
        let plan = CarePlan {
            id: Some("plan".into()),
            care_team: vec![Reference::literal("urn:uuid:team")],
            ..Default::default()
        };
        tx.update(&plan).unwrap();
        store.submit(tx.into_bundle()).await.unwrap();

        let stored: CarePlan = read_resource(&store, "plan").await.unwrap().unwrap();
        let ctx = context(&store, &cfg);
        let policy = CareTeamMemberPolicy::<CarePlan>::new();
        assert!(policy
            .has_access(&ctx, &stored, &Principal::organization(org("1")))
            .await
            .unwrap()
            .allowed);
        assert!(!policy
            .has_access(&ctx, &stored, &Principal::organization(org("2")))
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_task_roles() {
        let store = InMemoryResourceStore::new();
        let cfg = config();
        let ctx = context(&store, &cfg);

        let mut task = Task::new(TaskStatus::Requested);
        task.requester = Some(Reference::organization(org("1")));
        task.owner = Some(Reference::organization(org("2")));

        let requester_only = TaskRolePolicy::new(TaskRoles::Requester);
        let either = TaskRolePolicy::new(TaskRoles::OwnerOrRequester);
        let owner = Principal::organization(org("2"));

        assert!(!requester_only.has_access(&ctx, &task, &owner).await.unwrap().allowed);
        assert_eq!(
            either.has_access(&ctx, &task, &owner).await.unwrap().reasons,
            vec!["TaskOwner".to_string()]
        );
        assert!(!either
            .has_access(&ctx, &task, &Principal::organization(org("3")))
            .await
            .unwrap()
            .allowed);
    }

    #[tokio::test]
    async fn test_local_organization_and_creator() {
        let store = InMemoryResourceStore::new();
        let cfg = config();
        let ctx = context(&store, &cfg);

        let local = Principal::organization(org("1"));
        let remote = Principal::organization(org("2"));
        let patient = fhir::Patient::default();

        let policy = LocalOrganizationPolicy;
        assert!(policy.has_access(&ctx, &patient, &local).await.unwrap().allowed);
        assert!(!policy.has_access(&ctx, &patient, &remote).await.unwrap().allowed);

        let mut created = patient.clone();
        crate::creator::set_creator(&mut created, &remote).unwrap();
        assert!(CreatorPolicy.has_access(&ctx, &created, &remote).await.unwrap().allowed);
        assert!(!CreatorPolicy.has_access(&ctx, &created, &local).await.unwrap().allowed);
        assert!(!CreatorPolicy.has_access(&ctx, &patient, &local).await.unwrap().allowed);
    }
}

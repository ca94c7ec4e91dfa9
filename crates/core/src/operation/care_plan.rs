//! CarePlan and CareTeam hooks: every CarePlan owns one CareTeam, and team membership only grows.

use super::{OperationContext, ResourceBehavior};
use crate::audit::AuditRecord;
use crate::creator::set_creator;
use crate::transaction::{new_full_url, TransactionBuilder};
use crate::{CoordinationError, CoordinationResult};
use async_trait::async_trait;
use fhir::{AuditEventAction, CarePlan, CareTeam, CareTeamParticipant, Reference};

/// A CareTeam staged in the current transaction.
pub(crate) struct StagedCareTeam {
    pub full_url: String,
    pub index: usize,
}

/// Stages a new CareTeam whose only participant is the principal, with a window opening now.
pub(crate) fn stage_care_team(
    ctx: &OperationContext,
    subject: Option<Reference>,
    tx: &mut TransactionBuilder,
) -> CoordinationResult<StagedCareTeam> {
    let member = ctx.principal.primary_identifier().cloned().ok_or_else(|| {
        CoordinationError::InvalidInput("principal has no organization identifier".into())
    })?;
    let mut team = CareTeam {
        status: Some("active".to_string()),
        subject,
        participant: vec![CareTeamParticipant::organization(member, ctx.now)],
        ..Default::default()
    };
    set_creator(&mut team, &ctx.principal)?;

    let full_url = new_full_url();
    let index = tx.create(&team, &full_url)?;
    ctx.audit(tx, &AuditRecord::new(AuditEventAction::Create, full_url.as_str()))?;
    Ok(StagedCareTeam { full_url, index })
}

/// Indices of a CarePlan and its CareTeam staged for a Task that arrived without one.
pub(crate) struct StagedCarePlan {
    pub full_url: String,
    pub plan_index: usize,
    pub team_index: usize,
}

/// Stages a CarePlan with a fresh CareTeam and `activity` as its first activity.
pub(crate) fn stage_care_plan_for(
    ctx: &OperationContext,
    subject: Option<Reference>,
    activity: &str,
    tx: &mut TransactionBuilder,
) -> CoordinationResult<StagedCarePlan> {
    let team = stage_care_team(ctx, subject.clone(), tx)?;

    let mut plan = CarePlan {
        status: Some("active".to_string()),
        intent: Some("order".to_string()),
        subject,
        care_team: vec![Reference::literal(team.full_url)],
        ..Default::default()
    };
    plan.add_activity(Reference::literal(activity));
    set_creator(&mut plan, &ctx.principal)?;

    let full_url = new_full_url();
    let plan_index = tx.create(&plan, &full_url)?;
    ctx.audit(tx, &AuditRecord::new(AuditEventAction::Create, full_url.as_str()))?;
    Ok(StagedCarePlan {
        full_url,
        plan_index,
        team_index: team.index,
    })
}

/// A client-created CarePlan gets its CareTeam from the server; the team link is then fixed.
pub struct CarePlanBehavior;

#[async_trait]
impl ResourceBehavior<CarePlan> for CarePlanBehavior {
    async fn prepare_create(
        &self,
        ctx: &OperationContext,
        plan: &mut CarePlan,
        _full_url: &str,
        tx: &mut TransactionBuilder,
    ) -> CoordinationResult<Vec<usize>> {
        let team = stage_care_team(ctx, plan.subject.clone(), tx)?;
        plan.care_team = vec![Reference::literal(team.full_url)];
        Ok(vec![team.index])
    }

    fn validate_update(&self, existing: &CarePlan, incoming: &CarePlan) -> CoordinationResult<()> {
        let literal = |plan: &CarePlan| {
            plan.care_team_reference()
                .and_then(|r| r.reference.clone())
        };
        if literal(existing) != literal(incoming) {
            return Err(CoordinationError::InvalidInput(
                "CarePlan.careTeam cannot be changed".into(),
            ));
        }
        Ok(())
    }
}

/// Participants are never removed and their start never moves; a window may be closed but an
/// end, once set, is fixed.
pub struct CareTeamBehavior;

impl ResourceBehavior<CareTeam> for CareTeamBehavior {
    fn validate_update(&self, existing: &CareTeam, incoming: &CareTeam) -> CoordinationResult<()> {
        for participant in &existing.participant {
            let start = participant.period.as_ref().and_then(|p| p.start);
            let end = participant.period.as_ref().and_then(|p| p.end);
            let Some(kept) = incoming.participant.iter().find(|candidate| {
                candidate.member == participant.member
                    && candidate.period.as_ref().and_then(|p| p.start) == start
            }) else {
                return Err(CoordinationError::InvalidInput(
                    "CareTeam participants cannot be removed".into(),
                ));
            };
            let kept_end = kept.period.as_ref().and_then(|p| p.end);
            if end.is_some() && kept_end != end {
                return Err(CoordinationError::InvalidInput(
                    "a closed CareTeam membership cannot be reopened or moved".into(),
                ));
            }
        }
        Ok(())
    }
}

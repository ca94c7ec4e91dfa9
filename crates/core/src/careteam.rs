//! CareTeam membership derived from Task status.
//!
//! A Task owner joins the CarePlan's team when their Task becomes active, and leaves (their
//! window is closed, the participant stays) when the Task ends without them owning another
//! active Task of the same plan.

use crate::audit::AuditRecord;
use crate::operation::OperationContext;
use crate::store::{included_resources, search_bundle, search_resources, SearchParams};
use crate::transaction::TransactionBuilder;
use crate::CoordinationResult;
use chrono::{DateTime, Utc};
use fhir::{
    AuditEventAction, CareTeam, CareTeamParticipant, FhirResource, Period, ResourceType, Task,
    TaskStatus,
};

/// Statuses in which a Task's owner is an active team member.
pub fn grants_membership(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Accepted | TaskStatus::InProgress | TaskStatus::OnHold | TaskStatus::Completed
    )
}

/// Statuses that end the owner's membership.
pub fn ends_membership(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Cancelled
            | TaskStatus::Failed
            | TaskStatus::Rejected
            | TaskStatus::EnteredInError
    )
}

/// Updates `team` for the current status of `task`. Returns whether the team changed.
///
/// `siblings` are the other Tasks based on the same CarePlan, in their latest known state.
pub fn derive_membership(
    team: &mut CareTeam,
    task: &Task,
    siblings: &[&Task],
    now: DateTime<Utc>,
) -> bool {
    let Some(owner) = task.owner.as_ref().and_then(|o| o.identifier.as_ref()) else {
        return false;
    };

    if grants_membership(task.status) {
        if team.is_active_member(owner, now) {
            return false;
        }
        team.participant
            .push(CareTeamParticipant::organization(owner.clone(), now));
        return true;
    }

    if !ends_membership(task.status) {
        return false;
    }
    let still_active = siblings.iter().any(|sibling| {
        grants_membership(sibling.status)
            && sibling
                .owner
                .as_ref()
                .is_some_and(|o| o.identifies(owner))
    });
    if still_active {
        return false;
    }

    let mut changed = false;
    for participant in team
        .participant
        .iter_mut()
        .filter(|p| p.is_member(owner) && p.is_active(now))
    {
        participant.period.get_or_insert_with(Period::default).end = Some(now);
        changed = true;
    }
    changed
}

/// Loads the CareTeam of the plan `tasks` are based on, derives membership for each, and stages
/// the team update with its AuditEvent when anything changed.
///
/// Returns the transaction index of the staged CareTeam, if any.
pub async fn stage_membership_update(
    ctx: &OperationContext,
    tasks: &[&Task],
    tx: &mut TransactionBuilder,
) -> CoordinationResult<Option<usize>> {
    let Some(plan_id) = tasks
        .first()
        .and_then(|task| task.care_plan())
        .and_then(|r| r.local_id(ResourceType::CarePlan))
        .map(str::to_string)
    else {
        return Ok(None);
    };

    let params = SearchParams::id(&plan_id).include("CarePlan:care-team");
    let bundle = search_bundle(ctx.store.as_ref(), ResourceType::CarePlan, &params).await?;
    let Some(mut team) = included_resources::<CareTeam>(&bundle)?.into_iter().next() else {
        tracing::warn!(care_plan = %plan_id, "care plan has no care team, membership unchanged");
        return Ok(None);
    };

    let stored: Vec<Task> = search_resources(
        ctx.store.as_ref(),
        &SearchParams::new().with("based-on", format!("CarePlan/{plan_id}")),
    )
    .await?;
    let is_updated = |candidate: &Task| {
        candidate.id.is_some() && tasks.iter().any(|task| task.id == candidate.id)
    };
    let latest: Vec<&Task> = stored
        .iter()
        .filter(|task| !is_updated(task))
        .chain(tasks.iter().copied())
        .collect();

    let mut changed = false;
    for task in tasks {
        let siblings: Vec<&Task> = latest
            .iter()
            .copied()
            .filter(|other| !(other.id.is_some() && other.id == task.id))
            .collect();
        changed |= derive_membership(&mut team, task, &siblings, ctx.now);
    }
    if !changed {
        return Ok(None);
    }

    let index = tx.update(&team)?;
    let reference = team
        .reference()
        .and_then(|r| r.reference)
        .unwrap_or_else(|| ResourceType::CareTeam.to_string());
    ctx.audit(tx, &AuditRecord::new(AuditEventAction::Update, reference.as_str()))?;
    tracing::info!(care_team = %reference, care_plan = %plan_id, "care team membership changed");
    Ok(Some(index))
}

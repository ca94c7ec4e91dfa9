//! Task hooks: CarePlan bootstrap, state machine enforcement, orchestration and team derivation.

use super::care_plan::stage_care_plan_for;
use super::{OperationContext, ResourceBehavior};
use crate::audit::AuditRecord;
use crate::careteam::stage_membership_update;
use crate::policy::CareTeamSource;
use crate::store::read_resource;
use crate::transaction::TransactionBuilder;
use crate::workflow::{is_valid_transition, on_task_written};
use crate::{CoordinationError, CoordinationResult};
use async_trait::async_trait;
use fhir::{AuditEventAction, CarePlan, Reference, ResourceType, Task, TaskStatus};

pub struct TaskBehavior;

impl TaskBehavior {
    /// Adds the Task to the CarePlan named in `basedOn`; the principal must be on its team.
    async fn join_care_plan(
        &self,
        ctx: &OperationContext,
        task: &Task,
        full_url: &str,
        tx: &mut TransactionBuilder,
    ) -> CoordinationResult<usize> {
        let plan_id = task
            .care_plan()
            .and_then(|r| r.local_id(ResourceType::CarePlan))
            .ok_or_else(|| {
                CoordinationError::InvalidInput("Task.basedOn must reference a CarePlan".into())
            })?;
        let mut plan: CarePlan = read_resource(ctx.store.as_ref(), plan_id)
            .await?
            .ok_or_else(|| {
                CoordinationError::InvalidInput(format!(
                    "CarePlan/{plan_id} in Task.basedOn does not exist"
                ))
            })?;

        let team = plan.care_team(&ctx.policy_context()).await?;
        let is_member = team.is_some_and(|team| {
            ctx.principal
                .organizations()
                .iter()
                .any(|org| team.is_active_member(org, ctx.now))
        });
        if !is_member {
            tracing::warn!(care_plan = %plan_id, "task creator is not on the care team");
            return Err(CoordinationError::Forbidden(ResourceType::Task));
        }

        plan.add_activity(Reference::literal(full_url));
        let index = tx.update(&plan)?;
        ctx.audit(
            tx,
            &AuditRecord::new(AuditEventAction::Update, format!("CarePlan/{plan_id}")),
        )?;
        Ok(index)
    }
}

fn same_reference(a: Option<&Reference>, b: Option<&Reference>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => a.reference == b.reference && a.identifier == b.identifier,
        _ => false,
    }
}

fn same_references(a: &[Reference], b: &[Reference]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(a, b)| same_reference(Some(a), Some(b)))
}

fn profiles(task: &Task) -> &[String] {
    task.meta.as_ref().map(|meta| meta.profile.as_slice()).unwrap_or_default()
}

#[async_trait]
impl ResourceBehavior<Task> for TaskBehavior {
    fn validate_create(&self, task: &Task) -> CoordinationResult<()> {
        if !matches!(task.status, TaskStatus::Requested | TaskStatus::Ready) {
            return Err(CoordinationError::InvalidInput(format!(
                "a new Task must be requested or ready, got {}",
                task.status
            )));
        }
        for (role, reference) in [("requester", &task.requester), ("owner", &task.owner)] {
            if reference.as_ref().and_then(|r| r.identifier.as_ref()).is_none() {
                return Err(CoordinationError::InvalidInput(format!(
                    "Task.{role} must identify an organization"
                )));
            }
        }
        if task.based_on.len() > 1 || task.part_of.len() > 1 {
            return Err(CoordinationError::InvalidInput(
                "Task.basedOn and Task.partOf take at most one reference".into(),
            ));
        }
        Ok(())
    }

    async fn prepare_create(
        &self,
        ctx: &OperationContext,
        task: &mut Task,
        full_url: &str,
        tx: &mut TransactionBuilder,
    ) -> CoordinationResult<Vec<usize>> {
        let mut notify = Vec::new();
        if task.based_on.is_empty() {
            let staged = stage_care_plan_for(ctx, task.for_.clone(), full_url, tx)?;
            task.based_on = vec![Reference::literal(staged.full_url)];
            notify.extend([staged.plan_index, staged.team_index]);
        } else {
            notify.push(self.join_care_plan(ctx, task, full_url, tx).await?);
        }

        let outcome = on_task_written(ctx, task, full_url, None, tx).await?;
        notify.extend(outcome.staged);
        Ok(notify)
    }

    fn validate_update(&self, existing: &Task, incoming: &Task) -> CoordinationResult<()> {
        let unchanged = same_reference(existing.owner.as_ref(), incoming.owner.as_ref())
            && same_reference(existing.requester.as_ref(), incoming.requester.as_ref())
            && same_references(&existing.based_on, &incoming.based_on)
            && same_references(&existing.part_of, &incoming.part_of);
        if !unchanged {
            return Err(CoordinationError::InvalidInput(
                "Task owner, requester, basedOn and partOf cannot be changed".into(),
            ));
        }
        // Orchestration keys off both.
        if profiles(existing) != profiles(incoming) || existing.input != incoming.input {
            return Err(CoordinationError::InvalidInput(
                "Task meta.profile and input cannot be changed".into(),
            ));
        }
        Ok(())
    }

    async fn prepare_update(
        &self,
        ctx: &OperationContext,
        existing: &Task,
        incoming: &mut Task,
        tx: &mut TransactionBuilder,
    ) -> CoordinationResult<Vec<usize>> {
        if existing.status != incoming.status {
            let holds = |role: &Option<Reference>| {
                role.as_ref()
                    .is_some_and(|r| ctx.principal.is_referenced_by(r))
            };
            if !is_valid_transition(
                existing.status,
                incoming.status,
                holds(&existing.owner),
                holds(&existing.requester),
            ) {
                return Err(CoordinationError::TaskRejection(format!(
                    "transition from {} to {} is not allowed",
                    existing.status, incoming.status
                )));
            }
        }

        let task_ref = format!("Task/{}", incoming.id.as_deref().unwrap_or_default());
        let outcome = on_task_written(ctx, incoming, &task_ref, Some(existing), tx).await?;
        let mut notify = outcome.staged;

        let mut changed: Vec<&Task> = vec![&*incoming];
        changed.extend(outcome.accepted_primary.as_ref());
        if let Some(index) = stage_membership_update(ctx, &changed, tx).await? {
            notify.push(index);
        }
        Ok(notify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TASK_PROFILE_URL;
    use fhir::{CodeableConcept, Identifier, Meta, TaskParameter};

    fn task() -> Task {
        let mut task = Task::new(TaskStatus::Requested);
        task.requester = Some(Reference::organization(Identifier::new("sys", "1")));
        task.owner = Some(Reference::organization(Identifier::new("sys", "2")));
        task
    }

    #[test]
    fn test_create_requires_roles_and_initial_status() {
        TaskBehavior.validate_create(&task()).expect("valid");

        let mut accepted = task();
        accepted.status = TaskStatus::Accepted;
        assert!(TaskBehavior.validate_create(&accepted).is_err());

        let mut ownerless = task();
        ownerless.owner = None;
        assert!(TaskBehavior.validate_create(&ownerless).is_err());
    }

    #[test]
    fn test_update_cannot_reassign_owner() {
        let existing = task();
        let mut reassigned = existing.clone();
        reassigned.owner = Some(Reference::organization(Identifier::new("sys", "3")));
        assert!(TaskBehavior.validate_update(&existing, &reassigned).is_err());

        let mut progressed = existing.clone();
        progressed.status = TaskStatus::Accepted;
        TaskBehavior
            .validate_update(&existing, &progressed)
            .expect("status may change");
    }

    #[test]
    fn test_update_cannot_drop_profile_or_rewrite_input() {
        let mut existing = task();
        existing.meta = Some(Meta {
            profile: vec![TASK_PROFILE_URL.to_string()],
            ..Default::default()
        });
        existing.input = vec![TaskParameter::reference(
            CodeableConcept::default(),
            Reference::literal("https://example.org/Questionnaire/enrollment"),
        )];

        let mut unprofiled = existing.clone();
        unprofiled.meta = None;
        assert!(TaskBehavior.validate_update(&existing, &unprofiled).is_err());

        let mut skipped = existing.clone();
        skipped.input[0].value_reference =
            Some(Reference::literal("https://example.org/Questionnaire/consent"));
        assert!(TaskBehavior.validate_update(&existing, &skipped).is_err());

        let mut completed = existing.clone();
        completed.status = TaskStatus::Completed;
        TaskBehavior
            .validate_update(&existing, &completed)
            .expect("only the status moved");
    }
}

//! Primary Task and subtask orchestration.
//!
//! Runs whenever a Task carrying the care-coordination profile is written. A new primary Task in
//! `requested` looks up its workflow; if the workflow starts with a questionnaire a subtask is
//! staged for the requester and the primary moves to `received`. Completing a subtask either
//! stages the next questionnaire or, once the workflow has no steps left, lets the primary be
//! accepted. The owner's next write of a waiting primary accepts it when nothing is left open.

use crate::audit::AuditRecord;
use crate::constants::{TASK_INPUT_TYPE_SYSTEM, TASK_PROFILE_URL};
use crate::creator::set_creator;
use crate::operation::OperationContext;
use crate::store::{read_resource, search_resources, SearchParams};
use crate::transaction::{new_full_url, TransactionBuilder};
use crate::workflow::Workflow;
use crate::{CoordinationError, CoordinationResult};
use fhir::{
    AuditEventAction, CarePlan, CodeableConcept, Coding, FhirResource, Meta, Questionnaire,
    Reference, ResourceType, Resources, ServiceRequest, Task, TaskParameter, TaskStatus,
};

/// What orchestration staged on top of the Task write itself.
#[derive(Debug, Default)]
pub struct WorkflowOutcome {
    /// Transaction indices of subtasks or primary Tasks to notify.
    pub staged: Vec<usize>,
    /// The primary Task, when completing its last subtask accepted it.
    pub accepted_primary: Option<Task>,
}

/// Applies the workflow to `task`, which is about to be written.
///
/// `task_ref` is how other staged entries refer to the Task (`Task/{id}` or a `urn:uuid`);
/// `previous` is the stored version for updates and `None` for creates. The Task's own status
/// may be advanced in place. Profile, parent and questionnaire are taken from the stored version
/// when there is one.
///
/// # Errors
///
/// Returns [`CoordinationError::TaskRejection`] when the workflow cannot be determined or a
/// referenced questionnaire, CarePlan or primary Task is missing.
pub async fn on_task_written(
    ctx: &OperationContext,
    task: &mut Task,
    task_ref: &str,
    previous: Option<&Task>,
    tx: &mut TransactionBuilder,
) -> CoordinationResult<WorkflowOutcome> {
    let stored: &Task = previous.unwrap_or(task);
    if !stored.has_profile(TASK_PROFILE_URL) {
        return Ok(WorkflowOutcome::default());
    }

    if stored.is_primary() {
        return match previous {
            None if task.status == TaskStatus::Requested => {
                start_primary(ctx, task, task_ref, tx).await
            }
            Some(previous) => revisit_primary(ctx, task, task_ref, previous, tx).await,
            None => Ok(WorkflowOutcome::default()),
        };
    }

    let newly_completed = task.status == TaskStatus::Completed
        && previous.map_or(true, |p| p.status != TaskStatus::Completed);
    if newly_completed {
        return complete_subtask(ctx, previous.unwrap_or(task), tx).await;
    }
    Ok(WorkflowOutcome::default())
}

async fn start_primary(
    ctx: &OperationContext,
    task: &mut Task,
    task_ref: &str,
    tx: &mut TransactionBuilder,
) -> CoordinationResult<WorkflowOutcome> {
    let workflow = select_workflow(ctx, task, tx).await?;
    match workflow.start() {
        Some(step) => {
            require_questionnaire(ctx, &step.questionnaire_url).await?;
            let staged = stage_subtask(ctx, task, task_ref, &step.questionnaire_url, tx).await?;
            task.status = TaskStatus::Received;
            tracing::info!(
                task = %task_ref,
                questionnaire = %step.questionnaire_url,
                "subtask staged"
            );
            Ok(WorkflowOutcome {
                staged,
                accepted_primary: None,
            })
        }
        None => {
            if is_owner(ctx, task) {
                task.status = TaskStatus::Accepted;
            }
            Ok(WorkflowOutcome::default())
        }
    }
}

/// The owner writing a primary that still waits on its workflow accepts it once no subtask is
/// open and every step has a completed subtask.
async fn revisit_primary(
    ctx: &OperationContext,
    task: &mut Task,
    task_ref: &str,
    previous: &Task,
    tx: &TransactionBuilder,
) -> CoordinationResult<WorkflowOutcome> {
    let waiting = matches!(previous.status, TaskStatus::Requested | TaskStatus::Received)
        && task.status == previous.status;
    if !(waiting && is_owner(ctx, previous)) {
        return Ok(WorkflowOutcome::default());
    }

    let subtasks: Vec<Task> = search_resources(
        ctx.store.as_ref(),
        &SearchParams::new().with("part-of", task_ref),
    )
    .await?;
    if subtasks.iter().any(|subtask| !subtask.status.is_terminal()) {
        tracing::debug!(task = %task_ref, "primary still has open subtasks");
        return Ok(WorkflowOutcome::default());
    }
    let answered: Vec<&str> = subtasks
        .iter()
        .filter(|subtask| subtask.status == TaskStatus::Completed)
        .filter_map(questionnaire_of)
        .collect();

    let workflow = select_workflow(ctx, previous, tx).await?;
    let finished = workflow
        .steps()
        .iter()
        .all(|step| answered.contains(&step.questionnaire_url.as_str()));
    if finished {
        task.status = TaskStatus::Accepted;
        tracing::info!(task = %task_ref, "primary task accepted");
    }
    Ok(WorkflowOutcome::default())
}

async fn complete_subtask(
    ctx: &OperationContext,
    subtask: &Task,
    tx: &mut TransactionBuilder,
) -> CoordinationResult<WorkflowOutcome> {
    let primary_id = subtask
        .part_of
        .first()
        .and_then(|r| r.local_id(ResourceType::Task))
        .ok_or_else(|| {
            CoordinationError::TaskRejection("Task.partOf must reference a Task".into())
        })?
        .to_string();
    let mut primary: Task = read_resource(ctx.store.as_ref(), &primary_id)
        .await?
        .ok_or_else(|| {
            CoordinationError::TaskRejection(format!("primary Task/{primary_id} not found"))
        })?;
    if !primary.is_primary() {
        return Err(CoordinationError::TaskRejection(
            "subtasks of subtasks are not supported".into(),
        ));
    }

    let answered = questionnaire_of(subtask).ok_or_else(|| {
        CoordinationError::TaskRejection("subtask has no questionnaire input".into())
    })?;

    let primary_ref = format!("Task/{primary_id}");
    let workflow = select_workflow(ctx, &primary, tx).await?;
    if let Some(next) = workflow.proceed(answered)? {
        require_questionnaire(ctx, &next.questionnaire_url).await?;
        let staged = stage_subtask(ctx, &primary, &primary_ref, &next.questionnaire_url, tx).await?;
        return Ok(WorkflowOutcome {
            staged,
            accepted_primary: None,
        });
    }

    let acceptable = matches!(primary.status, TaskStatus::Requested | TaskStatus::Received);
    if !(acceptable && is_owner(ctx, &primary)) {
        tracing::debug!(task = %primary_ref, "workflow finished, primary left for its owner");
        return Ok(WorkflowOutcome::default());
    }

    primary.status = TaskStatus::Accepted;
    let index = tx.update(&primary)?;
    ctx.audit(tx, &AuditRecord::new(AuditEventAction::Update, primary_ref.as_str()))?;
    tracing::info!(task = %primary_ref, "primary task accepted");
    Ok(WorkflowOutcome {
        staged: vec![index],
        accepted_primary: Some(primary),
    })
}

/// The questionnaire a subtask asks for.
fn questionnaire_of(subtask: &Task) -> Option<&str> {
    subtask
        .input
        .first()
        .and_then(|input| input.value_reference.as_ref())
        .and_then(|r| r.reference.as_deref())
}

fn is_owner(ctx: &OperationContext, task: &Task) -> bool {
    task.owner
        .as_ref()
        .is_some_and(|owner| ctx.principal.is_referenced_by(owner))
}

/// Resolves the workflow from the focus ServiceRequest's code and the Task's reason.
async fn select_workflow(
    ctx: &OperationContext,
    task: &Task,
    tx: &TransactionBuilder,
) -> CoordinationResult<Workflow> {
    let focus = task
        .focus
        .as_ref()
        .ok_or_else(|| CoordinationError::TaskRejection("Task.focus is required".into()))?;
    let request = focused_service_request(ctx, focus, tx).await?;

    let service = request
        .code
        .as_ref()
        .and_then(|code| code.coding.first())
        .ok_or_else(|| {
            CoordinationError::TaskRejection("ServiceRequest.code carries no coding".into())
        })?;
    let condition = task
        .reason_code
        .as_ref()
        .and_then(|reason| reason.coding.first())
        .or_else(|| {
            request
                .reason_code
                .first()
                .and_then(|reason| reason.coding.first())
        })
        .ok_or_else(|| {
            CoordinationError::TaskRejection(
                "no reasonCode on the Task or its ServiceRequest".into(),
            )
        })?;

    ctx.workflows.provide(service, condition).await
}

/// The ServiceRequest in `focus`, from this transaction when it is a placeholder.
async fn focused_service_request(
    ctx: &OperationContext,
    focus: &Reference,
    tx: &TransactionBuilder,
) -> CoordinationResult<ServiceRequest> {
    if focus.is_placeholder() {
        let staged = focus
            .reference
            .as_deref()
            .and_then(|full_url| tx.staged(full_url))
            .ok_or_else(|| {
                CoordinationError::TaskRejection(
                    "Task.focus placeholder is not in this transaction".into(),
                )
            })?;
        return Resources::parse(staged.clone())
            .map_err(|err| CoordinationError::TaskRejection(format!("Task.focus: {err}")));
    }

    let id = focus
        .local_id(ResourceType::ServiceRequest)
        .ok_or_else(|| {
            CoordinationError::TaskRejection("Task.focus must reference a ServiceRequest".into())
        })?;
    read_resource(ctx.store.as_ref(), id)
        .await?
        .ok_or_else(|| CoordinationError::TaskRejection(format!("ServiceRequest/{id} not found")))
}

async fn require_questionnaire(ctx: &OperationContext, url: &str) -> CoordinationResult<()> {
    let found = search_resources::<Questionnaire>(
        ctx.store.as_ref(),
        &SearchParams::new().with("url", url),
    )
    .await?;
    if found.is_empty() {
        return Err(CoordinationError::TaskRejection(format!(
            "questionnaire {url} is not available"
        )));
    }
    Ok(())
}

/// Stages a `ready` subtask asking the primary's requester to fill in `questionnaire_url` and
/// lists it on the primary's CarePlan. Returns the indices to notify.
async fn stage_subtask(
    ctx: &OperationContext,
    primary: &Task,
    primary_ref: &str,
    questionnaire_url: &str,
    tx: &mut TransactionBuilder,
) -> CoordinationResult<Vec<usize>> {
    let mut subtask = Task::new(TaskStatus::Ready);
    subtask.meta = Some(Meta {
        profile: vec![TASK_PROFILE_URL.to_string()],
        ..Default::default()
    });
    subtask.intent = Some("order".to_string());
    subtask.based_on = primary.based_on.clone();
    subtask.part_of = vec![Reference::literal(primary_ref)];
    subtask.focus = primary.focus.clone();
    subtask.for_ = primary.for_.clone();
    // Roles are swapped: the placer answers, the performer asked.
    subtask.owner = primary.requester.clone();
    subtask.requester = primary.owner.clone();
    subtask.input = vec![TaskParameter::reference(
        CodeableConcept::from_coding(Coding::new(TASK_INPUT_TYPE_SYSTEM, "Reference")),
        Reference::literal(questionnaire_url),
    )];
    set_creator(&mut subtask, &ctx.principal)?;

    let full_url = new_full_url();
    let index = tx.create(&subtask, &full_url)?;
    ctx.audit(tx, &AuditRecord::new(AuditEventAction::Create, full_url.as_str()))?;

    let mut staged = vec![index];
    staged.extend(add_to_care_plan(ctx, primary, &full_url, tx).await?);
    Ok(staged)
}

/// Adds `activity` to the primary's CarePlan. A plan already staged in this transaction is
/// edited in place; otherwise an update is staged and its index returned.
async fn add_to_care_plan(
    ctx: &OperationContext,
    primary: &Task,
    activity: &str,
    tx: &mut TransactionBuilder,
) -> CoordinationResult<Option<usize>> {
    let Some(plan_ref) = primary.care_plan().and_then(|r| r.reference.as_deref()) else {
        return Ok(None);
    };

    if let Some(pending) = tx.pending_mut(plan_ref) {
        let mut plan: CarePlan = Resources::parse(pending.clone())?;
        plan.add_activity(Reference::literal(activity));
        *pending = Resources::render(&plan)?;
        return Ok(None);
    }

    let plan_id = primary
        .care_plan()
        .and_then(|r| r.local_id(ResourceType::CarePlan))
        .ok_or_else(|| {
            CoordinationError::TaskRejection(format!("{plan_ref} is not a CarePlan"))
        })?;
    let mut plan: CarePlan = read_resource(ctx.store.as_ref(), plan_id)
        .await?
        .ok_or_else(|| CoordinationError::TaskRejection(format!("{plan_ref} not found")))?;
    plan.add_activity(Reference::literal(activity));
    let index = tx.update(&plan)?;
    ctx.audit(tx, &AuditRecord::new(AuditEventAction::Update, plan_ref))?;
    Ok(Some(index))
}

//! The policy table: which combinator tree guards which operation on which resource type.

use super::{
    AnyMatch, AnyonePolicy, CareTeamMemberPolicy, CreatorPolicy, LocalOrganizationPolicy, Policy,
    PolicySet, RelatedResourcePolicy, TaskRolePolicy, TaskRoles,
};
use crate::store::SearchParams;
use fhir::{
    AuditEvent, CarePlan, CareTeam, Condition, FhirResource, Patient, Questionnaire,
    QuestionnaireResponse, ResourceType, ServiceRequest, Task,
};
use std::sync::Arc;

/// Policy sets for every supported resource type, built once at startup.
#[derive(Clone)]
pub struct Policies {
    pub task: PolicySet<Task>,
    pub care_plan: PolicySet<CarePlan>,
    pub care_team: PolicySet<CareTeam>,
    pub patient: PolicySet<Patient>,
    pub condition: PolicySet<Condition>,
    pub service_request: PolicySet<ServiceRequest>,
    pub questionnaire: PolicySet<Questionnaire>,
    pub questionnaire_response: PolicySet<QuestionnaireResponse>,
    pub audit_event: PolicySet<AuditEvent>,
}

fn creator<R: FhirResource>() -> Arc<dyn Policy<R>> {
    Arc::new(CreatorPolicy)
}

fn creator_or<R: FhirResource>(other: Arc<dyn Policy<R>>) -> Arc<dyn Policy<R>> {
    Arc::new(AnyMatch::new(vec![creator(), other]))
}

/// Search for resources of another type that reference `resource` through `param`.
fn referencing<R: FhirResource>(param: &'static str) -> impl Fn(&R) -> Option<SearchParams> {
    move |resource: &R| {
        let id = resource.id()?;
        Some(SearchParams::new().with(param, format!("{}/{id}", R::RESOURCE_TYPE)))
    }
}

impl Policies {
    pub fn standard() -> Self {
        let care_plan_read: Arc<dyn Policy<CarePlan>> = Arc::new(CareTeamMemberPolicy::new());

        let task_read: Arc<dyn Policy<Task>> = Arc::new(AnyMatch::new(vec![
            Arc::new(TaskRolePolicy::new(TaskRoles::OwnerOrRequester)) as Arc<dyn Policy<Task>>,
            Arc::new(RelatedResourcePolicy::<Task, CarePlan>::new(
                "BasedOnCarePlan",
                Arc::new(|task: &Task| {
                    let id = task.care_plan()?.local_id(ResourceType::CarePlan)?;
                    Some(SearchParams::id(id))
                }),
                Arc::clone(&care_plan_read),
            )),
        ]));

        let patient_read = creator_or::<Patient>(Arc::new(
            RelatedResourcePolicy::<Patient, CarePlan>::new(
                "SubjectOfCarePlan",
                Arc::new(referencing::<Patient>("subject")),
                Arc::clone(&care_plan_read),
            ),
        ));

        Self {
            task: PolicySet {
                create: Arc::new(TaskRolePolicy::new(TaskRoles::Requester)),
                read: Arc::clone(&task_read),
                update: Arc::new(TaskRolePolicy::new(TaskRoles::OwnerOrRequester)),
                delete: creator(),
            },
            care_plan: PolicySet {
                create: Arc::new(AnyonePolicy),
                read: Arc::clone(&care_plan_read),
                update: creator(),
                delete: creator(),
            },
            care_team: PolicySet {
                create: creator(),
                read: creator_or::<CareTeam>(Arc::new(CareTeamMemberPolicy::new())),
                update: creator(),
                delete: creator(),
            },
            patient: PolicySet {
                create: Arc::new(LocalOrganizationPolicy),
                read: Arc::clone(&patient_read),
                update: creator(),
                delete: creator(),
            },
            condition: PolicySet {
                create: Arc::new(LocalOrganizationPolicy),
                read: creator_or::<Condition>(Arc::new(
                    RelatedResourcePolicy::<Condition, Patient>::new(
                        "SubjectPatient",
                        Arc::new(|condition: &Condition| {
                            let id = condition
                                .subject
                                .as_ref()?
                                .local_id(ResourceType::Patient)?;
                            Some(SearchParams::id(id))
                        }),
                        Arc::clone(&patient_read),
                    ),
                )),
                update: creator(),
                delete: creator(),
            },
            service_request: PolicySet {
                create: Arc::new(LocalOrganizationPolicy),
                read: creator_or::<ServiceRequest>(Arc::new(
                    RelatedResourcePolicy::<ServiceRequest, Task>::new(
                        "FocusOfTask",
                        Arc::new(referencing::<ServiceRequest>("focus")),
                        Arc::clone(&task_read),
                    ),
                )),
                update: creator(),
                delete: creator(),
            },
            questionnaire: PolicySet {
                create: Arc::new(AnyonePolicy),
                read: Arc::new(AnyonePolicy),
                update: creator(),
                delete: creator(),
            },
            questionnaire_response: PolicySet {
                create: Arc::new(AnyonePolicy),
                read: creator_or::<QuestionnaireResponse>(Arc::new(
                    RelatedResourcePolicy::<QuestionnaireResponse, Task>::new(
                        "OutputOfTask",
                        Arc::new(referencing::<QuestionnaireResponse>("output-reference")),
                        Arc::clone(&task_read),
                    ),
                )),
                update: creator(),
                delete: creator(),
            },
            audit_event: PolicySet {
                create: Arc::new(LocalOrganizationPolicy),
                read: Arc::new(LocalOrganizationPolicy),
                update: Arc::new(LocalOrganizationPolicy),
                delete: Arc::new(LocalOrganizationPolicy),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::test_support::{config, context, org};
    use crate::principal::Principal;
    use crate::store::{read_resource, InMemoryResourceStore, ResourceStore};
    use crate::transaction::TransactionBuilder;
    use fhir::{CareTeamParticipant, Reference, TaskParameter, TaskStatus};

    /// CarePlan `plan` with a CareTeam of org 1, Task `task` owned by org 2, and a
    /// QuestionnaireResponse `qr` listed as the Task's output.
    async fn seed(store: &InMemoryResourceStore) {
        let now = chrono::Utc::now();
        let mut tx = TransactionBuilder::new();
        tx.create(
            &CareTeam {
                participant: vec![CareTeamParticipant::organization(org("1"), now)],
                ..Default::default()
            },
            "urn:uuid:team",
        )
        .unwrap();
        tx.update(&CarePlan {
            id: Some("plan".into()),
            care_team: vec![Reference::literal("urn:uuid:team")],
            ..Default::default()
        })
        .unwrap();

        let mut task = Task::new(TaskStatus::Requested);
        task.id = Some("task".into());
        task.based_on = vec![Reference::literal("CarePlan/plan")];
        task.requester = Some(Reference::organization(org("1")));
        task.owner = Some(Reference::organization(org("2")));
        task.output = vec![TaskParameter::reference(
            Default::default(),
            Reference::literal("QuestionnaireResponse/qr"),
        )];
        tx.update(&task).unwrap();
        tx.update(&QuestionnaireResponse {
            id: Some("qr".into()),
            ..Default::default()
        })
        .unwrap();
        store.submit(tx.into_bundle()).await.unwrap();
    }

    #[tokio::test]
    async fn test_task_read_through_care_plan_membership() {
        let store = InMemoryResourceStore::new();
        seed(&store).await;
        let cfg = config();
        let ctx = context(&store, &cfg);
        let policies = Policies::standard();
        let task: Task = read_resource(&store, "task").await.unwrap().unwrap();

        // org 3 is neither owner, requester nor team member.
        let outsider = Principal::organization(org("3"));
        assert!(!policies.task.read.has_access(&ctx, &task, &outsider).await.unwrap().allowed);

        // org 2 is owner but not (yet) in the team.
        let owner = Principal::organization(org("2"));
        assert!(policies.task.read.has_access(&ctx, &task, &owner).await.unwrap().allowed);

        let mut unrelated = task.clone();
        unrelated.requester = Some(Reference::organization(org("9")));
        let member = Principal::organization(org("1"));
        let decision = policies
            .task
            .read
            .has_access(&ctx, &unrelated, &member)
            .await
            .unwrap();
        assert!(decision.allowed);
        assert_eq!(decision.reasons, vec!["BasedOnCarePlan/CareTeamMember".to_string()]);
    }

    #[tokio::test]
    async fn test_questionnaire_response_read_follows_task_output() {
        let store = InMemoryResourceStore::new();
        seed(&store).await;
        let cfg = config();
        let ctx = context(&store, &cfg);
        let policies = Policies::standard();
        let response: QuestionnaireResponse = read_resource(&store, "qr").await.unwrap().unwrap();

        let read = &policies.questionnaire_response.read;
        assert!(read
            .has_access(&ctx, &response, &Principal::organization(org("2")))
            .await
            .unwrap()
            .allowed);
        assert!(!read
            .has_access(&ctx, &response, &Principal::organization(org("3")))
            .await
            .unwrap()
            .allowed);
    }
}

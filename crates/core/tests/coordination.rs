//! End-to-end coordination flows through [`ResourceServer`] over the in-memory store.

use async_trait::async_trait;
use carelink_core::constants::TASK_PROFILE_URL;
use carelink_core::workflow::MemoryWorkflowProvider;
use carelink_core::{
    CoordinationError, CoreConfig, InMemoryResourceStore, Notification, NotificationError,
    NotificationRegistry, NotificationTransport, OperationRequest, OrganizationNotifier,
    Principal, ResourceServer, SearchOverflow, SearchParams,
};
use chrono::Utc;
use fhir::{
    AuditEvent, AuditEventAction, Bundle, BundleEntry, BundleRequest, BundleType, CarePlan,
    CareTeam, HttpVerb, Identifier, ResourceType, Resources,
};
use serde_json::{json, Value};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

const URA: &str = "http://example.org/ura";
const ENROLLMENT: &str = "https://carelink.dev/fhir/Questionnaire/telemonitoring-enrollment";
const CONSENT: &str = "https://carelink.dev/fhir/Questionnaire/telemonitoring-consent";
const HEART_FAILURE: &str = "84114007";
const COPD: &str = "13645005";

fn org(value: &str) -> Identifier {
    Identifier::new(URA, value)
}

fn principal(value: &str) -> Principal {
    Principal::organization(org(value))
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(
        &self,
        recipient: &Identifier,
        _notification: &Notification,
    ) -> Result<(), NotificationError> {
        self.sent.lock().expect("lock").push(recipient.to_token());
        Ok(())
    }
}

struct Harness {
    store: Arc<InMemoryResourceStore>,
    server: ResourceServer,
    transport: Arc<RecordingTransport>,
}

impl Harness {
    async fn new() -> Self {
        Self::with_workflows(MemoryWorkflowProvider::builtin().expect("workflows")).await
    }

    async fn with_workflows(workflows: MemoryWorkflowProvider) -> Self {
        let store = Arc::new(InMemoryResourceStore::new());
        let transport = Arc::new(RecordingTransport::default());
        let registry = Arc::new(NotificationRegistry::new());
        registry
            .subscribe(
                "*",
                "organizations",
                Arc::new(OrganizationNotifier::new(transport.clone())),
            )
            .await;

        let config = CoreConfig::new(
            vec![org("1")],
            org("observer"),
            "https://care.example.org/fhir".into(),
            100,
            SearchOverflow::Reject,
        )
        .expect("config");
        let server = ResourceServer::new(
            store.clone(),
            Arc::new(config),
            Arc::new(workflows),
            registry,
        );
        Self {
            store,
            server,
            transport,
        }
    }

    async fn create(&self, as_org: &str, resource_type: ResourceType, body: Value) -> Value {
        self.server
            .handle(principal(as_org), OperationRequest::create(resource_type, body))
            .await
            .expect("create")
            .resource
            .expect("created resource")
    }

    async fn set_status(
        &self,
        as_org: &str,
        task: &Value,
        status: &str,
    ) -> Result<Value, CoordinationError> {
        let mut body = task.clone();
        body["status"] = json!(status);
        let id = task["id"].as_str().expect("task id");
        let entry = self
            .server
            .handle(principal(as_org), OperationRequest::update(ResourceType::Task, id, body))
            .await?;
        Ok(entry.resource.expect("updated task"))
    }

    async fn update(
        &self,
        as_org: &str,
        resource_type: ResourceType,
        id: &str,
        body: Value,
    ) -> Result<Value, CoordinationError> {
        let entry = self
            .server
            .handle(principal(as_org), OperationRequest::update(resource_type, id, body))
            .await?;
        Ok(entry.resource.expect("updated resource"))
    }

    async fn read(
        &self,
        as_org: &str,
        resource_type: ResourceType,
        id: &str,
    ) -> Result<Value, CoordinationError> {
        let entry = self
            .server
            .handle(principal(as_org), OperationRequest::read(resource_type, id))
            .await?;
        Ok(entry.resource.expect("resource"))
    }

    async fn search(
        &self,
        as_org: &str,
        resource_type: ResourceType,
        params: SearchParams,
    ) -> Vec<Value> {
        let entry = self
            .server
            .handle(principal(as_org), OperationRequest::search(resource_type, params))
            .await
            .expect("search");
        let bundle: Bundle =
            serde_json::from_value(entry.resource.expect("searchset")).expect("bundle");
        bundle.matches().cloned().collect()
    }

    async fn care_team(&self) -> CareTeam {
        let teams = self.store.all(ResourceType::CareTeam).await;
        assert_eq!(teams.len(), 1, "one care team expected");
        Resources::parse(teams[0].clone()).expect("care team")
    }

    async fn seed_workflow_resources(&self) -> String {
        let service_request = self
            .create(
                "1",
                ResourceType::ServiceRequest,
                json!({
                    "resourceType": "ServiceRequest",
                    "status": "active",
                    "code": {"coding": [{"system": "http://snomed.info/sct", "code": "719858009"}]},
                    "subject": {"reference": "Patient/p1"}
                }),
            )
            .await;
        for url in [ENROLLMENT, CONSENT] {
            self.create(
                "1",
                ResourceType::Questionnaire,
                json!({"resourceType": "Questionnaire", "url": url, "status": "active"}),
            )
            .await;
        }
        service_request["id"].as_str().expect("id").to_string()
    }
}

fn task_body(requester: &str, owner: &str) -> Value {
    json!({
        "resourceType": "Task",
        "status": "requested",
        "intent": "order",
        "for": {"reference": "Patient/p1"},
        "requester": {"identifier": {"system": URA, "value": requester}},
        "owner": {"identifier": {"system": URA, "value": owner}}
    })
}

fn workflow_task_body(service_request_id: &str, condition: &str) -> Value {
    let mut body = task_body("1", "2");
    body["meta"] = json!({"profile": [TASK_PROFILE_URL]});
    body["focus"] = json!({"reference": format!("ServiceRequest/{service_request_id}")});
    body["reasonCode"] =
        json!({"coding": [{"system": "http://snomed.info/sct", "code": condition}]});
    body
}

#[tokio::test]
async fn test_new_task_bootstraps_care_plan_and_notifies_both_parties() {
    let h = Harness::new().await;
    let task = h.create("1", ResourceType::Task, task_body("1", "2")).await;

    assert!(task["basedOn"][0]["reference"]
        .as_str()
        .is_some_and(|r| r.starts_with("CarePlan/")));
    assert_eq!(h.store.count(ResourceType::CarePlan).await, 1);
    assert_eq!(h.store.count(ResourceType::CareTeam).await, 1);

    let team = h.care_team().await;
    assert!(team.is_active_member(&org("1"), Utc::now()));
    assert!(!team.is_active_member(&org("2"), Utc::now()));

    let plans = h.store.all(ResourceType::CarePlan).await;
    let plan: CarePlan = Resources::parse(plans[0].clone()).expect("care plan");
    let task_ref = format!("Task/{}", task["id"].as_str().expect("id"));
    assert_eq!(plan.activity.len(), 1);
    assert_eq!(
        plan.activity[0].reference.as_ref().and_then(|r| r.reference.as_deref()),
        Some(task_ref.as_str())
    );

    let recipients: BTreeSet<String> =
        h.transport.sent.lock().expect("lock").iter().cloned().collect();
    let expected: BTreeSet<String> =
        [org("1").to_token(), org("2").to_token()].into_iter().collect();
    assert_eq!(recipients, expected);
}

#[tokio::test]
async fn test_owner_joins_team_on_accept_and_stays_through_completion() {
    let h = Harness::new().await;
    let task = h.create("1", ResourceType::Task, task_body("1", "2")).await;

    let task = h.set_status("2", &task, "accepted").await.expect("accept");
    assert!(h.care_team().await.is_active_member(&org("2"), Utc::now()));

    let task = h.set_status("2", &task, "in-progress").await.expect("start");
    h.set_status("2", &task, "completed").await.expect("complete");

    let team = h.care_team().await;
    assert!(team.is_active_member(&org("2"), Utc::now()));
    assert_eq!(team.participant.len(), 2);
}

#[tokio::test]
async fn test_cancel_closes_owner_membership_window() {
    let h = Harness::new().await;
    let task = h.create("1", ResourceType::Task, task_body("1", "2")).await;
    let task = h.set_status("2", &task, "accepted").await.expect("accept");

    h.set_status("1", &task, "cancelled").await.expect("requester cancels");

    let team = h.care_team().await;
    assert!(!team.is_active_member(&org("2"), Utc::now()));
    assert!(team.is_active_member(&org("1"), Utc::now()));
    let member = team
        .participant
        .iter()
        .find(|p| p.is_member(&org("2")))
        .expect("participant kept");
    assert!(member.period.as_ref().and_then(|p| p.end).is_some());
}

#[tokio::test]
async fn test_illegal_transition_is_rejected_and_nothing_is_written() {
    let h = Harness::new().await;
    let task = h.create("1", ResourceType::Task, task_body("1", "2")).await;
    let audits_before = h.store.count(ResourceType::AuditEvent).await;

    let err = h.set_status("2", &task, "completed").await.expect_err("requested -> completed");
    assert!(matches!(err, CoordinationError::TaskRejection(_)));

    let err = h.set_status("1", &task, "accepted").await.expect_err("requester cannot accept");
    assert!(matches!(err, CoordinationError::TaskRejection(_)));

    let err = h.set_status("3", &task, "accepted").await.expect_err("stranger");
    assert!(matches!(err, CoordinationError::Forbidden(ResourceType::Task)));

    assert_eq!(h.store.count(ResourceType::AuditEvent).await, audits_before);
    let stored = h
        .read("1", ResourceType::Task, task["id"].as_str().expect("id"))
        .await
        .expect("read");
    assert_eq!(stored["status"], "requested");
}

#[tokio::test]
async fn test_heart_failure_task_gets_exactly_one_subtask() {
    let h = Harness::new().await;
    let service_request = h.seed_workflow_resources().await;

    let primary = h
        .create("1", ResourceType::Task, workflow_task_body(&service_request, HEART_FAILURE))
        .await;
    assert_eq!(primary["status"], "received");

    let primary_ref = format!("Task/{}", primary["id"].as_str().expect("id"));
    let subtasks = h
        .search("1", ResourceType::Task, SearchParams::new().with("part-of", primary_ref.as_str()))
        .await;
    assert_eq!(subtasks.len(), 1);
    let subtask = &subtasks[0];
    assert_eq!(subtask["status"], "ready");
    assert_eq!(subtask["owner"]["identifier"]["value"], "1");
    assert_eq!(subtask["input"][0]["valueReference"]["reference"], ENROLLMENT);

    h.set_status("1", subtask, "completed").await.expect("answer questionnaire");
    let subtasks = h
        .search("1", ResourceType::Task, SearchParams::new().with("part-of", primary_ref.as_str()))
        .await;
    assert_eq!(subtasks.len(), 1, "single-step workflow stages no further subtask");

    let primary = h.read("2", ResourceType::Task, &primary_ref[5..]).await.expect("read");
    assert_eq!(primary["status"], "received");
    h.set_status("2", &primary, "accepted").await.expect("owner accepts");
}

#[tokio::test]
async fn test_owner_write_accepts_primary_after_requester_answers_the_questionnaire() {
    let h = Harness::new().await;
    let service_request = h.seed_workflow_resources().await;
    let primary = h
        .create("1", ResourceType::Task, workflow_task_body(&service_request, HEART_FAILURE))
        .await;
    let primary_id = primary["id"].as_str().expect("id").to_string();
    let by_primary = SearchParams::new().with("part-of", format!("Task/{primary_id}"));

    // Writing it while the subtask is open changes nothing.
    let primary = h.read("2", ResourceType::Task, &primary_id).await.expect("read");
    let primary = h.set_status("2", &primary, "received").await.expect("owner write");
    assert_eq!(primary["status"], "received");

    let subtasks = h.search("1", ResourceType::Task, by_primary).await;
    h.set_status("1", &subtasks[0], "completed").await.expect("requester answers");
    let primary = h.read("2", ResourceType::Task, &primary_id).await.expect("read");
    assert_eq!(primary["status"], "received");

    let primary = h.set_status("2", &primary, "received").await.expect("owner write");
    assert_eq!(primary["status"], "accepted");
    assert!(h.care_team().await.is_active_member(&org("2"), Utc::now()));

    let plans = h.store.all(ResourceType::CarePlan).await;
    let plan: CarePlan = Resources::parse(plans[0].clone()).expect("care plan");
    assert!(plan.has_activity(&format!("Task/{primary_id}")));
    let subtask_ref = format!("Task/{}", subtasks[0]["id"].as_str().expect("id"));
    assert!(plan.has_activity(&subtask_ref));
}

#[tokio::test]
async fn test_owner_write_accepts_primary_of_a_workflow_without_questionnaires() {
    let workflows = MemoryWorkflowProvider::from_yaml_str(
        r#"
workflows:
  - service: {system: "http://snomed.info/sct", code: "719858009"}
    condition: {system: "http://snomed.info/sct", code: "38341003"}
    questionnaires: []
"#,
    )
    .expect("workflows");
    let h = Harness::with_workflows(workflows).await;
    let service_request = h.seed_workflow_resources().await;

    let primary = h
        .create("1", ResourceType::Task, workflow_task_body(&service_request, "38341003"))
        .await;
    assert_eq!(primary["status"], "requested");
    assert_eq!(h.store.count(ResourceType::Task).await, 1, "no subtask");

    let primary = h.set_status("2", &primary, "requested").await.expect("owner write");
    assert_eq!(primary["status"], "accepted");
    assert!(h.care_team().await.is_active_member(&org("2"), Utc::now()));
}

#[tokio::test]
async fn test_completing_a_subtask_without_its_profile_is_rejected() {
    let h = Harness::new().await;
    let service_request = h.seed_workflow_resources().await;
    let primary = h
        .create("1", ResourceType::Task, workflow_task_body(&service_request, COPD))
        .await;
    let by_primary = SearchParams::new().with(
        "part-of",
        format!("Task/{}", primary["id"].as_str().expect("id")),
    );
    let subtask = h.search("1", ResourceType::Task, by_primary.clone()).await.remove(0);

    let mut stripped = subtask.clone();
    stripped.as_object_mut().expect("object").remove("meta");
    let err = h
        .set_status("1", &stripped, "completed")
        .await
        .expect_err("profile is pinned");
    assert!(matches!(err, CoordinationError::InvalidInput(_)));

    h.set_status("1", &subtask, "completed").await.expect("complete");
    assert_eq!(h.search("1", ResourceType::Task, by_primary).await.len(), 2);
}

#[tokio::test]
async fn test_copd_workflow_stages_consent_after_enrollment() {
    let h = Harness::new().await;
    let service_request = h.seed_workflow_resources().await;
    let primary = h
        .create("1", ResourceType::Task, workflow_task_body(&service_request, COPD))
        .await;
    let by_primary = SearchParams::new().with(
        "part-of",
        format!("Task/{}", primary["id"].as_str().expect("id")),
    );

    let first = h.search("1", ResourceType::Task, by_primary.clone()).await;
    assert_eq!(first.len(), 1);
    h.set_status("1", &first[0], "completed").await.expect("complete enrollment");

    let subtasks = h.search("1", ResourceType::Task, by_primary).await;
    assert_eq!(subtasks.len(), 2);
    let questionnaires: BTreeSet<&str> = subtasks
        .iter()
        .filter_map(|t| t["input"][0]["valueReference"]["reference"].as_str())
        .collect();
    assert_eq!(questionnaires, [ENROLLMENT, CONSENT].into_iter().collect());
}

#[tokio::test]
async fn test_care_teams_cannot_be_created_directly() {
    let h = Harness::new().await;
    let team = json!({
        "resourceType": "CareTeam",
        "participant": [{"member": {"identifier": {"system": URA, "value": "7"}}}]
    });

    let err = h
        .server
        .handle(principal("7"), OperationRequest::create(ResourceType::CareTeam, team.clone()))
        .await
        .expect_err("no free-standing care teams");
    assert!(matches!(err, CoordinationError::UnsupportedOperation { .. }));

    let mut with_id = team;
    with_id["id"] = json!("t1");
    let err = h
        .update("7", ResourceType::CareTeam, "t1", with_id)
        .await
        .expect_err("no upsert either");
    assert!(matches!(err, CoordinationError::UnsupportedOperation { .. }));
    assert_eq!(h.store.count(ResourceType::CareTeam).await, 0);
}

#[tokio::test]
async fn test_closed_membership_cannot_be_reopened() {
    let h = Harness::new().await;
    let task = h.create("1", ResourceType::Task, task_body("1", "2")).await;
    let task = h.set_status("2", &task, "accepted").await.expect("accept");
    h.set_status("1", &task, "cancelled").await.expect("cancel");

    let team = h.care_team().await;
    let mut body = Resources::render(&team).expect("render");
    for participant in body["participant"].as_array_mut().expect("participants") {
        if let Some(period) = participant["period"].as_object_mut() {
            period.remove("end");
        }
    }
    let id = team.id.clone().expect("team id");
    let err = h
        .update("1", ResourceType::CareTeam, &id, body)
        .await
        .expect_err("window stays closed");
    assert!(matches!(err, CoordinationError::InvalidInput(_)));
    assert!(!h.care_team().await.is_active_member(&org("2"), Utc::now()));
}

#[tokio::test]
async fn test_created_resource_reads_back_unchanged() {
    let h = Harness::new().await;
    let body = json!({
        "resourceType": "Patient",
        "identifier": [{"system": "http://example.org/bsn", "value": "999911120"}],
        "name": [{"family": "Jansen", "given": ["Eva"]}],
        "birthDate": "1950-04-01",
        "_birthDate": {"extension": [{"url": "http://example.org/precision", "valueCode": "day"}]}
    });
    let created = h.create("1", ResourceType::Patient, body.clone()).await;
    let read = h
        .read("1", ResourceType::Patient, created["id"].as_str().expect("id"))
        .await
        .expect("read");

    assert_eq!(read, created);
    for (member, value) in body.as_object().expect("object") {
        assert_eq!(&read[member], value, "{member} survives the round trip");
    }
}

#[tokio::test]
async fn test_search_silently_drops_resources_the_caller_may_not_read() {
    let h = Harness::new().await;
    let visible = h.create("1", ResourceType::Task, task_body("1", "2")).await;
    let hidden = h.create("4", ResourceType::Task, task_body("4", "5")).await;

    let results = h.search("2", ResourceType::Task, SearchParams::new()).await;
    let ids: Vec<&str> = results.iter().filter_map(|t| t["id"].as_str()).collect();
    assert_eq!(ids, vec![visible["id"].as_str().expect("id")]);

    let hidden_ref = format!("Task/{}", hidden["id"].as_str().expect("id"));
    let reads_of_hidden = h
        .store
        .all(ResourceType::AuditEvent)
        .await
        .into_iter()
        .map(|value| Resources::parse::<AuditEvent>(value).expect("audit event"))
        .filter(|event| event.action == Some(AuditEventAction::Read))
        .filter(|event| event.entity_references().any(|r| r == hidden_ref))
        .count();
    assert_eq!(reads_of_hidden, 0);

    let err = h
        .read("2", ResourceType::Task, hidden["id"].as_str().expect("id"))
        .await
        .expect_err("not visible");
    assert!(matches!(err, CoordinationError::Forbidden(ResourceType::Task)));
}

#[tokio::test]
async fn test_transaction_bundle_resolves_placeholders_between_entries() {
    let h = Harness::new().await;
    h.seed_workflow_resources().await;

    let mut task = workflow_task_body("unused", HEART_FAILURE);
    task["focus"] = json!({"reference": "urn:uuid:6f0c5b52-8f1d-4c59-9d5c-3c3b1c1e0001"});
    let entry = |full_url: &str, resource: Value, url: &str| BundleEntry {
        full_url: Some(full_url.to_string()),
        resource: Some(resource),
        request: Some(BundleRequest {
            method: HttpVerb::Post,
            url: url.to_string(),
            if_none_exist: None,
        }),
        ..Default::default()
    };
    let mut bundle = Bundle::new(BundleType::Transaction);
    bundle.entry = vec![
        entry(
            "urn:uuid:6f0c5b52-8f1d-4c59-9d5c-3c3b1c1e0001",
            json!({
                "resourceType": "ServiceRequest",
                "code": {"coding": [{"system": "http://snomed.info/sct", "code": "719858009"}]}
            }),
            "ServiceRequest",
        ),
        entry("urn:uuid:6f0c5b52-8f1d-4c59-9d5c-3c3b1c1e0002", task, "Task"),
    ];

    let response = h
        .server
        .handle_bundle(principal("1"), bundle)
        .await
        .expect("transaction");
    assert_eq!(response.bundle_type, BundleType::TransactionResponse);
    assert_eq!(response.entry.len(), 2);
    for entry in &response.entry {
        assert_eq!(entry.response.as_ref().and_then(|r| r.status_code()), Some(201));
    }

    let created_task = response.entry[1].resource.clone().expect("task");
    let service_request = response.entry[0].resource.clone().expect("service request");
    assert_eq!(
        created_task["focus"]["reference"],
        format!("ServiceRequest/{}", service_request["id"].as_str().expect("id"))
    );
    assert_eq!(created_task["status"], "received");
}

#[tokio::test]
async fn test_failed_entry_rolls_back_the_whole_bundle() {
    let h = Harness::new().await;
    let mut bundle = Bundle::new(BundleType::Transaction);
    bundle.entry = vec![
        BundleEntry {
            resource: Some(task_body("1", "2")),
            request: Some(BundleRequest {
                method: HttpVerb::Post,
                url: "Task".into(),
                if_none_exist: None,
            }),
            ..Default::default()
        },
        BundleEntry {
            resource: Some(json!({"resourceType": "Patient"})),
            request: Some(BundleRequest {
                method: HttpVerb::Post,
                url: "Patient".into(),
                if_none_exist: None,
            }),
            ..Default::default()
        },
    ];

    // Organisation 2 may request a Task but is not a local organisation.
    let mut first = bundle.clone();
    first.entry[0].resource = Some(task_body("2", "3"));
    let err = h
        .server
        .handle_bundle(principal("2"), first)
        .await
        .expect_err("patient create denied");
    assert!(matches!(err, CoordinationError::Forbidden(ResourceType::Patient)));
    assert_eq!(h.store.count(ResourceType::Task).await, 0);
    assert_eq!(h.store.count(ResourceType::AuditEvent).await, 0);
}

#[tokio::test]
async fn test_audit_events_are_readable_by_local_organizations_only() {
    let h = Harness::new().await;
    h.create("1", ResourceType::Task, task_body("1", "2")).await;

    let local = h.search("1", ResourceType::AuditEvent, SearchParams::new()).await;
    assert!(!local.is_empty());
    let remote = h.search("2", ResourceType::AuditEvent, SearchParams::new()).await;
    assert!(remote.is_empty());

    let err = h
        .server
        .handle(
            principal("1"),
            OperationRequest::create(
                ResourceType::AuditEvent,
                json!({"resourceType": "AuditEvent"}),
            ),
        )
        .await
        .expect_err("audit journal is read-only");
    assert!(matches!(err, CoordinationError::UnsupportedOperation { .. }));
}

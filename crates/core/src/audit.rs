//! AuditEvent construction.
//!
//! Every audited access stages exactly one AuditEvent in the transaction that performs it. The
//! observer identity comes from [`crate::CoreConfig`], never from process-wide state.

use crate::constants::{AUDIT_DETAIL_QUERY, AUDIT_EVENT_TYPE_REST, AUDIT_EVENT_TYPE_SYSTEM};
use crate::principal::Principal;
use crate::store::SearchParams;
use crate::transaction::{new_full_url, TransactionBuilder};
use crate::{CoordinationResult, CoreConfig};
use chrono::{DateTime, Utc};
use fhir::audit_event::{AuditEventDetail, AuditEventSource};
use fhir::{AuditEvent, AuditEventAction, AuditEventAgent, AuditEventEntity, Coding, Reference};
use serde_json::Map;

/// Describes one audited access.
#[derive(Clone, Debug)]
pub struct AuditRecord<'a> {
    pub action: AuditEventAction,
    /// Literal reference to the resource; may be a `urn:uuid` placeholder of the same transaction.
    pub resource: String,
    pub reasons: Vec<String>,
    pub query: Option<&'a SearchParams>,
}

impl<'a> AuditRecord<'a> {
    pub fn new(action: AuditEventAction, resource: impl Into<String>) -> Self {
        Self {
            action,
            resource: resource.into(),
            reasons: Vec::new(),
            query: None,
        }
    }

    pub fn with_reasons(mut self, reasons: Vec<String>) -> Self {
        self.reasons = reasons;
        self
    }

    pub fn with_query(mut self, query: &'a SearchParams) -> Self {
        self.query = Some(query);
        self
    }
}

/// Builds the AuditEvent for `record`.
pub fn audit_event(
    config: &CoreConfig,
    principal: &Principal,
    record: &AuditRecord<'_>,
    recorded: DateTime<Utc>,
) -> AuditEvent {
    let detail = record
        .query
        .map(|query| AuditEventDetail {
            type_: AUDIT_DETAIL_QUERY.to_string(),
            value_string: Some(query.to_string()),
        })
        .into_iter()
        .collect();

    AuditEvent {
        id: None,
        meta: None,
        extension: Vec::new(),
        type_: Coding::new(AUDIT_EVENT_TYPE_SYSTEM, AUDIT_EVENT_TYPE_REST),
        action: Some(record.action),
        recorded,
        agent: vec![AuditEventAgent {
            who: principal.organization_reference(),
            requestor: true,
            policy: record.reasons.clone(),
        }],
        source: AuditEventSource {
            observer: Reference::organization(config.observer().clone()),
        },
        entity: vec![AuditEventEntity {
            what: Some(Reference::literal(record.resource.clone())),
            detail,
        }],
        other: Map::new(),
    }
}

/// Stages the AuditEvent for `record` and returns its transaction index.
pub fn stage_audit(
    tx: &mut TransactionBuilder,
    config: &CoreConfig,
    principal: &Principal,
    record: &AuditRecord<'_>,
    recorded: DateTime<Utc>,
) -> CoordinationResult<usize> {
    let event = audit_event(config, principal, record, recorded);
    tx.create(&event, &new_full_url())
}

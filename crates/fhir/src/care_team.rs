//! CareTeam wire model and membership-window helpers.
//!
//! Membership is additive: participants are never removed, only their `period.end` is set.
//! The helpers here answer "who is active at instant t"; enforcing the additive rule on writes
//! is the job of `carelink-core`.

use crate::datatypes::{Extension, Identifier, Meta, Period, Reference};
use crate::resource::{impl_fhir_resource, ResourceType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A participating organisation and its membership window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareTeamParticipant {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub member: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_behalf_of: Option<Reference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl CareTeamParticipant {
    /// A new member whose window opens at `start` and has no end.
    pub fn organization(identifier: Identifier, start: DateTime<Utc>) -> Self {
        Self {
            member: Some(Reference::organization(identifier)),
            on_behalf_of: None,
            period: Some(Period::starting(start)),
            other: Map::new(),
        }
    }

    /// A participant without a period is treated as having no active window.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.period.as_ref().is_some_and(|p| p.contains(now))
    }

    pub fn is_member(&self, identifier: &Identifier) -> bool {
        self.member
            .as_ref()
            .is_some_and(|member| member.identifies(identifier))
    }
}

/// CareTeam resource.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CareTeam {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Meta>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub extension: Vec<Extension>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<Reference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub participant: Vec<CareTeamParticipant>,

    #[serde(flatten)]
    pub other: Map<String, Value>,
}

impl_fhir_resource!(CareTeam, ResourceType::CareTeam);

impl CareTeam {
    pub fn active_participants(
        &self,
        now: DateTime<Utc>,
    ) -> impl Iterator<Item = &CareTeamParticipant> {
        self.participant.iter().filter(move |p| p.is_active(now))
    }

    /// Whether `identifier` belongs to an active participant at `now`.
    pub fn is_active_member(&self, identifier: &Identifier, now: DateTime<Utc>) -> bool {
        self.active_participants(now)
            .any(|p| p.is_member(identifier))
    }

    /// Organisation identifiers of all active participants.
    pub fn active_member_identifiers(&self, now: DateTime<Utc>) -> Vec<Identifier> {
        self.active_participants(now)
            .filter_map(|p| p.member.as_ref()?.identifier.clone())
            .collect()
    }
}

//! Authorisation policy engine.
//!
//! A policy decides whether a principal may access one resource instance. Policies are small
//! values composed into a combinator tree once at startup ([`Policies::standard`]); evaluation
//! walks the tree without shared mutable state. The only I/O a policy performs is looking up
//! related resources through the store in [`PolicyContext`].
//!
//! Business failures (no CareTeam, no matching reference) are a `Deny`, never an error. Errors
//! are reserved for store failures.

mod combinators;
mod primitives;
mod registry;

pub use combinators::{AllMatch, AnyMatch, AnyonePolicy};
pub use primitives::{
    CareTeamMemberPolicy, CareTeamSource, CreatorPolicy, LocalOrganizationPolicy,
    RelatedResourcePolicy, RelatedSearch, TaskRolePolicy, TaskRoles,
};
pub use registry::Policies;

use crate::principal::Principal;
use crate::store::ResourceStore;
use crate::{CoordinationResult, CoreConfig};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fhir::FhirResource;
use std::sync::Arc;

/// The outcome of evaluating a policy.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Decision {
    pub allowed: bool,
    /// For an allow: the rules that granted access. For a deny: why it was refused.
    pub reasons: Vec<String>,
}

impl Decision {
    pub fn allow(reason: impl Into<String>) -> Self {
        Self {
            allowed: true,
            reasons: vec![reason.into()],
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reasons: vec![reason.into()],
        }
    }
}

/// Everything a policy may consult besides the resource and the principal.
#[derive(Clone, Copy)]
pub struct PolicyContext<'a> {
    pub store: &'a dyn ResourceStore,
    pub config: &'a CoreConfig,
    /// Membership windows are evaluated against this single clock reading.
    pub now: DateTime<Utc>,
}

#[async_trait]
pub trait Policy<R: FhirResource>: Send + Sync {
    async fn has_access(
        &self,
        ctx: &PolicyContext<'_>,
        resource: &R,
        principal: &Principal,
    ) -> CoordinationResult<Decision>;
}

/// The policies guarding each operation on one resource type.
pub struct PolicySet<R: FhirResource> {
    pub create: Arc<dyn Policy<R>>,
    pub read: Arc<dyn Policy<R>>,
    pub update: Arc<dyn Policy<R>>,
    pub delete: Arc<dyn Policy<R>>,
}

impl<R: FhirResource> Clone for PolicySet<R> {
    fn clone(&self) -> Self {
        Self {
            create: Arc::clone(&self.create),
            read: Arc::clone(&self.read),
            update: Arc::clone(&self.update),
            delete: Arc::clone(&self.delete),
        }
    }
}

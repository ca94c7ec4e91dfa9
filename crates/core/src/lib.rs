//! # CareLink Core
//!
//! Core business logic for the care coordination resource server.
//!
//! This crate contains the coordination semantics shared by every transport:
//! - the policy engine deciding which organisation may touch which resource
//! - the transaction builder and the generic create/read/update/search/delete handlers
//! - the Task workflow: state machine, questionnaire subtasks and CareTeam derivation
//! - the audit journal and change notifications
//! - the resource store abstraction with an in-memory implementation
//!
//! **No API concerns**: authentication, HTTP routing and wire error formats belong in
//! `api-rest`.

pub mod audit;
pub mod careteam;
pub mod config;
pub mod constants;
pub mod creator;
pub mod error;
pub mod notification;
pub mod operation;
pub mod policy;
pub mod principal;
pub mod server;
pub mod store;
pub mod transaction;
pub mod workflow;

pub use config::{CoreConfig, SearchOverflow};
pub use error::{
    CoordinationError, CoordinationResult, NotificationError, StoreError, StoreResult,
};
pub use notification::{
    LoggingTransport, Notification, NotificationHandler, NotificationRegistry,
    NotificationTransport, OrganizationNotifier,
};
pub use operation::{OperationKind, OperationRequest};
pub use principal::Principal;
pub use server::ResourceServer;
pub use store::{InMemoryResourceStore, ResourceStore, SearchParams};

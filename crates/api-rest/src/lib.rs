//! # API REST
//!
//! REST API implementation for CareLink.
//!
//! Handles:
//! - HTTP endpoints with axum, mapped onto the resource server's operations
//! - transport authentication (`x-api-key`) and caller identification
//! - OpenAPI/Swagger documentation
//!
//! Business rules live in `carelink-core`; this crate only translates HTTP to operation requests
//! and errors to OperationOutcome responses.

#![warn(rust_2018_idioms)]

pub mod auth;
pub mod error;
pub mod routes;

use carelink_core::config::{
    base_url_from_env_value, identifier_from_env_value, identifiers_from_env_value,
    search_ceiling_from_env_value, search_overflow_from_env_value, workflows_file_from_env_value,
};
use carelink_core::workflow::MemoryWorkflowProvider;
use carelink_core::{
    CoreConfig, InMemoryResourceStore, LoggingTransport, NotificationRegistry,
    OrganizationNotifier, ResourceServer,
};
use fhir::ResourceType;
use std::sync::Arc;

pub use error::{ApiError, OperationOutcome};
pub use routes::{router, ApiDoc};

/// Application state shared across REST API handlers.
#[derive(Clone)]
pub struct AppState {
    pub server: Arc<ResourceServer>,
    /// Key every FHIR request must present in `x-api-key`.
    pub api_key: Arc<str>,
}

impl AppState {
    pub fn new(server: Arc<ResourceServer>, api_key: impl Into<Arc<str>>) -> Self {
        Self {
            server,
            api_key: api_key.into(),
        }
    }
}

/// Resolves the configuration from the environment and wires up the resource server.
///
/// # Environment Variables
/// - `CARELINK_LOCAL_ORGANIZATIONS`: comma-separated `system|value` identifiers (default: none)
/// - `CARELINK_OBSERVER`: `system|value` identifier recorded on every AuditEvent (required)
/// - `CARELINK_BASE_URL`: public FHIR base URL used in notifications
/// - `CARELINK_SEARCH_CEILING`: maximum resources per search
/// - `CARELINK_SEARCH_OVERFLOW`: `reject` or `warn`
/// - `CARELINK_WORKFLOWS_FILE`: YAML workflow definitions (default: built-in definitions)
/// - `API_KEY`: key required in the `x-api-key` header (required)
///
/// # Errors
/// Returns an error if a variable is missing or malformed, or if the workflow definitions
/// cannot be loaded.
pub async fn state_from_env() -> anyhow::Result<AppState> {
    let env = |name: &str| std::env::var(name).ok();

    let api_key = env("API_KEY")
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("API_KEY must be set"))?;

    let cfg = Arc::new(
        CoreConfig::new(
            identifiers_from_env_value(env("CARELINK_LOCAL_ORGANIZATIONS"))?,
            identifier_from_env_value("CARELINK_OBSERVER", env("CARELINK_OBSERVER"))?,
            base_url_from_env_value(env("CARELINK_BASE_URL")),
            search_ceiling_from_env_value(env("CARELINK_SEARCH_CEILING"))?,
            search_overflow_from_env_value(env("CARELINK_SEARCH_OVERFLOW"))?,
        )?
        .with_workflows_file(workflows_file_from_env_value(env("CARELINK_WORKFLOWS_FILE"))),
    );

    let workflows = match cfg.workflows_file() {
        Some(path) => {
            tracing::info!("-- Loading workflow definitions from {}", path.display());
            MemoryWorkflowProvider::from_file(path)?
        }
        None => MemoryWorkflowProvider::builtin()?,
    };

    let notifications = Arc::new(NotificationRegistry::new());
    let notifier = Arc::new(OrganizationNotifier::new(Arc::new(LoggingTransport)));
    for topic in [ResourceType::Task, ResourceType::CareTeam] {
        notifications
            .subscribe(topic.as_str(), "organization-notifier", notifier.clone())
            .await;
    }

    let server = ResourceServer::new(
        Arc::new(InMemoryResourceStore::new()),
        cfg,
        Arc::new(workflows),
        notifications,
    );
    Ok(AppState::new(Arc::new(server), api_key))
}

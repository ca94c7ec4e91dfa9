use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use carelink_core::{Notification, NotificationError, NotificationHandler};

/// Logs every committed change; subscribed to all topics.
struct ChangeLog;

#[async_trait::async_trait]
impl NotificationHandler for ChangeLog {
    async fn handle(&self, notification: &Notification) -> Result<(), NotificationError> {
        tracing::debug!(source = %notification.source_url, "resource changed");
        Ok(())
    }
}

/// Main entry point for the CareLink application
///
/// Loads `.env`, resolves the resource server configuration and serves the FHIR endpoint.
///
/// # Environment Variables
/// - `CARELINK_REST_ADDR`: REST server address (default: "0.0.0.0:3000")
/// - `CARELINK_LOCAL_ORGANIZATIONS`: organisations operating this deployment
/// - `CARELINK_OBSERVER`: identity recorded on AuditEvents
/// - `CARELINK_BASE_URL`, `CARELINK_SEARCH_CEILING`, `CARELINK_SEARCH_OVERFLOW`,
///   `CARELINK_WORKFLOWS_FILE`: see `api_rest::state_from_env`
/// - `API_KEY`: API key required in the `x-api-key` header
///
/// # Returns
/// * `Ok(())` - If the server starts and runs successfully
/// * `Err(anyhow::Error)` - If configuration, startup or the server fails
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("carelink=info".parse()?)
                .add_directive("carelink_core=info".parse()?)
                .add_directive("api_rest=info".parse()?),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let rest_addr: SocketAddr = std::env::var("CARELINK_REST_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".into())
        .parse()?;

    tracing::info!("++ Starting CareLink REST on {}", rest_addr);

    let state = api_rest::state_from_env().await?;
    state
        .server
        .notifications()
        .subscribe(carelink_core::constants::WILDCARD_TOPIC, "change-log", Arc::new(ChangeLog))
        .await;

    let listener = tokio::net::TcpListener::bind(rest_addr).await?;
    axum::serve(listener, api_rest::router(state)).await?;

    Ok(())
}

//! Change notifications.
//!
//! After a transaction commits, every changed resource is published on the registry under its
//! resource type. Subscribers run after the caller's response is settled: a failing subscriber
//! is logged and never turns a committed write into an error.

use crate::constants::WILDCARD_TOPIC;
use crate::NotificationError;
use async_trait::async_trait;
use chrono::Utc;
use fhir::{CareTeam, Identifier, ResourceType, Resources, Task};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// One changed resource.
#[derive(Clone, Debug, PartialEq)]
pub struct Notification {
    /// Absolute URL of the resource on this server.
    pub source_url: String,
    pub resource: Value,
}

impl Notification {
    pub fn resource_type(&self) -> Option<ResourceType> {
        Resources::resource_type_of(&self.resource).ok()
    }
}

#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, notification: &Notification) -> Result<(), NotificationError>;
}

struct Subscriber {
    name: String,
    handler: Arc<dyn NotificationHandler>,
}

/// Topic-keyed subscriber registry. Topics are resource type names, or `*` for everything.
#[derive(Default)]
pub struct NotificationRegistry {
    subscribers: RwLock<HashMap<String, Vec<Subscriber>>>,
}

impl NotificationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn subscribe(
        &self,
        topic: &str,
        name: impl Into<String>,
        handler: Arc<dyn NotificationHandler>,
    ) {
        let name = name.into();
        tracing::debug!(topic, subscriber = %name, "subscribed");
        self.subscribers
            .write()
            .await
            .entry(topic.to_string())
            .or_default()
            .push(Subscriber { name, handler });
    }

    /// Delivers `notification` to the subscribers of `topic` and of the wildcard topic.
    ///
    /// Returns how many subscribers handled it successfully.
    pub async fn notify(&self, topic: &str, notification: &Notification) -> usize {
        let subscribers = self.subscribers.read().await;
        let targets: Vec<&Subscriber> = subscribers
            .get(topic)
            .into_iter()
            .chain(subscribers.get(WILDCARD_TOPIC))
            .flatten()
            .collect();

        let mut delivered = 0;
        for subscriber in targets {
            match subscriber.handler.handle(notification).await {
                Ok(()) => delivered += 1,
                Err(err) => tracing::warn!(
                    topic,
                    subscriber = %subscriber.name,
                    source = %notification.source_url,
                    error = %err,
                    "notification handler failed"
                ),
            }
        }
        delivered
    }
}

/// Delivery of a notification to one organisation.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(
        &self,
        recipient: &Identifier,
        notification: &Notification,
    ) -> Result<(), NotificationError>;
}

/// Forwards Task and CareTeam changes to the organisations involved in them.
///
/// A Task goes to its owner and requester; a CareTeam to its active participants.
pub struct OrganizationNotifier {
    transport: Arc<dyn NotificationTransport>,
}

impl OrganizationNotifier {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        Self { transport }
    }

    /// Distinct recipients of `notification`, in first-seen order.
    pub fn recipients(notification: &Notification) -> Result<Vec<Identifier>, NotificationError> {
        let invalid = |err: fhir::FhirError| NotificationError::InvalidPayload(err.to_string());
        let candidates: Vec<Identifier> = match notification.resource_type() {
            Some(ResourceType::Task) => {
                let task: Task = Resources::parse(notification.resource.clone()).map_err(invalid)?;
                [task.owner, task.requester]
                    .into_iter()
                    .flatten()
                    .filter_map(|r| r.identifier)
                    .collect()
            }
            Some(ResourceType::CareTeam) => {
                let team: CareTeam =
                    Resources::parse(notification.resource.clone()).map_err(invalid)?;
                team.active_member_identifiers(Utc::now())
            }
            _ => Vec::new(),
        };

        let mut recipients: Vec<Identifier> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !recipients.iter().any(|seen| seen.matches(&candidate)) {
                recipients.push(candidate);
            }
        }
        Ok(recipients)
    }
}

#[async_trait]
impl NotificationHandler for OrganizationNotifier {
    async fn handle(&self, notification: &Notification) -> Result<(), NotificationError> {
        let mut first_failure = None;
        for recipient in Self::recipients(notification)? {
            if let Err(err) = self.transport.send(&recipient, notification).await {
                tracing::warn!(recipient = %recipient.to_token(), error = %err, "delivery failed");
                first_failure.get_or_insert(err);
            }
        }
        first_failure.map_or(Ok(()), Err)
    }
}

/// Transport that only logs; used when no delivery endpoint is configured.
pub struct LoggingTransport;

#[async_trait]
impl NotificationTransport for LoggingTransport {
    async fn send(
        &self,
        recipient: &Identifier,
        notification: &Notification,
    ) -> Result<(), NotificationError> {
        tracing::info!(
            recipient = %recipient.to_token(),
            source = %notification.source_url,
            "notification"
        );
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::Mutex;

    /// Records every delivery as `(recipient token, source url)`.
    #[derive(Default)]
    pub struct RecordingTransport {
        pub sent: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl NotificationTransport for RecordingTransport {
        async fn send(
            &self,
            recipient: &Identifier,
            notification: &Notification,
        ) -> Result<(), NotificationError> {
            self.sent
                .lock()
                .expect("lock")
                .push((recipient.to_token(), notification.source_url.clone()));
            Ok(())
        }
    }
}

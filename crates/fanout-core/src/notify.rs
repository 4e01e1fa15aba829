//! Lifecycle notifications for observers outside the engine.
//!
//! Registry mutations and delivery outcomes are published through a
//! handler trait so dashboards and audit logs can react without the
//! engine knowing about specific subscribers. Handlers must not block
//! delivery processing; failures are theirs to log and swallow.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{DeliveryId, EndpointId, EventId};

/// Notifications emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineNotification {
    /// An endpoint was registered.
    EndpointRegistered {
        /// Identifier of the new endpoint.
        endpoint_id: EndpointId,
        /// Display name of the new endpoint.
        name: String,
    },

    /// An endpoint's configuration was updated.
    EndpointUpdated {
        /// Identifier of the updated endpoint.
        endpoint_id: EndpointId,
    },

    /// An endpoint was unregistered.
    EndpointRemoved {
        /// Identifier of the removed endpoint.
        endpoint_id: EndpointId,
    },

    /// The registry was replaced wholesale by an import.
    RegistryImported {
        /// Number of endpoints the import installed.
        endpoint_count: usize,
    },

    /// An event was accepted into the queue.
    EventReceived {
        /// Identifier of the accepted event.
        event_id: EventId,
        /// The event's type string.
        event_type: String,
    },

    /// A delivery reached its terminal success state.
    DeliverySucceeded {
        /// Identifier of the delivery.
        delivery_id: DeliveryId,
        /// Endpoint that received the event.
        endpoint_id: EndpointId,
        /// Event that was delivered.
        event_id: EventId,
        /// HTTP status code returned by the endpoint.
        status: u16,
        /// Completed attempts, including the successful one.
        attempts: u32,
        /// When the successful delivery occurred.
        delivered_at: DateTime<Utc>,
    },

    /// A delivery attempt failed.
    DeliveryFailed {
        /// Identifier of the delivery.
        delivery_id: DeliveryId,
        /// Endpoint the attempt targeted.
        endpoint_id: EndpointId,
        /// Event that failed to deliver.
        event_id: EventId,
        /// Completed attempts so far.
        attempts: u32,
        /// Description of the failure.
        error: String,
        /// Whether a retry has been scheduled.
        will_retry: bool,
    },
}

/// Trait for observing engine notifications.
///
/// Implementations should return quickly and never propagate errors back
/// into the delivery pipeline.
#[async_trait::async_trait]
pub trait NotificationHandler: Send + Sync + std::fmt::Debug {
    /// Handles a single notification.
    async fn notify(&self, notification: EngineNotification);
}

/// Handler that discards all notifications.
///
/// Used when observation is disabled or for tests that do not care about
/// lifecycle events.
#[derive(Debug, Default)]
pub struct NoOpNotificationHandler;

impl NoOpNotificationHandler {
    /// Creates a new no-op handler.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl NotificationHandler for NoOpNotificationHandler {
    async fn notify(&self, _notification: EngineNotification) {}
}

/// Forwards notifications to multiple subscribers concurrently.
#[derive(Debug, Clone, Default)]
pub struct MulticastNotificationHandler {
    handlers: Vec<Arc<dyn NotificationHandler>>,
}

impl MulticastNotificationHandler {
    /// Creates a multicast handler with no subscribers.
    pub fn new() -> Self {
        Self { handlers: Vec::new() }
    }

    /// Adds a subscriber.
    pub fn add_subscriber(&mut self, handler: Arc<dyn NotificationHandler>) {
        self.handlers.push(handler);
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers.len()
    }
}

#[async_trait::async_trait]
impl NotificationHandler for MulticastNotificationHandler {
    async fn notify(&self, notification: EngineNotification) {
        let futures = self.handlers.iter().map(|handler| {
            let notification = notification.clone();
            async move {
                handler.notify(notification).await;
            }
        });

        // Subscriber failures must not interfere with delivery processing.
        futures::future::join_all(futures).await;
    }
}

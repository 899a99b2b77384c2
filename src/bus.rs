//! Notification bus abstraction
//!
//! This module defines the uniform subscribe/unsubscribe contract the
//! orchestrator uses to consume asynchronous notifications from the system
//! under test, plus an in-process implementation (LocalBus) that stands in
//! for the daemon's signal source in tests and simulations.
//!
//! Publishing is deliberately not part of the contract: only the system
//! under test publishes, the harness only consumes.

use crate::error::HarnessResult;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;
use uuid::Uuid;

/// An asynchronous, unsolicited message from the system under test
#[derive(Debug, Clone)]
pub struct Notification {
    /// Topic the notification was published on
    pub topic: String,
    /// Decoded payload
    pub payload: serde_json::Value,
}

impl Notification {
    /// Create a new notification
    pub fn new(topic: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            topic: topic.into(),
            payload,
        }
    }
}

/// Handle identifying one (topic, sink) registration with a bus
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub(crate) fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Uniform subscribe/unsubscribe contract over a notification transport
///
/// Notifications for a subscribed topic are forwarded into the supplied
/// sink; the orchestrator drains the sink on its single dispatch task, so
/// handlers always execute serially regardless of the transport.
#[async_trait]
pub trait NotificationBus: Send {
    /// Register interest in a topic, routing matching notifications into `sink`
    async fn subscribe(
        &mut self,
        topic: &str,
        sink: mpsc::UnboundedSender<Notification>,
    ) -> HarnessResult<SubscriptionId>;

    /// Release a subscription
    ///
    /// Unknown or already-released ids are a no-op, not an error.
    async fn unsubscribe(&mut self, id: SubscriptionId) -> HarnessResult<()>;
}

/// One registration held by a LocalBus
struct LocalSubscription {
    id: SubscriptionId,
    topic: String,
    sink: mpsc::UnboundedSender<Notification>,
}

#[derive(Default)]
struct BusInner {
    /// Registration order is delivery order
    subscriptions: Vec<LocalSubscription>,
}

/// In-process notification bus
///
/// Tests and simulations publish through the [`Publisher`] handle obtained
/// from [`LocalBus::publisher`]; the bus itself only exposes the consuming
/// side of the contract. Clones share the underlying transport, so
/// independent runs (one orchestrator each) can observe one event source.
#[derive(Clone)]
pub struct LocalBus {
    inner: Arc<Mutex<BusInner>>,
}

impl LocalBus {
    /// Create a new local bus
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(BusInner::default())),
        }
    }

    /// Get a publishing handle for the system-under-test side
    pub fn publisher(&self) -> Publisher {
        Publisher {
            inner: self.inner.clone(),
        }
    }

    /// Number of currently active subscriptions
    pub async fn subscription_count(&self) -> usize {
        self.inner.lock().await.subscriptions.len()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationBus for LocalBus {
    async fn subscribe(
        &mut self,
        topic: &str,
        sink: mpsc::UnboundedSender<Notification>,
    ) -> HarnessResult<SubscriptionId> {
        let id = SubscriptionId::generate();
        debug!("LocalBus subscribe: topic={} id={}", topic, id);

        self.inner.lock().await.subscriptions.push(LocalSubscription {
            id,
            topic: topic.to_string(),
            sink,
        });

        Ok(id)
    }

    async fn unsubscribe(&mut self, id: SubscriptionId) -> HarnessResult<()> {
        let mut inner = self.inner.lock().await;
        let before = inner.subscriptions.len();
        inner.subscriptions.retain(|s| s.id != id);

        if inner.subscriptions.len() < before {
            debug!("LocalBus unsubscribe: id={}", id);
        }

        Ok(())
    }
}

/// Publishing handle for the system-under-test side of a [`LocalBus`]
#[derive(Clone)]
pub struct Publisher {
    inner: Arc<Mutex<BusInner>>,
}

impl Publisher {
    /// Publish a notification to every subscription of `topic`, in
    /// registration order
    pub async fn emit(&self, topic: &str, payload: serde_json::Value) {
        let inner = self.inner.lock().await;
        for sub in inner.subscriptions.iter().filter(|s| s.topic == topic) {
            // A closed sink means the run already tore down; nothing to do
            let _ = sub.sink.send(Notification::new(topic, payload.clone()));
        }
    }
}

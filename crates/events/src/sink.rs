//! Where the engine sends its outcome events.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{info, warn};
use warden_core::DeviceId;

use crate::error::{Error, Result};
use crate::event::{EventId, FleetEvent};

/// Anything the reconciliation engine can hand an outcome event to.
///
/// A failed publish is logged by the engine and never undoes the action the
/// event reports.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Publish an event.
    async fn publish(&self, event: FleetEvent) -> Result<EventId>;
}

#[derive(Default)]
struct LogState {
    events: Vec<FleetEvent>,
    rejecting: bool,
}

/// Every published event, in publish order.
#[derive(Default)]
pub struct EventLog {
    state: RwLock<LogState>,
}

impl EventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Refuse every publish until switched back.
    pub async fn reject_publishes(&self, reject: bool) {
        self.state.write().await.rejecting = reject;
    }

    pub async fn events(&self) -> Vec<FleetEvent> {
        self.state.read().await.events.clone()
    }

    /// Wire names of the recorded events.
    pub async fn event_types(&self) -> Vec<&'static str> {
        self.state
            .read()
            .await
            .events
            .iter()
            .map(FleetEvent::event_type)
            .collect()
    }

    /// Events concerning one device.
    pub async fn for_device(&self, device_id: &DeviceId) -> Vec<FleetEvent> {
        self.state
            .read()
            .await
            .events
            .iter()
            .filter(|event| event.device_id() == Some(device_id))
            .cloned()
            .collect()
    }

    pub async fn len(&self) -> usize {
        self.state.read().await.events.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.read().await.events.is_empty()
    }
}

#[async_trait]
impl EventSink for EventLog {
    async fn publish(&self, event: FleetEvent) -> Result<EventId> {
        let mut state = self.state.write().await;
        if state.rejecting {
            return Err(Error::rejected(event.event_type(), "event log is closed"));
        }

        let event_id = event.event_id();
        state.events.push(event);
        Ok(event_id)
    }
}

/// Logs each outcome, then forwards it.
///
/// Failures are logged at `warn`, everything else at `info`.
pub struct TracedSink {
    inner: Arc<dyn EventSink>,
}

impl TracedSink {
    pub fn new(inner: Arc<dyn EventSink>) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl EventSink for TracedSink {
    async fn publish(&self, event: FleetEvent) -> Result<EventId> {
        let event_type = event.event_type();
        let device_id = event.device_id().map(|id| id.as_str().to_string());

        if event.is_failure() {
            warn!(event_type, device_id, "Published outcome");
        } else {
            info!(event_type, device_id, "Published outcome");
        }

        self.inner.publish(event).await
    }
}

//! Event sinks for violation notifications.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{RwLock, mpsc};

use crate::error::{Error, Result};
use crate::types::EventInfo;

/// Records notifications for observability.
///
/// Delivery is fire-and-forget: the reconciler logs a failed emit and
/// carries on.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Record an event.
    async fn emit(&self, event: EventInfo) -> Result<()>;
}

#[async_trait]
impl<E: EventSink + ?Sized> EventSink for Arc<E> {
    async fn emit(&self, event: EventInfo) -> Result<()> {
        (**self).emit(event).await
    }
}

/// In-memory event sink for testing.
#[derive(Default)]
pub struct InMemoryEventSink {
    events: RwLock<Vec<EventInfo>>,
}

impl InMemoryEventSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty sink wrapped in an Arc.
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Events recorded so far, in arrival order.
    pub async fn recorded(&self) -> Vec<EventInfo> {
        self.events.read().await.clone()
    }

    /// Number of events recorded so far.
    pub async fn count(&self) -> usize {
        self.events.read().await.len()
    }
}

#[async_trait]
impl EventSink for InMemoryEventSink {
    async fn emit(&self, event: EventInfo) -> Result<()> {
        self.events.write().await.push(event);
        Ok(())
    }
}

/// Forwards events to an event controller over an unbounded channel.
#[derive(Clone)]
pub struct ChannelEventSink {
    sender: mpsc::UnboundedSender<EventInfo>,
}

impl ChannelEventSink {
    /// Create a sink and the receiving end the controller drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<EventInfo>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: EventInfo) -> Result<()> {
        self.sender
            .send(event)
            .map_err(|_| Error::event_sink("event channel closed"))
    }
}

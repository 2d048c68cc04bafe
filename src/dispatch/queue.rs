//! Deferred I/O.
//!
//! Handlers run while the state lock is held, so they never send anything
//! themselves. They record what should be sent in a [`TaskQueue`], and the
//! dispatcher executes it after the lock is released.

use async_trait::async_trait;
use indexmap::IndexSet;
use tracing::warn;

use super::message::Notification;
use crate::state::WebsocketId;

/// The transport layer that actually talks to clients.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, websocket: WebsocketId, notification: &Notification) -> anyhow::Result<()>;

    async fn close(&self, websocket: WebsocketId) -> anyhow::Result<()>;
}

/// Messages and disconnects to perform once the lock is released.
#[derive(Debug, Default)]
pub struct TaskQueue {
    messages: Vec<(WebsocketId, Notification)>,
    disconnects: IndexSet<WebsocketId>,
}

impl TaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty() && self.disconnects.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.disconnects.clear();
    }

    /// Queue `notification` for each destination, once per websocket.
    pub fn message(
        &mut self,
        notification: Notification,
        destinations: impl IntoIterator<Item = WebsocketId>,
    ) {
        let destinations: IndexSet<WebsocketId> = destinations.into_iter().collect();
        for websocket in destinations {
            self.messages.push((websocket, notification.clone()));
        }
    }

    pub fn disconnect(&mut self, websocket: WebsocketId) {
        self.disconnects.insert(websocket);
    }

    pub fn messages(&self) -> &[(WebsocketId, Notification)] {
        &self.messages
    }

    pub fn disconnects(&self) -> impl Iterator<Item = &WebsocketId> {
        self.disconnects.iter()
    }

    /// Deliver every message in order, then close websockets.
    ///
    /// Delivery failures are logged and skipped; one dead connection must
    /// not stop notifications to everyone else.
    pub async fn execute(self, transport: &dyn Transport) {
        for (websocket, notification) in &self.messages {
            if let Err(e) = transport.send(*websocket, notification).await {
                warn!("Failed to send message to {}: {}", websocket, e);
            }
        }
        for websocket in &self.disconnects {
            if let Err(e) = transport.close(*websocket).await {
                warn!("Failed to close {}: {}", websocket, e);
            }
        }
    }
}

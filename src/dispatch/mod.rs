//! The dispatch loop's locking contract.
//!
//! Every inbound message, connection change, and timer tick goes through
//! [`Dispatcher`]:
//!
//! 1. acquire the [`StateHandle`] lock
//! 2. run an [`EventHandler`] against the [`StateManager`](crate::state::StateManager)
//! 3. release the lock
//! 4. deliver the resulting [`TaskQueue`] through the [`Transport`]
//!
//! No I/O happens while the lock is held, and no state is touched after it
//! is released. Decoding wire frames into [`Request`] values is up to the
//! transport.

pub mod handler;
pub mod message;
pub mod queue;

use std::sync::Arc;

use tracing::{info, warn};

pub use handler::{EventHandler, RequestContext};
pub use message::{Notification, Request};
pub use queue::{TaskQueue, Transport};

use crate::config::ServerConfig;
use crate::error::Result;
use crate::scheduler::{Sweep, SweepReport};
use crate::state::{PlayerId, StateHandle, WebsocketId};

#[derive(Clone)]
pub struct Dispatcher {
    state: StateHandle,
    config: Arc<ServerConfig>,
    transport: Arc<dyn Transport>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("state", &self.state)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(state: StateHandle, config: Arc<ServerConfig>, transport: Arc<dyn Transport>) -> Self {
        Self {
            state,
            config,
            transport,
        }
    }

    pub fn state(&self) -> &StateHandle {
        &self.state
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Start tracking a new connection. A refused connection is told why
    /// and then closed.
    pub async fn connected(&self, websocket: WebsocketId) -> Result<()> {
        let result = self
            .process(Some(websocket), |h| h.handle_websocket_connected_event(websocket))
            .await;
        if result.is_err() {
            if let Err(e) = self.transport.close(websocket).await {
                warn!("Failed to close refused websocket {}: {}", websocket, e);
            }
        }
        result
    }

    pub async fn disconnected(&self, websocket: WebsocketId) -> Result<()> {
        self.process(None, |h| h.handle_websocket_disconnected_event(websocket))
            .await
    }

    /// Handle one decoded request. `player_id` is whatever id the client
    /// presented, if any.
    pub async fn request(
        &self,
        websocket: WebsocketId,
        player_id: Option<&PlayerId>,
        request: Request,
    ) -> Result<()> {
        info!("Request {} on {}", request.kind(), websocket);
        self.process(Some(websocket), |h| h.handle_request(websocket, player_id, request))
            .await
    }

    /// Run one consistency sweep as a single critical section.
    pub async fn sweep(&self, sweep: Sweep) -> Result<SweepReport> {
        self.process(None, |h| sweep.run(h)).await
    }

    pub async fn shutdown(&self) -> Result<()> {
        self.process(None, |h| h.handle_server_shutdown_event()).await
    }

    /// Run `f` under the lock, then deliver what it queued. On failure the
    /// queue is dropped and, when there is a requester, it gets a
    /// REQUEST_FAILED instead.
    async fn process<T>(
        &self,
        websocket: Option<WebsocketId>,
        f: impl FnOnce(&mut EventHandler<'_>) -> Result<T>,
    ) -> Result<T> {
        let config = &*self.config;
        let (result, queue) = self
            .state
            .transaction(|manager| {
                let mut handler = EventHandler::new(manager, config);
                let result = f(&mut handler);
                (result, handler.into_queue())
            })
            .await;

        match result {
            Ok(value) => {
                queue.execute(self.transport.as_ref()).await;
                Ok(value)
            }
            Err(e) => {
                warn!("Processing failed: {}", e);
                if let Some(websocket) = websocket {
                    let notification = Notification::request_failed(&e);
                    if let Err(send_error) = self.transport.send(websocket, &notification).await {
                        warn!("Failed to send failure to {}: {}", websocket, send_error);
                    }
                }
                Err(e)
            }
        }
    }
}

//! Websocket tracking.
//!
//! Tracks transport connections and the players registered over them.
//! A websocket does not own its players: closing it leaves them registered
//! (disconnected) so they can reconnect on another transport.

use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexSet;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::player::PlayerId;
use super::ActivityState;

/// Opaque handle for one transport connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WebsocketId(Uuid);

impl WebsocketId {
    /// Allocate a fresh id for a newly accepted connection.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WebsocketId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for WebsocketId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for WebsocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

/// State tracked for a single websocket.
#[derive(Debug, Clone)]
pub struct TrackedWebsocket {
    /// Connection handle
    pub id: WebsocketId,

    /// When the connection was accepted
    pub registration_date: DateTime<Utc>,

    /// Last time any player on this connection did something
    pub last_active_date: DateTime<Utc>,

    /// Current activity classification
    pub activity_state: ActivityState,

    /// Players registered over this connection, in registration order
    player_ids: IndexSet<PlayerId>,
}

impl TrackedWebsocket {
    pub fn new(id: WebsocketId, now: DateTime<Utc>) -> Self {
        Self {
            id,
            registration_date: now,
            last_active_date: now,
            activity_state: ActivityState::Active,
            player_ids: IndexSet::new(),
        }
    }

    pub fn mark_active(&mut self, now: DateTime<Utc>) {
        self.last_active_date = now;
        self.activity_state = ActivityState::Active;
    }

    pub fn mark_idle(&mut self) {
        self.activity_state = ActivityState::Idle;
    }

    pub fn mark_inactive(&mut self) {
        self.activity_state = ActivityState::Inactive;
    }

    /// Associate a player; adding twice is a no-op.
    pub fn add_player(&mut self, player_id: PlayerId) {
        self.player_ids.insert(player_id);
    }

    /// Dissociate a player; removing an unknown player is a no-op.
    pub fn remove_player(&mut self, player_id: &PlayerId) {
        self.player_ids.shift_remove(player_id);
    }

    pub fn has_player(&self, player_id: &PlayerId) -> bool {
        self.player_ids.contains(player_id)
    }

    pub fn player_ids(&self) -> impl Iterator<Item = &PlayerId> {
        self.player_ids.iter()
    }

    pub fn player_count(&self) -> usize {
        self.player_ids.len()
    }
}

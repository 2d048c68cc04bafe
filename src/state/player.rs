//! Player tracking and the player state machine.
//!
//! # State Diagram
//!
//! ```text
//!                 join                start
//! ┌──────────┐ ───────────▶ ┌────────┐ ─────────▶ ┌─────────┐
//! │ Waiting  │              │ Joined │            │ Playing │
//! └──────────┘ ◀─────────── └────────┘            └────┬────┘
//!      ▲          quit                                 │
//!      │                                               │ quit / disconnect
//!      └───────────────────────────────────────────────┘
//! ```
//!
//! A player passes through QUIT on the way back to WAITING; the resting state
//! after a quit is always WAITING with no game. Disconnecting always quits
//! first, so no game can keep a participant that has no live transport.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::game::GameId;
use super::websocket::WebsocketId;
use super::ActivityState;

/// Secret player identifier handed out at registration.
///
/// Possession of this id is what lets a client act as the player, so `Debug`
/// never prints it. Use [`PlayerId::as_str`] when it must go over the wire.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(String);

impl PlayerId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for PlayerId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for PlayerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Debug for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PlayerId(<redacted>)")
    }
}

/// Whether a player currently has a live transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConnectionState {
    #[default]
    Connected,
    Disconnected,
}

/// Where a registered player is in the game lifecycle. Quitting or
/// disconnecting returns a player straight to WAITING.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerState {
    #[default]
    Waiting,
    Joined,
    Playing,
}

/// State tracked for a registered player.
#[derive(Debug, Clone)]
pub struct TrackedPlayer {
    player_id: PlayerId,
    handle: String,

    /// Transport the player is currently bound to
    pub websocket: Option<WebsocketId>,

    pub registration_date: DateTime<Utc>,
    pub last_active_date: DateTime<Utc>,
    pub activity_state: ActivityState,
    pub connection_state: ConnectionState,
    pub player_state: PlayerState,

    /// Game the player has joined, if any
    pub game_id: Option<GameId>,
}

/// Public summary of a registered player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredPlayer {
    pub handle: String,
    pub registration_date: DateTime<Utc>,
    pub last_active_date: DateTime<Utc>,
    pub connection_state: ConnectionState,
    pub activity_state: ActivityState,
    pub player_state: PlayerState,
    pub game_id: Option<GameId>,
}

impl TrackedPlayer {
    /// Create a newly registered, connected player.
    pub fn new(
        player_id: PlayerId,
        websocket: WebsocketId,
        handle: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            player_id,
            handle: handle.into(),
            websocket: Some(websocket),
            registration_date: now,
            last_active_date: now,
            activity_state: ActivityState::Active,
            connection_state: ConnectionState::Connected,
            player_state: PlayerState::Waiting,
            game_id: None,
        }
    }

    pub fn player_id(&self) -> &PlayerId {
        &self.player_id
    }

    pub fn handle(&self) -> &str {
        &self.handle
    }

    pub fn to_registered_player(&self) -> RegisteredPlayer {
        RegisteredPlayer {
            handle: self.handle.clone(),
            registration_date: self.registration_date,
            last_active_date: self.last_active_date,
            connection_state: self.connection_state,
            activity_state: self.activity_state,
            player_state: self.player_state,
            game_id: self.game_id.clone(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connection_state == ConnectionState::Connected
    }

    /// Record activity. Activity over a live websocket implies a connection;
    /// without one the player stays DISCONNECTED until it is rebound.
    pub fn mark_active(&mut self, now: DateTime<Utc>) {
        self.last_active_date = now;
        self.activity_state = ActivityState::Active;
        if self.websocket.is_some() {
            self.connection_state = ConnectionState::Connected;
        }
    }

    pub fn mark_idle(&mut self) {
        self.activity_state = ActivityState::Idle;
    }

    pub fn mark_inactive(&mut self) {
        self.activity_state = ActivityState::Inactive;
    }

    /// Record that the player joined `game_id`. Only valid from WAITING;
    /// callers are responsible for checking.
    pub fn mark_joined(&mut self, game_id: &GameId) {
        self.game_id = Some(game_id.clone());
        self.player_state = PlayerState::Joined;
    }

    pub fn mark_playing(&mut self) {
        self.player_state = PlayerState::Playing;
    }

    /// Leave the current game. Quitting while WAITING is a no-op.
    pub fn mark_quit(&mut self) {
        self.game_id = None;
        self.player_state = PlayerState::Waiting;
    }

    /// Drop the transport. Quits any game first.
    pub fn mark_disconnected(&mut self) {
        self.mark_quit();
        self.websocket = None;
        self.activity_state = ActivityState::Idle;
        self.connection_state = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn make_player(handle: &str) -> TrackedPlayer {
        TrackedPlayer::new(PlayerId::generate(), WebsocketId::new(), handle, now())
    }

    #[test]
    fn test_new_player() {
        let player = make_player("leela");
        assert_eq!(player.handle(), "leela");
        assert!(player.websocket.is_some());
        assert_eq!(player.activity_state, ActivityState::Active);
        assert_eq!(player.connection_state, ConnectionState::Connected);
        assert_eq!(player.player_state, PlayerState::Waiting);
        assert!(player.game_id.is_none());
    }

    #[test]
    fn test_player_id_is_redacted() {
        let id = PlayerId::from("super-secret");
        assert_eq!(format!("{:?}", id), "PlayerId(<redacted>)");
        assert_eq!(id.as_str(), "super-secret");

        let player = TrackedPlayer::new(id, WebsocketId::new(), "leela", now());
        assert!(!format!("{:?}", player).contains("super-secret"));
    }

    #[test]
    fn test_join_play_quit() {
        let mut player = make_player("leela");
        let game_id = GameId::generate();

        player.mark_joined(&game_id);
        assert_eq!(player.player_state, PlayerState::Joined);
        assert_eq!(player.game_id.as_ref(), Some(&game_id));

        player.mark_playing();
        assert_eq!(player.player_state, PlayerState::Playing);

        player.mark_quit();
        assert_eq!(player.player_state, PlayerState::Waiting);
        assert!(player.game_id.is_none());
    }

    #[test]
    fn test_quit_while_waiting_is_noop() {
        let mut player = make_player("leela");
        player.mark_quit();
        assert_eq!(player.player_state, PlayerState::Waiting);
        assert!(player.game_id.is_none());
    }

    #[test]
    fn test_disconnect_quits_first() {
        for joined_only in [true, false] {
            let mut player = make_player("leela");
            player.mark_joined(&GameId::generate());
            if !joined_only {
                player.mark_playing();
            }

            player.mark_disconnected();
            assert!(player.game_id.is_none());
            assert_eq!(player.player_state, PlayerState::Waiting);
            assert!(player.websocket.is_none());
            assert_eq!(player.activity_state, ActivityState::Idle);
            assert_eq!(player.connection_state, ConnectionState::Disconnected);
        }
    }

    #[test]
    fn test_mark_active_needs_websocket_to_reconnect() {
        let mut player = make_player("leela");
        player.mark_disconnected();

        let later = now() + Duration::minutes(1);
        player.mark_active(later);
        assert_eq!(player.activity_state, ActivityState::Active);
        assert_eq!(player.connection_state, ConnectionState::Disconnected);
        assert_eq!(player.last_active_date, later);

        player.websocket = Some(WebsocketId::new());
        player.mark_active(later);
        assert_eq!(player.connection_state, ConnectionState::Connected);
    }

    #[test]
    fn test_to_registered_player() {
        let mut player = make_player("leela");
        let game_id = GameId::generate();
        player.mark_joined(&game_id);
        player.mark_idle();

        let registered = player.to_registered_player();
        assert_eq!(registered.handle, "leela");
        assert_eq!(registered.player_state, PlayerState::Joined);
        assert_eq!(registered.activity_state, ActivityState::Idle);
        assert_eq!(registered.game_id, Some(game_id));
    }
}

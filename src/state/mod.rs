//! Tracked state for the Parlor server.
//!
//! - `websocket` - Transport connections and the players registered on them
//! - `player` - Registered players and the player state machine
//! - `engine` - Adapter over the external rules engine
//! - `game` - Advertised and active games
//! - `manager` - The single registry that owns all of the above
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                   StateHandle (one Mutex, shared)                     │
//! │                                                                      │
//! │  ┌────────────────────────────────────────────────────────────────┐  │
//! │  │                         StateManager                           │  │
//! │  │                                                                │  │
//! │  │  WebsocketId → TrackedWebsocket ──┐ player ids                 │  │
//! │  │                                   ▼                            │  │
//! │  │  PlayerId    → TrackedPlayer ─────┐ game id                    │  │
//! │  │  handle      → PlayerId           ▼                            │  │
//! │  │                                                                │  │
//! │  │  GameId      → TrackedGame ── GamePlayers + GameEngineAdapter  │  │
//! │  └────────────────────────────────────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entities refer to each other only by id. Every id is re-resolved through
//! the manager while the lock is held.

pub mod engine;
pub mod game;
pub mod manager;
pub mod player;
pub mod websocket;

use serde::{Deserialize, Serialize};

pub use engine::{
    EngineFactory, GameEngineAdapter, GameMode, HistoryEntry, Move, MoveResult, PlayerColor,
    RulesEngine,
};
pub use game::{
    AdvertiseGame, AdvertisedGame, CancelledReason, GameId, GamePlayer, GamePlayerState,
    GameState, NamePool, PlayerType, TrackedGame, Visibility,
};
pub use manager::{
    GameActivity, GameCompletion, PlayerActivity, StateHandle, StateManager, WebsocketActivity,
};
pub use player::{ConnectionState, PlayerId, PlayerState, RegisteredPlayer, TrackedPlayer};
pub use websocket::{TrackedWebsocket, WebsocketId};

/// How recently an entity has seen activity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ActivityState {
    #[default]
    Active,
    Idle,
    Inactive,
}

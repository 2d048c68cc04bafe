//! Parlor State Library
//!
//! Session and state coordination for the Parlor multiplayer lobby server.
//!
//! # Overview
//!
//! - **State** - Websockets, registered players and games, owned by a single
//!   [`StateManager`](state::StateManager) behind one lock.
//!
//! - **Engine seam** - Each game drives an external rules engine through a
//!   [`GameEngineAdapter`](state::GameEngineAdapter). A reference engine lives
//!   in [`rules`].
//!
//! - **Dispatch** - Requests and connection events are handled inside one
//!   critical section; notifications are delivered after the lock is released.
//!
//! - **Sweeps** - Periodic idle, inactive and retention checks.
//!
//! # Design Principles
//!
//! 1. **One lock** - Every mutation happens with the state lock held, and no
//!    I/O happens while it is.
//!
//! 2. **Ids, not references** - Entities point at each other by id and are
//!    re-resolved on every use.
//!
//! 3. **No networking** - The transport is a trait; this crate never opens a
//!    socket.
//!
//! 4. **Injected time** - All timestamps come from a [`Clock`](clock::Clock).
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//! use chrono::Utc;
//! use parlor_state::clock::ManualClock;
//! use parlor_state::rules::RaceRules;
//! use parlor_state::state::{AdvertiseGame, GameMode, StateManager, Visibility, WebsocketId};
//!
//! let clock = Arc::new(ManualClock::new(Utc::now()));
//! let mut manager = StateManager::new(clock, Arc::new(RaceRules));
//!
//! let ws = WebsocketId::new();
//! manager.track_websocket(ws).unwrap();
//! let alice = manager.track_player(ws, "Alice").unwrap();
//!
//! let game_id = manager
//!     .track_game(
//!         &alice,
//!         &AdvertiseGame {
//!             name: "Friday night".to_string(),
//!             mode: GameMode::Standard,
//!             players: 2,
//!             visibility: Visibility::Public,
//!             invited_handles: Vec::new(),
//!         },
//!     )
//!     .unwrap();
//!
//! let game = manager.lookup_game_mut(&game_id).unwrap();
//! game.mark_joined("Alice").unwrap();
//! assert!(!game.is_fully_joined());
//! ```

pub mod clock;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod rules;
pub mod scheduler;
pub mod state;

pub use error::{FailureReason, ProcessingError, Result};
pub use state::*;

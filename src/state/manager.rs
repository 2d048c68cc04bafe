//! The state manager.
//!
//! [`StateManager`] owns every tracked websocket, player and game. It is
//! never touched directly by concurrent code: it lives behind the single
//! mutex in [`StateHandle`], and every method assumes that guard is held.
//! Holding `&mut StateManager` is the proof.
//!
//! Lookups never fail. A miss is `None` (or an empty list) and the caller
//! decides whether that matters.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use tokio::sync::{Mutex, MutexGuard};

use super::engine::EngineFactory;
use super::game::{AdvertiseGame, GameId, NamePool, PlayerType, TrackedGame};
use super::player::{ConnectionState, PlayerId, TrackedPlayer};
use super::websocket::{TrackedWebsocket, WebsocketId};
use super::ActivityState;
use crate::clock::{Clock, SystemClock};
use crate::error::{ProcessingError, Result};
use crate::rules::RaceRules;

/// Point-in-time view of a websocket for the idle sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebsocketActivity {
    pub websocket: WebsocketId,
    pub last_active_date: DateTime<Utc>,
    pub activity_state: ActivityState,
    pub player_count: usize,
}

/// Point-in-time view of a player for the idle sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerActivity {
    pub player_id: PlayerId,
    pub handle: String,
    pub last_active_date: DateTime<Utc>,
    pub activity_state: ActivityState,
    pub connection_state: ConnectionState,
}

/// Point-in-time view of a game that has not finished.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameActivity {
    pub game_id: GameId,
    pub last_active_date: DateTime<Utc>,
    pub activity_state: ActivityState,
}

/// Point-in-time view of a finished game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameCompletion {
    pub game_id: GameId,
    pub completed_date: DateTime<Utc>,
}

/// Registry of all websockets, players and games.
#[derive(Debug)]
pub struct StateManager {
    clock: Arc<dyn Clock>,
    factory: Arc<dyn EngineFactory>,
    name_pool: Arc<NamePool>,

    websockets: IndexMap<WebsocketId, TrackedWebsocket>,
    players: IndexMap<PlayerId, TrackedPlayer>,
    /// handle → player_id
    handles: HashMap<String, PlayerId>,
    games: IndexMap<GameId, TrackedGame>,
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock), Arc::new(RaceRules))
    }
}

impl StateManager {
    pub fn new(clock: Arc<dyn Clock>, factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            clock,
            factory,
            name_pool: Arc::new(NamePool::default()),
            websockets: IndexMap::new(),
            players: IndexMap::new(),
            handles: HashMap::new(),
            games: IndexMap::new(),
        }
    }

    /// Use a different pool of programmatic player names for new games.
    pub fn with_name_pool(mut self, name_pool: NamePool) -> Self {
        self.name_pool = Arc::new(name_pool);
        self
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Mark a player active along with the websocket it is bound to.
    pub fn mark_active(&mut self, player_id: &PlayerId) -> Result<()> {
        let player = self
            .players
            .get(player_id)
            .ok_or_else(|| ProcessingError::internal("Unknown player"))?;
        let now = self.clock.now();

        // A disconnected player has no websocket, but one that does must be tracked.
        if let Some(websocket_id) = player.websocket {
            self.websockets
                .get_mut(&websocket_id)
                .ok_or_else(|| ProcessingError::internal("Did not find player websocket"))?
                .mark_active(now);
        }
        if let Some(player) = self.players.get_mut(player_id) {
            player.mark_active(now);
        }
        Ok(())
    }

    // Websockets

    pub fn track_websocket(&mut self, websocket: WebsocketId) -> Result<()> {
        if self.websockets.contains_key(&websocket) {
            return Err(ProcessingError::internal("Duplicate websocket encountered"));
        }
        let now = self.clock.now();
        self.websockets
            .insert(websocket, TrackedWebsocket::new(websocket, now));
        Ok(())
    }

    pub fn delete_websocket(&mut self, websocket: WebsocketId) -> Option<TrackedWebsocket> {
        self.websockets.shift_remove(&websocket)
    }

    pub fn get_websocket_count(&self) -> usize {
        self.websockets.len()
    }

    pub fn lookup_websocket(&self, websocket: WebsocketId) -> Option<&TrackedWebsocket> {
        self.websockets.get(&websocket)
    }

    pub fn lookup_websocket_mut(&mut self, websocket: WebsocketId) -> Option<&mut TrackedWebsocket> {
        self.websockets.get_mut(&websocket)
    }

    pub fn lookup_all_websockets(&self) -> Vec<WebsocketId> {
        self.websockets.keys().copied().collect()
    }

    pub fn lookup_players_for_websocket(&self, websocket: WebsocketId) -> Vec<&TrackedPlayer> {
        self.websockets
            .get(&websocket)
            .map(|ws| {
                ws.player_ids()
                    .filter_map(|id| self.players.get(id))
                    .collect()
            })
            .unwrap_or_default()
    }

    // Games

    /// Track a newly advertised game. The advertiser is not joined to it.
    pub fn track_game(&mut self, player_id: &PlayerId, advertised: &AdvertiseGame) -> Result<GameId> {
        let advertiser = self
            .players
            .get(player_id)
            .ok_or_else(|| ProcessingError::internal("Unknown player"))?
            .handle()
            .to_string();

        let game_id = GameId::generate();
        let game = TrackedGame::new(
            game_id.clone(),
            advertiser,
            advertised,
            self.factory.clone(),
            self.name_pool.clone(),
            self.clock.now(),
        );
        self.games.insert(game_id.clone(), game);
        Ok(game_id)
    }

    pub fn delete_game(&mut self, game_id: &GameId) -> Option<TrackedGame> {
        self.games.shift_remove(game_id)
    }

    pub fn get_total_game_count(&self) -> usize {
        self.games.len()
    }

    pub fn get_in_progress_game_count(&self) -> usize {
        self.games.values().filter(|g| g.is_in_progress()).count()
    }

    pub fn lookup_game(&self, game_id: &GameId) -> Option<&TrackedGame> {
        self.games.get(game_id)
    }

    pub fn lookup_game_mut(&mut self, game_id: &GameId) -> Option<&mut TrackedGame> {
        self.games.get_mut(game_id)
    }

    /// The game a player has joined, if any.
    pub fn lookup_game_for_player(&self, player_id: &PlayerId) -> Option<&TrackedGame> {
        let game_id = self.players.get(player_id)?.game_id.as_ref()?;
        self.games.get(game_id)
    }

    pub fn lookup_all_games(&self) -> Vec<&TrackedGame> {
        self.games.values().collect()
    }

    pub fn lookup_in_progress_games(&self) -> Vec<&TrackedGame> {
        self.games.values().filter(|g| g.is_in_progress()).collect()
    }

    /// Games the player with `handle` may join.
    pub fn lookup_available_games(&self, handle: &str) -> Vec<&TrackedGame> {
        self.games.values().filter(|g| g.is_available(handle)).collect()
    }

    /// Registered human players participating in a game.
    pub fn lookup_game_players(&self, game_id: &GameId) -> Vec<&TrackedPlayer> {
        let Some(game) = self.games.get(game_id) else {
            return Vec::new();
        };
        game.get_game_players()
            .iter()
            .filter(|p| p.player_type == PlayerType::Human)
            .filter_map(|p| self.lookup_player_by_handle(&p.handle))
            .collect()
    }

    // Players

    /// Register a player on a websocket, returning its new secret id.
    pub fn track_player(&mut self, websocket: WebsocketId, handle: &str) -> Result<PlayerId> {
        if self.handles.contains_key(handle) {
            return Err(ProcessingError::DuplicateUser {
                handle: handle.to_string(),
            });
        }
        let now = self.clock.now();
        let ws = self
            .websockets
            .get_mut(&websocket)
            .ok_or_else(|| ProcessingError::internal("Unknown websocket"))?;

        let player_id = PlayerId::generate();
        ws.mark_active(now);
        ws.add_player(player_id.clone());
        self.players.insert(
            player_id.clone(),
            TrackedPlayer::new(player_id.clone(), websocket, handle, now),
        );
        self.handles.insert(handle.to_string(), player_id.clone());
        Ok(player_id)
    }

    /// Bind an existing player to a different websocket.
    pub fn retrack_player(&mut self, player_id: &PlayerId, websocket: WebsocketId) -> Result<()> {
        if !self.websockets.contains_key(&websocket) {
            return Err(ProcessingError::internal("Unknown websocket"));
        }
        let now = self.clock.now();
        let player = self
            .players
            .get_mut(player_id)
            .ok_or_else(|| ProcessingError::internal("Unknown player"))?;
        let previous = player.websocket.replace(websocket);
        player.mark_active(now);

        if let Some(old) = previous.filter(|old| *old != websocket) {
            if let Some(ws) = self.websockets.get_mut(&old) {
                ws.remove_player(player_id);
            }
        }
        if let Some(ws) = self.websockets.get_mut(&websocket) {
            ws.mark_active(now);
            ws.add_player(player_id.clone());
        }
        Ok(())
    }

    pub fn delete_player(&mut self, player_id: &PlayerId) -> Option<TrackedPlayer> {
        let player = self.players.shift_remove(player_id)?;
        if let Some(ws) = player.websocket.and_then(|id| self.websockets.get_mut(&id)) {
            ws.remove_player(player_id);
        }
        self.handles.remove(player.handle());
        Some(player)
    }

    pub fn get_registered_player_count(&self) -> usize {
        self.players.len()
    }

    pub fn lookup_player(&self, player_id: &PlayerId) -> Option<&TrackedPlayer> {
        self.players.get(player_id)
    }

    pub fn lookup_player_mut(&mut self, player_id: &PlayerId) -> Option<&mut TrackedPlayer> {
        self.players.get_mut(player_id)
    }

    pub fn lookup_player_by_handle(&self, handle: &str) -> Option<&TrackedPlayer> {
        self.handles.get(handle).and_then(|id| self.players.get(id))
    }

    pub fn lookup_all_players(&self) -> Vec<&TrackedPlayer> {
        self.players.values().collect()
    }

    // Snapshots

    pub fn lookup_websocket_activity(&self) -> Vec<WebsocketActivity> {
        self.websockets
            .values()
            .map(|ws| WebsocketActivity {
                websocket: ws.id,
                last_active_date: ws.last_active_date,
                activity_state: ws.activity_state,
                player_count: ws.player_count(),
            })
            .collect()
    }

    pub fn lookup_player_activity(&self) -> Vec<PlayerActivity> {
        self.players
            .values()
            .map(|p| PlayerActivity {
                player_id: p.player_id().clone(),
                handle: p.handle().to_string(),
                last_active_date: p.last_active_date,
                activity_state: p.activity_state,
                connection_state: p.connection_state,
            })
            .collect()
    }

    /// Activity for every game that has not finished.
    pub fn lookup_game_activity(&self) -> Vec<GameActivity> {
        self.games
            .values()
            .filter(|g| !g.is_completed())
            .map(|g| GameActivity {
                game_id: g.game_id.clone(),
                last_active_date: g.last_active_date,
                activity_state: g.activity_state,
            })
            .collect()
    }

    /// Completion time for every finished game.
    pub fn lookup_game_completion(&self) -> Vec<GameCompletion> {
        self.games
            .values()
            .filter_map(|g| {
                g.completed_date.map(|completed_date| GameCompletion {
                    game_id: g.game_id.clone(),
                    completed_date,
                })
            })
            .collect()
    }
}

/// Shared handle to the one lock around the [`StateManager`].
///
/// Acquire the lock, mutate, drop the guard, and only then do any I/O.
#[derive(Debug, Clone)]
pub struct StateHandle {
    inner: Arc<Mutex<StateManager>>,
}

impl StateHandle {
    pub fn new(manager: StateManager) -> Self {
        Self {
            inner: Arc::new(Mutex::new(manager)),
        }
    }

    /// Acquire the lock. Callers are queued in acquisition order.
    pub async fn lock(&self) -> MutexGuard<'_, StateManager> {
        self.inner.lock().await
    }

    /// Run `f` as one critical section. The guard is released on every exit
    /// path, including when `f` returns an error.
    pub async fn transaction<T>(&self, f: impl FnOnce(&mut StateManager) -> T) -> T {
        let mut guard = self.inner.lock().await;
        f(&mut *guard)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::state::engine::GameMode;
    use crate::state::game::Visibility;
    use crate::state::player::PlayerState;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
    }

    fn manager() -> (StateManager, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(start()));
        let manager = StateManager::new(clock.clone(), Arc::new(RaceRules));
        (manager, clock)
    }

    fn connect(manager: &mut StateManager) -> WebsocketId {
        let ws = WebsocketId::new();
        manager.track_websocket(ws).unwrap();
        ws
    }

    fn advertise(players: usize) -> AdvertiseGame {
        AdvertiseGame {
            name: "Friday night".to_string(),
            mode: GameMode::Standard,
            players,
            visibility: Visibility::Public,
            invited_handles: Vec::new(),
        }
    }

    #[test]
    fn test_track_websocket_rejects_duplicates() {
        let (mut manager, _) = manager();
        let ws = connect(&mut manager);
        assert!(manager.track_websocket(ws).is_err());
        assert_eq!(manager.get_websocket_count(), 1);

        assert!(manager.delete_websocket(ws).is_some());
        assert!(manager.delete_websocket(ws).is_none());
        assert_eq!(manager.get_websocket_count(), 0);
    }

    #[test]
    fn test_track_player_unique_handles() {
        let (mut manager, _) = manager();
        let ws = connect(&mut manager);
        let leela = manager.track_player(ws, "leela").unwrap();

        let err = manager.track_player(ws, "leela").unwrap_err();
        assert_eq!(
            err,
            ProcessingError::DuplicateUser {
                handle: "leela".to_string()
            }
        );
        assert_eq!(manager.get_registered_player_count(), 1);
        assert_eq!(manager.lookup_websocket(ws).unwrap().player_count(), 1);

        let fry = manager.track_player(ws, "fry").unwrap();
        assert_ne!(leela, fry);
        assert_eq!(manager.lookup_player_by_handle("fry").unwrap().player_id(), &fry);
        assert_eq!(manager.lookup_player_by_handle("leela").unwrap().player_id(), &leela);
    }

    #[test]
    fn test_track_player_requires_websocket() {
        let (mut manager, _) = manager();
        assert!(manager.track_player(WebsocketId::new(), "leela").is_err());
        assert!(manager.lookup_player_by_handle("leela").is_none());
    }

    #[test]
    fn test_track_player_activates_websocket() {
        let (mut manager, clock) = manager();
        let ws = connect(&mut manager);
        manager.lookup_websocket_mut(ws).unwrap().mark_idle();

        clock.advance_minutes(3);
        manager.track_player(ws, "leela").unwrap();

        let tracked = manager.lookup_websocket(ws).unwrap();
        assert_eq!(tracked.activity_state, ActivityState::Active);
        assert_eq!(tracked.last_active_date, clock.now());
    }

    #[test]
    fn test_mark_active_co_activates() {
        let (mut manager, clock) = manager();
        let ws = connect(&mut manager);
        let leela = manager.track_player(ws, "leela").unwrap();
        manager.lookup_player_mut(&leela).unwrap().mark_idle();
        manager.lookup_websocket_mut(ws).unwrap().mark_inactive();

        clock.advance_minutes(10);
        manager.mark_active(&leela).unwrap();

        let player = manager.lookup_player(&leela).unwrap();
        let websocket = manager.lookup_websocket(ws).unwrap();
        assert_eq!(player.activity_state, ActivityState::Active);
        assert_eq!(websocket.activity_state, ActivityState::Active);
        assert_eq!(player.last_active_date, clock.now());
        assert!(websocket.last_active_date >= player.last_active_date);
    }

    #[test]
    fn test_mark_active_without_websocket() {
        let (mut manager, _) = manager();
        let ws = connect(&mut manager);
        let leela = manager.track_player(ws, "leela").unwrap();
        manager.lookup_player_mut(&leela).unwrap().mark_disconnected();

        manager.mark_active(&leela).unwrap();
        let player = manager.lookup_player(&leela).unwrap();
        assert_eq!(player.activity_state, ActivityState::Active);
        assert!(!player.is_connected());
        assert!(manager.mark_active(&PlayerId::from("nobody")).is_err());
    }

    #[test]
    fn test_mark_active_dangling_websocket_fails() {
        let (mut manager, _) = manager();
        let ws = connect(&mut manager);
        let leela = manager.track_player(ws, "leela").unwrap();
        manager.lookup_player_mut(&leela).unwrap().mark_idle();
        manager.delete_websocket(ws);

        assert!(manager.mark_active(&leela).is_err());
        assert_eq!(
            manager.lookup_player(&leela).unwrap().activity_state,
            ActivityState::Idle
        );
    }

    #[test]
    fn test_retrack_player_moves_websocket() {
        let (mut manager, _) = manager();
        let old = connect(&mut manager);
        let new = connect(&mut manager);
        let leela = manager.track_player(old, "leela").unwrap();
        let game_id = manager.track_game(&leela, &advertise(2)).unwrap();
        manager.lookup_player_mut(&leela).unwrap().mark_joined(&game_id);

        manager.retrack_player(&leela, new).unwrap();

        let player = manager.lookup_player(&leela).unwrap();
        assert_eq!(player.websocket, Some(new));
        assert_eq!(player.player_state, PlayerState::Joined);
        assert_eq!(player.game_id.as_ref(), Some(&game_id));
        assert!(manager.lookup_players_for_websocket(old).is_empty());
        assert_eq!(manager.lookup_players_for_websocket(new).len(), 1);
        assert!(manager.retrack_player(&leela, WebsocketId::new()).is_err());
    }

    #[test]
    fn test_retrack_reconnects_disconnected_player() {
        let (mut manager, _) = manager();
        let old = connect(&mut manager);
        let leela = manager.track_player(old, "leela").unwrap();
        manager.lookup_player_mut(&leela).unwrap().mark_disconnected();
        manager.delete_websocket(old);

        let new = connect(&mut manager);
        manager.retrack_player(&leela, new).unwrap();
        let player = manager.lookup_player(&leela).unwrap();
        assert!(player.is_connected());
        assert_eq!(player.activity_state, ActivityState::Active);
    }

    #[test]
    fn test_delete_player() {
        let (mut manager, _) = manager();
        let ws = connect(&mut manager);
        let leela = manager.track_player(ws, "leela").unwrap();

        let deleted = manager.delete_player(&leela).unwrap();
        assert_eq!(deleted.handle(), "leela");
        assert!(manager.lookup_player(&leela).is_none());
        assert!(manager.lookup_player_by_handle("leela").is_none());
        assert!(manager.lookup_players_for_websocket(ws).is_empty());
        assert!(manager.delete_player(&leela).is_none());

        // the handle is free again
        assert!(manager.track_player(ws, "leela").is_ok());
    }

    #[test]
    fn test_game_lookups_and_counts() {
        let (mut manager, _) = manager();
        let ws = connect(&mut manager);
        let leela = manager.track_player(ws, "leela").unwrap();
        let fry = manager.track_player(ws, "fry").unwrap();

        let first = manager.track_game(&leela, &advertise(2)).unwrap();
        let second = manager.track_game(&fry, &advertise(3)).unwrap();
        assert_eq!(manager.get_total_game_count(), 2);
        assert_eq!(manager.get_in_progress_game_count(), 2);
        assert_eq!(manager.lookup_game(&first).unwrap().advertiser_handle, "leela");

        let now = manager.now();
        let game = manager.lookup_game_mut(&second).unwrap();
        game.mark_cancelled(crate::state::CancelledReason::Cancelled, None, now)
            .unwrap();
        assert_eq!(manager.get_in_progress_game_count(), 1);
        assert_eq!(manager.lookup_in_progress_games().len(), 1);
        assert_eq!(manager.lookup_available_games("bender").len(), 1);
        assert_eq!(manager.lookup_all_games().len(), 2);

        assert!(manager.lookup_game_for_player(&leela).is_none());
        manager.lookup_game_mut(&first).unwrap().mark_joined("leela").unwrap();
        manager.lookup_player_mut(&leela).unwrap().mark_joined(&first);
        assert_eq!(
            manager.lookup_game_for_player(&leela).unwrap().game_id,
            first
        );

        assert!(manager.delete_game(&second).is_some());
        assert!(manager.lookup_game(&second).is_none());
        assert!(manager.track_game(&PlayerId::from("nobody"), &advertise(2)).is_err());
    }

    #[test]
    fn test_lookup_game_players_skips_programmatic() {
        let (mut manager, _) = manager();
        let ws = connect(&mut manager);
        let leela = manager.track_player(ws, "leela").unwrap();
        let game_id = manager.track_game(&leela, &advertise(3)).unwrap();

        let now = manager.now();
        let game = manager.lookup_game_mut(&game_id).unwrap();
        game.mark_joined("leela").unwrap();
        game.mark_started(now).unwrap();

        let players = manager.lookup_game_players(&game_id);
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].handle(), "leela");
        assert!(manager.lookup_game_players(&GameId::generate()).is_empty());
    }

    #[test]
    fn test_activity_snapshots() {
        let (mut manager, clock) = manager();
        let ws = connect(&mut manager);
        let leela = manager.track_player(ws, "leela").unwrap();
        let open = manager.track_game(&leela, &advertise(2)).unwrap();
        let done = manager.track_game(&leela, &advertise(2)).unwrap();

        clock.advance_minutes(1);
        let now = manager.now();
        manager
            .lookup_game_mut(&done)
            .unwrap()
            .mark_cancelled(crate::state::CancelledReason::Inactive, None, now)
            .unwrap();

        let websockets = manager.lookup_websocket_activity();
        assert_eq!(websockets.len(), 1);
        assert_eq!(websockets[0].player_count, 1);

        let players = manager.lookup_player_activity();
        assert_eq!(players[0].handle, "leela");
        assert_eq!(players[0].connection_state, ConnectionState::Connected);

        let games = manager.lookup_game_activity();
        assert_eq!(games.len(), 1);
        assert_eq!(games[0].game_id, open);

        assert_eq!(
            manager.lookup_game_completion(),
            vec![GameCompletion {
                game_id: done,
                completed_date: now
            }]
        );
    }

    #[tokio::test]
    async fn test_state_handle_transaction() {
        let handle = StateHandle::new(StateManager::default());

        let ws = WebsocketId::new();
        let result = handle
            .transaction(|state| -> Result<PlayerId> {
                state.track_websocket(ws)?;
                state.track_player(ws, "leela")
            })
            .await;
        assert!(result.is_ok());

        let failed = handle
            .transaction(|state| state.track_player(ws, "leela"))
            .await;
        assert!(failed.is_err());

        // the lock was released on the error path
        let state = handle.lock().await;
        assert_eq!(state.get_registered_player_count(), 1);
    }
}

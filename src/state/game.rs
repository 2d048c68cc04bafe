//! Game tracking.
//!
//! A [`TrackedGame`] is created when a player advertises a game and lives
//! until it has been completed or cancelled and then aged out.
//!
//! # State Diagram
//!
//! ```text
//!              start                complete
//! ┌────────────┐ ──────▶ ┌─────────┐ ──────▶ ┌───────────┐
//! │ Advertised │         │ Playing │         │ Completed │
//! └─────┬──────┘         └────┬────┘         └───────────┘
//!       │ cancel              │ cancel
//!       ▼                     ▼
//! ┌─────────────────────────────────┐
//! │            Cancelled            │
//! └─────────────────────────────────┘
//! ```
//!
//! Membership can only change while the game is advertised. Once play
//! starts, participants stay in the map and only their state changes.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::{IndexMap, IndexSet};
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::engine::{
    EngineFactory, GameEngineAdapter, GameMode, HistoryEntry, Move, MoveResult, PlayerColor,
};
use super::ActivityState;
use crate::error::{ProcessingError, Result};

/// Handles given to programmatic players.
pub const DEFAULT_NAMES: [&str; 24] = [
    "Aragorn",
    "Arwen",
    "Bilbo",
    "Boromir",
    "Elrond",
    "Éomer",
    "Éowyn",
    "Faramir",
    "Frodo",
    "Galadriel",
    "Gandalf",
    "Gimli",
    "Gollum",
    "Isildur",
    "Legolas",
    "Merry",
    "Pippen",
    "Radagast",
    "Samwise",
    "Saruman",
    "Sauron",
    "Shelob",
    "Théoden",
    "Treebeard",
];

/// Unique game identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GameId(String);

impl GameId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for GameId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for GameId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl fmt::Display for GameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Visibility {
    #[default]
    Public,
    /// Only invited handles may join
    Private,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameState {
    Advertised,
    Playing,
    Completed,
    Cancelled,
}

impl GameState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

/// Why a game was cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancelledReason {
    Cancelled,
    NotViable,
    Inactive,
    Shutdown,
}

impl CancelledReason {
    pub fn description(&self) -> &'static str {
        match self {
            Self::Cancelled => "Game was cancelled by advertiser",
            Self::NotViable => "Game is no longer viable.",
            Self::Inactive => "The game was idle too long and was marked inactive",
            Self::Shutdown => "Game was cancelled due to system shutdown",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerType {
    Human,
    Programmatic,
}

/// A participant's state within one game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GamePlayerState {
    Joined,
    Playing,
    Quit,
    Disconnected,
    Finished,
}

/// A participant in a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GamePlayer {
    pub handle: String,
    /// Assigned when the game starts
    pub player_color: Option<PlayerColor>,
    pub player_type: PlayerType,
    pub player_state: GamePlayerState,
}

impl GamePlayer {
    fn joined(handle: impl Into<String>, player_type: PlayerType) -> Self {
        Self {
            handle: handle.into(),
            player_color: None,
            player_type,
            player_state: GamePlayerState::Joined,
        }
    }

    /// Whether this participant can still take turns.
    pub fn is_available(&self) -> bool {
        !matches!(
            self.player_state,
            GamePlayerState::Quit | GamePlayerState::Disconnected
        )
    }
}

/// What a player asks for when advertising a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertiseGame {
    pub name: String,
    pub mode: GameMode,
    pub players: usize,
    pub visibility: Visibility,
    #[serde(default)]
    pub invited_handles: Vec<String>,
}

/// Public summary of an advertised game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvertisedGame {
    pub game_id: GameId,
    pub name: String,
    pub mode: GameMode,
    pub advertiser_handle: String,
    pub players: usize,
    pub available: usize,
    pub visibility: Visibility,
    pub invited_handles: Vec<String>,
}

/// Bounded pool of handles for programmatic players.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamePool {
    names: IndexSet<String>,
}

impl Default for NamePool {
    fn default() -> Self {
        Self::new(DEFAULT_NAMES)
    }
}

impl NamePool {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Pick `needed` distinct names at random, skipping any in `used`.
    pub fn draw<'a>(
        &'a self,
        needed: usize,
        used: impl Fn(&str) -> bool,
    ) -> Result<Vec<&'a str>> {
        let available: Vec<&str> = self
            .names
            .iter()
            .map(String::as_str)
            .filter(|name| !used(name))
            .collect();
        if available.len() < needed {
            return Err(ProcessingError::NamePoolExhausted {
                needed,
                available: available.len(),
            });
        }
        Ok(available
            .choose_multiple(&mut rand::thread_rng(), needed)
            .copied()
            .collect())
    }
}

/// State tracked for a single game.
#[derive(Debug)]
pub struct TrackedGame {
    pub game_id: GameId,
    pub advertiser_handle: String,
    pub name: String,
    pub mode: GameMode,
    /// Requested number of players
    pub players: usize,
    pub visibility: Visibility,
    pub invited_handles: Vec<String>,

    pub advertised_date: DateTime<Utc>,
    pub last_active_date: DateTime<Utc>,
    pub started_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,

    pub game_state: GameState,
    pub activity_state: ActivityState,
    pub cancelled_reason: Option<CancelledReason>,
    pub completed_comment: Option<String>,

    /// Participants by handle, in join order
    game_players: IndexMap<String, GamePlayer>,

    engine: GameEngineAdapter,
    name_pool: Arc<NamePool>,
}

impl TrackedGame {
    pub fn new(
        game_id: GameId,
        advertiser_handle: impl Into<String>,
        context: &AdvertiseGame,
        factory: Arc<dyn EngineFactory>,
        name_pool: Arc<NamePool>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            game_id,
            advertiser_handle: advertiser_handle.into(),
            name: context.name.clone(),
            mode: context.mode,
            players: context.players,
            visibility: context.visibility,
            invited_handles: context.invited_handles.clone(),
            advertised_date: now,
            last_active_date: now,
            started_date: None,
            completed_date: None,
            game_state: GameState::Advertised,
            activity_state: ActivityState::Active,
            cancelled_reason: None,
            completed_comment: None,
            game_players: IndexMap::new(),
            engine: GameEngineAdapter::new(factory),
            name_pool,
        }
    }

    pub fn to_advertised_game(&self) -> AdvertisedGame {
        AdvertisedGame {
            game_id: self.game_id.clone(),
            name: self.name.clone(),
            mode: self.mode,
            advertiser_handle: self.advertiser_handle.clone(),
            players: self.players,
            available: self.players.saturating_sub(self.game_players.len()),
            visibility: self.visibility,
            invited_handles: self.invited_handles.clone(),
        }
    }

    pub fn game_player(&self, handle: &str) -> Option<&GamePlayer> {
        self.game_players.get(handle)
    }

    pub fn get_game_players(&self) -> Vec<GamePlayer> {
        self.game_players.values().cloned().collect()
    }

    /// Participants that have neither quit nor disconnected.
    pub fn get_available_players(&self) -> Vec<GamePlayer> {
        self.game_players
            .values()
            .filter(|p| p.is_available())
            .cloned()
            .collect()
    }

    pub fn get_available_player_count(&self) -> usize {
        self.game_players.values().filter(|p| p.is_available()).count()
    }

    // Queries

    pub fn is_available(&self, handle: &str) -> bool {
        self.is_advertised()
            && (self.visibility == Visibility::Public
                || self.invited_handles.iter().any(|h| h == handle))
    }

    pub fn is_advertised(&self) -> bool {
        self.game_state == GameState::Advertised
    }

    pub fn is_playing(&self) -> bool {
        self.game_state == GameState::Playing
    }

    /// Advertised or playing.
    pub fn is_in_progress(&self) -> bool {
        !self.game_state.is_terminal()
    }

    pub fn is_completed(&self) -> bool {
        self.completed_date.is_some()
    }

    pub fn is_fully_joined(&self) -> bool {
        self.game_players.len() == self.players
    }

    /// Advertised games are always viable. Otherwise at least two
    /// participants must still be able to take turns.
    pub fn is_viable(&self) -> bool {
        self.is_advertised() || self.get_available_player_count() >= 2
    }

    // Engine delegation

    /// The handle due to move next and what kind of player it is.
    pub fn get_next_turn(&self) -> Result<(String, PlayerType)> {
        let handle = self.engine.get_next_turn()?;
        let player = self
            .game_players
            .get(handle)
            .ok_or_else(ProcessingError::illegal_state)?;
        Ok((handle.to_string(), player.player_type))
    }

    pub fn get_legal_moves(&self, handle: &str) -> Result<Vec<Move>> {
        self.engine.get_legal_moves(handle)
    }

    pub fn get_player_view(&self, handle: &str) -> Result<serde_json::Value> {
        self.engine.get_player_view(handle)
    }

    pub fn get_recent_history(&self, max_entries: usize) -> Result<Vec<HistoryEntry>> {
        self.engine.get_recent_history(max_entries)
    }

    pub fn is_move_pending(&self, handle: &str) -> bool {
        self.engine.is_move_pending(handle)
    }

    pub fn is_legal_move(&self, handle: &str, move_id: &str) -> bool {
        self.engine.is_legal_move(handle, move_id)
    }

    pub fn suggest_move(&self, handle: &str) -> Result<Move> {
        self.engine.suggest_move(handle)
    }

    pub fn execute_move(
        &mut self,
        handle: &str,
        move_id: &str,
        now: DateTime<Utc>,
    ) -> Result<MoveResult> {
        self.engine.execute_move(handle, move_id, now)
    }

    // Activity

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

    // Lifecycle

    /// Add a human participant.
    pub fn mark_joined(&mut self, handle: &str) -> Result<()> {
        if !self.is_advertised() || self.game_players.contains_key(handle) {
            return Err(ProcessingError::illegal_state());
        }
        if self.is_fully_joined() {
            return Err(ProcessingError::internal("Game is already fully joined"));
        }
        self.game_players
            .insert(handle.to_string(), GamePlayer::joined(handle, PlayerType::Human));
        Ok(())
    }

    /// Start play, filling empty seats with programmatic players.
    ///
    /// Returns the colour assigned to each participant.
    pub fn mark_started(&mut self, now: DateTime<Utc>) -> Result<IndexMap<String, PlayerColor>> {
        if !self.is_advertised() {
            return Err(ProcessingError::illegal_state());
        }

        let needed = self.players.saturating_sub(self.game_players.len());
        let fillers: Vec<String> = self
            .name_pool
            .draw(needed, |name| self.game_players.contains_key(name))?
            .into_iter()
            .map(str::to_string)
            .collect();

        let handles: Vec<String> = self
            .game_players
            .keys()
            .cloned()
            .chain(fillers.iter().cloned())
            .collect();
        let colors = self.engine.start_game(self.mode, &handles, now)?;

        for handle in fillers {
            let player = GamePlayer::joined(handle.clone(), PlayerType::Programmatic);
            self.game_players.insert(handle, player);
        }
        for (handle, player) in self.game_players.iter_mut() {
            player.player_color = colors.get(handle).copied();
            player.player_state = GamePlayerState::Playing;
        }

        self.game_state = GameState::Playing;
        self.started_date = Some(now);
        self.last_active_date = now;
        Ok(colors)
    }

    pub fn mark_completed(&mut self, comment: Option<String>, now: DateTime<Utc>) -> Result<()> {
        if !self.is_playing() {
            return Err(ProcessingError::illegal_state());
        }
        self.finish(GameState::Completed, comment, now);
        Ok(())
    }

    pub fn mark_cancelled(
        &mut self,
        reason: CancelledReason,
        comment: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        if !self.is_in_progress() {
            return Err(ProcessingError::illegal_state());
        }
        self.cancelled_reason = Some(reason);
        self.finish(GameState::Cancelled, comment, now);
        Ok(())
    }

    fn finish(&mut self, state: GameState, comment: Option<String>, now: DateTime<Utc>) {
        debug_assert!(state.is_terminal());
        self.game_state = state;
        self.completed_date = Some(now);
        self.completed_comment = comment;
        for player in self.game_players.values_mut() {
            player.player_state = GamePlayerState::Finished;
        }
        self.engine.stop_game();
    }

    /// Remove a participant before play, or mark them QUIT during play.
    pub fn mark_quit(&mut self, handle: &str) -> Result<()> {
        self.depart(handle, GamePlayerState::Quit)
    }

    /// As [`TrackedGame::mark_quit`], recording that the participant lost
    /// their connection rather than leaving.
    pub fn mark_player_disconnected(&mut self, handle: &str) -> Result<()> {
        self.depart(handle, GamePlayerState::Disconnected)
    }

    fn depart(&mut self, handle: &str, state: GamePlayerState) -> Result<()> {
        match self.game_state {
            GameState::Advertised => {
                self.game_players
                    .shift_remove(handle)
                    .ok_or_else(ProcessingError::illegal_state)?;
            }
            GameState::Playing => {
                let player = self
                    .game_players
                    .get_mut(handle)
                    .ok_or_else(ProcessingError::illegal_state)?;
                player.player_state = state;
            }
            GameState::Completed | GameState::Cancelled => {
                return Err(ProcessingError::illegal_state());
            }
        }
        Ok(())
    }
}

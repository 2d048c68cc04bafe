//! Rules-engine adapter.
//!
//! [`GameEngineAdapter`] is the only code that talks to a [`RulesEngine`].
//! It keeps track of whose turn it is and which moves are legal for that
//! player, so the rest of the state layer never depends on engine internals.
//!
//! An engine that lets a player take another turn (for example, a move that
//! grants a repeat) reports the turn as not over; the adapter then recomputes
//! the view and legal moves for the same player instead of advancing.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::{ProcessingError, Result};

/// Variants of play supported by the engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameMode {
    #[default]
    Standard,
    Adult,
}

/// Seat colours, assigned in join order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlayerColor {
    Red,
    Yellow,
    Green,
    Blue,
}

impl PlayerColor {
    pub const ALL: [PlayerColor; 4] = [Self::Red, Self::Yellow, Self::Green, Self::Blue];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Red => "red",
            Self::Yellow => "yellow",
            Self::Green => "green",
            Self::Blue => "blue",
        }
    }
}

/// Maximum number of seats any engine supports.
pub const MAX_PLAYERS: usize = PlayerColor::ALL.len();

/// A move offered to a player.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Move {
    pub id: String,
    pub description: String,
}

/// One entry in a game's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub color: Option<PlayerColor>,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

/// Outcome of [`GameEngineAdapter::execute_move`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveResult {
    pub completed: bool,
    pub winner: Option<String>,
    pub comment: Option<String>,
}

impl MoveResult {
    fn in_progress() -> Self {
        Self {
            completed: false,
            winner: None,
            comment: None,
        }
    }
}

/// An external turn-based rules engine for one game.
pub trait RulesEngine: Send + fmt::Debug {
    /// Advance play and return the colour that must move next.
    fn next_turn(&mut self) -> PlayerColor;

    /// Legal moves for `color` in the current position, in a stable order.
    fn legal_moves(&self, color: PlayerColor) -> Vec<Move>;

    /// The game as visible to `color`.
    fn player_view(&self, color: PlayerColor) -> serde_json::Value;

    /// Apply a move, stamping any history it records with `now`. Returns
    /// `true` when the player's turn is over, `false` when the same player
    /// moves again.
    fn execute_move(&mut self, color: PlayerColor, mv: &Move, now: DateTime<Utc>) -> bool;

    /// The winning colour and how many turns it took, once play has finished.
    fn winner(&self) -> Option<(PlayerColor, u32)>;

    fn history(&self) -> &[HistoryEntry];

    /// Pick the best move from `moves` on behalf of `color`.
    fn suggest_move(&self, color: PlayerColor, moves: &[Move]) -> Option<Move>;
}

/// Creates a [`RulesEngine`] when a game starts.
pub trait EngineFactory: Send + Sync + fmt::Debug {
    /// Seats are filled in order from [`PlayerColor::ALL`]; `now` is the
    /// start time.
    fn create(
        &self,
        mode: GameMode,
        colors: &[PlayerColor],
        now: DateTime<Utc>,
    ) -> Box<dyn RulesEngine>;
}

/// Whose turn it is, with their view and legal moves captured at turn start.
#[derive(Debug, Clone)]
struct CurrentTurn {
    handle: String,
    color: PlayerColor,
    view: serde_json::Value,
    moves: Vec<Move>,
}

impl CurrentTurn {
    fn for_handle(engine: &dyn RulesEngine, handle: String, color: PlayerColor) -> Self {
        Self {
            handle,
            color,
            view: engine.player_view(color),
            moves: engine.legal_moves(color),
        }
    }

    fn find(&self, move_id: &str) -> Option<&Move> {
        self.moves.iter().find(|m| m.id == move_id)
    }
}

#[derive(Debug)]
struct RunningGame {
    engine: Box<dyn RulesEngine>,
    colors: IndexMap<String, PlayerColor>,
    /// None once the game has been won
    current: Option<CurrentTurn>,
}

impl RunningGame {
    fn handle_for(&self, color: PlayerColor) -> Option<&str> {
        self.colors
            .iter()
            .find(|(_, c)| **c == color)
            .map(|(handle, _)| handle.as_str())
    }

    fn next_player(&mut self) -> Result<CurrentTurn> {
        let color = self.engine.next_turn();
        let handle = self
            .handle_for(color)
            .ok_or_else(|| ProcessingError::internal("Engine chose an unassigned color"))?
            .to_string();
        Ok(CurrentTurn::for_handle(self.engine.as_ref(), handle, color))
    }
}

#[derive(Debug)]
enum EngineState {
    NotStarted,
    Running(RunningGame),
}

/// Per-game wrapper around a [`RulesEngine`].
pub struct GameEngineAdapter {
    factory: Arc<dyn EngineFactory>,
    state: EngineState,
}

impl fmt::Debug for GameEngineAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameEngineAdapter")
            .field("state", &self.state)
            .finish()
    }
}

impl GameEngineAdapter {
    pub fn new(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            state: EngineState::NotStarted,
        }
    }

    pub fn is_started(&self) -> bool {
        matches!(self.state, EngineState::Running(_))
    }

    fn running(&self) -> Result<&RunningGame> {
        match &self.state {
            EngineState::Running(game) => Ok(game),
            EngineState::NotStarted => Err(ProcessingError::illegal_state()),
        }
    }

    fn current(&self) -> Option<&CurrentTurn> {
        match &self.state {
            EngineState::Running(game) => game.current.as_ref(),
            EngineState::NotStarted => None,
        }
    }

    /// Start play, returning the colour assigned to each handle.
    pub fn start_game(
        &mut self,
        mode: GameMode,
        handles: &[String],
        now: DateTime<Utc>,
    ) -> Result<IndexMap<String, PlayerColor>> {
        if self.is_started() {
            return Err(ProcessingError::illegal_state());
        }
        if handles.is_empty() || handles.len() > MAX_PLAYERS {
            return Err(ProcessingError::internal(format!(
                "Cannot start a game with {} players",
                handles.len()
            )));
        }

        let colors: IndexMap<String, PlayerColor> = handles
            .iter()
            .cloned()
            .zip(PlayerColor::ALL)
            .collect();
        if colors.len() != handles.len() {
            return Err(ProcessingError::internal("Duplicate handle in game"));
        }

        let seats: Vec<PlayerColor> = colors.values().copied().collect();
        let mut running = RunningGame {
            engine: self.factory.create(mode, &seats, now),
            colors,
            current: None,
        };
        running.current = Some(running.next_player()?);

        let assigned = running.colors.clone();
        self.state = EngineState::Running(running);
        Ok(assigned)
    }

    /// Return to the not-started state. Safe to call at any time.
    pub fn stop_game(&mut self) {
        self.state = EngineState::NotStarted;
    }

    pub fn get_next_turn(&self) -> Result<&str> {
        self.current()
            .map(|turn| turn.handle.as_str())
            .ok_or_else(ProcessingError::illegal_state)
    }

    pub fn get_legal_moves(&self, handle: &str) -> Result<Vec<Move>> {
        match self.current() {
            Some(turn) if turn.handle == handle => Ok(turn.moves.clone()),
            _ => Err(ProcessingError::illegal_state()),
        }
    }

    pub fn get_player_view(&self, handle: &str) -> Result<serde_json::Value> {
        let game = self.running()?;
        if let Some(turn) = game.current.as_ref().filter(|turn| turn.handle == handle) {
            return Ok(turn.view.clone());
        }
        let color = game
            .colors
            .get(handle)
            .ok_or_else(ProcessingError::illegal_state)?;
        Ok(game.engine.player_view(*color))
    }

    /// The last `max_entries` history entries.
    pub fn get_recent_history(&self, max_entries: usize) -> Result<Vec<HistoryEntry>> {
        let history = self.running()?.engine.history();
        let start = history.len().saturating_sub(max_entries);
        Ok(history[start..].to_vec())
    }

    pub fn is_move_pending(&self, handle: &str) -> bool {
        self.current().is_some_and(|turn| turn.handle == handle)
    }

    pub fn is_legal_move(&self, handle: &str, move_id: &str) -> bool {
        self.current()
            .is_some_and(|turn| turn.handle == handle && turn.find(move_id).is_some())
    }

    /// The engine's choice of move for the player whose turn it is.
    pub fn suggest_move(&self, handle: &str) -> Result<Move> {
        let game = self.running()?;
        let turn = game
            .current
            .as_ref()
            .filter(|turn| turn.handle == handle)
            .ok_or_else(ProcessingError::illegal_state)?;
        game.engine
            .suggest_move(turn.color, &turn.moves)
            .ok_or_else(|| ProcessingError::internal("No legal move available"))
    }

    pub fn execute_move(
        &mut self,
        handle: &str,
        move_id: &str,
        now: DateTime<Utc>,
    ) -> Result<MoveResult> {
        let EngineState::Running(game) = &mut self.state else {
            return Err(ProcessingError::illegal_state());
        };
        let Some(turn) = game.current.as_ref() else {
            return Err(ProcessingError::illegal_state());
        };
        if turn.handle != handle {
            return Err(ProcessingError::illegal_state());
        }
        let mv = turn
            .find(move_id)
            .cloned()
            .ok_or_else(ProcessingError::illegal_state)?;
        let (color, handle) = (turn.color, turn.handle.clone());

        let turn_over = game.engine.execute_move(color, &mv, now);

        if let Some((winner_color, turns)) = game.engine.winner() {
            game.current = None;
            let winner = game
                .handle_for(winner_color)
                .ok_or_else(|| ProcessingError::internal("Engine chose an unassigned color"))?
                .to_string();
            let comment = format!("Player {} won after {} turns", winner, turns);
            return Ok(MoveResult {
                completed: true,
                winner: Some(winner),
                comment: Some(comment),
            });
        }

        game.current = Some(if turn_over {
            game.next_player()?
        } else {
            CurrentTurn::for_handle(game.engine.as_ref(), handle, color)
        });

        Ok(MoveResult::in_progress())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::RaceRules;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn adapter() -> GameEngineAdapter {
        GameEngineAdapter::new(Arc::new(RaceRules::default()))
    }

    fn handles(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_start_assigns_colors_in_order() {
        let mut engine = adapter();
        let colors = engine
            .start_game(GameMode::Standard, &handles(&["leela", "fry", "bender"]), now())
            .unwrap();

        let expected: Vec<(String, PlayerColor)> = vec![
            ("leela".to_string(), PlayerColor::Red),
            ("fry".to_string(), PlayerColor::Yellow),
            ("bender".to_string(), PlayerColor::Green),
        ];
        assert_eq!(colors.into_iter().collect::<Vec<_>>(), expected);
        assert_eq!(engine.get_next_turn().unwrap(), "leela");
    }

    #[test]
    fn test_start_twice_fails() {
        let mut engine = adapter();
        engine
            .start_game(GameMode::Standard, &handles(&["leela", "fry"]), now())
            .unwrap();
        assert!(engine
            .start_game(GameMode::Standard, &handles(&["leela", "fry"]), now())
            .is_err());
    }

    #[test]
    fn test_start_rejects_bad_player_counts() {
        let mut engine = adapter();
        assert!(engine.start_game(GameMode::Standard, &[], now()).is_err());
        assert!(engine
            .start_game(GameMode::Standard, &handles(&["a", "b", "c", "d", "e"]), now())
            .is_err());
        assert!(!engine.is_started());
    }

    #[test]
    fn test_not_started_queries() {
        let engine = adapter();
        assert!(engine.get_next_turn().is_err());
        assert!(engine.get_legal_moves("leela").is_err());
        assert!(engine.get_player_view("leela").is_err());
        assert!(engine.get_recent_history(5).is_err());
        assert!(!engine.is_move_pending("leela"));
        assert!(!engine.is_legal_move("leela", "advance-1"));
    }

    #[test]
    fn test_legal_moves_only_for_current_mover() {
        let mut engine = adapter();
        engine
            .start_game(GameMode::Standard, &handles(&["leela", "fry"]), now())
            .unwrap();

        let moves = engine.get_legal_moves("leela").unwrap();
        assert!(!moves.is_empty());
        assert!(engine.get_legal_moves("fry").is_err());
        assert!(engine.is_move_pending("leela"));
        assert!(!engine.is_move_pending("fry"));
        assert!(engine.is_legal_move("leela", &moves[0].id));
        assert!(!engine.is_legal_move("fry", &moves[0].id));
        assert!(!engine.is_legal_move("leela", "teleport"));
    }

    #[test]
    fn test_execute_move_validations() {
        let mut engine = adapter();
        assert!(engine.execute_move("leela", "advance-1", now()).is_err());

        engine
            .start_game(GameMode::Standard, &handles(&["leela", "fry"]), now())
            .unwrap();
        assert!(engine.execute_move("fry", "advance-1", now()).is_err());
        assert!(engine.execute_move("leela", "teleport", now()).is_err());
        assert_eq!(engine.get_next_turn().unwrap(), "leela");
    }

    #[test]
    fn test_execute_move_advances_turn() {
        let mut engine = adapter();
        engine
            .start_game(GameMode::Standard, &handles(&["leela", "fry"]), now())
            .unwrap();

        let result = engine.execute_move("leela", "advance-1", now()).unwrap();
        assert_eq!(result, MoveResult::in_progress());
        assert_eq!(engine.get_next_turn().unwrap(), "fry");
    }

    #[test]
    fn test_repeat_turn_recomputes_view_for_same_player() {
        let mut engine = adapter();
        engine
            .start_game(GameMode::Standard, &handles(&["leela", "fry"]), now())
            .unwrap();
        let before = engine.get_player_view("leela").unwrap();

        let result = engine.execute_move("leela", "advance-2", now()).unwrap();
        assert!(!result.completed);
        assert_eq!(engine.get_next_turn().unwrap(), "leela");
        let after = engine.get_player_view("leela").unwrap();
        assert_ne!(before, after);
        assert!(engine.get_legal_moves("leela").is_ok());
    }

    #[test]
    fn test_play_to_completion() {
        let mut engine = adapter();
        engine
            .start_game(GameMode::Adult, &handles(&["leela", "fry"]), now())
            .unwrap();

        let mut result = MoveResult::in_progress();
        for _ in 0..100 {
            let handle = engine.get_next_turn().unwrap().to_string();
            let mv = engine.suggest_move(&handle).unwrap();
            result = engine.execute_move(&handle, &mv.id, now()).unwrap();
            if result.completed {
                break;
            }
        }

        assert!(result.completed);
        let winner = result.winner.unwrap();
        assert!(result
            .comment
            .unwrap()
            .starts_with(&format!("Player {} won after", winner)));
        assert!(engine.get_next_turn().is_err());
        assert!(!engine.is_move_pending(&winner));
        assert!(!engine.get_recent_history(3).unwrap().is_empty());
    }

    #[test]
    fn test_stop_game_resets() {
        let mut engine = adapter();
        engine
            .start_game(GameMode::Standard, &handles(&["leela", "fry"]), now())
            .unwrap();
        engine.stop_game();
        assert!(!engine.is_started());
        assert!(engine.get_next_turn().is_err());
        assert!(engine
            .start_game(GameMode::Standard, &handles(&["leela", "fry"]), now())
            .is_ok());
    }

    #[test]
    fn test_recent_history_is_bounded() {
        let mut engine = adapter();
        engine
            .start_game(GameMode::Standard, &handles(&["leela", "fry"]), now())
            .unwrap();
        engine.execute_move("leela", "advance-1", now()).unwrap();
        engine.execute_move("fry", "advance-1", now()).unwrap();

        let all = engine.get_recent_history(100).unwrap();
        let last = engine.get_recent_history(1).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0], all[all.len() - 1]);
    }

    #[test]
    fn test_history_is_stamped_with_supplied_times() {
        let mut engine = adapter();
        engine
            .start_game(GameMode::Standard, &handles(&["leela", "fry"]), now())
            .unwrap();
        let later = now() + Duration::seconds(45);
        engine.execute_move("leela", "advance-1", later).unwrap();

        let stamps: Vec<DateTime<Utc>> = engine
            .get_recent_history(10)
            .unwrap()
            .into_iter()
            .map(|entry| entry.timestamp)
            .collect();
        assert_eq!(stamps, vec![now(), later]);
    }
}

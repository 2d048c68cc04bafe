//! Built-in reference rules engine.
//!
//! A simple race: every colour starts at zero and the first pawn to land
//! exactly on the goal wins. Advancing two spaces earns another turn.
//! Real deployments plug their own engine in through [`EngineFactory`].

use chrono::{DateTime, Utc};
use serde_json::json;

use crate::state::engine::{EngineFactory, GameMode, HistoryEntry, Move, PlayerColor, RulesEngine};

/// Largest single advance.
const MAX_ADVANCE: u32 = 3;

/// Advance that earns an extra turn.
const REPEAT_ADVANCE: u32 = 2;

/// Factory for [`RaceEngine`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RaceRules;

impl RaceRules {
    pub fn goal(mode: GameMode) -> u32 {
        match mode {
            GameMode::Standard => 16,
            GameMode::Adult => 10,
        }
    }
}

impl EngineFactory for RaceRules {
    fn create(
        &self,
        mode: GameMode,
        colors: &[PlayerColor],
        now: DateTime<Utc>,
    ) -> Box<dyn RulesEngine> {
        Box::new(RaceEngine::new(Self::goal(mode), colors, now))
    }
}

#[derive(Debug, Clone)]
struct Pawn {
    color: PlayerColor,
    position: u32,
    turns: u32,
}

#[derive(Debug)]
pub struct RaceEngine {
    goal: u32,
    pawns: Vec<Pawn>,
    turn: Option<usize>,
    history: Vec<HistoryEntry>,
}

impl RaceEngine {
    pub fn new(goal: u32, colors: &[PlayerColor], now: DateTime<Utc>) -> Self {
        let pawns = colors
            .iter()
            .map(|color| Pawn {
                color: *color,
                position: 0,
                turns: 0,
            })
            .collect();
        Self {
            goal,
            pawns,
            turn: None,
            history: vec![HistoryEntry {
                color: None,
                action: "Game started".to_string(),
                timestamp: now,
            }],
        }
    }

    fn pawn(&self, color: PlayerColor) -> Option<&Pawn> {
        self.pawns.iter().find(|p| p.color == color)
    }

    fn parse_advance(mv: &Move) -> Option<u32> {
        mv.id.strip_prefix("advance-")?.parse().ok()
    }
}

impl RulesEngine for RaceEngine {
    fn next_turn(&mut self) -> PlayerColor {
        let next = match self.turn {
            None => 0,
            Some(index) => (index + 1) % self.pawns.len(),
        };
        self.turn = Some(next);
        self.pawns[next].color
    }

    fn legal_moves(&self, color: PlayerColor) -> Vec<Move> {
        let Some(pawn) = self.pawn(color) else {
            return Vec::new();
        };
        (1..=MAX_ADVANCE)
            .filter(|steps| pawn.position + steps <= self.goal)
            .map(|steps| Move {
                id: format!("advance-{}", steps),
                description: if steps == REPEAT_ADVANCE {
                    format!("Advance {} spaces and go again", steps)
                } else if steps == 1 {
                    "Advance 1 space".to_string()
                } else {
                    format!("Advance {} spaces", steps)
                },
            })
            .collect()
    }

    fn player_view(&self, color: PlayerColor) -> serde_json::Value {
        let position = self.pawn(color).map(|p| p.position).unwrap_or_default();
        let opponents: serde_json::Map<String, serde_json::Value> = self
            .pawns
            .iter()
            .filter(|p| p.color != color)
            .map(|p| (p.color.as_str().to_string(), json!(p.position)))
            .collect();
        json!({
            "color": color,
            "position": position,
            "goal": self.goal,
            "opponents": opponents,
        })
    }

    fn execute_move(&mut self, color: PlayerColor, mv: &Move, now: DateTime<Utc>) -> bool {
        let steps = Self::parse_advance(mv).unwrap_or(0);
        let goal = self.goal;
        let Some(pawn) = self.pawns.iter_mut().find(|p| p.color == color) else {
            return true;
        };
        pawn.position = (pawn.position + steps).min(goal);
        pawn.turns += 1;
        let position = pawn.position;

        self.history.push(HistoryEntry {
            color: Some(color),
            action: format!("Advanced {} to square {}", steps, position),
            timestamp: now,
        });

        steps != REPEAT_ADVANCE || position == goal
    }

    fn winner(&self) -> Option<(PlayerColor, u32)> {
        self.pawns
            .iter()
            .find(|p| p.position == self.goal)
            .map(|p| (p.color, p.turns))
    }

    fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    fn suggest_move(&self, _color: PlayerColor, moves: &[Move]) -> Option<Move> {
        moves
            .iter()
            .max_by_key(|mv| Self::parse_advance(mv).unwrap_or(0))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use pretty_assertions::assert_eq;

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    fn engine() -> RaceEngine {
        RaceEngine::new(5, &[PlayerColor::Red, PlayerColor::Yellow], start())
    }

    fn ids(moves: &[Move]) -> Vec<&str> {
        moves.iter().map(|m| m.id.as_str()).collect()
    }

    #[test]
    fn test_turn_rotation() {
        let mut engine = engine();
        assert_eq!(engine.next_turn(), PlayerColor::Red);
        assert_eq!(engine.next_turn(), PlayerColor::Yellow);
        assert_eq!(engine.next_turn(), PlayerColor::Red);
    }

    #[test]
    fn test_moves_never_overshoot() {
        let mut engine = engine();
        engine.next_turn();
        assert_eq!(
            ids(&engine.legal_moves(PlayerColor::Red)),
            vec!["advance-1", "advance-2", "advance-3"]
        );

        let moves = engine.legal_moves(PlayerColor::Red);
        assert!(engine.execute_move(PlayerColor::Red, &moves[2], start()));
        assert_eq!(
            ids(&engine.legal_moves(PlayerColor::Red)),
            vec!["advance-1", "advance-2"]
        );
    }

    #[test]
    fn test_advance_two_repeats_turn() {
        let mut engine = engine();
        let moves = engine.legal_moves(PlayerColor::Red);
        assert!(!engine.execute_move(PlayerColor::Red, &moves[1], start()));
        assert!(engine.execute_move(PlayerColor::Red, &moves[0], start()));
    }

    #[test]
    fn test_winner() {
        let mut engine = engine();
        assert_eq!(engine.winner(), None);

        let moves = engine.legal_moves(PlayerColor::Yellow);
        engine.execute_move(PlayerColor::Yellow, &moves[2], start());
        let moves = engine.legal_moves(PlayerColor::Yellow);
        assert!(engine.execute_move(PlayerColor::Yellow, &moves[1], start()));

        assert_eq!(engine.winner(), Some((PlayerColor::Yellow, 2)));
        assert_eq!(engine.history().len(), 3);
    }

    #[test]
    fn test_view_and_suggestion() {
        let engine = engine();
        let view = engine.player_view(PlayerColor::Red);
        assert_eq!(view["color"], "RED");
        assert_eq!(view["goal"], 5);
        assert_eq!(view["opponents"]["yellow"], 0);

        let moves = engine.legal_moves(PlayerColor::Red);
        let suggested = engine.suggest_move(PlayerColor::Red, &moves).unwrap();
        assert_eq!(suggested.id, "advance-3");
        assert_eq!(engine.suggest_move(PlayerColor::Red, &[]), None);
    }

    #[test]
    fn test_history_uses_supplied_time() {
        let mut engine = engine();
        let later = start() + Duration::minutes(3);
        let moves = engine.legal_moves(PlayerColor::Red);
        engine.execute_move(PlayerColor::Red, &moves[0], later);

        let stamps: Vec<DateTime<Utc>> = engine.history().iter().map(|h| h.timestamp).collect();
        assert_eq!(stamps, vec![start(), later]);
    }

    #[test]
    fn test_goal_by_mode() {
        assert_eq!(RaceRules::goal(GameMode::Standard), 16);
        assert_eq!(RaceRules::goal(GameMode::Adult), 10);
    }
}

//! Inbound requests and outbound notifications.
//!
//! These are plain data. Encoding them for the wire is the transport's job;
//! the serde representation here is `{"message": KIND, "context": {...}}`.

use serde::{Deserialize, Serialize};

use crate::error::{FailureReason, ProcessingError};
use crate::state::{
    AdvertiseGame, AdvertisedGame, CancelledReason, GameId, GameMode, GamePlayer, HistoryEntry,
    Move, PlayerId, RegisteredPlayer,
};

/// A decoded request from a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "message", content = "context", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Request {
    RegisterPlayer {
        handle: String,
    },
    ReregisterPlayer,
    UnregisterPlayer,
    ListPlayers,
    AdvertiseGame(AdvertiseGame),
    ListAvailableGames,
    JoinGame {
        game_id: GameId,
    },
    QuitGame,
    StartGame,
    CancelGame,
    ExecuteMove {
        move_id: String,
    },
    OptimalMove,
    RetrieveGameState,
    SendMessage {
        message: String,
        recipient_handles: Vec<String>,
    },
}

impl Request {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::RegisterPlayer { .. } => "REGISTER_PLAYER",
            Self::ReregisterPlayer => "REREGISTER_PLAYER",
            Self::UnregisterPlayer => "UNREGISTER_PLAYER",
            Self::ListPlayers => "LIST_PLAYERS",
            Self::AdvertiseGame(_) => "ADVERTISE_GAME",
            Self::ListAvailableGames => "LIST_AVAILABLE_GAMES",
            Self::JoinGame { .. } => "JOIN_GAME",
            Self::QuitGame => "QUIT_GAME",
            Self::StartGame => "START_GAME",
            Self::CancelGame => "CANCEL_GAME",
            Self::ExecuteMove { .. } => "EXECUTE_MOVE",
            Self::OptimalMove => "OPTIMAL_MOVE",
            Self::RetrieveGameState => "RETRIEVE_GAME_STATE",
            Self::SendMessage { .. } => "SEND_MESSAGE",
        }
    }
}

/// An event sent to a client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "message", content = "context", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Notification {
    ServerShutdown,
    RequestFailed {
        reason: FailureReason,
        comment: Option<String>,
        handle: Option<String>,
    },
    WebsocketIdle,
    WebsocketInactive,
    RegisteredPlayers {
        players: Vec<RegisteredPlayer>,
    },
    AvailableGames {
        games: Vec<AdvertisedGame>,
    },
    PlayerRegistered {
        player_id: PlayerId,
        handle: String,
    },
    PlayerUnregistered {
        handle: String,
    },
    PlayerIdle {
        handle: String,
    },
    PlayerInactive {
        handle: String,
    },
    PlayerMessageReceived {
        sender_handle: String,
        recipient_handles: Vec<String>,
        message: String,
    },
    GameAdvertised {
        game: AdvertisedGame,
    },
    GameInvitation {
        game: AdvertisedGame,
    },
    GameJoined {
        player_handle: String,
        game_id: GameId,
        name: String,
        mode: GameMode,
        advertiser_handle: String,
    },
    GameStarted {
        game_id: GameId,
    },
    GameCancelled {
        game_id: GameId,
        reason: CancelledReason,
        comment: Option<String>,
    },
    GameCompleted {
        game_id: GameId,
        winner: Option<String>,
        comment: Option<String>,
    },
    GameIdle {
        game_id: GameId,
    },
    GameInactive {
        game_id: GameId,
    },
    GamePlayerQuit {
        handle: String,
        game_id: GameId,
    },
    GamePlayerChange {
        game_id: GameId,
        comment: Option<String>,
        players: Vec<GamePlayer>,
    },
    GameStateChange {
        game_id: GameId,
        view: serde_json::Value,
        recent_history: Vec<HistoryEntry>,
    },
    GamePlayerTurn {
        handle: String,
        game_id: GameId,
        moves: Vec<Move>,
    },
}

impl Notification {
    pub fn request_failed(error: &ProcessingError) -> Self {
        Self::RequestFailed {
            reason: error.failure_reason(),
            comment: error.comment(),
            handle: error.handle().map(str::to_string),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_request_wire_shape() {
        let request: Request = serde_json::from_value(json!({
            "message": "JOIN_GAME",
            "context": { "game_id": "abc" }
        }))
        .unwrap();
        assert_eq!(
            request,
            Request::JoinGame {
                game_id: GameId::from("abc")
            }
        );
        assert_eq!(request.kind(), "JOIN_GAME");

        let request: Request = serde_json::from_value(json!({ "message": "LIST_PLAYERS" })).unwrap();
        assert_eq!(request, Request::ListPlayers);
    }

    #[test]
    fn test_advertise_request() {
        let request: Request = serde_json::from_value(json!({
            "message": "ADVERTISE_GAME",
            "context": {
                "name": "Friday night",
                "mode": "STANDARD",
                "players": 3,
                "visibility": "PRIVATE",
                "invited_handles": ["fry"]
            }
        }))
        .unwrap();
        let Request::AdvertiseGame(context) = request else {
            panic!("expected ADVERTISE_GAME");
        };
        assert_eq!(context.players, 3);
        assert_eq!(context.invited_handles, vec!["fry".to_string()]);
    }

    #[test]
    fn test_request_failed_from_error() {
        let err = ProcessingError::rejected_with_comment(
            FailureReason::InvalidGame,
            Some("fry"),
            "Game is not in progress",
        );
        assert_eq!(
            serde_json::to_value(Notification::request_failed(&err)).unwrap(),
            json!({
                "message": "REQUEST_FAILED",
                "context": {
                    "reason": "INVALID_GAME",
                    "comment": "Game is not in progress",
                    "handle": "fry"
                }
            })
        );
    }
}

//! Error taxonomy.
//!
//! The core only ever raises [`ProcessingError::Internal`],
//! [`ProcessingError::DuplicateUser`] and [`ProcessingError::NamePoolExhausted`].
//! [`ProcessingError::Rejected`] is reserved for the dispatch layer, which
//! validates requests and enforces capacity limits before calling into the core.
//! Not-found conditions are never errors: lookups return `Option`.

use serde::{Deserialize, Serialize};

/// Result alias used by every fallible state operation.
pub type Result<T> = std::result::Result<T, ProcessingError>;

/// Reasons a request can be refused, as reported back to clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    InvalidRequest,
    DuplicateUser,
    WebsocketLimit,
    UserLimit,
    GameLimit,
    InvalidPlayer,
    InvalidGame,
    NotPlaying,
    NotAdvertiser,
    AlreadyPlaying,
    NoMovePending,
    IllegalMove,
    AdvertiserMayNotQuit,
    InternalError,
}

impl FailureReason {
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "Invalid request",
            Self::DuplicateUser => "Handle is already in use",
            Self::WebsocketLimit => "Connection limit reached; try again later",
            Self::UserLimit => "System user limit reached; try again later",
            Self::GameLimit => "System game limit reached; try again later",
            Self::InvalidPlayer => "Unknown or invalid player",
            Self::InvalidGame => "Unknown or invalid game",
            Self::NotPlaying => "Player is not playing a game",
            Self::NotAdvertiser => "Player did not advertise this game",
            Self::AlreadyPlaying => "Player is already playing a game",
            Self::NoMovePending => "No move is pending for this player",
            Self::IllegalMove => "The chosen move is not legal",
            Self::AdvertiserMayNotQuit => "Advertiser may not quit a game (cancel instead)",
            Self::InternalError => "Internal error",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Errors raised while processing a request or a scheduled sweep.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProcessingError {
    /// A caller violated a state-machine precondition.
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    /// The requested handle is already registered.
    #[error("Handle is already in use: {handle}")]
    DuplicateUser { handle: String },

    /// More programmatic players were needed than unused names remain.
    #[error("Name pool exhausted: needed {needed} programmatic names, only {available} available")]
    NamePoolExhausted { needed: usize, available: usize },

    /// The dispatch layer refused the request.
    #[error("{reason}")]
    Rejected {
        reason: FailureReason,
        handle: Option<String>,
        comment: Option<String>,
    },
}

impl ProcessingError {
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Shorthand for the common "illegal state for operation" precondition failure.
    pub fn illegal_state() -> Self {
        Self::internal("Illegal state for operation")
    }

    pub fn rejected(reason: FailureReason, handle: Option<&str>) -> Self {
        Self::Rejected {
            reason,
            handle: handle.map(str::to_string),
            comment: None,
        }
    }

    pub fn rejected_with_comment(
        reason: FailureReason,
        handle: Option<&str>,
        comment: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            reason,
            handle: handle.map(str::to_string),
            comment: Some(comment.into()),
        }
    }

    /// The client-facing failure reason for this error.
    pub fn failure_reason(&self) -> FailureReason {
        match self {
            Self::Internal { .. } | Self::NamePoolExhausted { .. } => FailureReason::InternalError,
            Self::DuplicateUser { .. } => FailureReason::DuplicateUser,
            Self::Rejected { reason, .. } => *reason,
        }
    }

    /// The handle the error relates to, if any.
    pub fn handle(&self) -> Option<&str> {
        match self {
            Self::DuplicateUser { handle } => Some(handle),
            Self::Rejected { handle, .. } => handle.as_deref(),
            _ => None,
        }
    }

    /// Free-text detail suitable for a client, if any.
    pub fn comment(&self) -> Option<String> {
        match self {
            Self::Internal { reason } => Some(reason.clone()),
            Self::NamePoolExhausted { .. } => Some(self.to_string()),
            Self::DuplicateUser { .. } => None,
            Self::Rejected { comment, .. } => comment.clone(),
        }
    }
}

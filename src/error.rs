//! Error types for the trivia sync client.

use thiserror::Error;

use crate::protocol::{GameMode, HelpKind};

/// Errors that can occur when using the trivia sync client.
#[derive(Debug, Error)]
pub enum TriviaError {
    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed unexpectedly.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize an event payload.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A frame did not follow the Engine.IO / Socket.IO packet grammar.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Attempted an operation that requires an active connection, but the client is not connected.
    #[error("not connected to server")]
    NotConnected,

    /// The server refused the connection or reported a fault.
    #[error("server error: {message}")]
    ServerError {
        /// Human-readable error message from the server.
        message: String,
    },

    /// A join was requested with a blank username.
    #[error("username cannot be empty")]
    EmptyUsername,

    /// A join was requested while a previous join is still pending.
    #[error("a join request is already in progress")]
    AlreadyJoining,

    /// A join was requested while the server reports a game of this mode running.
    #[error("a {0} game is in progress")]
    GameInProgress(GameMode),

    /// A chat message was blank after trimming.
    #[error("chat message cannot be empty")]
    EmptyChatMessage,

    /// The requested help has already been spent in this game.
    #[error("help {0} is not available")]
    HelpUnavailable(HelpKind),

    /// Helps cannot be used right now (round resolved, answered, or eliminated).
    #[error("helps are locked for the current round")]
    HelpsLocked,

    /// No answer can be submitted right now (no open question, or eliminated).
    #[error("no open question to answer")]
    AnswerLocked,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TriviaError {
    /// Returns `true` for errors raised locally before anything was sent.
    pub fn is_local_rejection(&self) -> bool {
        matches!(
            self,
            Self::EmptyUsername
                | Self::AlreadyJoining
                | Self::GameInProgress(_)
                | Self::EmptyChatMessage
                | Self::HelpUnavailable(_)
                | Self::HelpsLocked
                | Self::AnswerLocked
        )
    }
}

/// A specialized [`Result`] type for trivia client operations.
pub type Result<T> = std::result::Result<T, TriviaError>;

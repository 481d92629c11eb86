//! Crate-wide error and result types

use thiserror::Error;

use crate::engine::registry::ConnId;

/// Errors produced by switchboard
#[derive(Error, Debug)]
pub enum SwitchboardError {
    /// Missing or invalid auth token; the connection is refused before it
    /// enters the engine
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A connection id was registered twice
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnId),

    /// A pair operation hit a connection that already has a partner
    #[error("connection is already paired")]
    AlreadyPaired,

    /// Signal or end-call with no counterpart to deliver to
    #[error("no pair available for the call")]
    NoPeer,

    /// Call target is unknown, offline, or has no live connection
    #[error("target user is not reachable")]
    CalleeUnreachable,

    /// A call id was started twice
    #[error("call {0} already exists")]
    DuplicateCall(String),

    /// Registration with a username that is already taken
    #[error("user {0} already exists")]
    DuplicateUser(String),

    /// A collaborator (directory or call store) failed mid-operation
    #[error("repository unavailable: {0}")]
    RepositoryUnavailable(String),

    /// Unique index collision reported by the database layer
    #[error("duplicate key: {0}")]
    DuplicateKey(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal error
    #[error("internal error: {0}")]
    Internal(String),
}

impl SwitchboardError {
    /// Message safe to surface to the originating client.
    ///
    /// Collaborator and internal failures collapse to a generic server
    /// error; the in-session taxonomy keeps its own wording.
    pub fn client_message(&self) -> String {
        match self {
            SwitchboardError::RepositoryUnavailable(_)
            | SwitchboardError::DuplicateKey(_)
            | SwitchboardError::Database(_)
            | SwitchboardError::Io(_)
            | SwitchboardError::Internal(_) => "Internal server error".to_string(),
            other => other.to_string(),
        }
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, SwitchboardError>;

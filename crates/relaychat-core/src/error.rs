//! Error type shared by the relay, the wire protocol and the client.
//!
//! `RelayError` is serializable so a failed call can be returned to the
//! caller verbatim over the connection.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error type for relay operations
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayError {
    /// A client or group with this name already exists
    #[error("name already in use: {name}")]
    NameConflict { name: String },

    /// The named client is not registered
    #[error("client not found: {name}")]
    ClientNotFound { name: String },

    /// The named group does not exist
    #[error("group not found: {name}")]
    GroupNotFound { name: String },

    /// The client does not belong to the group
    #[error("{client} is not a member of {group}")]
    NotAMember { client: String, group: String },

    /// The name breaks the naming rules
    #[error("invalid name {name:?}: {reason}")]
    InvalidName { name: String, reason: String },

    /// The recipient's mailbox stayed full for the whole delivery timeout
    #[error("mailbox full for {client}")]
    MailboxFull { client: String },

    /// The connection broke or the peer went away
    #[error("transport failure: {message}")]
    TransportFailure { message: String },

    /// The peer sent something the session cannot accept in its current state
    #[error("protocol violation: {message}")]
    Protocol { message: String },
}

impl RelayError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::TransportFailure {
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// Whether the session can carry on after this error.
    ///
    /// Only a broken transport ends a session; everything else is reported
    /// to the caller and the user is prompted again.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, RelayError::TransportFailure { .. })
    }
}

/// Result alias for relay operations
pub type RelayResult<T> = Result<T, RelayError>;

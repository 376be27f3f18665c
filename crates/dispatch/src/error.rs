//! Dispatch error types.

use thiserror::Error;

use crate::message::{CommandKind, EventKind};

/// Errors that can occur while dispatching messages.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A database error occurred.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A serialization/deserialization error occurred.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No handler is registered for a command. Commands have exactly one
    /// handler by contract, so this is a wiring bug, not a runtime fault.
    #[error("no handler registered for command {0}")]
    MissingCommandHandler(CommandKind),

    /// A handler was invoked with a message shape it was not registered
    /// for. Indicates a registration table mixup.
    #[error("handler received unexpected message, expected {0}")]
    UnexpectedMessage(&'static str),

    /// One or more event handlers failed during fan-out. Sibling handlers
    /// ran to completion; their committed work stands.
    #[error("{failed} of {total} handlers failed for event {kind}")]
    EventHandlersFailed {
        kind: EventKind,
        failed: usize,
        total: usize,
    },

    /// A handler failed for a reason of its own.
    #[error("handler failed: {0}")]
    Handler(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl DispatchError {
    /// Wraps an arbitrary handler-level error.
    pub fn handler<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        DispatchError::Handler(Box::new(error))
    }

    /// Whether retrying the operation could plausibly succeed.
    ///
    /// Registration and message-shape mismatches are programming errors
    /// and are surfaced immediately; everything else may heal on retry or
    /// redelivery (handlers are idempotent, so re-running them is safe).
    pub fn is_transient(&self) -> bool {
        match self {
            DispatchError::Database(_)
            | DispatchError::Handler(_)
            | DispatchError::EventHandlersFailed { .. } => true,
            DispatchError::Serialization(_)
            | DispatchError::MissingCommandHandler(_)
            | DispatchError::UnexpectedMessage(_) => false,
        }
    }
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

//! Runtime layer errors.
//!
//! The taxonomy the runtime reports through these variants:
//!
//! - **Rejections** are synchronous refusals (full queue, loop not
//!   running, duplicate graph). The caller is always told; nothing is
//!   retried on its behalf.
//! - **Delivery failures** (inactive connection, dropped target, no
//!   route) are logged where they happen; data-plane messages are dropped,
//!   commands get an explicit failure result.
//!
//! Handler panics never surface here — they are caught and logged at the
//! runloop's task boundary.

use thiserror::Error;
use weft_types::{ConnectionId, ErrorCode, GraphId};

/// Errors reported by the runtime substrate.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// A task could not be enqueued because the target runloop's queue is
    /// full. Recoverable: the loop may drain.
    #[error("runloop '{0}' task queue is full")]
    QueueFull(String),

    /// A task was posted to a runloop that is not running or is shutting
    /// down.
    #[error("runloop '{0}' is not accepting tasks")]
    LoopUnavailable(String),

    /// The proxied component no longer exists.
    #[error("target environment has been dropped")]
    TargetDropped,

    /// An outbound send found the connection's transport inactive.
    #[error("connection {0} transport is inactive")]
    ConnectionInactive(ConnectionId),

    /// Encoding an outbound message failed.
    #[error(transparent)]
    Codec(#[from] weft_msg::CodecError),

    /// StartGraph resolved a graph id an engine already runs under.
    #[error("graph '{0}' already exists")]
    GraphAlreadyExists(GraphId),

    /// StopGraph (or routing) named a graph no engine runs under.
    #[error("graph '{0}' not found")]
    GraphNotFound(GraphId),

    /// StartGraph could not resolve any definition source.
    #[error("graph definition not found")]
    GraphDefinitionNotFound,

    /// A command reached a handler of a different kind.
    #[error("{handler}: unexpected command type '{got}'")]
    UnexpectedCommand {
        /// The handler that refused the command.
        handler: &'static str,
        /// The command name it was given.
        got: String,
    },

    /// A message had no resolvable destination.
    #[error("no route for message '{0}'")]
    NoRoute(String),

    /// A timer command re-used a live timer id.
    #[error("timer {0} already exists")]
    TimerAlreadyExists(u64),

    /// A timer cancel named an unknown timer id.
    #[error("timer {0} not found")]
    TimerNotFound(u64),

    /// The extension a message was addressed to is not registered.
    #[error("extension '{0}' not found")]
    ExtensionNotFound(String),

    /// Waiting on a result handle timed out. The command may still
    /// complete later; the handle remains usable.
    #[error("timed out waiting for command result")]
    ResultTimeout,

    /// The result slot was dropped without ever being completed.
    #[error("command result channel dropped")]
    ResultDropped,

    /// The dedicated worker thread could not be spawned.
    #[error("failed to spawn runloop thread: {0}")]
    SpawnFailed(String),
}

impl ErrorCode for RuntimeError {
    fn code(&self) -> &'static str {
        match self {
            Self::QueueFull(_) => "RT_QUEUE_FULL",
            Self::LoopUnavailable(_) => "RT_LOOP_UNAVAILABLE",
            Self::TargetDropped => "RT_TARGET_DROPPED",
            Self::ConnectionInactive(_) => "RT_CONNECTION_INACTIVE",
            Self::Codec(_) => "RT_CODEC",
            Self::GraphAlreadyExists(_) => "RT_GRAPH_ALREADY_EXISTS",
            Self::GraphNotFound(_) => "RT_GRAPH_NOT_FOUND",
            Self::GraphDefinitionNotFound => "RT_GRAPH_DEFINITION_NOT_FOUND",
            Self::UnexpectedCommand { .. } => "RT_UNEXPECTED_COMMAND",
            Self::NoRoute(_) => "RT_NO_ROUTE",
            Self::TimerAlreadyExists(_) => "RT_TIMER_ALREADY_EXISTS",
            Self::TimerNotFound(_) => "RT_TIMER_NOT_FOUND",
            Self::ExtensionNotFound(_) => "RT_EXTENSION_NOT_FOUND",
            Self::ResultTimeout => "RT_RESULT_TIMEOUT",
            Self::ResultDropped => "RT_RESULT_DROPPED",
            Self::SpawnFailed(_) => "RT_SPAWN_FAILED",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::QueueFull(_) | Self::ResultTimeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::assert_error_code;

    #[test]
    fn codes_follow_conventions() {
        let errors: Vec<RuntimeError> = vec![
            RuntimeError::QueueFull("app".into()),
            RuntimeError::LoopUnavailable("app".into()),
            RuntimeError::TargetDropped,
            RuntimeError::ConnectionInactive(ConnectionId::new()),
            RuntimeError::GraphAlreadyExists(GraphId::from("g")),
            RuntimeError::GraphNotFound(GraphId::from("g")),
            RuntimeError::GraphDefinitionNotFound,
            RuntimeError::UnexpectedCommand {
                handler: "timer",
                got: "timeout".into(),
            },
            RuntimeError::NoRoute("pcm".into()),
            RuntimeError::TimerAlreadyExists(1),
            RuntimeError::TimerNotFound(1),
            RuntimeError::ExtensionNotFound("asr".into()),
            RuntimeError::ResultTimeout,
            RuntimeError::ResultDropped,
            RuntimeError::SpawnFailed("no threads".into()),
        ];
        for err in &errors {
            assert_error_code(err, "RT_");
        }
    }

    #[test]
    fn only_transient_conditions_are_recoverable() {
        assert!(RuntimeError::QueueFull("x".into()).is_recoverable());
        assert!(RuntimeError::ResultTimeout.is_recoverable());
        assert!(!RuntimeError::GraphAlreadyExists(GraphId::from("g")).is_recoverable());
        assert!(!RuntimeError::TargetDropped.is_recoverable());
    }
}

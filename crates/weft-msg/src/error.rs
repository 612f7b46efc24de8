//! Message layer errors.

use thiserror::Error;
use weft_types::ErrorCode;

/// Errors raised while constructing or interpreting messages.
#[derive(Debug, Clone, Error)]
pub enum MessageError {
    /// A command's payload object did not match its declared name.
    ///
    /// Not recoverable: the same bytes parse the same way again. Fix the
    /// sender.
    #[error("invalid payload for command '{name}': {reason}")]
    InvalidCommandPayload {
        /// Command name the payload was keyed under.
        name: String,
        /// Parser diagnostic.
        reason: String,
    },

    /// A message was used where a command was required.
    #[error("message '{0}' is not a command")]
    NotACommand(String),
}

impl ErrorCode for MessageError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidCommandPayload { .. } => "MSG_INVALID_COMMAND_PAYLOAD",
            Self::NotACommand(_) => "MSG_NOT_A_COMMAND",
        }
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::assert_error_code;

    #[test]
    fn codes_follow_conventions() {
        assert_error_code(
            &MessageError::InvalidCommandPayload {
                name: "timer".into(),
                reason: "missing field".into(),
            },
            "MSG_",
        );
        assert_error_code(&MessageError::NotACommand("pcm".into()), "MSG_");
    }
}

//! Command results: the only legal reply to a command.

use crate::{Command, MessageHeader};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_types::{Location, MessageId};

/// Header name every result is stamped with.
pub const CMD_RESULT_NAME: &str = "result";

/// Success or failure of the originating command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// The command succeeded.
    Ok,
    /// The command failed; see `error_message`.
    Error,
}

/// The reply to a [`Command`], correlated by the command's id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandResult {
    /// Common envelope fields. Result payload properties (e.g. the graph
    /// id a start-graph produced) travel in `header.properties`.
    pub header: MessageHeader,
    /// Id of the command this result answers.
    pub original_cmd_id: MessageId,
    /// Outcome.
    pub status: StatusCode,
    /// Human-readable failure reason; `None` on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl CommandResult {
    /// A success result for `original_cmd_id`.
    #[must_use]
    pub fn success(original_cmd_id: MessageId) -> Self {
        Self {
            header: MessageHeader::new(CMD_RESULT_NAME, Location::empty()),
            original_cmd_id,
            status: StatusCode::Ok,
            error_message: None,
        }
    }

    /// A failure result for `original_cmd_id` with a reason.
    #[must_use]
    pub fn failure(original_cmd_id: MessageId, reason: impl Into<String>) -> Self {
        Self {
            header: MessageHeader::new(CMD_RESULT_NAME, Location::empty()),
            original_cmd_id,
            status: StatusCode::Error,
            error_message: Some(reason.into()),
        }
    }

    /// A success result answering `cmd`, destined back at its source.
    #[must_use]
    pub fn success_for(cmd: &Command) -> Self {
        let mut result = Self::success(cmd.id());
        result.header.dests = vec![cmd.header.src.clone()];
        result
    }

    /// A failure result answering `cmd`, destined back at its source.
    #[must_use]
    pub fn failure_for(cmd: &Command, reason: impl Into<String>) -> Self {
        let mut result = Self::failure(cmd.id(), reason);
        result.header.dests = vec![cmd.header.src.clone()];
        result
    }

    /// Attaches a payload property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.header.properties.insert(key.into(), value);
        self
    }

    /// `true` when the command succeeded.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status == StatusCode::Ok
    }

    /// Reads a payload property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&Value> {
        self.header.properties.get(key)
    }
}

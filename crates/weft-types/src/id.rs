//! Identifier types for Weft.
//!
//! Message and connection identifiers are UUID-based so they stay unique
//! across processes and machines; graph identifiers are strings because
//! predefined graphs are referred to by human-chosen names, while
//! dynamically started graphs get a generated UUID string.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifier for a [`Message`](../weft_msg/enum.Message.html).
///
/// Message ids are caller-assigned and globally unique. They are the
/// correlation key between a command and its result: a `CommandResult`
/// answers exactly one command, named by that command's `MessageId`.
///
/// # Example
///
/// ```
/// use weft_types::MessageId;
///
/// let a = MessageId::new();
/// let b = MessageId::new();
/// assert_ne!(a, b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub Uuid);

impl MessageId {
    /// Creates a new `MessageId` with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "msg:{}", self.0)
    }
}

/// Identifier for a live network [`Connection`](../weft_runtime/connection/struct.Connection.html).
///
/// Assigned when the connection is accepted; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub Uuid);

impl ConnectionId {
    /// Creates a new `ConnectionId` with a random UUID v4.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the inner UUID.
    #[must_use]
    pub fn uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "conn:{}", self.0)
    }
}

/// Identifier for a running graph.
///
/// A graph id is either the name a predefined graph was declared under, or
/// a generated UUID string for graphs started from an inline definition.
/// The runtime never interprets the contents beyond equality.
///
/// # Example
///
/// ```
/// use weft_types::GraphId;
///
/// let named = GraphId::from("voice-agent");
/// assert_eq!(named.as_str(), "voice-agent");
///
/// let generated = GraphId::generate();
/// assert_ne!(generated, GraphId::generate());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(String);

impl GraphId {
    /// Creates a graph id from an explicit name.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Creates a graph id with a random UUID string.
    ///
    /// Used for graphs started from an inline definition that carries no
    /// id of its own.
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns `true` if the id is empty (an unresolved placeholder).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for GraphId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for GraphId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for GraphId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "graph:{}", self.0)
    }
}

//! Commands: control-plane messages that demand a result.
//!
//! Command dispatch is a closed sum type: every kind the runtime knows is
//! a [`CommandKind`] variant, handlers match exhaustively, and a name that
//! decodes to nothing known becomes [`CommandKind::Unknown`] — an explicit
//! value, not a lookup-table miss.
//!
//! On the wire, the subtype is keyed on the header's `name` field; the
//! variant payload lives in a `payload` object next to the header.

use crate::MessageHeader;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use weft_types::{GraphId, Location, MessageId};

/// Wire name of [`CommandKind::StartGraph`].
pub const CMD_START_GRAPH: &str = "start_graph";
/// Wire name of [`CommandKind::StopGraph`].
pub const CMD_STOP_GRAPH: &str = "stop_graph";
/// Wire name of [`CommandKind::CloseApp`].
pub const CMD_CLOSE_APP: &str = "close_app";
/// Wire name of [`CommandKind::Timer`].
pub const CMD_TIMER: &str = "timer";
/// Wire name of [`CommandKind::Timeout`].
pub const CMD_TIMEOUT: &str = "timeout";

/// Payload of a start-graph command.
///
/// Exactly one of `predefined_graph_name` / `graph_json` is normally set;
/// resolution precedence when several sources are present is: predefined
/// name, then the destination location's graph id, then the inline
/// definition.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StartGraphCommand {
    /// Name of a graph declared in the app's configuration.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub predefined_graph_name: Option<String>,
    /// Inline graph definition, parsed as a `GraphDefinition`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_json: Option<Value>,
}

/// Payload of a stop-graph command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopGraphCommand {
    /// Graph to stop.
    pub graph_id: GraphId,
}

/// Payload of a timer command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerCommand {
    /// Caller-chosen timer identifier, unique per engine.
    pub timer_id: u64,
    /// Interval between fires.
    pub interval_ms: u64,
    /// Number of fires; 0 means "until cancelled".
    #[serde(default)]
    pub repeat: u32,
    /// Cancel the timer instead of starting one.
    #[serde(default)]
    pub cancel: bool,
}

/// Payload of a timeout command (one timer fire).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutCommand {
    /// Timer that fired.
    pub timer_id: u64,
}

/// Every command the runtime understands, plus the explicit unknown.
#[derive(Debug, Clone, PartialEq)]
pub enum CommandKind {
    /// App-scope: start an engine for a graph.
    StartGraph(StartGraphCommand),
    /// App-scope: stop and remove an engine.
    StopGraph(StopGraphCommand),
    /// App-scope: close the whole app.
    CloseApp,
    /// Engine-scope: start or cancel a timer.
    Timer(TimerCommand),
    /// Engine-scope: one timer fire.
    Timeout(TimeoutCommand),
    /// A command name nothing in this runtime recognizes. Carried so the
    /// receiver can fail it explicitly instead of dropping it.
    Unknown(String),
}

impl CommandKind {
    /// The wire name the kind dispatches on.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::StartGraph(_) => CMD_START_GRAPH,
            Self::StopGraph(_) => CMD_STOP_GRAPH,
            Self::CloseApp => CMD_CLOSE_APP,
            Self::Timer(_) => CMD_TIMER,
            Self::Timeout(_) => CMD_TIMEOUT,
            Self::Unknown(name) => name,
        }
    }

    /// `true` for commands only the app has authority to handle.
    #[must_use]
    pub fn is_app_scope(&self) -> bool {
        matches!(
            self,
            Self::StartGraph(_) | Self::StopGraph(_) | Self::CloseApp
        )
    }

    /// `true` for commands handled by an engine.
    #[must_use]
    pub fn is_engine_scope(&self) -> bool {
        matches!(self, Self::Timer(_) | Self::Timeout(_))
    }
}

/// A control-plane message expecting exactly one `CommandResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CommandWire", into = "CommandWire")]
pub struct Command {
    /// Common envelope fields. `header.name` always equals `kind.name()`.
    pub header: MessageHeader,
    /// Set when this command was issued while handling another command,
    /// linking causal chains.
    pub parent_id: Option<MessageId>,
    /// The dispatchable payload.
    pub kind: CommandKind,
}

impl Command {
    /// Creates a command of the given kind from `src`.
    #[must_use]
    pub fn new(kind: CommandKind, src: Location) -> Self {
        Self {
            header: MessageHeader::new(kind.name().to_string(), src),
            parent_id: None,
            kind,
        }
    }

    /// Start-graph command.
    #[must_use]
    pub fn start_graph(src: Location, payload: StartGraphCommand) -> Self {
        Self::new(CommandKind::StartGraph(payload), src)
    }

    /// Stop-graph command.
    #[must_use]
    pub fn stop_graph(src: Location, graph_id: GraphId) -> Self {
        Self::new(CommandKind::StopGraph(StopGraphCommand { graph_id }), src)
    }

    /// Close-app command.
    #[must_use]
    pub fn close_app(src: Location) -> Self {
        Self::new(CommandKind::CloseApp, src)
    }

    /// Timer command.
    #[must_use]
    pub fn timer(src: Location, payload: TimerCommand) -> Self {
        Self::new(CommandKind::Timer(payload), src)
    }

    /// Timeout command (a timer fire).
    #[must_use]
    pub fn timeout(src: Location, timer_id: u64) -> Self {
        Self::new(CommandKind::Timeout(TimeoutCommand { timer_id }), src)
    }

    /// Returns a copy with the destinations replaced.
    #[must_use]
    pub fn with_dests(mut self, dests: Vec<Location>) -> Self {
        self.header.dests = dests;
        self
    }

    /// Returns a copy marked as caused by `parent`.
    #[must_use]
    pub fn with_parent(mut self, parent: MessageId) -> Self {
        self.parent_id = Some(parent);
        self
    }

    /// The command's id (the correlation key its result answers to).
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.header.id
    }
}

/// On-the-wire shape of a command: header + name-keyed payload object.
#[derive(Serialize, Deserialize)]
struct CommandWire {
    header: MessageHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    parent_id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    payload: Value,
}

impl From<Command> for CommandWire {
    fn from(cmd: Command) -> Self {
        let payload = match &cmd.kind {
            CommandKind::StartGraph(p) => to_payload(p),
            CommandKind::StopGraph(p) => to_payload(p),
            CommandKind::Timer(p) => to_payload(p),
            CommandKind::Timeout(p) => to_payload(p),
            CommandKind::CloseApp | CommandKind::Unknown(_) => Value::Null,
        };
        Self {
            header: cmd.header,
            parent_id: cmd.parent_id,
            payload,
        }
    }
}

impl TryFrom<CommandWire> for Command {
    type Error = crate::MessageError;

    fn try_from(wire: CommandWire) -> Result<Self, Self::Error> {
        let kind = match wire.header.name.as_str() {
            CMD_START_GRAPH => CommandKind::StartGraph(from_payload(&wire)?),
            CMD_STOP_GRAPH => CommandKind::StopGraph(from_payload(&wire)?),
            CMD_CLOSE_APP => CommandKind::CloseApp,
            CMD_TIMER => CommandKind::Timer(from_payload(&wire)?),
            CMD_TIMEOUT => CommandKind::Timeout(from_payload(&wire)?),
            other => CommandKind::Unknown(other.to_string()),
        };
        Ok(Self {
            header: wire.header,
            parent_id: wire.parent_id,
            kind,
        })
    }
}

fn to_payload<T: Serialize>(payload: &T) -> Value {
    // Command payload structs serialize infallibly; a failure here is a
    // bug in the payload type, not in caller data.
    serde_json::to_value(payload).unwrap_or(Value::Null)
}

fn from_payload<T: for<'de> Deserialize<'de>>(
    wire: &CommandWire,
) -> Result<T, crate::MessageError> {
    serde_json::from_value(wire.payload.clone()).map_err(|e| {
        crate::MessageError::InvalidCommandPayload {
            name: wire.header.name.clone(),
            reason: e.to_string(),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_name_tracks_kind() {
        let cmd = Command::close_app(Location::for_app("weft://a"));
        assert_eq!(cmd.header.name, CMD_CLOSE_APP);
        assert!(cmd.kind.is_app_scope());
        assert!(!cmd.kind.is_engine_scope());
    }

    #[test]
    fn start_graph_round_trips() {
        let cmd = Command::start_graph(
            Location::for_app("weft://a"),
            StartGraphCommand {
                predefined_graph_name: Some("voice".into()),
                graph_json: None,
            },
        );
        let json = serde_json::to_string(&cmd).expect("serialize");
        let back: Command = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, cmd);
    }

    #[test]
    fn unknown_name_decodes_to_unknown_kind() {
        let mut cmd = Command::close_app(Location::empty());
        cmd.header.name = "frobnicate".into();
        cmd.kind = CommandKind::Unknown("frobnicate".into());

        let json = serde_json::to_string(&cmd).expect("serialize");
        let back: Command = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.kind, CommandKind::Unknown("frobnicate".into()));
    }

    #[test]
    fn malformed_payload_is_an_error_not_a_panic() {
        let json = serde_json::json!({
            "header": {
                "id": "1f3e4b2a-0000-0000-0000-000000000000",
                "name": "timer",
                "timestamp": "2026-01-01T00:00:00Z"
            },
            "payload": { "timer_id": "not-a-number" }
        });
        let result: Result<Command, _> = serde_json::from_value(json);
        assert!(result.is_err());
    }

    #[test]
    fn parent_links_causal_chains() {
        let parent = Command::close_app(Location::empty());
        let child = Command::timeout(Location::empty(), 7).with_parent(parent.id());
        assert_eq!(child.parent_id, Some(parent.id()));
    }
}

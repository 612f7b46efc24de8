//! The message envelope shared by every wire payload.

use crate::{Command, CommandResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use weft_types::{Location, MessageId};

/// Fields common to every message kind.
///
/// The `id` is caller-assigned and globally unique; for commands it is the
/// correlation key their result answers to. `src` is stamped by whoever
/// emits (or relays) the message; `dests` may be empty for messages whose
/// routing is decided by graph rules rather than explicit addressing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageHeader {
    /// Globally unique message id.
    pub id: MessageId,
    /// Message name, used for route matching and command dispatch.
    pub name: String,
    /// Where the message came from.
    #[serde(default)]
    pub src: Location,
    /// Where the message is going. May be empty (route by graph rules).
    #[serde(default)]
    pub dests: Vec<Location>,
    /// Free-form properties carried alongside the payload.
    #[serde(default)]
    pub properties: Map<String, Value>,
    /// Creation time, stamped by the sender.
    pub timestamp: DateTime<Utc>,
}

impl MessageHeader {
    /// Creates a header with a fresh id and the current time.
    #[must_use]
    pub fn new(name: impl Into<String>, src: Location) -> Self {
        Self {
            id: MessageId::new(),
            name: name.into(),
            src,
            dests: Vec::new(),
            properties: Map::new(),
            timestamp: Utc::now(),
        }
    }

    /// Returns a copy with the destinations replaced.
    #[must_use]
    pub fn with_dests(mut self, dests: Vec<Location>) -> Self {
        self.dests = dests;
        self
    }

    /// Sets one property, replacing any previous value under the key.
    pub fn set_property(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }
}

/// A data-plane message carrying an opaque byte payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataMessage {
    /// Common envelope fields.
    pub header: MessageHeader,
    /// Opaque payload bytes.
    #[serde(default)]
    pub payload: Vec<u8>,
}

/// A PCM audio frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioFrameMessage {
    /// Common envelope fields.
    pub header: MessageHeader,
    /// Interleaved sample bytes.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Samples per second.
    pub sample_rate: u32,
    /// Channel count.
    pub channels: u16,
    /// Samples per channel in this frame.
    pub samples_per_channel: u32,
}

/// A raw video frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoFrameMessage {
    /// Common envelope fields.
    pub header: MessageHeader,
    /// Pixel bytes in `pixel_format` layout.
    #[serde(default)]
    pub data: Vec<u8>,
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format tag (e.g. "i420", "rgba"). Interpreted downstream.
    pub pixel_format: String,
}

/// Every payload the runtime routes, as one closed sum.
///
/// Control plane (`Cmd`, `CmdResult`) and data plane (`Data`,
/// `AudioFrame`, `VideoFrame`) flow through the same routing code but have
/// different delivery guarantees: commands always produce an explicit
/// result, data-plane messages are dropped (logged) under backpressure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Message {
    /// Opaque data-plane payload.
    Data(DataMessage),
    /// Audio frame.
    AudioFrame(AudioFrameMessage),
    /// Video frame.
    VideoFrame(VideoFrameMessage),
    /// A command expecting exactly one [`CommandResult`].
    Cmd(Command),
    /// The reply to a command.
    CmdResult(CommandResult),
}

impl Message {
    /// Returns the shared envelope fields.
    #[must_use]
    pub fn header(&self) -> &MessageHeader {
        match self {
            Self::Data(m) => &m.header,
            Self::AudioFrame(m) => &m.header,
            Self::VideoFrame(m) => &m.header,
            Self::Cmd(m) => &m.header,
            Self::CmdResult(m) => &m.header,
        }
    }

    /// Mutable access to the shared envelope fields.
    pub fn header_mut(&mut self) -> &mut MessageHeader {
        match self {
            Self::Data(m) => &mut m.header,
            Self::AudioFrame(m) => &mut m.header,
            Self::VideoFrame(m) => &mut m.header,
            Self::Cmd(m) => &mut m.header,
            Self::CmdResult(m) => &mut m.header,
        }
    }

    /// The message id.
    #[must_use]
    pub fn id(&self) -> MessageId {
        self.header().id
    }

    /// The message name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.header().name
    }

    /// `true` for control-plane commands.
    #[must_use]
    pub fn is_command(&self) -> bool {
        matches!(self, Self::Cmd(_))
    }

    /// `true` for data-plane payloads (expendable under backpressure).
    #[must_use]
    pub fn is_data_plane(&self) -> bool {
        matches!(self, Self::Data(_) | Self::AudioFrame(_) | Self::VideoFrame(_))
    }

    /// A short tag naming the message kind, for logs.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Data(_) => "data",
            Self::AudioFrame(_) => "audio_frame",
            Self::VideoFrame(_) => "video_frame",
            Self::Cmd(_) => "cmd",
            Self::CmdResult(_) => "cmd_result",
        }
    }
}

impl From<Command> for Message {
    fn from(cmd: Command) -> Self {
        Self::Cmd(cmd)
    }
}

impl From<CommandResult> for Message {
    fn from(result: CommandResult) -> Self {
        Self::CmdResult(result)
    }
}

//! Message model for the Weft graph runtime.
//!
//! Everything the runtime routes is a [`Message`]: data-plane payloads
//! (`Data`, `AudioFrame`, `VideoFrame`) and the control plane
//! ([`Command`] / [`CommandResult`]). Commands form a closed sum type
//! dispatched on the wire by the header's `name` field, with an explicit
//! [`CommandKind::Unknown`] variant for names this runtime does not know.
//!
//! ```text
//! ┌────────────┐  Command (id = K)    ┌────────────┐
//! │   caller   │ ───────────────────► │   target   │
//! │            │ ◄─────────────────── │            │
//! └────────────┘  CommandResult       └────────────┘
//!                 (original_cmd_id = K)
//! ```
//!
//! The [`Codec`] trait is the seam to the transport layer; [`JsonCodec`]
//! is the reference implementation.

mod codec;
mod command;
mod error;
mod message;
mod result;

pub use codec::{Codec, CodecError, JsonCodec};
pub use command::{
    CMD_CLOSE_APP, CMD_START_GRAPH, CMD_STOP_GRAPH, CMD_TIMEOUT, CMD_TIMER, Command, CommandKind,
    StartGraphCommand, StopGraphCommand, TimeoutCommand, TimerCommand,
};
pub use error::MessageError;
pub use message::{AudioFrameMessage, DataMessage, Message, MessageHeader, VideoFrameMessage};
pub use result::{CMD_RESULT_NAME, CommandResult, StatusCode};

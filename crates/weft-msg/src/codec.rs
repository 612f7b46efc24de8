//! The codec seam between messages and transport bytes.
//!
//! The runtime never touches bytes itself: connections hand outbound
//! messages to a [`Codec`] and receive inbound ones already decoded. The
//! contract is lossless round-tripping of every header field; the actual
//! byte layout belongs to the codec implementation. [`JsonCodec`] is the
//! reference implementation and what the in-memory test transports use.

use crate::Message;
use thiserror::Error;
use weft_types::ErrorCode;

/// Encode/decode failures at the codec seam.
#[derive(Debug, Error)]
pub enum CodecError {
    /// A message could not be serialized.
    #[error("failed to encode message: {0}")]
    Encode(String),
    /// Inbound bytes did not decode to a message.
    #[error("failed to decode message: {0}")]
    Decode(String),
}

impl ErrorCode for CodecError {
    fn code(&self) -> &'static str {
        match self {
            Self::Encode(_) => "MSG_ENCODE",
            Self::Decode(_) => "MSG_DECODE",
        }
    }

    fn is_recoverable(&self) -> bool {
        // Re-encoding the same message fails the same way.
        false
    }
}

/// Message ⇄ bytes, losslessly.
pub trait Codec: Send + Sync {
    /// Serializes a message to transport bytes.
    fn encode(&self, msg: &Message) -> Result<Vec<u8>, CodecError>;

    /// Deserializes transport bytes to a message.
    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError>;
}

/// Reference codec: one JSON document per frame.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn encode(&self, msg: &Message) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(msg).map_err(|e| CodecError::Encode(e.to_string()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Message, CodecError> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::Decode(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Command, CommandResult, DataMessage, MessageHeader};
    use weft_types::{GraphId, Location, assert_error_code};

    #[test]
    fn json_codec_round_trips_every_kind() {
        let codec = JsonCodec;
        let src = Location::for_engine("weft://a", GraphId::from("g"));
        let cmd = Command::stop_graph(src.clone(), GraphId::from("g"));
        let messages = vec![
            Message::Data(DataMessage {
                header: MessageHeader::new("chunk", src.clone()),
                payload: b"bytes".to_vec(),
            }),
            Message::CmdResult(CommandResult::success_for(&cmd)),
            Message::Cmd(cmd),
        ];
        for msg in messages {
            let bytes = codec.encode(&msg).expect("encode");
            let back = codec.decode(&bytes).expect("decode");
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn garbage_bytes_fail_to_decode() {
        let err = JsonCodec.decode(b"\x00not json").expect_err("must fail");
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn codec_error_codes_follow_conventions() {
        assert_error_code(&CodecError::Encode(String::new()), "MSG_");
        assert_error_code(&CodecError::Decode(String::new()), "MSG_");
    }
}

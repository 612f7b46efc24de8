//! The transport seam.
//!
//! The runtime does not move bytes; a [`Transport`] implementation does.
//! Per connection it must supply a liveness check, a byte-level send with
//! an asynchronous completion signal, and — on its own read path — a call
//! into [`Connection::on_message_received`](super::Connection::on_message_received)
//! once a frame has been decoded.

use thiserror::Error;
use weft_types::ErrorCode;

/// Transport-level send failures, reported through the completion signal.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// The peer is gone or the transport was shut down.
    #[error("transport inactive")]
    Inactive,
    /// An I/O level failure.
    #[error("transport i/o error: {0}")]
    Io(String),
}

impl ErrorCode for TransportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Inactive => "RT_TRANSPORT_INACTIVE",
            Self::Io(_) => "RT_TRANSPORT_IO",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::Io(_))
    }
}

/// Asynchronous completion signal for a byte-level send.
pub type SendCompletion = Box<dyn FnOnce(Result<(), TransportError>) + Send>;

/// One live byte pipe. Implementations are the network layer's.
pub trait Transport: Send + Sync {
    /// `true` while the pipe can carry bytes. An inactive transport fails
    /// sends immediately; the runtime never retries on its behalf.
    fn is_active(&self) -> bool;

    /// Hands a frame to the transport. Delivery outcome arrives through
    /// `completion`, possibly on a transport-owned thread.
    fn send_bytes(&self, bytes: Vec<u8>, completion: SendCompletion);

    /// Tears the pipe down. Idempotent.
    fn close(&self);
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_types::assert_error_code;

    #[test]
    fn transport_error_codes() {
        assert_error_code(&TransportError::Inactive, "RT_");
        assert_error_code(&TransportError::Io("reset".into()), "RT_");
        assert!(TransportError::Io("reset".into()).is_recoverable());
        assert!(!TransportError::Inactive.is_recoverable());
    }
}

//! One-shot result bridging between components.
//!
//! Every outstanding command has exactly one [`ResultSink`] on the
//! responder's side and (usually) one [`ResultHandle`] on the caller's.
//! Completing the sink fires the handle — but never directly: when the
//! caller was a runloop thread, the completion is re-posted onto that
//! loop first, so the caller's state is only ever touched with its own
//! thread affinity. This is the second hop of the two-hop round trip.

use crate::RuntimeError;
use crate::runloop::RunloopHandle;
use crossbeam_channel::{Receiver, Sender, bounded};
use std::time::Duration;
use tracing::{debug, warn};
use weft_msg::CommandResult;

type ResultCallback = Box<dyn FnOnce(CommandResult) + Send + 'static>;

enum SinkAction {
    /// Fulfill a handle and/or run a caller-supplied callback.
    Slot {
        tx: Sender<CommandResult>,
        callback: Option<ResultCallback>,
    },
    /// Arbitrary completion, e.g. writing the result back to the
    /// originating connection.
    Func(ResultCallback),
}

/// Completion side of one outstanding command.
///
/// Held by the responder (stored in its in-flight map until the handler
/// answers). Completing twice is impossible by construction — `complete`
/// consumes the sink; a sink dropped without completion leaves the handle
/// to report [`RuntimeError::ResultDropped`].
pub struct ResultSink {
    action: Option<SinkAction>,
    reply_loop: Option<RunloopHandle>,
}

impl ResultSink {
    /// A sink/handle pair. If the calling thread is a runloop worker,
    /// that loop is captured as the reply loop and the completion will be
    /// marshalled back onto it.
    #[must_use]
    pub fn channel() -> (Self, ResultHandle) {
        Self::channel_inner(None)
    }

    /// Like [`channel`](Self::channel), with a callback that runs at
    /// completion time (on the reply loop, when there is one).
    #[must_use]
    pub fn channel_with_callback(
        callback: impl FnOnce(CommandResult) + Send + 'static,
    ) -> (Self, ResultHandle) {
        Self::channel_inner(Some(Box::new(callback)))
    }

    fn channel_inner(callback: Option<ResultCallback>) -> (Self, ResultHandle) {
        let (tx, rx) = bounded(1);
        let sink = Self {
            action: Some(SinkAction::Slot { tx, callback }),
            reply_loop: crate::runloop::Runloop::current(),
        };
        (sink, ResultHandle { rx })
    }

    /// A sink that runs `f` with the result, on the responder's thread.
    ///
    /// Used for results that leave the process (connection-backed
    /// replies), where there is no caller loop to hop back to.
    #[must_use]
    pub fn from_fn(f: impl FnOnce(CommandResult) + Send + 'static) -> Self {
        Self {
            action: Some(SinkAction::Func(Box::new(f))),
            reply_loop: None,
        }
    }

    /// Completes the command, delivering `result` to the caller.
    pub fn complete(mut self, result: CommandResult) {
        let Some(action) = self.action.take() else {
            return;
        };
        match self.reply_loop.take() {
            Some(reply_loop) => {
                // Re-post onto the caller's original loop. A rejected
                // post drops the action (and its sender), which unblocks
                // any waiting handle with a disconnect.
                let posted = reply_loop.post_task(move || fire(action, result));
                if !posted {
                    warn!("command result dropped: caller runloop unavailable");
                }
            }
            None => fire(action, result),
        }
    }
}

fn fire(action: SinkAction, result: CommandResult) {
    match action {
        SinkAction::Slot { tx, callback } => {
            // The handle may have been dropped (fire-and-forget caller);
            // the callback still runs.
            let _ = tx.send(result.clone());
            if let Some(callback) = callback {
                callback(result);
            }
        }
        SinkAction::Func(f) => f(result),
    }
}

impl std::fmt::Debug for ResultSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultSink")
            .field("completed", &self.action.is_none())
            .field("has_reply_loop", &self.reply_loop.is_some())
            .finish()
    }
}

/// Caller side of one outstanding command.
///
/// The handle is fulfilled when the responder completes the sink. It may
/// stay unfulfilled forever if the target loop shuts down before the
/// dispatch runs — bounded waiting is the caller's job, which is what
/// [`recv_timeout`](Self::recv_timeout) is for.
#[derive(Debug)]
pub struct ResultHandle {
    rx: Receiver<CommandResult>,
}

impl ResultHandle {
    /// Waits up to `timeout` for the result.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<CommandResult, RuntimeError> {
        self.rx.recv_timeout(timeout).map_err(|e| match e {
            crossbeam_channel::RecvTimeoutError::Timeout => RuntimeError::ResultTimeout,
            crossbeam_channel::RecvTimeoutError::Disconnected => {
                debug!("result handle disconnected before completion");
                RuntimeError::ResultDropped
            }
        })
    }

    /// Non-blocking poll.
    #[must_use]
    pub fn try_recv(&self) -> Option<CommandResult> {
        self.rx.try_recv().ok()
    }
}

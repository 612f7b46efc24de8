//! The environment: the capability surface components act through.
//!
//! Every component kind (app, engine) implements [`Env`] — property
//! access, command/message send, result delivery, lifecycle close. A
//! direct `Env` implementation executes inline because it is only ever
//! invoked already-on-the-owner-thread.
//!
//! [`EnvProxy`] is the handle given to *other* components: it wraps a
//! `(target runloop, target env)` pair and marshals every mutating
//! operation onto the target's loop with `post_task`. A command sent
//! through a proxy makes two scheduling hops per round trip — dispatch
//! onto the target's loop, reply back onto the caller's — which is the
//! mechanism that keeps both sides' state on their own threads, with no
//! locks held across either hop.

mod result;

pub use result::{ResultHandle, ResultSink};

use crate::RuntimeError;
use crate::runloop::RunloopHandle;
use parking_lot::Mutex;
use serde_json::Value;
use std::sync::{Arc, Weak};
use tracing::warn;
use uuid::Uuid;
use weft_msg::{Command, CommandResult, Message};

/// Capability surface of one runtime component.
///
/// Implementations mutate component state directly and are therefore
/// only ever called on the component's own runloop — cross-thread
/// callers go through [`EnvProxy`].
pub trait Env: Send + 'static {
    /// Component name, for logs.
    fn name(&self) -> &str;

    /// Reads a property.
    fn property(&self, key: &str) -> Option<Value>;

    /// Writes a property.
    fn set_property(&mut self, key: String, value: Value);

    /// Dispatches an inbound command. The implementation owns `sink`
    /// until the command is answered (immediately or later via
    /// [`send_result`](Self::send_result)).
    fn dispatch_cmd(&mut self, cmd: Command, sink: ResultSink);

    /// Delivers a non-command message. Delivery failures are logged and
    /// the message is dropped.
    fn deliver_msg(&mut self, msg: Message);

    /// Answers an in-flight command previously received through
    /// [`dispatch_cmd`](Self::dispatch_cmd), matched by
    /// `result.original_cmd_id`.
    fn send_result(&mut self, result: CommandResult);

    /// Begins the component's orderly close.
    fn close(&mut self);
}

/// Thread-marshalling, non-owning handle to another component's [`Env`].
///
/// The proxy holds a `Weak` reference: its lifetime is bounded by its
/// creator, never by the target. Operations on a dropped target complete
/// with an explicit failure (commands) or are logged and dropped
/// (messages).
pub struct EnvProxy<E: Env> {
    target_loop: RunloopHandle,
    target: Weak<Mutex<E>>,
    signature: Uuid,
}

impl<E: Env> Clone for EnvProxy<E> {
    fn clone(&self) -> Self {
        Self {
            target_loop: self.target_loop.clone(),
            target: Weak::clone(&self.target),
            signature: self.signature,
        }
    }
}

impl<E: Env> std::fmt::Debug for EnvProxy<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvProxy")
            .field("target_loop", &self.target_loop.name())
            .field("signature", &self.signature)
            .finish_non_exhaustive()
    }
}

impl<E: Env> EnvProxy<E> {
    /// Creates a proxy to `target`, whose owner loop is `target_loop`.
    #[must_use]
    pub fn new(target_loop: RunloopHandle, target: &Arc<Mutex<E>>) -> Self {
        Self {
            target_loop,
            target: Arc::downgrade(target),
            signature: Uuid::new_v4(),
        }
    }

    /// The proxy's identity tag, for logs and debugging.
    #[must_use]
    pub fn signature(&self) -> Uuid {
        self.signature
    }

    /// The target's runloop handle.
    #[must_use]
    pub fn target_loop(&self) -> &RunloopHandle {
        &self.target_loop
    }

    /// `true` while the target component still exists.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.target.strong_count() > 0
    }

    /// Sends a command to the target, returning an asynchronous result
    /// handle immediately.
    ///
    /// The dispatch is posted onto the target's loop; the reply is
    /// re-posted onto the caller's original loop (when the caller is a
    /// runloop thread) before the handle is fulfilled. A synchronous
    /// rejection (queue full, loop unavailable) is returned as an error;
    /// a target dropped before dispatch completes the handle with a
    /// failure result instead.
    pub fn send_cmd(&self, cmd: Command) -> Result<ResultHandle, RuntimeError> {
        let (sink, handle) = ResultSink::channel();
        self.post_dispatch(cmd, sink)?;
        Ok(handle)
    }

    /// Like [`send_cmd`](Self::send_cmd), but delivers the result to
    /// `callback` — run with the caller's own thread affinity when the
    /// caller is a runloop thread.
    pub fn send_cmd_with_callback(
        &self,
        cmd: Command,
        callback: impl FnOnce(CommandResult) + Send + 'static,
    ) -> Result<(), RuntimeError> {
        let (sink, _handle) = ResultSink::channel_with_callback(callback);
        self.post_dispatch(cmd, sink)
    }

    fn post_dispatch(&self, cmd: Command, sink: ResultSink) -> Result<(), RuntimeError> {
        let target = Weak::clone(&self.target);
        let cmd_id = cmd.id();
        let posted = self.target_loop.post_task(move || match target.upgrade() {
            Some(cell) => cell.lock().dispatch_cmd(cmd, sink),
            None => {
                warn!(cmd = %cmd_id, "command target dropped before dispatch");
                sink.complete(CommandResult::failure(cmd_id, "target environment dropped"));
            }
        });
        if posted {
            Ok(())
        } else {
            Err(self.post_failure())
        }
    }

    /// Marshals a non-command message onto the target's loop.
    ///
    /// A rejection is returned to the caller; a target dropped at
    /// delivery time is logged and the message is dropped.
    pub fn send_msg(&self, msg: Message) -> Result<(), RuntimeError> {
        let target = Weak::clone(&self.target);
        let posted = self.target_loop.post_task(move || match target.upgrade() {
            Some(cell) => cell.lock().deliver_msg(msg),
            None => warn!(msg = msg.type_name(), "message dropped: target environment gone"),
        });
        if posted { Ok(()) } else { Err(self.post_failure()) }
    }

    /// Marshals a result for one of the target's in-flight commands.
    pub fn send_result(&self, result: CommandResult) -> Result<(), RuntimeError> {
        let target = Weak::clone(&self.target);
        let posted = self.target_loop.post_task(move || match target.upgrade() {
            Some(cell) => cell.lock().send_result(result),
            None => warn!("result dropped: target environment gone"),
        });
        if posted { Ok(()) } else { Err(self.post_failure()) }
    }

    /// Marshals a property write onto the target's loop.
    pub fn set_property(&self, key: impl Into<String>, value: Value) -> Result<(), RuntimeError> {
        let target = Weak::clone(&self.target);
        let key = key.into();
        let posted = self.target_loop.post_task(move || {
            if let Some(cell) = target.upgrade() {
                cell.lock().set_property(key, value);
            }
        });
        if posted { Ok(()) } else { Err(self.post_failure()) }
    }

    /// Reads a property synchronously, on the calling thread.
    ///
    /// Deliberately *not* marshalled: the read locks the target cell from
    /// whatever thread the caller is on. Memory-safe, but unsynchronized
    /// with the owner loop's task order — a concurrent write on the owner
    /// loop may or may not be visible. Kept as a known shortcut; writers
    /// must still go through [`set_property`](Self::set_property).
    #[must_use]
    pub fn property(&self, key: &str) -> Option<Value> {
        self.target.upgrade().and_then(|cell| cell.lock().property(key))
    }

    /// Marshals a close request onto the target's loop.
    pub fn close(&self) -> Result<(), RuntimeError> {
        let target = Weak::clone(&self.target);
        let posted = self.target_loop.post_task(move || {
            if let Some(cell) = target.upgrade() {
                cell.lock().close();
            }
        });
        if posted { Ok(()) } else { Err(self.post_failure()) }
    }

    fn post_failure(&self) -> RuntimeError {
        if self.target_loop.is_running() {
            RuntimeError::QueueFull(self.target_loop.name().to_string())
        } else {
            RuntimeError::LoopUnavailable(self.target_loop.name().to_string())
        }
    }
}

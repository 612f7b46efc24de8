//! In-memory doubles for exercising the runtime without a network.
//!
//! - [`MemoryTransport`]: a [`Transport`] that records outbound frames
//!   for inspection instead of sending them anywhere.
//! - [`CollectingExtension`]: an [`Extension`] that logs everything it
//!   receives (with the delivering thread's id) and answers every
//!   command with success.
//! - [`TestComponent`]: a bare [`Env`] implementation for proxy and
//!   round-trip tests that don't want a whole app/engine pair.

use crate::connection::{SendCompletion, Transport};
use crate::engine::EngineCore;
use crate::env::{Env, ResultSink};
use crate::extension::Extension;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::ThreadId;
use weft_msg::{
    AudioFrameMessage, Codec, Command, CommandResult, DataMessage, Message, VideoFrameMessage,
};
use weft_types::MessageId;

/// A transport that buffers outbound frames in memory.
///
/// Cloning shares the buffer, so tests keep a clone and inspect what the
/// connection sent.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    inner: Arc<MemoryTransportInner>,
}

#[derive(Default)]
struct MemoryTransportInner {
    active: ActiveFlag,
    sent: Mutex<Vec<Vec<u8>>>,
}

struct ActiveFlag(AtomicBool);

impl Default for ActiveFlag {
    fn default() -> Self {
        Self(AtomicBool::new(true))
    }
}

impl MemoryTransport {
    /// A fresh, active transport.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Flips liveness; an inactive transport fails sends immediately.
    pub fn set_active(&self, active: bool) {
        self.inner.active.0.store(active, Ordering::SeqCst);
    }

    /// Raw frames sent so far.
    #[must_use]
    pub fn sent_frames(&self) -> Vec<Vec<u8>> {
        self.inner.sent.lock().clone()
    }

    /// Sent frames, decoded through `codec`. Panics on undecodable
    /// frames — test usage only.
    #[must_use]
    pub fn decoded(&self, codec: &dyn Codec) -> Vec<Message> {
        self.inner
            .sent
            .lock()
            .iter()
            .map(|bytes| codec.decode(bytes).expect("sent frame must decode"))
            .collect()
    }
}

impl Transport for MemoryTransport {
    fn is_active(&self) -> bool {
        self.inner.active.0.load(Ordering::SeqCst)
    }

    fn send_bytes(&self, bytes: Vec<u8>, completion: SendCompletion) {
        self.inner.sent.lock().push(bytes);
        completion(Ok(()));
    }

    fn close(&self) {
        self.set_active(false);
    }
}

/// One event a [`CollectingExtension`] observed.
#[derive(Debug, Clone)]
pub struct SeenEvent {
    /// "cmd", "data", "audio_frame" or "video_frame".
    pub kind: &'static str,
    /// The message name.
    pub name: String,
    /// Thread the callback ran on.
    pub thread: ThreadId,
}

/// Shared log of what an extension received.
pub type ExtensionLog = Arc<Mutex<Vec<SeenEvent>>>;

/// An extension that records deliveries and answers every command with
/// success.
pub struct CollectingExtension {
    log: ExtensionLog,
}

impl CollectingExtension {
    /// The extension and a shared handle to its log.
    #[must_use]
    pub fn new() -> (Self, ExtensionLog) {
        let log: ExtensionLog = Arc::default();
        (
            Self {
                log: Arc::clone(&log),
            },
            log,
        )
    }

    fn record(&self, kind: &'static str, name: &str) {
        self.log.lock().push(SeenEvent {
            kind,
            name: name.to_string(),
            thread: std::thread::current().id(),
        });
    }
}

impl Extension for CollectingExtension {
    fn on_cmd(&mut self, env: &mut EngineCore, cmd: Command) {
        self.record("cmd", &cmd.header.name);
        env.send_result(CommandResult::success_for(&cmd));
    }

    fn on_data(&mut self, _env: &mut EngineCore, data: DataMessage) {
        self.record("data", &data.header.name);
    }

    fn on_audio_frame(&mut self, _env: &mut EngineCore, frame: AudioFrameMessage) {
        self.record("audio_frame", &frame.header.name);
    }

    fn on_video_frame(&mut self, _env: &mut EngineCore, frame: VideoFrameMessage) {
        self.record("video_frame", &frame.header.name);
    }
}

/// Responder deciding how a [`TestComponent`] answers commands.
pub type CommandResponder = Box<dyn FnMut(&Command) -> CommandResult + Send>;

/// A minimal component for exercising [`Env`]/proxy mechanics directly.
pub struct TestComponent {
    name: String,
    properties: Map<String, Value>,
    in_flight: HashMap<MessageId, ResultSink>,
    log: ExtensionLog,
    responder: CommandResponder,
    closed: bool,
}

impl TestComponent {
    /// A component that answers every command with success, plus its log.
    #[must_use]
    pub fn new(name: impl Into<String>) -> (Self, ExtensionLog) {
        Self::with_responder(name, Box::new(|cmd| CommandResult::success_for(cmd)))
    }

    /// A component with a custom command responder.
    #[must_use]
    pub fn with_responder(name: impl Into<String>, responder: CommandResponder) -> (Self, ExtensionLog) {
        let log: ExtensionLog = Arc::default();
        (
            Self {
                name: name.into(),
                properties: Map::new(),
                in_flight: HashMap::new(),
                log: Arc::clone(&log),
                responder,
                closed: false,
            },
            log,
        )
    }

    /// `true` once `close` ran.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl Env for TestComponent {
    fn name(&self) -> &str {
        &self.name
    }

    fn property(&self, key: &str) -> Option<Value> {
        self.properties.get(key).cloned()
    }

    fn set_property(&mut self, key: String, value: Value) {
        self.properties.insert(key, value);
    }

    fn dispatch_cmd(&mut self, cmd: Command, sink: ResultSink) {
        self.log.lock().push(SeenEvent {
            kind: "cmd",
            name: cmd.header.name.clone(),
            thread: std::thread::current().id(),
        });
        self.in_flight.insert(cmd.id(), sink);
        let result = (self.responder)(&cmd);
        if let Some(sink) = self.in_flight.remove(&result.original_cmd_id) {
            sink.complete(result);
        }
    }

    fn deliver_msg(&mut self, msg: Message) {
        self.log.lock().push(SeenEvent {
            kind: msg.type_name(),
            name: msg.name().to_string(),
            thread: std::thread::current().id(),
        });
    }

    fn send_result(&mut self, result: CommandResult) {
        if let Some(sink) = self.in_flight.remove(&result.original_cmd_id) {
            sink.complete(result);
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

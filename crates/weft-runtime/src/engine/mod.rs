//! The engine: per-graph authority.
//!
//! One [`Engine`] exists per running graph. It owns the graph's
//! extensions, its remotes (external engines reachable via connections),
//! the engine-scope command handlers (timers), and the correlation maps
//! for commands in flight — all mutated exclusively on the engine's
//! runloop, which the app either dedicates to this engine or shares.
//!
//! The engine is split into [`EngineCore`] (identity, routing tables,
//! correlation maps — the environment extensions act through) and the
//! extension/handler registries around it, so an extension callback can
//! hold `&mut EngineCore` while the engine still holds the extension.

mod cmd;
mod remote;

pub use cmd::{EngineCommandHandler, TimeoutCmdHandler, TimerCmdHandler};
pub use remote::Remote;

use crate::RuntimeError;
use crate::connection::Connection;
use crate::env::{Env, ResultHandle, ResultSink};
use crate::extension::Extension;
use crate::runloop::RunloopHandle;
use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, info, warn};
use weft_msg::{CMD_TIMEOUT, CMD_TIMER, Command, CommandResult, Message, TimerCommand};
use weft_types::{GraphDefinition, GraphId, Location, MessageId};

struct TimerState {
    /// Fires left; `None` means "until cancelled".
    remaining: Option<u32>,
    interval: Duration,
    /// Where each `Timeout` fire is delivered.
    requester: Location,
}

/// The engine's identity, routing tables and correlation maps — the
/// environment an extension acts through.
///
/// Everything here is owned by the engine's runloop thread; the in-flight
/// and pending maps are the per-loop correlation state that makes the
/// command round trip lock-free by construction.
pub struct EngineCore {
    name: String,
    app_uri: String,
    graph_id: GraphId,
    definition: GraphDefinition,
    runloop: RunloopHandle,
    cell: Weak<Mutex<Engine>>,
    remotes: HashMap<String, Remote>,
    /// Commands received and not yet answered, keyed by command id.
    in_flight: HashMap<MessageId, ResultSink>,
    /// Commands sent to remotes and awaiting their results.
    pending: HashMap<MessageId, ResultSink>,
    timers: HashMap<u64, TimerState>,
    properties: Map<String, Value>,
    running: bool,
}

impl EngineCore {
    /// Component name, for logs.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The owning app's URI.
    #[must_use]
    pub fn app_uri(&self) -> &str {
        &self.app_uri
    }

    /// This engine's graph id.
    #[must_use]
    pub fn graph_id(&self) -> &GraphId {
        &self.graph_id
    }

    /// The graph definition this engine was started from.
    #[must_use]
    pub fn definition(&self) -> &GraphDefinition {
        &self.definition
    }

    /// The engine's runloop handle.
    #[must_use]
    pub fn runloop(&self) -> &RunloopHandle {
        &self.runloop
    }

    /// The location addressing this engine.
    #[must_use]
    pub fn engine_location(&self) -> Location {
        Location::for_engine(self.app_uri.clone(), self.graph_id.clone())
    }

    /// The location addressing an extension of this engine.
    #[must_use]
    pub fn extension_location(&self, extension: impl Into<String>) -> Location {
        Location::for_extension(self.app_uri.clone(), self.graph_id.clone(), extension)
    }

    /// Reads a property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<Value> {
        self.properties.get(key).cloned()
    }

    /// Writes a property.
    pub fn set_property(&mut self, key: impl Into<String>, value: Value) {
        self.properties.insert(key.into(), value);
    }

    /// Answers an in-flight command, matched by
    /// `result.original_cmd_id`.
    ///
    /// A result matching nothing in flight is logged and dropped — the
    /// command was already answered, or never arrived here.
    pub fn send_result(&mut self, result: CommandResult) {
        match self.in_flight.remove(&result.original_cmd_id) {
            Some(sink) => sink.complete(result),
            None => warn!(
                engine = %self.name,
                cmd = %result.original_cmd_id,
                "result dropped: no matching in-flight command"
            ),
        }
    }

    /// Sends a command out of this extension/engine, returning a result
    /// handle immediately.
    ///
    /// Routing, by the first destination: a different app URI goes to
    /// that remote; a local extension is re-posted onto the engine's own
    /// loop (never re-entered inline); anything else is a no-route
    /// rejection.
    pub fn send_cmd(&mut self, cmd: Command) -> Result<ResultHandle, RuntimeError> {
        let (sink, handle) = ResultSink::channel();
        self.route_cmd_out(cmd, sink)?;
        Ok(handle)
    }

    /// Like [`send_cmd`](Self::send_cmd) with a completion callback
    /// instead of a handle.
    pub fn send_cmd_with_callback(
        &mut self,
        cmd: Command,
        callback: impl FnOnce(CommandResult) + Send + 'static,
    ) -> Result<(), RuntimeError> {
        let (sink, _handle) = ResultSink::channel_with_callback(callback);
        self.route_cmd_out(cmd, sink)
    }

    fn route_cmd_out(&mut self, cmd: Command, sink: ResultSink) -> Result<(), RuntimeError> {
        let dest = cmd.header.dests.first().cloned().unwrap_or_default();

        if let Some(uri) = dest.app_uri.as_deref()
            && uri != self.app_uri
        {
            let Some(remote) = self.remotes.get(uri) else {
                return Err(RuntimeError::NoRoute(cmd.header.name.clone()));
            };
            let cmd_id = cmd.id();
            remote.send(&Message::Cmd(cmd))?;
            self.pending.insert(cmd_id, sink);
            return Ok(());
        }

        if dest.extension.is_some() {
            return self.post_to_self(cmd, sink);
        }

        Err(RuntimeError::NoRoute(cmd.header.name.clone()))
    }

    /// Re-posts a command onto this engine's own loop for dispatch. Used
    /// for extension-to-extension commands so a handler never re-enters
    /// the engine it is being called from.
    fn post_to_self(&self, cmd: Command, sink: ResultSink) -> Result<(), RuntimeError> {
        let cell = Weak::clone(&self.cell);
        let posted = self.runloop.post_task(move || match cell.upgrade() {
            Some(engine) => engine.lock().dispatch_cmd(cmd, sink),
            None => {
                let id = cmd.id();
                sink.complete(CommandResult::failure(id, "engine stopped"));
            }
        });
        if posted {
            Ok(())
        } else if self.runloop.is_running() {
            Err(RuntimeError::QueueFull(self.runloop.name().to_string()))
        } else {
            Err(RuntimeError::LoopUnavailable(self.runloop.name().to_string()))
        }
    }

    /// Sends a non-command message out of this extension/engine.
    ///
    /// Remote destinations go over their connection; local ones are
    /// re-posted for graph routing on the engine's loop.
    pub fn send_msg(&mut self, msg: Message) -> Result<(), RuntimeError> {
        let dest = msg.header().dests.first().cloned().unwrap_or_default();
        if let Some(uri) = dest.app_uri.as_deref()
            && uri != self.app_uri
        {
            let Some(remote) = self.remotes.get(uri) else {
                return Err(RuntimeError::NoRoute(msg.name().to_string()));
            };
            return remote.send(&msg);
        }

        let cell = Weak::clone(&self.cell);
        let posted = self.runloop.post_task(move || {
            if let Some(engine) = cell.upgrade() {
                engine.lock().route_message(msg);
            }
        });
        if posted {
            Ok(())
        } else if self.runloop.is_running() {
            Err(RuntimeError::QueueFull(self.runloop.name().to_string()))
        } else {
            Err(RuntimeError::LoopUnavailable(self.runloop.name().to_string()))
        }
    }

    /// Registers a remote under its peer URI.
    pub fn add_remote(&mut self, remote: Remote) {
        self.remotes.insert(remote.uri().to_string(), remote);
    }

    /// Looks up a remote by peer URI.
    #[must_use]
    pub fn remote(&self, uri: &str) -> Option<&Remote> {
        self.remotes.get(uri)
    }

    pub(crate) fn start_timer(
        &mut self,
        cmd: &Command,
        timer: &TimerCommand,
    ) -> Result<(), RuntimeError> {
        if self.timers.contains_key(&timer.timer_id) {
            return Err(RuntimeError::TimerAlreadyExists(timer.timer_id));
        }
        let interval = Duration::from_millis(timer.interval_ms);
        self.timers.insert(
            timer.timer_id,
            TimerState {
                remaining: (timer.repeat > 0).then_some(timer.repeat),
                interval,
                requester: cmd.header.src.clone(),
            },
        );
        self.schedule_fire(timer.timer_id, interval);
        debug!(engine = %self.name, timer = timer.timer_id, "timer started");
        Ok(())
    }

    pub(crate) fn cancel_timer(&mut self, timer_id: u64) -> Result<(), RuntimeError> {
        // The scheduled fire may still be queued; it discards itself when
        // it finds no timer state (stale-entry discard).
        if self.timers.remove(&timer_id).is_none() {
            return Err(RuntimeError::TimerNotFound(timer_id));
        }
        debug!(engine = %self.name, timer = timer_id, "timer cancelled");
        Ok(())
    }

    fn schedule_fire(&self, timer_id: u64, interval: Duration) {
        let cell = Weak::clone(&self.cell);
        let posted = self.runloop.post_delayed(interval, move || {
            if let Some(engine) = cell.upgrade() {
                engine.lock().timer_fired(timer_id);
            }
        });
        if !posted {
            warn!(engine = %self.name, timer = timer_id, "timer fire could not be scheduled");
        }
    }
}

/// One running graph: core plus the extension and handler registries.
pub struct Engine {
    core: EngineCore,
    extensions: HashMap<String, Box<dyn Extension>>,
    handlers: HashMap<&'static str, Box<dyn EngineCommandHandler>>,
}

impl Engine {
    /// Creates the engine cell for `definition`, to run on `runloop`.
    ///
    /// The engine starts in the not-running state; the app posts
    /// [`start`](Self::start) onto the engine's loop after registering
    /// it.
    #[must_use]
    pub fn new_cell(
        app_uri: impl Into<String>,
        definition: GraphDefinition,
        runloop: RunloopHandle,
    ) -> Arc<Mutex<Self>> {
        let app_uri = app_uri.into();
        let graph_id = definition.graph_id.clone();
        Arc::new_cyclic(|weak: &Weak<Mutex<Self>>| {
            let mut handlers: HashMap<&'static str, Box<dyn EngineCommandHandler>> =
                HashMap::new();
            handlers.insert(CMD_TIMER, Box::new(TimerCmdHandler));
            handlers.insert(CMD_TIMEOUT, Box::new(TimeoutCmdHandler));
            Mutex::new(Self {
                core: EngineCore {
                    name: format!("engine-{}", graph_id.as_str()),
                    app_uri,
                    graph_id,
                    definition,
                    runloop,
                    cell: Weak::clone(weak),
                    remotes: HashMap::new(),
                    in_flight: HashMap::new(),
                    pending: HashMap::new(),
                    timers: HashMap::new(),
                    properties: Map::new(),
                    running: false,
                },
                extensions: HashMap::new(),
                handlers,
            })
        })
    }

    /// The engine's core environment.
    #[must_use]
    pub fn core(&self) -> &EngineCore {
        &self.core
    }

    /// Mutable access to the core environment.
    pub fn core_mut(&mut self) -> &mut EngineCore {
        &mut self.core
    }

    /// `true` between [`start`](Self::start) and [`stop`](Self::stop).
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.core.running
    }

    /// Marks the engine running. Runs on the engine loop.
    pub fn start(&mut self) {
        if self.core.running {
            return;
        }
        self.core.running = true;
        info!(engine = %self.core.name, "engine started");
    }

    /// Stops the engine: extensions get `on_stop`, remotes' connections
    /// are closed, timers are dropped. Runs on the engine loop.
    pub fn stop(&mut self) {
        if !self.core.running {
            return;
        }
        self.core.running = false;

        let names: Vec<String> = self.extensions.keys().cloned().collect();
        for name in names {
            if let Some(mut ext) = self.extensions.remove(&name) {
                ext.on_stop(&mut self.core);
                self.extensions.insert(name, ext);
            }
        }
        for remote in self.core.remotes.values() {
            remote.close();
        }
        self.core.remotes.clear();
        self.core.timers.clear();
        info!(engine = %self.core.name, "engine stopped");
    }

    /// Registers an extension under its node name and starts it.
    pub fn register_extension(&mut self, name: impl Into<String>, mut ext: Box<dyn Extension>) {
        let name = name.into();
        ext.on_start(&mut self.core);
        debug!(engine = %self.core.name, extension = %name, "extension registered");
        self.extensions.insert(name, ext);
    }

    /// Accepts a connection the app migrated here: constructs the
    /// [`Remote`], attaches it as the connection's receiver, and replays
    /// the triggering message through it. Runs on the engine loop.
    pub fn accept_connection(&mut self, conn: Arc<Connection>, first_msg: Option<Message>) {
        // Idempotent per connection: a message racing the handoff must
        // not attach a second remote.
        let existing = self
            .core
            .remotes
            .values()
            .find(|r| r.connection().id() == conn.id())
            .map(|r| (r.uri().to_string(), r.graph_id().clone()));
        if let Some((uri, graph_id)) = existing {
            if let Some(msg) = first_msg {
                self.ingest_remote(&uri, &graph_id, &conn, msg);
            }
            return;
        }

        let (uri, graph_id) = first_msg
            .as_ref()
            .map(|m| {
                let src = &m.header().src;
                (
                    src.app_uri.clone().unwrap_or_else(|| conn.remote_addr().to_string()),
                    src.graph_id.clone().unwrap_or_else(|| self.core.graph_id.clone()),
                )
            })
            .unwrap_or_else(|| {
                (conn.remote_addr().to_string(), self.core.graph_id.clone())
            });

        let remote = Remote::attach(
            uri.clone(),
            graph_id.clone(),
            Arc::clone(&conn),
            Weak::clone(&self.core.cell),
        );
        self.core.add_remote(remote);

        if let Some(msg) = first_msg {
            self.ingest_remote(&uri, &graph_id, &conn, msg);
        }
    }

    /// Feeds one inbound message from a remote peer into the engine,
    /// stamping its source location with the remote's identity first.
    pub(crate) fn ingest_remote(
        &mut self,
        remote_uri: &str,
        remote_graph: &GraphId,
        conn: &Arc<Connection>,
        mut msg: Message,
    ) {
        {
            let src = &mut msg.header_mut().src;
            src.app_uri = Some(remote_uri.to_string());
            src.graph_id = Some(remote_graph.clone());
        }
        match msg {
            Message::Cmd(cmd) => {
                // The reply goes back out over the same connection.
                let reply_conn = Arc::clone(conn);
                let sink = ResultSink::from_fn(move |result| {
                    let msg = Message::CmdResult(result);
                    if let Err(e) = reply_conn.send_outbound(&msg) {
                        warn!(conn = %reply_conn.id(), error = %e, "command result undeliverable");
                    }
                });
                self.dispatch_cmd(cmd, sink);
            }
            other => self.route_message(other),
        }
    }

    /// Routes one inbound command: to its destination extension when one
    /// is named, otherwise to the engine-scope handler for its kind.
    fn handle_command(&mut self, cmd: Command) {
        let dest_ext = cmd
            .header
            .dests
            .first()
            .and_then(|d| d.extension.clone());

        if let Some(name) = dest_ext {
            if self.extensions.contains_key(&name) {
                if let Some(mut ext) = self.extensions.remove(&name) {
                    ext.on_cmd(&mut self.core, cmd);
                    self.extensions.insert(name, ext);
                }
            } else {
                let result =
                    CommandResult::failure_for(&cmd, format!("extension '{name}' not found"));
                self.core.send_result(result);
            }
            return;
        }

        let result = match self.handlers.get(cmd.kind.name()) {
            Some(handler) => handler
                .handle(&mut self.core, &cmd)
                .unwrap_or_else(|e| CommandResult::failure_for(&cmd, e.to_string())),
            None => CommandResult::failure_for(
                &cmd,
                format!("no engine handler for command '{}'", cmd.kind.name()),
            ),
        };
        self.core.send_result(result);
    }

    /// Routes a non-command message to extensions by explicit destination
    /// or by the graph's route rules. No match: logged and dropped —
    /// data-plane traffic is expendable where commands are not.
    pub fn route_message(&mut self, msg: Message) {
        match msg {
            Message::Cmd(cmd) => {
                // A command arriving through the message path is
                // fire-and-forget: its result is logged, not returned.
                let name = self.core.name.clone();
                let sink = ResultSink::from_fn(move |result| {
                    if !result.is_success() {
                        debug!(engine = %name, "fire-and-forget command failed");
                    }
                });
                self.dispatch_cmd(cmd, sink);
            }
            Message::CmdResult(result) => {
                match self.core.pending.remove(&result.original_cmd_id) {
                    Some(sink) => sink.complete(result),
                    None => debug!(
                        engine = %self.core.name,
                        cmd = %result.original_cmd_id,
                        "result dropped: no pending command"
                    ),
                }
            }
            Message::Data(data) => {
                let targets = self.route_targets(&data.header);
                self.fan_out(&targets, data, |ext, core, payload| {
                    ext.on_data(core, payload);
                });
            }
            Message::AudioFrame(frame) => {
                let targets = self.route_targets(&frame.header);
                self.fan_out(&targets, frame, |ext, core, payload| {
                    ext.on_audio_frame(core, payload);
                });
            }
            Message::VideoFrame(frame) => {
                let targets = self.route_targets(&frame.header);
                self.fan_out(&targets, frame, |ext, core, payload| {
                    ext.on_video_frame(core, payload);
                });
            }
        }
    }

    /// Destination extension names for a data-plane message: explicit
    /// destinations win; otherwise the graph's route rules are matched on
    /// (message name, source extension).
    fn route_targets(&self, header: &weft_msg::MessageHeader) -> Vec<String> {
        let explicit: Vec<String> = header
            .dests
            .iter()
            .filter_map(|d| d.extension.clone())
            .collect();
        if !explicit.is_empty() {
            return explicit;
        }
        let src_ext = header.src.extension.as_deref();
        self.core
            .definition
            .routes
            .iter()
            .filter(|rule| {
                rule.msg_name == header.name && Some(rule.src_extension.as_str()) == src_ext
            })
            .flat_map(|rule| rule.dest_extensions.iter().cloned())
            .collect()
    }

    fn fan_out<P: Clone>(
        &mut self,
        targets: &[String],
        payload: P,
        deliver: impl Fn(&mut dyn Extension, &mut EngineCore, P),
    ) {
        if targets.is_empty() {
            debug!(engine = %self.core.name, "message dropped: no route");
            return;
        }
        for name in targets {
            match self.extensions.remove(name) {
                Some(mut ext) => {
                    deliver(ext.as_mut(), &mut self.core, payload.clone());
                    self.extensions.insert(name.clone(), ext);
                }
                None => {
                    debug!(
                        engine = %self.core.name,
                        extension = %name,
                        "message dropped: extension not registered"
                    );
                }
            }
        }
    }

    /// One timer fire. Discards itself when the timer was cancelled.
    fn timer_fired(&mut self, timer_id: u64) {
        let Some(state) = self.core.timers.get_mut(&timer_id) else {
            return;
        };
        let requester = state.requester.clone();
        let interval = state.interval;
        let finished = match state.remaining.as_mut() {
            Some(n) => {
                *n = n.saturating_sub(1);
                *n == 0
            }
            None => false,
        };
        if finished {
            self.core.timers.remove(&timer_id);
        } else {
            self.core.schedule_fire(timer_id, interval);
        }

        let cmd = Command::timeout(self.core.engine_location(), timer_id)
            .with_dests(vec![requester]);
        let engine = self.core.name.clone();
        let sink = ResultSink::from_fn(move |result| {
            if !result.is_success() {
                debug!(%engine, timer = timer_id, "timeout delivery failed");
            }
        });
        self.dispatch_cmd(cmd, sink);
    }
}

impl Env for Engine {
    fn name(&self) -> &str {
        &self.core.name
    }

    fn property(&self, key: &str) -> Option<Value> {
        self.core.property(key)
    }

    fn set_property(&mut self, key: String, value: Value) {
        self.core.set_property(key, value);
    }

    fn dispatch_cmd(&mut self, cmd: Command, sink: ResultSink) {
        self.core.in_flight.insert(cmd.id(), sink);
        self.handle_command(cmd);
    }

    fn deliver_msg(&mut self, msg: Message) {
        self.route_message(msg);
    }

    fn send_result(&mut self, result: CommandResult) {
        self.core.send_result(result);
    }

    fn close(&mut self) {
        self.stop();
    }
}

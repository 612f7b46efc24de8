//! The app: process-wide root authority.
//!
//! One [`App`] per process. It owns the acceptor-side runloop, the
//! `graph id → engine` registry, and the handlers for app-scope commands
//! (start graph, stop graph, close app). Freshly accepted connections
//! are pinned to the app's runloop with the app as their receiver; once
//! an inbound message resolves to a registered engine, the app migrates
//! the connection to that engine's loop and replays the message there.
//!
//! Lifecycle is linear: `Created → Running → Stopped`, no re-entry.

mod cmd;

pub use cmd::{AppCommandHandler, CloseAppHandler, StartGraphHandler, StopGraphHandler};

use crate::RuntimeError;
use crate::connection::{Connection, MessageReceiver, Transport};
use crate::engine::Engine;
use crate::env::{Env, EnvProxy, ResultSink};
use crate::extension::Extension;
use crate::runloop::{Runloop, RunloopHandle};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, warn};
use weft_msg::{
    CMD_CLOSE_APP, CMD_START_GRAPH, CMD_STOP_GRAPH, Codec, Command, CommandResult, Message,
    StartGraphCommand,
};
use weft_types::{GraphDefinition, GraphId, Location, MessageId, PredefinedGraph};

/// App lifecycle. Linear; a stopped app is never restarted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppState {
    /// Constructed, start task not yet run.
    Created,
    /// Accepting connections and commands.
    Running,
    /// Closed; every engine stopped.
    Stopped,
}

/// Static app configuration. A configuration loader fills this struct;
/// parsing config files is outside the runtime's scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// This app's URI, stamped into locations and used to tell local
    /// destinations from remote ones.
    pub uri: String,
    /// Give each engine its own runloop instead of sharing the app's.
    #[serde(default)]
    pub one_loop_per_engine: bool,
    /// Graphs startable by name (and auto-startable at app start).
    #[serde(default)]
    pub predefined_graphs: Vec<PredefinedGraph>,
    /// Task queue capacity override for the app loop.
    #[serde(default)]
    pub queue_capacity: Option<usize>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            uri: "weft://app".to_string(),
            one_loop_per_engine: false,
            predefined_graphs: Vec::new(),
            queue_capacity: None,
        }
    }
}

/// A registered engine: its cell, its loop, and — when
/// `one_loop_per_engine` is set — ownership of that loop.
struct EngineRef {
    cell: Arc<Mutex<Engine>>,
    runloop: RunloopHandle,
    owned_loop: Option<Runloop>,
}

impl EngineRef {
    /// Stops the engine and, when it owned its loop, drains and joins it.
    fn shutdown(self) {
        if self.runloop.is_current() {
            // Already on the engine's owner thread (shared-loop case
            // during app close): stopping inline keeps the affinity
            // contract and cannot be rejected by a draining queue.
            self.cell.lock().stop();
        } else {
            let cell = Arc::clone(&self.cell);
            if !self.runloop.post_task(move || cell.lock().stop()) {
                warn!("engine stop task rejected; extensions skip on_stop");
            }
        }
        if let Some(owned) = self.owned_loop {
            owned.shutdown();
        }
    }
}

/// The process-root component.
pub struct App {
    name: String,
    state: AppState,
    config: AppConfig,
    runloop: RunloopHandle,
    engines: HashMap<GraphId, EngineRef>,
    /// Accepted connections not yet migrated to any engine.
    orphans: Vec<Arc<Connection>>,
    in_flight: HashMap<MessageId, ResultSink>,
    properties: Map<String, Value>,
    handlers: HashMap<&'static str, Arc<dyn AppCommandHandler>>,
}

impl App {
    /// Spawns the app and its runloop.
    pub fn spawn(config: AppConfig) -> Result<AppHandle, RuntimeError> {
        let mut builder = Runloop::builder("app");
        if let Some(capacity) = config.queue_capacity {
            builder = builder.capacity(capacity);
        }
        let runloop = builder.spawn()?;
        let handle = runloop.handle();

        let mut handlers: HashMap<&'static str, Arc<dyn AppCommandHandler>> = HashMap::new();
        handlers.insert(CMD_START_GRAPH, Arc::new(StartGraphHandler));
        handlers.insert(CMD_STOP_GRAPH, Arc::new(StopGraphHandler));
        handlers.insert(CMD_CLOSE_APP, Arc::new(CloseAppHandler));

        let name = format!("app-{}", config.uri);
        let cell = Arc::new(Mutex::new(App {
            name,
            state: AppState::Created,
            config,
            runloop: handle.clone(),
            engines: HashMap::new(),
            orphans: Vec::new(),
            in_flight: HashMap::new(),
            properties: Map::new(),
            handlers,
        }));

        let start_cell = Arc::clone(&cell);
        if !handle.post_task(move || start_cell.lock().start_running()) {
            return Err(RuntimeError::LoopUnavailable("app".to_string()));
        }

        Ok(AppHandle {
            cell,
            runloop: handle,
            loop_owner: runloop,
        })
    }

    /// This app's URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.config.uri
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> AppState {
        self.state
    }

    /// Number of registered engines.
    #[must_use]
    pub fn engine_count(&self) -> usize {
        self.engines.len()
    }

    /// `true` when an engine runs under `graph_id`.
    #[must_use]
    pub fn has_engine(&self, graph_id: &GraphId) -> bool {
        self.engines.contains_key(graph_id)
    }

    /// The location addressing this app.
    #[must_use]
    pub fn app_location(&self) -> Location {
        Location::for_app(self.config.uri.clone())
    }

    fn start_running(&mut self) {
        if self.state != AppState::Created {
            return;
        }
        self.state = AppState::Running;
        info!(app = %self.name, "app running");

        let auto: Vec<GraphDefinition> = self
            .config
            .predefined_graphs
            .iter()
            .filter(|g| g.auto_start)
            .map(|g| g.definition.clone())
            .collect();
        for definition in auto {
            let graph_id = definition.graph_id.clone();
            if let Err(e) = self.start_engine(definition) {
                warn!(app = %self.name, graph = %graph_id, error = %e, "auto-start failed");
            }
        }
    }

    /// Resolves a start-graph request to a definition.
    pub(crate) fn resolve_graph_definition(
        &self,
        payload: &StartGraphCommand,
        dest: Option<&Location>,
    ) -> Result<GraphDefinition, RuntimeError> {
        if let Some(name) = payload.predefined_graph_name.as_deref()
            && let Some(predefined) = self.config.predefined_graphs.iter().find(|g| g.name == name)
        {
            return Ok(predefined.definition.clone());
        }
        if let Some(graph_id) = dest.and_then(|d| d.graph_id.as_ref())
            && let Some(predefined) = self
                .config
                .predefined_graphs
                .iter()
                .find(|g| &g.definition.graph_id == graph_id)
        {
            return Ok(predefined.definition.clone());
        }
        if let Some(json) = payload.graph_json.clone() {
            return serde_json::from_value(json).map_err(|e| {
                debug!(app = %self.name, error = %e, "inline graph definition rejected");
                RuntimeError::GraphDefinitionNotFound
            });
        }
        Err(RuntimeError::GraphDefinitionNotFound)
    }

    /// Constructs, registers and starts an engine for `definition`.
    pub(crate) fn start_engine(
        &mut self,
        definition: GraphDefinition,
    ) -> Result<GraphId, RuntimeError> {
        let graph_id = definition.graph_id.clone();
        if self.engines.contains_key(&graph_id) {
            return Err(RuntimeError::GraphAlreadyExists(graph_id));
        }

        let (runloop, owned_loop) = if self.config.one_loop_per_engine {
            let owned = Runloop::builder(format!("engine-{}", graph_id.as_str())).spawn()?;
            (owned.handle(), Some(owned))
        } else {
            (self.runloop.clone(), None)
        };

        let cell = Engine::new_cell(self.config.uri.clone(), definition, runloop.clone());
        let start_cell = Arc::clone(&cell);
        if !runloop.post_task(move || start_cell.lock().start()) {
            warn!(app = %self.name, graph = %graph_id, "engine start task rejected");
        }

        info!(app = %self.name, graph = %graph_id, "engine registered");
        self.engines.insert(
            graph_id.clone(),
            EngineRef {
                cell,
                runloop,
                owned_loop,
            },
        );
        Ok(graph_id)
    }

    /// Stops and removes the engine under `graph_id`.
    pub(crate) fn stop_engine(&mut self, graph_id: &GraphId) -> Result<(), RuntimeError> {
        let Some(engine) = self.engines.remove(graph_id) else {
            return Err(RuntimeError::GraphNotFound(graph_id.clone()));
        };
        engine.shutdown();
        info!(app = %self.name, graph = %graph_id, "engine removed");
        Ok(())
    }

    /// Closes the app: every engine is stopped, orphan connections are
    /// closed, the state becomes `Stopped`.
    pub(crate) fn app_close(&mut self) {
        if self.state == AppState::Stopped {
            return;
        }
        self.state = AppState::Stopped;
        let ids: Vec<GraphId> = self.engines.keys().cloned().collect();
        for graph_id in ids {
            let _ = self.stop_engine(&graph_id);
        }
        for conn in self.orphans.drain(..) {
            conn.close();
        }
        info!(app = %self.name, "app closed");
    }

    /// Handles one inbound message from a connection still owned by the
    /// app's loop.
    ///
    /// App-scope commands are dispatched here and answered through the
    /// originating connection's outbound send — they arrive before any
    /// engine or extension context exists to carry a future-based reply.
    /// Everything else resolves to an engine by destination graph id and
    /// rides the connection's migration there.
    pub(crate) fn handle_inbound(&mut self, conn: &Arc<Connection>, msg: Message) {
        if let Message::Cmd(cmd) = msg {
            if cmd.kind.is_app_scope() {
                let reply = Arc::clone(conn);
                let sink = ResultSink::from_fn(move |result| {
                    let out = Message::CmdResult(result);
                    if let Err(e) = reply.send_outbound(&out) {
                        warn!(conn = %reply.id(), error = %e, "command reply undeliverable");
                    }
                });
                self.dispatch_cmd(cmd, sink);
                return;
            }
            self.forward_to_engine(conn, Message::Cmd(cmd));
            return;
        }
        self.forward_to_engine(conn, msg);
    }

    /// Resolves `msg` to a registered engine and hands the connection
    /// over: migrate first (publishing the new owner loop), then replay
    /// the message on the engine's loop. Both tasks are posted from this
    /// thread, so the migration completion runs before the replay.
    fn forward_to_engine(&mut self, conn: &Arc<Connection>, msg: Message) {
        let dest = msg.header().dests.first().cloned().unwrap_or_default();
        let Some(graph_id) = dest.graph_id.clone() else {
            self.unroutable(conn, msg);
            return;
        };
        let Some(engine) = self.engines.get(&graph_id) else {
            self.unroutable(conn, msg);
            return;
        };

        if conn.migration_state().can_migrate() {
            self.orphans.retain(|c| c.id() != conn.id());
            conn.migrate(engine.runloop.clone(), dest);
        }

        let cell = Arc::clone(&engine.cell);
        let replay = Arc::clone(conn);
        let posted = engine.runloop.post_task(move || {
            cell.lock().accept_connection(replay, Some(msg));
        });
        if !posted {
            warn!(app = %self.name, graph = %graph_id, "engine handoff task rejected");
        }
    }

    fn unroutable(&self, conn: &Arc<Connection>, msg: Message) {
        match msg {
            Message::Cmd(cmd) => {
                let result =
                    CommandResult::failure_for(&cmd, format!("no route for '{}'", cmd.header.name));
                let out = Message::CmdResult(result);
                if let Err(e) = conn.send_outbound(&out) {
                    warn!(conn = %conn.id(), error = %e, "failure reply undeliverable");
                }
            }
            other => {
                warn!(
                    app = %self.name,
                    msg = other.type_name(),
                    name = other.name(),
                    "inbound message dropped: no route"
                );
            }
        }
    }
}

impl Env for App {
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
        self.in_flight.insert(cmd.id(), sink);
        let result = match self.handlers.get(cmd.kind.name()).cloned() {
            Some(handler) => handler
                .handle(self, &cmd)
                .unwrap_or_else(|e| CommandResult::failure_for(&cmd, e.to_string())),
            None => CommandResult::failure_for(
                &cmd,
                format!("no app handler for command '{}'", cmd.kind.name()),
            ),
        };
        self.send_result(result);
    }

    fn deliver_msg(&mut self, msg: Message) {
        let dest = msg.header().dests.first().cloned().unwrap_or_default();
        let Some(graph_id) = dest.graph_id.clone() else {
            warn!(app = %self.name, msg = msg.type_name(), "message dropped: no destination graph");
            return;
        };
        let Some(engine) = self.engines.get(&graph_id) else {
            warn!(app = %self.name, graph = %graph_id, "message dropped: graph not found");
            return;
        };
        let cell = Arc::clone(&engine.cell);
        let posted = engine
            .runloop
            .post_task(move || cell.lock().route_message(msg));
        if !posted {
            warn!(app = %self.name, graph = %graph_id, "message dropped: engine loop rejected it");
        }
    }

    fn send_result(&mut self, result: CommandResult) {
        match self.in_flight.remove(&result.original_cmd_id) {
            Some(sink) => sink.complete(result),
            None => warn!(
                app = %self.name,
                cmd = %result.original_cmd_id,
                "result dropped: no matching in-flight command"
            ),
        }
    }

    fn close(&mut self) {
        self.app_close();
    }
}

/// Owner-side handle to a spawned app: the cell, its loop, and the right
/// to shut the loop down.
pub struct AppHandle {
    cell: Arc<Mutex<App>>,
    runloop: RunloopHandle,
    loop_owner: Runloop,
}

impl AppHandle {
    /// A thread-marshalling proxy to the app's environment.
    #[must_use]
    pub fn proxy(&self) -> EnvProxy<App> {
        EnvProxy::new(self.runloop.clone(), &self.cell)
    }

    /// The app's runloop handle.
    #[must_use]
    pub fn runloop(&self) -> &RunloopHandle {
        &self.runloop
    }

    /// A proxy to the engine running `graph_id`, if any.
    #[must_use]
    pub fn engine_proxy(&self, graph_id: &GraphId) -> Option<EnvProxy<Engine>> {
        let app = self.cell.lock();
        app.engines
            .get(graph_id)
            .map(|e| EnvProxy::new(e.runloop.clone(), &e.cell))
    }

    /// Registers an extension on a running engine, on that engine's loop.
    pub fn register_extension(
        &self,
        graph_id: &GraphId,
        name: impl Into<String>,
        extension: Box<dyn Extension>,
    ) -> Result<(), RuntimeError> {
        let (cell, runloop) = {
            let app = self.cell.lock();
            let engine = app
                .engines
                .get(graph_id)
                .ok_or_else(|| RuntimeError::GraphNotFound(graph_id.clone()))?;
            (Arc::clone(&engine.cell), engine.runloop.clone())
        };
        let name = name.into();
        let posted =
            runloop.post_task(move || cell.lock().register_extension(name, extension));
        if posted {
            Ok(())
        } else {
            Err(RuntimeError::LoopUnavailable(runloop.name().to_string()))
        }
    }

    /// Wraps a freshly accepted transport in a connection pinned to the
    /// app's runloop, with the app as its receiver.
    #[must_use]
    pub fn open_connection(
        &self,
        remote_addr: impl Into<String>,
        transport: Box<dyn Transport>,
        codec: Arc<dyn Codec>,
    ) -> Arc<Connection> {
        let receiver = Arc::new(AppReceiver {
            app: Arc::downgrade(&self.cell),
        });
        let conn = Connection::accept(
            remote_addr,
            transport,
            codec,
            self.runloop.clone(),
            Some(receiver),
        );
        self.cell.lock().orphans.push(Arc::clone(&conn));
        conn
    }

    /// Posts the app's close onto its loop.
    pub fn close(&self) {
        let cell = Arc::clone(&self.cell);
        if !self.runloop.post_task(move || cell.lock().app_close()) {
            warn!("app close task rejected");
        }
    }

    /// Closes the app and shuts its runloop down, draining queued tasks.
    pub fn shutdown(self) {
        self.close();
        self.loop_owner.shutdown();
    }

    /// Runs a closure against the app cell. Test and embedding support;
    /// the closure executes on the calling thread.
    pub fn with_app<R>(&self, f: impl FnOnce(&App) -> R) -> R {
        f(&self.cell.lock())
    }
}

/// Receiver for connections still owned by the app's loop.
struct AppReceiver {
    app: Weak<Mutex<App>>,
}

impl MessageReceiver for AppReceiver {
    fn on_inbound_message(&self, conn: &Arc<Connection>, msg: Message) {
        match self.app.upgrade() {
            Some(cell) => cell.lock().handle_inbound(conn, msg),
            None => warn!(conn = %conn.id(), "inbound message dropped: app gone"),
        }
    }
}

//! Concurrency and routing substrate for the Weft graph runtime.
//!
//! Weft composes long-lived, stateful extensions into directed graphs
//! that exchange typed messages and commands over a network transport.
//! This crate is the substrate those graphs run on:
//!
//! - [`runloop`] — a single-threaded cooperative scheduler; each
//!   component owns one exclusively, and that loop's worker thread is
//!   the unit of thread affinity for everything else.
//! - [`connection`] — the connection wrapper and its ownership-migration
//!   protocol: accepted on the app's I/O loop, handed off exactly once
//!   to the engine that will process its traffic.
//! - [`env`] — the capability surface ([`Env`]) components act through,
//!   and [`EnvProxy`], which lets any caller on any thread invoke
//!   operations on a component it does not own by marshalling onto the
//!   owner's loop.
//! - [`engine`] — per-graph authority: extensions, remotes, timers.
//! - [`app`] — the process root: engine registry and app-scope command
//!   handling (start graph / stop graph / close app).
//!
//! # Data flow
//!
//! ```text
//! inbound bytes ─► Connection (on current loop) ─► decoded Message
//!    │                                                  │
//!    │            unresolved                             ▼
//!    └──────────────────────────► App ──migrate──► Engine loop
//!                                                       │
//!                                                       ▼
//!                                             Extensions / Remotes
//!
//! outbound: Extension ─► EngineCore::send_* ─► own loop ─► Connection
//! ```
//!
//! There is no shared mutable state guarded by locks across components:
//! everything a component owns is touched only from its own runloop, and
//! cross-component calls are two scheduling hops (dispatch onto the
//! target's loop, reply back onto the caller's).

pub mod app;
pub mod connection;
pub mod engine;
pub mod env;
mod error;
pub mod extension;
pub mod runloop;
pub mod testing;

pub use app::{App, AppConfig, AppHandle, AppState};
pub use connection::{Connection, MessageReceiver, MigrationState, Transport, TransportError};
pub use engine::{Engine, EngineCommandHandler, EngineCore, Remote};
pub use env::{Env, EnvProxy, ResultHandle, ResultSink};
pub use error::RuntimeError;
pub use extension::{Extension, NoopExtension};
pub use runloop::{Runloop, RunloopHandle, WorkSource};

//! Core types for the Weft graph runtime.
//!
//! This crate is the bottom of the workspace's layering and carries no
//! runtime logic — only the vocabulary the other crates speak:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │  weft-runtime : runloop, connection, env, engine, app│
//! ├──────────────────────────────────────────────────────┤
//! │  weft-msg     : Message, Command, CommandResult      │
//! ├──────────────────────────────────────────────────────┤
//! │  weft-types   : ids, Location, GraphDefinition  ◄────│── HERE
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! - [`MessageId`], [`ConnectionId`], [`GraphId`] — identifiers
//! - [`Location`] — the `(app_uri, graph_id, extension)` endpoint triple
//! - [`GraphDefinition`], [`PredefinedGraph`] — opaque graph configuration
//! - [`ErrorCode`] — the workspace-wide error classification trait

mod error;
mod graph;
mod id;
mod location;

pub use error::{ErrorCode, assert_error_code};
pub use graph::{GraphDefinition, GraphNode, PredefinedGraph, RouteRule};
pub use id::{ConnectionId, GraphId, MessageId};
pub use location::Location;

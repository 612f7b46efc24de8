//! Graph definitions.
//!
//! A [`GraphDefinition`] is produced by the configuration layer and
//! consumed opaquely by the runtime: the routing substrate only ever
//! extracts the graph id (to resolve a start request) and hands the route
//! rules to the engine, which matches them by message name when forwarding
//! data-plane traffic. Node contents (addon names, per-node properties)
//! are interpreted by the extension layer, not here.

use crate::GraphId;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One node of a graph: an extension instance to be created by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Instance name, unique within the graph. Messages address the node
    /// by this name.
    pub name: String,
    /// Addon the instance is created from.
    pub addon: String,
    /// Per-instance configuration, passed through to the extension.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl GraphNode {
    /// Creates a node with empty properties.
    #[must_use]
    pub fn new(name: impl Into<String>, addon: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            addon: addon.into(),
            properties: Map::new(),
        }
    }
}

/// A routing rule: messages of `msg_name` emitted by `src_extension` are
/// forwarded to each of `dest_extensions`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteRule {
    /// Message name the rule matches.
    pub msg_name: String,
    /// Source extension the rule matches.
    pub src_extension: String,
    /// Destination extensions within the same graph.
    pub dest_extensions: Vec<String>,
}

/// A complete graph definition: id, nodes, routes.
///
/// # Example
///
/// ```
/// use weft_types::{GraphDefinition, GraphId, GraphNode, RouteRule};
///
/// let def = GraphDefinition {
///     graph_id: GraphId::from("voice"),
///     nodes: vec![GraphNode::new("asr", "builtin_asr")],
///     routes: vec![RouteRule {
///         msg_name: "pcm".into(),
///         src_extension: "mic".into(),
///         dest_extensions: vec!["asr".into()],
///     }],
/// };
/// assert_eq!(def.graph_id.as_str(), "voice");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDefinition {
    /// Graph identifier. Empty in inline definitions that expect the
    /// runtime to generate one.
    #[serde(default = "GraphId::generate")]
    pub graph_id: GraphId,
    /// Extension instances the engine creates on start.
    #[serde(default)]
    pub nodes: Vec<GraphNode>,
    /// Data-plane routing rules.
    #[serde(default)]
    pub routes: Vec<RouteRule>,
}

impl GraphDefinition {
    /// Creates an empty definition under the given id.
    #[must_use]
    pub fn new(graph_id: GraphId) -> Self {
        Self {
            graph_id,
            nodes: Vec::new(),
            routes: Vec::new(),
        }
    }
}

/// A named graph declared in the app's configuration, startable by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredefinedGraph {
    /// Name the graph is started by.
    pub name: String,
    /// Start the graph when the app starts, without an explicit command.
    #[serde(default)]
    pub auto_start: bool,
    /// The definition itself.
    pub definition: GraphDefinition,
}

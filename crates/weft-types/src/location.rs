//! Addressable endpoint locations.
//!
//! A [`Location`] names any addressable endpoint in a Weft deployment as an
//! `(app_uri, graph_id, extension)` triple. Fields are optional from the
//! left: an empty field means "unresolved" or "this app / this engine",
//! which is what lets a freshly accepted connection carry messages before
//! the destination graph is known.

use crate::GraphId;
use serde::{Deserialize, Serialize};

/// An addressable endpoint: app, graph within the app, extension within
/// the graph.
///
/// `Location` is an immutable value type — routing code clones and stamps
/// new locations rather than mutating one in place.
///
/// # Resolution levels
///
/// | app_uri | graph_id | extension | Addresses |
/// |---------|----------|-----------|-----------|
/// | `None`  | `None`   | `None`    | unresolved |
/// | `Some`  | `None`   | `None`    | an app |
/// | `Some`  | `Some`   | `None`    | an engine |
/// | `Some`  | `Some`   | `Some`    | an extension |
///
/// # Example
///
/// ```
/// use weft_types::{GraphId, Location};
///
/// let loc = Location::new("weft://agent-1", Some(GraphId::from("voice")), Some("tts"));
/// assert_eq!(loc.extension.as_deref(), Some("tts"));
/// assert!(!loc.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    /// URI of the app hosting the endpoint. `None` means "this app".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_uri: Option<String>,
    /// Graph within the app. `None` means the app itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph_id: Option<GraphId>,
    /// Extension within the graph. `None` means the engine itself.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl Location {
    /// Creates a fully specified location.
    #[must_use]
    pub fn new(
        app_uri: impl Into<String>,
        graph_id: Option<GraphId>,
        extension: Option<&str>,
    ) -> Self {
        Self {
            app_uri: Some(app_uri.into()),
            graph_id,
            extension: extension.map(str::to_string),
        }
    }

    /// An entirely unresolved location.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// A location addressing an app as a whole.
    #[must_use]
    pub fn for_app(app_uri: impl Into<String>) -> Self {
        Self {
            app_uri: Some(app_uri.into()),
            graph_id: None,
            extension: None,
        }
    }

    /// A location addressing an engine (a graph within an app).
    #[must_use]
    pub fn for_engine(app_uri: impl Into<String>, graph_id: GraphId) -> Self {
        Self {
            app_uri: Some(app_uri.into()),
            graph_id: Some(graph_id),
            extension: None,
        }
    }

    /// A location addressing an extension within a graph.
    #[must_use]
    pub fn for_extension(
        app_uri: impl Into<String>,
        graph_id: GraphId,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            app_uri: Some(app_uri.into()),
            graph_id: Some(graph_id),
            extension: Some(extension.into()),
        }
    }

    /// Returns a copy with the graph id replaced.
    #[must_use]
    pub fn with_graph_id(mut self, graph_id: GraphId) -> Self {
        self.graph_id = Some(graph_id);
        self
    }

    /// Returns a copy with the extension replaced.
    #[must_use]
    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = Some(extension.into());
        self
    }

    /// `true` when every field is unresolved.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.app_uri.is_none() && self.graph_id.is_none() && self.extension.is_none()
    }

    /// `true` when the location names a graph (with or without extension).
    #[must_use]
    pub fn has_graph(&self) -> bool {
        self.graph_id.is_some()
    }
}

impl std::fmt::Display for Location {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.app_uri.as_deref().unwrap_or("?"),
            self.graph_id.as_ref().map_or("?", GraphId::as_str),
            self.extension.as_deref().unwrap_or("?"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_location_is_empty() {
        assert!(Location::empty().is_empty());
        assert!(!Location::for_app("weft://a").is_empty());
    }

    #[test]
    fn builders_fill_fields_left_to_right() {
        let engine = Location::for_engine("weft://a", GraphId::from("g"));
        assert!(engine.has_graph());
        assert!(engine.extension.is_none());

        let ext = engine.clone().with_extension("asr");
        assert_eq!(ext.extension.as_deref(), Some("asr"));
        assert_eq!(ext.graph_id, engine.graph_id);
    }

    #[test]
    fn display_marks_unresolved_fields() {
        let loc = Location::for_app("weft://a");
        assert_eq!(loc.to_string(), "weft://a/?/?");
    }

    #[test]
    fn serde_skips_unset_fields() {
        let json = serde_json::to_value(Location::for_app("weft://a")).expect("serialize");
        assert_eq!(json, serde_json::json!({ "app_uri": "weft://a" }));
    }
}

//! Remotes: the engine-side counterpart of a connection.
//!
//! A [`Remote`] represents an external engine reachable only via a
//! [`Connection`]. It attaches itself to the connection at construction
//! time, so inbound traffic on that connection is handed to the remote,
//! which stamps each message's source location with its own URI and graph
//! id before forwarding to the engine. Outbound, the engine sends to the
//! peer through the remote.

use crate::RuntimeError;
use crate::connection::{Connection, MessageReceiver};
use crate::engine::Engine;
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use weft_msg::Message;
use weft_types::GraphId;

/// An external engine reachable via one connection.
pub struct Remote {
    uri: String,
    graph_id: GraphId,
    connection: Arc<Connection>,
}

impl Remote {
    /// Creates a remote for `connection` and attaches itself as the
    /// connection's receiver. From this point on, the connection's
    /// inbound traffic flows through this remote into `engine`.
    #[must_use]
    pub fn attach(
        uri: impl Into<String>,
        graph_id: GraphId,
        connection: Arc<Connection>,
        engine: Weak<Mutex<Engine>>,
    ) -> Self {
        let uri = uri.into();
        connection.attach_receiver(Arc::new(RemoteReceiver {
            engine,
            uri: uri.clone(),
            graph_id: graph_id.clone(),
        }));
        debug!(remote = %uri, conn = %connection.id(), "remote attached");
        Self {
            uri,
            graph_id,
            connection,
        }
    }

    /// The peer app's URI.
    #[must_use]
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The peer graph's id.
    #[must_use]
    pub fn graph_id(&self) -> &GraphId {
        &self.graph_id
    }

    /// The underlying connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.connection
    }

    /// Sends a message to the peer over the connection.
    pub fn send(&self, msg: &Message) -> Result<(), RuntimeError> {
        self.connection.send_outbound(msg)
    }

    /// Closes the underlying connection.
    pub fn close(&self) {
        self.connection.close();
    }
}

impl std::fmt::Debug for Remote {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("uri", &self.uri)
            .field("graph_id", &self.graph_id)
            .field("conn", &self.connection.id())
            .finish()
    }
}

/// Connection receiver that forwards into the owning engine.
///
/// Runs on the engine's runloop: after migration the connection's current
/// loop *is* the engine's, so the upgrade-lock-forward below executes
/// with the engine's own thread affinity.
struct RemoteReceiver {
    engine: Weak<Mutex<Engine>>,
    uri: String,
    graph_id: GraphId,
}

impl MessageReceiver for RemoteReceiver {
    fn on_inbound_message(&self, conn: &Arc<Connection>, msg: Message) {
        match self.engine.upgrade() {
            Some(cell) => cell
                .lock()
                .ingest_remote(&self.uri, &self.graph_id, conn, msg),
            None => warn!(remote = %self.uri, "inbound message dropped: engine gone"),
        }
    }

    fn on_migrated(&self, conn: &Arc<Connection>) {
        debug!(remote = %self.uri, conn = %conn.id(), "connection migrated to engine loop");
    }
}

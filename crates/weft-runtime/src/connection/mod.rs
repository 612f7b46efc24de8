//! Connections and the ownership-migration protocol.
//!
//! A [`Connection`] wraps one live network session. It is accepted on a
//! generic I/O runloop (the app's) before the destination graph is known,
//! and — once the destination resolves — its ownership is transferred
//! exactly once to the runloop that will actually process its traffic.
//! The invariant the protocol upholds: at any instant, exactly one
//! runloop owns the connection, and only that loop's worker thread
//! touches its traffic.
//!
//! ```text
//!  accept            first msg          migrate(engine loop)
//!  ───────► Init ───────────► FirstMsg ───────────► Migrating
//!                                                      │ completion task
//!                                                      │ (runs on the new
//!                                                      ▼  owner thread)
//!                                                   Migrated
//! ```
//!
//! Inbound messages are posted as tasks onto whatever the *current*
//! runloop is; `Migrated` is only set from a task already executing on
//! the new owner, which is the happens-before edge that keeps the old and
//! new threads from overlapping.

mod migration;
mod transport;

pub use migration::MigrationState;
pub use transport::{SendCompletion, Transport, TransportError};

use crate::RuntimeError;
use crate::runloop::RunloopHandle;
use migration::MigrationCell;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, error, warn};
use weft_msg::{Codec, Message};
use weft_types::{ConnectionId, Location};

/// Receives a connection's inbound traffic on the owning runloop.
///
/// The app registers one for every freshly accepted connection; after
/// migration a [`Remote`](crate::engine::Remote) replaces it.
pub trait MessageReceiver: Send + Sync {
    /// Called on the connection's current runloop for each decoded
    /// inbound message.
    fn on_inbound_message(&self, conn: &Arc<Connection>, msg: Message);

    /// Called on the *new* owner's runloop once a migration completes.
    fn on_migrated(&self, conn: &Arc<Connection>) {
        let _ = conn;
    }
}

/// A live network session, exclusively owned by one runloop at a time.
pub struct Connection {
    id: ConnectionId,
    remote_addr: String,
    state: MigrationCell,
    current_loop: RwLock<RunloopHandle>,
    remote_location: RwLock<Option<Location>>,
    receiver: RwLock<Option<Arc<dyn MessageReceiver>>>,
    transport: Box<dyn Transport>,
    codec: Arc<dyn Codec>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("remote_addr", &self.remote_addr)
            .field("state", &self.state.load())
            .finish_non_exhaustive()
    }
}

impl Connection {
    /// Wraps a freshly accepted transport, pinned to `initial_loop`.
    #[must_use]
    pub fn accept(
        remote_addr: impl Into<String>,
        transport: Box<dyn Transport>,
        codec: Arc<dyn Codec>,
        initial_loop: RunloopHandle,
        receiver: Option<Arc<dyn MessageReceiver>>,
    ) -> Arc<Self> {
        let conn = Arc::new(Self {
            id: ConnectionId::new(),
            remote_addr: remote_addr.into(),
            state: MigrationCell::new(),
            current_loop: RwLock::new(initial_loop),
            remote_location: RwLock::new(None),
            receiver: RwLock::new(receiver),
            transport,
            codec,
        });
        debug!(conn = %conn.id, addr = %conn.remote_addr, "connection accepted");
        conn
    }

    /// The connection's id.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// The peer's address, as the transport reported it.
    #[must_use]
    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    /// Current migration state.
    #[must_use]
    pub fn migration_state(&self) -> MigrationState {
        self.state.load()
    }

    /// The resolved peer location, once migration assigned one.
    #[must_use]
    pub fn remote_location(&self) -> Option<Location> {
        self.remote_location.read().clone()
    }

    /// A handle to the runloop that currently owns this connection.
    #[must_use]
    pub fn current_loop(&self) -> RunloopHandle {
        self.current_loop.read().clone()
    }

    /// Registers the receiver inbound traffic is handed to.
    pub fn attach_receiver(&self, receiver: Arc<dyn MessageReceiver>) {
        *self.receiver.write() = Some(receiver);
    }

    /// Entry point for the transport's read path: a decoded inbound
    /// message.
    ///
    /// Advances `Init → FirstMsg`, then posts delivery onto the current
    /// runloop. A message arriving with no receiver registered, or whose
    /// delivery task is rejected, is logged and dropped — never retried.
    pub fn on_message_received(self: &Arc<Self>, msg: Message) {
        self.state.mark_first_msg();

        let current = self.current_loop.read().clone();
        let conn = Arc::clone(self);
        let posted = current.post_task(move || {
            let receiver = conn.receiver.read().clone();
            match receiver {
                Some(receiver) => receiver.on_inbound_message(&conn, msg),
                None => {
                    warn!(
                        conn = %conn.id,
                        msg = msg.type_name(),
                        name = msg.name(),
                        "inbound message dropped: no receiver registered"
                    );
                }
            }
        });
        if !posted {
            warn!(conn = %self.id, "inbound message dropped: delivery task rejected");
        }
    }

    /// Transfers ownership to `target`, resolving the peer as `dest`.
    ///
    /// Legal only from `Init` or `FirstMsg`; any other state logs a
    /// warning and is a no-op (migration is neither idempotent nor
    /// queueable — callers must not invoke it twice). On success the
    /// state becomes `Migrating` and the runloop handle and remote
    /// location are updated *before* the completion task is posted; the
    /// completion task — guaranteed to run on the new owner thread —
    /// transitions to `Migrated` and notifies the receiver.
    ///
    /// Returns `true` if the migration was initiated. If posting the
    /// completion task fails, the error is logged and no rollback is
    /// performed: the runloop reassignment has already been published, so
    /// reverting it would reopen the two-owner race. A connection stuck
    /// in `Migrating` can still be closed.
    pub fn migrate(self: &Arc<Self>, target: RunloopHandle, dest: Location) -> bool {
        let state = self.state.load();
        if !state.can_migrate() {
            warn!(
                conn = %self.id,
                %state,
                "migrate ignored: connection is not in a migratable state"
            );
            return false;
        }

        self.state.store(MigrationState::Migrating);
        *self.current_loop.write() = target.clone();
        *self.remote_location.write() = Some(dest);

        let conn = Arc::clone(self);
        let posted = target.post_task(move || {
            conn.state.store(MigrationState::Migrated);
            debug!(conn = %conn.id, "migration complete");
            let receiver = conn.receiver.read().clone();
            if let Some(receiver) = receiver {
                receiver.on_migrated(&conn);
            }
        });
        if !posted {
            error!(
                conn = %self.id,
                "migration completion task rejected; connection left in migrating state"
            );
        }
        true
    }

    /// Sends a message to the peer.
    ///
    /// Checks transport liveness first: an inactive transport fails the
    /// send immediately (a non-blocking failure, not a retry). Otherwise
    /// the message is encoded and handed to the transport; asynchronous
    /// send failures are logged when the completion signal fires.
    pub fn send_outbound(&self, msg: &Message) -> Result<(), RuntimeError> {
        if !self.transport.is_active() {
            return Err(RuntimeError::ConnectionInactive(self.id));
        }
        let bytes = self.codec.encode(msg)?;
        let id = self.id;
        self.transport.send_bytes(
            bytes,
            Box::new(move |result| {
                if let Err(e) = result {
                    warn!(conn = %id, error = %e, "outbound send failed");
                }
            }),
        );
        Ok(())
    }

    /// Releases the connection's runtime resources. Idempotent: skipped
    /// entirely when already `Cleaned`.
    pub fn cleanup(&self) {
        if matches!(self.state.load(), MigrationState::Cleaned) {
            return;
        }
        self.state.store(MigrationState::Cleaning);
        *self.receiver.write() = None;
        self.state.store(MigrationState::Cleaned);
        debug!(conn = %self.id, "connection cleaned");
    }

    /// Cleans up, delegates teardown to the transport, and marks the
    /// connection `Closed`. Legal from any state.
    pub fn close(&self) {
        self.cleanup();
        self.transport.close();
        self.state.store(MigrationState::Closed);
        debug!(conn = %self.id, "connection closed");
    }
}

//! Connection migration states.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a connection's ownership transfer.
///
/// The happy path is monotonic:
///
/// ```text
/// Init ──► FirstMsg ──► Migrating ──► Migrated
/// ```
///
/// with the orthogonal terminal branch `Closed` and the cleanup
/// sub-states `Cleaning → Cleaned` reachable from any state. `Migrating`
/// is entered on the old owner thread *before* the completion task is
/// posted; `Migrated` is only ever set from a task executing on the new
/// owner's runloop — that ordering is what keeps the two threads from
/// touching connection state concurrently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MigrationState {
    /// Freshly accepted; no traffic seen.
    Init = 0,
    /// At least one message arrived; destination may now be resolvable.
    FirstMsg = 1,
    /// Ownership handoff in progress; the new runloop is already
    /// published.
    Migrating = 2,
    /// Handoff complete; the new owner thread has confirmed.
    Migrated = 3,
    /// Cleanup in progress.
    Cleaning = 4,
    /// Cleanup done.
    Cleaned = 5,
    /// Terminal.
    Closed = 6,
}

impl MigrationState {
    /// `true` for the states a migration may legally start from.
    #[must_use]
    pub fn can_migrate(self) -> bool {
        matches!(self, Self::Init | Self::FirstMsg)
    }

    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Init,
            1 => Self::FirstMsg,
            2 => Self::Migrating,
            3 => Self::Migrated,
            4 => Self::Cleaning,
            5 => Self::Cleaned,
            _ => Self::Closed,
        }
    }
}

impl std::fmt::Display for MigrationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self {
            Self::Init => "init",
            Self::FirstMsg => "first_msg",
            Self::Migrating => "migrating",
            Self::Migrated => "migrated",
            Self::Cleaning => "cleaning",
            Self::Cleaned => "cleaned",
            Self::Closed => "closed",
        };
        f.write_str(tag)
    }
}

/// Atomic cell holding a [`MigrationState`].
#[derive(Debug)]
pub(crate) struct MigrationCell(AtomicU8);

impl MigrationCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(MigrationState::Init as u8))
    }

    pub fn load(&self) -> MigrationState {
        MigrationState::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn store(&self, state: MigrationState) {
        self.0.store(state as u8, Ordering::SeqCst);
    }

    /// `Init → FirstMsg`, only from `Init`.
    pub fn mark_first_msg(&self) {
        let _ = self.0.compare_exchange(
            MigrationState::Init as u8,
            MigrationState::FirstMsg as u8,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

//! Optimistic mutation engine.
//!
//! Local edits are applied to the [`EntityStore`] immediately and committed to
//! a [`RemoteStore`] in the background. The [`MutationCoordinator`] serializes
//! work per resource, rolls back plain failures, escalates concurrent writes
//! to [`ConflictRecord`]s and keeps a bounded undo/redo [`HistoryLedger`].

pub mod config;
pub mod conflict;
pub mod coordinator;
pub mod error;
pub mod history;
pub mod remote;
pub mod resolution;
pub mod store;
pub mod validate;
pub mod version;

pub use config::SyncConfig;
pub use conflict::{ConflictDetector, ConflictId, ConflictRecord, ConflictType, Detection};
pub use coordinator::{CommittedMutation, CoordinatorBuilder, LaneStatus, MutationCoordinator, Outcome, RemoteApply, Ticket};
pub use error::SyncError;
pub use history::{HistoryAction, HistoryEntry, HistoryLedger};
pub use remote::memory::{Fault, MemoryRemote};
pub use remote::{BatchRejection, CommitAck, RemoteError, RemoteStore, RemoteWrite};
pub use resolution::{Resolution, ResolutionSelector, ResolutionStrategy};
pub use store::{Collection, EntityStore, ObserverId, Snapshot, StoreChange, StoreEvent};
pub use validate::{AllowAll, SubmitGate};
pub use version::VersionTracker;

use tandem_primitives::ResourceKey;
use thiserror::Error;

use crate::conflict::{ConflictId, ConflictType};

/// Failure surfaced to the submitter of an operation.
///
/// Every variant except [`SyncError::Conflict`] means the optimistic overlay
/// has already been rolled back by the time the error is observed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
	/// Rejected before any optimistic apply, or by the remote's validation.
	#[error("invalid operation: {0}")]
	Validation(String),

	/// Transport failure or commit timeout.
	#[error("network failure: {0}")]
	Network(String),

	/// Denied by the local gate or by the remote.
	#[error("permission denied: {0}")]
	Permission(String),

	/// Concurrent write detected; the optimistic value stays visible.
	#[error("{conflict_type} conflict {id} on {key}")]
	Conflict {
		id: ConflictId,
		key: ResourceKey,
		conflict_type: ConflictType,
	},

	/// A batch failed as a whole; every item was refreshed from canonical state.
	#[error("batch of {total} operations failed: {reason}")]
	BatchFailed { total: usize, reason: String },

	#[error("unknown conflict {0}")]
	UnknownConflict(ConflictId),

	/// Conflict was discarded by `clear_conflicts` while its resolution was pending.
	#[error("conflict {0} was cleared")]
	ConflictCleared(ConflictId),

	/// The chosen resolution cannot produce a complete operation.
	#[error("incomplete resolution: {0}")]
	IncompleteResolution(String),

	/// The coordinator was dropped before the operation finished.
	#[error("coordinator closed")]
	Closed,
}

impl SyncError {
	/// Returns true when the failure left the optimistic value in place.
	pub fn is_conflict(&self) -> bool {
		matches!(self, Self::Conflict { .. })
	}
}

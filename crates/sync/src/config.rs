use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tuning for the mutation coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
	/// Maximum number of undo/redo entries retained.
	pub history_limit: usize,
	/// Quiet period between an optimistic apply and its remote dispatch.
	pub debounce_ms: u64,
	/// Commits exceeding this are treated as network failures.
	pub commit_timeout_ms: u64,
	/// Resolve concurrent edits on disjoint fields with a field merge automatically.
	pub auto_merge_disjoint: bool,
}

impl Default for SyncConfig {
	fn default() -> Self {
		Self {
			history_limit: 50,
			debounce_ms: 300,
			commit_timeout_ms: 10_000,
			auto_merge_disjoint: true,
		}
	}
}

impl SyncConfig {
	pub fn debounce(&self) -> Duration {
		Duration::from_millis(self.debounce_ms)
	}

	pub fn commit_timeout(&self) -> Duration {
		Duration::from_millis(self.commit_timeout_ms)
	}
}

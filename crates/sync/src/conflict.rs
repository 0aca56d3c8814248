//! Conflict classification and the ledger of unresolved conflicts.

use std::collections::HashSet;
use std::fmt;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tandem_primitives::{Fields, Operation, OperationId, OperationKind, ResourceKey, VersionMarker};

use crate::error::SyncError;
use crate::remote::{RemoteError, RemoteWrite};
use crate::resolution::Resolution;

/// Stable identifier of a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConflictId(pub u64);

impl fmt::Display for ConflictId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "#{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConflictType {
	/// Another actor committed a newer write to the same resource.
	ConcurrentEdit,
	/// The resource is gone, or the same actor moved it on from another session.
	StaleWrite,
	/// Sibling order moved under a reorder.
	OrderingConflict,
}

impl ConflictType {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::ConcurrentEdit => "concurrent-edit",
			Self::StaleWrite => "stale-write",
			Self::OrderingConflict => "ordering-conflict",
		}
	}
}

impl fmt::Display for ConflictType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Structured description of a rejected write that raced another one.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
	pub id: ConflictId,
	pub key: ResourceKey,
	pub conflict_type: ConflictType,
	/// Local operation first, reconstructed remote write second.
	pub conflicting_operations: [Operation; 2],
	pub suggested_resolution: Option<Resolution>,
	/// Marker the remote reported with the rejection.
	pub observed_version: VersionMarker,
	/// Remote canonical value at rejection; `None` if deleted.
	pub remote_value: Option<Fields>,
	/// Local optimistic value at detection.
	pub local_value: Option<Fields>,
	/// Changed fields written by both sides.
	pub overlapping_fields: Vec<String>,
	pub detected_at: DateTime<Utc>,
}

impl ConflictRecord {
	pub fn local(&self) -> &Operation {
		let [local, _] = &self.conflicting_operations;
		local
	}

	pub fn remote(&self) -> &Operation {
		let [_, remote] = &self.conflicting_operations;
		remote
	}

	/// Concurrent creates or updates touching disjoint fields.
	pub fn is_auto_mergeable(&self) -> bool {
		let writes_fields = |op: &Operation| matches!(op.kind, OperationKind::Create | OperationKind::Update);
		self.conflict_type == ConflictType::ConcurrentEdit
			&& self.overlapping_fields.is_empty()
			&& writes_fields(self.local())
			&& writes_fields(self.remote())
	}
}

/// Result of inspecting a commit rejection.
#[derive(Debug)]
pub enum Detection {
	Conflict(Box<ConflictRecord>),
	/// Not a conflict: roll back and surface the error.
	Plain(SyncError),
}

/// Classifies commit rejections.
#[derive(Debug, Default)]
pub struct ConflictDetector {
	next_id: u64,
}

impl ConflictDetector {
	pub fn new() -> Self {
		Self::default()
	}

	/// Compares `op`'s baseline with the marker carried by `error`.
	pub fn detect(&mut self, op: &Operation, error: &RemoteError, local_value: Option<Fields>, now: DateTime<Utc>) -> Detection {
		let (current, last_write, remote_value, ordering) = match error {
			RemoteError::Network(reason) => return Detection::Plain(SyncError::Network(reason.clone())),
			RemoteError::Timeout(_) => return Detection::Plain(SyncError::Network(error.to_string())),
			RemoteError::Validation(reason) => return Detection::Plain(SyncError::Validation(reason.clone())),
			RemoteError::Permission(reason) => return Detection::Plain(SyncError::Permission(reason.clone())),
			RemoteError::Gone { current, last_write } => (current, last_write, None, false),
			RemoteError::VersionMismatch {
				current,
				last_write,
				canonical,
			} => (current, last_write, Some(canonical.clone()), false),
			RemoteError::OrderMismatch {
				current,
				last_write,
				canonical,
			} => (current, last_write, Some(canonical.clone()), true),
		};

		if remote_value.is_some() && !current.advanced_past(op.baseline_version.as_ref()) {
			return Detection::Plain(SyncError::Validation(format!("write rejected at {current} without a newer version")));
		}

		let conflict_type = if remote_value.is_none() || last_write.actor == op.actor {
			ConflictType::StaleWrite
		} else if ordering {
			ConflictType::OrderingConflict
		} else {
			ConflictType::ConcurrentEdit
		};

		self.next_id += 1;
		let record = ConflictRecord {
			id: ConflictId(self.next_id),
			key: op.key.clone(),
			conflict_type,
			conflicting_operations: [op.clone(), reconstruct(op, last_write)],
			suggested_resolution: None,
			observed_version: current.clone(),
			remote_value,
			local_value,
			overlapping_fields: op.payload.overlapping_keys(&last_write.changed),
			detected_at: now,
		};
		Detection::Conflict(Box::new(record))
	}
}

fn reconstruct(local: &Operation, write: &RemoteWrite) -> Operation {
	Operation::new(write.kind, local.key.clone(), write.actor.clone(), write.changed.clone(), write.submitted_at)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ConflictStatus {
	Pending,
	/// Resolution operation is in flight.
	Resolving(OperationId),
}

#[derive(Debug)]
pub(crate) struct ConflictEntry {
	pub(crate) record: ConflictRecord,
	pub(crate) status: ConflictStatus,
}

/// Unresolved conflicts in detection order, plus ids already resolved.
#[derive(Debug, Default)]
pub(crate) struct ConflictLedger {
	open: IndexMap<ConflictId, ConflictEntry>,
	resolved: HashSet<ConflictId>,
}

impl ConflictLedger {
	pub(crate) fn insert(&mut self, record: ConflictRecord, status: ConflictStatus) {
		self.open.insert(record.id, ConflictEntry { record, status });
	}

	pub(crate) fn get(&self, id: ConflictId) -> Option<&ConflictEntry> {
		self.open.get(&id)
	}

	pub(crate) fn set_status(&mut self, id: ConflictId, status: ConflictStatus) {
		if let Some(entry) = self.open.get_mut(&id) {
			entry.status = status;
		}
	}

	pub(crate) fn is_resolved(&self, id: ConflictId) -> bool {
		self.resolved.contains(&id)
	}

	/// Marks `id` resolved and returns its record.
	pub(crate) fn resolve(&mut self, id: ConflictId) -> Option<ConflictRecord> {
		let entry = self.open.shift_remove(&id)?;
		self.resolved.insert(id);
		Some(entry.record)
	}

	/// Drops `id` without marking it resolved.
	pub(crate) fn discard(&mut self, id: ConflictId) -> Option<ConflictEntry> {
		self.open.shift_remove(&id)
	}

	/// Replaces `old` with `record`, keeping the detection order slot.
	pub(crate) fn supersede(&mut self, old: ConflictId, record: ConflictRecord) {
		let new_id = record.id;
		let entry = ConflictEntry {
			record,
			status: ConflictStatus::Pending,
		};
		match self.open.get_index_of(&old) {
			Some(idx) => {
				self.open.shift_remove_index(idx);
				self.open.shift_insert(idx, new_id, entry);
			}
			None => {
				self.open.insert(new_id, entry);
			}
		}
	}

	pub(crate) fn records(&self) -> Vec<ConflictRecord> {
		self.open.values().map(|entry| entry.record.clone()).collect()
	}

	pub(crate) fn ids(&self) -> Vec<ConflictId> {
		self.open.keys().copied().collect()
	}
}

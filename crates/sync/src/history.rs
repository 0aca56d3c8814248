//! Bounded linear undo/redo ledger of whole-collection snapshots.
//!
//! Independent of rollback: entries are recorded only for committed
//! mutations, and undo/redo materialize snapshots locally.

use std::collections::VecDeque;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of committed change an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryAction {
	Create,
	Update,
	Delete,
	Move,
}

impl HistoryAction {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Create => "create",
			Self::Update => "update",
			Self::Delete => "delete",
			Self::Move => "move",
		}
	}
}

impl fmt::Display for HistoryAction {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One recorded transition.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry<S> {
	pub id: u64,
	pub timestamp: DateTime<Utc>,
	pub action: HistoryAction,
	pub description: String,
	pub previous: S,
	pub current: S,
}

/// Linear history with a cursor.
///
/// The cursor is `None` before the first entry (nothing to undo) and
/// `Some(len - 1)` at the tail (nothing to redo). Recording while the cursor
/// is behind the tail discards the redo branch first.
#[derive(Debug, Clone)]
pub struct HistoryLedger<S> {
	entries: VecDeque<HistoryEntry<S>>,
	cursor: Option<usize>,
	limit: usize,
	next_id: u64,
}

impl<S> HistoryLedger<S> {
	/// Creates a ledger holding at most `limit` entries (at least one).
	pub fn new(limit: usize) -> Self {
		let limit = limit.max(1);
		Self {
			entries: VecDeque::with_capacity(limit.min(64)),
			cursor: None,
			limit,
			next_id: 0,
		}
	}

	/// Appends an entry, truncating the redo branch and evicting the oldest
	/// entry past the limit. Returns the new entry's id.
	pub fn record(&mut self, action: HistoryAction, description: impl Into<String>, previous: S, current: S, timestamp: DateTime<Utc>) -> u64 {
		let keep = self.cursor.map_or(0, |idx| idx + 1);
		if keep < self.entries.len() {
			tracing::trace!(dropped = self.entries.len() - keep, "sync.history.redo_truncated");
			self.entries.truncate(keep);
		}

		self.next_id += 1;
		let id = self.next_id;
		self.entries.push_back(HistoryEntry {
			id,
			timestamp,
			action,
			description: description.into(),
			previous,
			current,
		});
		if self.entries.len() > self.limit {
			self.entries.pop_front();
		}
		self.cursor = Some(self.entries.len() - 1);
		id
	}

	/// Steps the cursor back and returns the entry whose `previous` snapshot
	/// should be materialized. No-op before the first entry.
	pub fn undo(&mut self) -> Option<&HistoryEntry<S>> {
		let idx = self.cursor?;
		self.cursor = idx.checked_sub(1);
		self.entries.get(idx)
	}

	/// Steps the cursor forward and returns the entry whose `current` snapshot
	/// should be materialized. No-op at the tail.
	pub fn redo(&mut self) -> Option<&HistoryEntry<S>> {
		let next = self.cursor.map_or(0, |idx| idx + 1);
		if next >= self.entries.len() {
			return None;
		}
		self.cursor = Some(next);
		self.entries.get(next)
	}

	pub fn can_undo(&self) -> bool {
		self.cursor.is_some()
	}

	pub fn can_redo(&self) -> bool {
		self.cursor.map_or(0, |idx| idx + 1) < self.entries.len()
	}

	pub fn clear(&mut self) {
		self.entries.clear();
		self.cursor = None;
	}

	/// Cursor position; `None` stands for index -1.
	pub fn index(&self) -> Option<usize> {
		self.cursor
	}

	pub fn len(&self) -> usize {
		self.entries.len()
	}

	pub fn is_empty(&self) -> bool {
		self.entries.is_empty()
	}

	pub fn limit(&self) -> usize {
		self.limit
	}

	pub fn entries(&self) -> impl Iterator<Item = &HistoryEntry<S>> {
		self.entries.iter()
	}

	pub fn last(&self) -> Option<&HistoryEntry<S>> {
		self.entries.back()
	}
}

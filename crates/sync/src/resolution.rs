//! Resolution strategies for detected conflicts.

use std::fmt;

use tandem_primitives::{Operation, OperationId, OperationKind};

use crate::conflict::{ConflictRecord, ConflictType};
use crate::error::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionStrategy {
	/// Later `submitted_at` wins; ties go to the lexically greater actor.
	LastWriteWins { winner: OperationId },
	/// Union of disjoint changed fields.
	FieldMerge,
	/// Operation chosen by the caller.
	Manual,
}

impl fmt::Display for ResolutionStrategy {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::LastWriteWins { .. } => f.write_str("last-write-wins"),
			Self::FieldMerge => f.write_str("field-merge"),
			Self::Manual => f.write_str("manual"),
		}
	}
}

/// Strategy plus the operation to commit.
///
/// `resulting_operation == None` adopts the remote canonical state without
/// writing (e.g. a remote deletion winning last-write-wins).
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
	pub strategy: ResolutionStrategy,
	pub resulting_operation: Option<Operation>,
}

impl Resolution {
	/// Caller-chosen operation.
	pub fn manual(op: Operation) -> Self {
		Self {
			strategy: ResolutionStrategy::Manual,
			resulting_operation: Some(op),
		}
	}
}

/// Computes resolutions for conflict records.
#[derive(Debug, Clone, Copy)]
pub struct ResolutionSelector {
	pub auto_merge_disjoint: bool,
}

impl Default for ResolutionSelector {
	fn default() -> Self {
		Self { auto_merge_disjoint: true }
	}
}

impl ResolutionSelector {
	pub fn new(auto_merge_disjoint: bool) -> Self {
		Self { auto_merge_disjoint }
	}

	/// Field merge when the record allows it, otherwise last-write-wins.
	pub fn suggest(&self, record: &ConflictRecord) -> Resolution {
		if self.auto_merge_disjoint
			&& let Ok(merged) = self.field_merge(record)
		{
			return merged;
		}
		self.last_write_wins(record)
	}

	/// Whether the local operation beats the remote write.
	pub fn local_wins(&self, record: &ConflictRecord) -> bool {
		let local = record.local();
		let remote = record.remote();
		(local.submitted_at, &local.actor) > (remote.submitted_at, &remote.actor)
	}

	pub fn last_write_wins(&self, record: &ConflictRecord) -> Resolution {
		let local_wins = self.local_wins(record);
		let winner = if local_wins { record.local().id } else { record.remote().id };
		Resolution {
			strategy: ResolutionStrategy::LastWriteWins { winner },
			resulting_operation: winning_operation(record, local_wins),
		}
	}

	/// Union of both sides' changed fields; only valid for disjoint concurrent
	/// writes. Always issued as an update since the resource exists remotely.
	pub fn field_merge(&self, record: &ConflictRecord) -> Result<Resolution, SyncError> {
		if record.conflict_type != ConflictType::ConcurrentEdit {
			return Err(SyncError::IncompleteResolution(format!("field merge does not apply to {}", record.conflict_type)));
		}
		if !record.overlapping_fields.is_empty() {
			return Err(SyncError::IncompleteResolution(format!(
				"fields changed on both sides: {}",
				record.overlapping_fields.join(", ")
			)));
		}
		if !record.is_auto_mergeable() {
			return Err(SyncError::IncompleteResolution("field merge needs two creates or updates".into()));
		}

		let local = record.local();
		let payload = record.remote().payload.merged(&local.payload);
		Ok(Resolution {
			strategy: ResolutionStrategy::FieldMerge,
			resulting_operation: Some(Operation::update(local.key.clone(), local.actor.clone(), payload, local.submitted_at)),
		})
	}
}

/// Operation that makes the winner's write canonical, authored by the local actor.
fn winning_operation(record: &ConflictRecord, local_wins: bool) -> Option<Operation> {
	let local = record.local();
	let key = local.key.clone();
	let actor = local.actor.clone();

	if local_wins {
		return match (&record.remote_value, &record.local_value) {
			(None, Some(value)) => Some(Operation::create(key, actor, value.clone(), local.submitted_at)),
			(None, None) => None,
			// The resource exists remotely now, so a losing create becomes an update.
			(Some(_), _) => {
				let kind = match local.kind {
					OperationKind::Create => OperationKind::Update,
					kind => kind,
				};
				Some(Operation::new(kind, key, actor, local.payload.clone(), local.submitted_at))
			}
		};
	}

	let remote = record.remote();
	let value = record.remote_value.as_ref()?;
	let (kind, payload) = match remote.kind {
		OperationKind::Reorder => (OperationKind::Reorder, remote.payload.clone()),
		OperationKind::Update if !remote.payload.is_empty() => (OperationKind::Update, remote.payload.clone()),
		_ => (OperationKind::Update, value.clone()),
	};
	Some(Operation::new(kind, key, actor, payload, local.submitted_at))
}

#[cfg(test)]
mod tests {
	use chrono::{DateTime, TimeZone, Utc};
	use serde_json::json;
	use tandem_primitives::{Fields, ResourceKey, VersionMarker};

	use super::*;
	use crate::conflict::{ConflictDetector, Detection};
	use crate::remote::{RemoteError, RemoteWrite};

	fn at(secs: u32) -> DateTime<Utc> {
		Utc.with_ymd_and_hms(2024, 2, 2, 10, 0, secs).unwrap()
	}

	fn record(local_actor: &str, local_at: u32, remote_actor: &str, remote_at: u32, remote_field: &str) -> ConflictRecord {
		let op = Operation::update(ResourceKey::task("T1"), local_actor.into(), Fields::new().with("title", local_actor), at(local_at))
			.with_baseline(Some(VersionMarker::Counter(1)));
		let error = RemoteError::VersionMismatch {
			current: VersionMarker::Counter(2),
			last_write: RemoteWrite {
				actor: remote_actor.into(),
				kind: OperationKind::Update,
				changed: Fields::new().with(remote_field, remote_actor),
				submitted_at: at(remote_at),
			},
			canonical: Fields::new().with("title", "base").with(remote_field, remote_actor),
		};
		let local_value = Some(Fields::new().with("title", local_actor));
		match ConflictDetector::new().detect(&op, &error, local_value, at(30)) {
			Detection::Conflict(record) => *record,
			Detection::Plain(error) => panic!("unexpected plain error {error}"),
		}
	}

	#[test]
	fn later_submission_wins() {
		let selector = ResolutionSelector::default();
		let rec = record("y", 5, "x", 1, "title");
		let resolution = selector.last_write_wins(&rec);
		assert_eq!(resolution.strategy, ResolutionStrategy::LastWriteWins { winner: rec.local().id });
		let op = resolution.resulting_operation.unwrap();
		assert_eq!(op.payload.get("title"), Some(&json!("y")));
		assert_eq!(op.actor.as_str(), "y");
	}

	#[test]
	fn remote_win_reissues_remote_payload_as_local_actor() {
		let selector = ResolutionSelector::default();
		let rec = record("y", 1, "x", 5, "title");
		let resolution = selector.last_write_wins(&rec);
		assert_eq!(resolution.strategy, ResolutionStrategy::LastWriteWins { winner: rec.remote().id });
		let op = resolution.resulting_operation.unwrap();
		assert_eq!(op.payload.get("title"), Some(&json!("x")));
		assert_eq!(op.actor.as_str(), "y");
	}

	fn concurrent_create(local_field: &str, remote_field: &str) -> ConflictRecord {
		let op = Operation::create(ResourceKey::task("T1"), "y".into(), Fields::new().with(local_field, "y"), at(5));
		let error = RemoteError::VersionMismatch {
			current: VersionMarker::Counter(1),
			last_write: RemoteWrite {
				actor: "x".into(),
				kind: OperationKind::Create,
				changed: Fields::new().with(remote_field, "x"),
				submitted_at: at(1),
			},
			canonical: Fields::new().with(remote_field, "x"),
		};
		match ConflictDetector::new().detect(&op, &error, Some(op.payload.clone()), at(6)) {
			Detection::Conflict(record) => *record,
			Detection::Plain(error) => panic!("unexpected plain error {error}"),
		}
	}

	#[test]
	fn winning_local_create_is_reissued_as_update() {
		let selector = ResolutionSelector::default();
		let rec = concurrent_create("title", "title");
		let resolution = selector.suggest(&rec);
		assert_eq!(resolution.strategy, ResolutionStrategy::LastWriteWins { winner: rec.local().id });
		let op = resolution.resulting_operation.unwrap();
		assert_eq!(op.kind, OperationKind::Update);
		assert_eq!(op.payload, Fields::new().with("title", "y"));
	}

	#[test]
	fn disjoint_creates_merge_into_update() {
		let selector = ResolutionSelector::default();
		let rec = concurrent_create("title", "description");
		let resolution = selector.suggest(&rec);
		assert_eq!(resolution.strategy, ResolutionStrategy::FieldMerge);
		let op = resolution.resulting_operation.unwrap();
		assert_eq!(op.kind, OperationKind::Update);
		assert_eq!(op.payload, Fields::new().with("title", "y").with("description", "x"));
	}

	#[test]
	fn ties_go_to_greater_actor() {
		let selector = ResolutionSelector::default();
		assert!(selector.local_wins(&record("y", 3, "x", 3, "title")));
		assert!(!selector.local_wins(&record("a", 3, "x", 3, "title")));
	}

	#[test]
	fn field_merge_unions_disjoint_changes() {
		let selector = ResolutionSelector::default();
		let rec = record("y", 1, "x", 2, "description");
		let resolution = selector.suggest(&rec);
		assert_eq!(resolution.strategy, ResolutionStrategy::FieldMerge);
		let payload = resolution.resulting_operation.unwrap().payload;
		assert_eq!(payload.get("title"), Some(&json!("y")));
		assert_eq!(payload.get("description"), Some(&json!("x")));
	}

	#[test]
	fn field_merge_rejects_overlap() {
		let selector = ResolutionSelector::default();
		let rec = record("y", 1, "x", 2, "title");
		assert!(matches!(selector.field_merge(&rec), Err(SyncError::IncompleteResolution(_))));
		assert!(matches!(selector.suggest(&rec).strategy, ResolutionStrategy::LastWriteWins { .. }));
	}

	#[test]
	fn disabled_auto_merge_suggests_lww() {
		let selector = ResolutionSelector::new(false);
		let rec = record("y", 1, "x", 2, "description");
		assert!(matches!(selector.suggest(&rec).strategy, ResolutionStrategy::LastWriteWins { .. }));
	}

	#[test]
	fn remote_deletion_win_adopts() {
		let selector = ResolutionSelector::default();
		let op = Operation::update(ResourceKey::task("T1"), "y".into(), Fields::new().with("title", "y"), at(1))
			.with_baseline(Some(VersionMarker::Counter(1)));
		let gone = RemoteError::Gone {
			current: VersionMarker::Counter(2),
			last_write: RemoteWrite {
				actor: "x".into(),
				kind: OperationKind::Delete,
				changed: Fields::new(),
				submitted_at: at(9),
			},
		};
		let Detection::Conflict(rec) = ConflictDetector::new().detect(&op, &gone, Some(Fields::new().with("title", "y")), at(10)) else {
			panic!("expected conflict");
		};
		let resolution = selector.last_write_wins(&rec);
		assert_eq!(resolution.resulting_operation, None);

		let Detection::Conflict(rec) = ConflictDetector::new().detect(
			&Operation::update(ResourceKey::task("T1"), "y".into(), Fields::new().with("title", "y"), at(20)),
			&gone,
			Some(Fields::new().with("title", "y")),
			at(21),
		) else {
			panic!("expected conflict");
		};
		let recreate = selector.last_write_wins(&rec).resulting_operation.unwrap();
		assert_eq!(recreate.kind, OperationKind::Create);
	}
}

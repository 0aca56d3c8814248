use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;
use tandem_primitives::{Clock, Fields, ManualClock, Operation, ResourceKey, VersionMarker};

use super::*;
use crate::conflict::ConflictType;
use crate::history::HistoryAction;
use crate::remote::memory::{Fault, MemoryRemote};
use crate::remote::{self, CommitAck, RemoteError};
use crate::resolution::ResolutionStrategy;
use crate::store::StoreChange;

struct Harness {
	coordinator: MutationCoordinator,
	remote: Arc<MemoryRemote>,
	clock: ManualClock,
}

fn harness(config: SyncConfig) -> Harness {
	gated_harness(config, Arc::new(AllowAll))
}

fn gated_harness(config: SyncConfig, gate: Arc<dyn SubmitGate>) -> Harness {
	let _ = tracing_subscriber::fmt().with_test_writer().try_init();
	let remote = Arc::new(MemoryRemote::new());
	let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap());
	let coordinator = MutationCoordinator::builder(remote.clone())
		.config(config)
		.clock(Arc::new(clock.clone()))
		.gate(gate)
		.build();
	Harness { coordinator, remote, clock }
}

fn title(value: &str) -> Fields {
	Fields::new().with("title", value)
}

impl Harness {
	fn seed(&self, key: &ResourceKey, value: Fields) {
		let version = self.remote.seed(key.clone(), value.clone());
		self.coordinator.hydrate(key.clone(), value, version).unwrap();
	}

	fn op_update(&self, key: &ResourceKey, field: &str, value: &str) -> Operation {
		Operation::update(key.clone(), "me".into(), Fields::new().with(field, value), self.clock.now())
	}

	/// Commits `op` straight to the remote at its current head, as another session would.
	async fn remote_write(&self, op: Operation) -> CommitAck {
		let (_, head) = self.remote.snapshot(&op.key).unwrap();
		remote::commit(self.remote.as_ref(), &op.with_baseline(Some(head))).await.unwrap()
	}

	async fn conflict_on_title(&self, key: &ResourceKey) -> ConflictId {
		self.seed(key, title("a"));
		self.clock.advance(Duration::from_secs(1));
		self.remote_write(Operation::update(key.clone(), "x".into(), title("x"), self.clock.now())).await;
		self.clock.advance(Duration::from_secs(4));

		match self.coordinator.submit(self.op_update(key, "title", "y")).await {
			Err(SyncError::Conflict { id, conflict_type, .. }) => {
				assert_eq!(conflict_type, ConflictType::ConcurrentEdit);
				id
			}
			other => panic!("expected conflict, got {other:?}"),
		}
	}
}

struct DenyAll;

impl SubmitGate for DenyAll {
	fn authorize(&self, _op: &Operation) -> Result<(), String> {
		Err("read only".into())
	}
}

/// Denies any write that sets the title to a reserved value.
struct ReservedTitle(&'static str);

impl SubmitGate for ReservedTitle {
	fn authorize(&self, op: &Operation) -> Result<(), String> {
		match op.payload.get("title") {
			Some(value) if *value == self.0 => Err(format!("title {} is reserved", self.0)),
			_ => Ok(()),
		}
	}
}

#[tokio::test(start_paused = true)]
async fn optimistic_value_is_visible_until_canonical_replaces_it() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("a"));

	let ticket = h.coordinator.submit(h.op_update(&t1, "title", "b"));
	assert_eq!(h.coordinator.get(&t1), Some(title("b")));
	assert!(h.coordinator.has_overlay(&t1));
	assert_eq!(h.coordinator.lane_status(&t1), LaneStatus::Scheduled);

	assert_eq!(
		ticket.await,
		Ok(Outcome::Committed {
			version: VersionMarker::Counter(2)
		})
	);
	assert!(!h.coordinator.has_overlay(&t1));
	assert_eq!(h.coordinator.version(&t1), Some(VersionMarker::Counter(2)));
	assert_eq!(h.coordinator.history_len(), 1);
	assert!(h.coordinator.is_settled());
}

#[tokio::test(start_paused = true)]
async fn network_failure_rolls_back_without_history() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("a"));
	h.remote.inject(Fault::Fail(RemoteError::Network("offline".into())));

	let result = h.coordinator.submit(h.op_update(&t1, "title", "b")).await;
	assert_eq!(result, Err(SyncError::Network("offline".into())));
	assert_eq!(h.coordinator.get(&t1), Some(title("a")));
	assert!(!h.coordinator.has_overlay(&t1));
	assert_eq!(h.coordinator.history_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn commit_timeout_is_a_network_failure() {
	let h = harness(SyncConfig {
		commit_timeout_ms: 1_000,
		..SyncConfig::default()
	});
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, Fields::new().with("description", "original"));
	h.remote.inject(Fault::Hang);

	let result = h.coordinator.submit(h.op_update(&t1, "description", "edited")).await;
	assert!(matches!(&result, Err(SyncError::Network(reason)) if reason.contains("timed out")), "{result:?}");
	assert_eq!(h.coordinator.get(&t1), Some(Fields::new().with("description", "original")));
	assert_eq!(h.coordinator.history_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn history_never_captures_pending_values_of_other_resources() {
	let h = harness(SyncConfig {
		commit_timeout_ms: 5_000,
		..SyncConfig::default()
	});
	let t1 = ResourceKey::task("T1");
	let t2 = ResourceKey::task("T2");
	h.seed(&t1, title("one"));
	h.seed(&t2, title("two"));

	h.remote.inject(Fault::Hang);
	let doomed = h.coordinator.submit(h.op_update(&t2, "title", "doomed"));
	tokio::time::sleep(SyncConfig::default().debounce() + Duration::from_millis(10)).await;
	assert_eq!(h.coordinator.lane_status(&t2), LaneStatus::InFlight);

	h.coordinator.submit(h.op_update(&t1, "title", "uno")).await.unwrap();
	let entry = h.coordinator.history_entries().remove(0);
	assert_eq!(entry.previous.get(&t2), Some(&title("two")));
	assert_eq!(entry.current.get(&t2), Some(&title("two")));
	assert_eq!(entry.current.get(&t1), Some(&title("uno")));

	assert!(matches!(doomed.await, Err(SyncError::Network(_))));
	assert_eq!(h.coordinator.get(&t2), Some(title("two")));

	assert!(h.coordinator.undo());
	assert_eq!(h.coordinator.get(&t1), Some(title("one")));
	assert_eq!(h.coordinator.get(&t2), Some(title("two")));
	assert!(h.coordinator.redo());
	assert_eq!(h.coordinator.get(&t1), Some(title("uno")));
	assert_eq!(h.coordinator.get(&t2), Some(title("two")));
}

#[tokio::test(start_paused = true)]
async fn gate_denial_happens_before_apply() {
	let remote = Arc::new(MemoryRemote::new());
	let coordinator = MutationCoordinator::builder(remote.clone()).gate(Arc::new(DenyAll)).build();
	let t1 = ResourceKey::task("T1");
	let op = Operation::create(t1.clone(), "me".into(), title("a"), Utc::now());

	assert_eq!(coordinator.submit(op).await, Err(SyncError::Permission("read only".into())));
	assert_eq!(coordinator.get(&t1), None);
	assert!(remote.received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_operations_are_rejected_up_front() {
	let h = harness(SyncConfig::default());
	let missing = ResourceKey::task("missing");
	let result = h.coordinator.submit(h.op_update(&missing, "title", "b")).await;
	assert!(matches!(result, Err(SyncError::Validation(_))));
	assert!(h.remote.received().is_empty());
}

#[tokio::test(start_paused = true)]
async fn compatible_updates_supersede_within_debounce() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("a"));

	let first = h.coordinator.submit(h.op_update(&t1, "title", "b"));
	tokio::time::sleep(Duration::from_millis(100)).await;
	let second_op = h.op_update(&t1, "description", "d");
	let second_id = second_op.id;
	let second = h.coordinator.submit(second_op);

	assert_eq!(first.await, Ok(Outcome::Superseded { by: second_id }));
	assert!(matches!(second.await, Ok(Outcome::Committed { .. })));

	let received = h.remote.received();
	assert_eq!(received.len(), 1);
	assert_eq!(received[0].payload, Fields::new().with("title", "b").with("description", "d"));
	assert_eq!(h.remote.value(&t1), Some(Fields::new().with("title", "b").with("description", "d")));
}

#[tokio::test(start_paused = true)]
async fn queued_operation_takes_baseline_after_predecessor_commits() {
	let h = harness(SyncConfig::default());
	let t9 = ResourceKey::task("T9");

	let create = h.coordinator.submit(Operation::create(t9.clone(), "me".into(), title("n"), h.clock.now()));
	let update = h.coordinator.submit(h.op_update(&t9, "title", "m"));

	assert!(matches!(create.await, Ok(Outcome::Committed { .. })));
	assert_eq!(
		update.await,
		Ok(Outcome::Committed {
			version: VersionMarker::Counter(2)
		})
	);

	let received = h.remote.received();
	assert_eq!(received[0].baseline_version, None);
	assert_eq!(received[1].baseline_version, Some(VersionMarker::Counter(1)));
	assert_eq!(h.coordinator.history_len(), 2);
}

#[tokio::test(start_paused = true)]
async fn concurrent_edit_keeps_optimistic_value_and_resolves_last_write_wins() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	let id = h.conflict_on_title(&t1).await;

	assert_eq!(h.coordinator.get(&t1), Some(title("y")));
	assert_eq!(h.coordinator.lane_status(&t1), LaneStatus::ConflictPending(id));

	let conflicts = h.coordinator.get_conflicts();
	assert_eq!(conflicts.len(), 1);
	let record = &conflicts[0];
	assert_eq!(record.conflicting_operations.len(), 2);
	assert_eq!(record.remote().actor.as_str(), "x");
	assert_eq!(record.overlapping_fields, vec!["title".to_string()]);

	let suggested = record.suggested_resolution.clone().unwrap();
	assert_eq!(suggested.strategy, ResolutionStrategy::LastWriteWins { winner: record.local().id });

	assert_eq!(
		h.coordinator.resolve_conflict(id, suggested.clone()).await,
		Ok(Outcome::Committed {
			version: VersionMarker::Counter(3)
		})
	);
	assert_eq!(h.remote.value(&t1), Some(title("y")));
	assert!(h.coordinator.get_conflicts().is_empty());
	assert_eq!(h.coordinator.history_len(), 1);

	assert_eq!(h.coordinator.resolve_conflict(id, suggested).await, Ok(Outcome::AlreadyResolved));
	// remote write, rejected attempt, resolution
	assert_eq!(h.remote.received().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn disjoint_concurrent_edits_merge_automatically() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, Fields::new().with("title", "a").with("description", "d0"));
	h.remote_write(Operation::update(t1.clone(), "x".into(), Fields::new().with("description", "d1"), h.clock.now()))
		.await;

	let result = h.coordinator.submit(h.op_update(&t1, "title", "b")).await;
	assert_eq!(
		result,
		Ok(Outcome::Committed {
			version: VersionMarker::Counter(3)
		})
	);

	let merged = Fields::new().with("title", "b").with("description", "d1");
	assert_eq!(h.remote.value(&t1), Some(merged.clone()));
	assert_eq!(h.coordinator.get(&t1), Some(merged));
	assert!(h.coordinator.get_conflicts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disabled_auto_merge_surfaces_disjoint_conflicts() {
	let h = harness(SyncConfig {
		auto_merge_disjoint: false,
		..SyncConfig::default()
	});
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, Fields::new().with("title", "a").with("description", "d0"));
	h.remote_write(Operation::update(t1.clone(), "x".into(), Fields::new().with("description", "d1"), h.clock.now()))
		.await;

	let result = h.coordinator.submit(h.op_update(&t1, "title", "b")).await;
	assert!(matches!(result, Err(SyncError::Conflict { .. })));
	let record = h.coordinator.get_conflicts().remove(0);
	assert!(record.is_auto_mergeable());

	let merge = Resolution {
		strategy: ResolutionStrategy::FieldMerge,
		resulting_operation: None,
	};
	assert!(matches!(h.coordinator.resolve_conflict(record.id, merge).await, Ok(Outcome::Committed { .. })));
	assert_eq!(h.remote.value(&t1), Some(Fields::new().with("title", "b").with("description", "d1")));
}

#[tokio::test(start_paused = true)]
async fn failed_resolution_restores_conflict_time_value() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	let id = h.conflict_on_title(&t1).await;
	let suggested = h.coordinator.conflict(id).and_then(|record| record.suggested_resolution).unwrap();

	h.remote.inject(Fault::Fail(RemoteError::Network("flaky".into())));
	assert_eq!(
		h.coordinator.resolve_conflict(id, suggested.clone()).await,
		Err(SyncError::Network("flaky".into()))
	);
	assert_eq!(h.coordinator.get(&t1), Some(title("y")));
	assert_eq!(h.coordinator.get_conflicts().len(), 1);
	assert_eq!(h.coordinator.lane_status(&t1), LaneStatus::ConflictPending(id));

	assert!(matches!(h.coordinator.resolve_conflict(id, suggested).await, Ok(Outcome::Committed { .. })));
	assert!(h.coordinator.get_conflicts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn resolution_passes_the_submit_gate() {
	let h = gated_harness(SyncConfig::default(), Arc::new(ReservedTitle("forbidden")));
	let t1 = ResourceKey::task("T1");
	let id = h.conflict_on_title(&t1).await;

	let forbidden = Resolution::manual(h.op_update(&t1, "title", "forbidden"));
	assert_eq!(
		h.coordinator.resolve_conflict(id, forbidden).await,
		Err(SyncError::Permission("title forbidden is reserved".into()))
	);
	assert_eq!(h.remote.value(&t1), Some(title("x")));
	assert_eq!(h.remote.received().len(), 2);
	assert_eq!(h.coordinator.get(&t1), Some(title("y")));
	assert_eq!(h.coordinator.get_conflicts().len(), 1);
	assert_eq!(h.coordinator.lane_status(&t1), LaneStatus::ConflictPending(id));

	let allowed = Resolution::manual(h.op_update(&t1, "title", "z"));
	assert!(matches!(h.coordinator.resolve_conflict(id, allowed).await, Ok(Outcome::Committed { .. })));
	assert_eq!(h.remote.value(&t1), Some(title("z")));
}

#[tokio::test(start_paused = true)]
async fn denied_auto_merge_surfaces_the_conflict() {
	let h = gated_harness(SyncConfig::default(), Arc::new(ReservedTitle("forbidden")));
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, Fields::new().with("title", "a").with("description", "d0"));
	h.remote_write(Operation::update(t1.clone(), "x".into(), title("forbidden"), h.clock.now()))
		.await;

	let result = h.coordinator.submit(h.op_update(&t1, "description", "d1")).await;
	assert!(matches!(result, Err(SyncError::Conflict { .. })), "{result:?}");
	assert_eq!(h.remote.value(&t1), Some(Fields::new().with("title", "forbidden").with("description", "d0")));
	assert_eq!(h.remote.received().len(), 2);
	assert_eq!(h.coordinator.get_conflicts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn manual_resolution_is_validated_against_remote_value() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	let id = h.conflict_on_title(&t1).await;

	let empty = Resolution::manual(Operation::update(t1.clone(), "me".into(), Fields::new(), h.clock.now()));
	assert!(matches!(h.coordinator.resolve_conflict(id, empty).await, Err(SyncError::Validation(_))));
	let create = Resolution::manual(Operation::create(t1.clone(), "me".into(), title("z"), h.clock.now()));
	assert!(matches!(h.coordinator.resolve_conflict(id, create).await, Err(SyncError::Validation(_))));

	assert_eq!(h.remote.received().len(), 2);
	assert_eq!(h.coordinator.lane_status(&t1), LaneStatus::ConflictPending(id));
	assert_eq!(h.coordinator.get_conflicts().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn concurrent_creates_resolve_with_an_update() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	remote::commit(h.remote.as_ref(), &Operation::create(t1.clone(), "x".into(), title("theirs"), h.clock.now()))
		.await
		.unwrap();
	h.clock.advance(Duration::from_secs(5));

	let result = h
		.coordinator
		.submit(Operation::create(t1.clone(), "me".into(), title("mine"), h.clock.now()))
		.await;
	let id = match result {
		Err(SyncError::Conflict { id, conflict_type, .. }) => {
			assert_eq!(conflict_type, ConflictType::ConcurrentEdit);
			id
		}
		other => panic!("expected conflict, got {other:?}"),
	};
	let suggested = h.coordinator.conflict(id).and_then(|record| record.suggested_resolution).unwrap();

	assert_eq!(
		h.coordinator.resolve_conflict(id, suggested).await,
		Ok(Outcome::Committed {
			version: VersionMarker::Counter(2)
		})
	);
	assert_eq!(h.remote.value(&t1), Some(title("mine")));
	assert_eq!(h.remote.received().last().map(|op| op.kind), Some(OperationKind::Update));
	assert!(h.coordinator.get_conflicts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn disjoint_concurrent_creates_merge_automatically() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	remote::commit(h.remote.as_ref(), &Operation::create(t1.clone(), "x".into(), title("theirs"), h.clock.now()))
		.await
		.unwrap();

	let mine = Fields::new().with("description", "mine");
	let result = h.coordinator.submit(Operation::create(t1.clone(), "me".into(), mine, h.clock.now())).await;
	assert_eq!(
		result,
		Ok(Outcome::Committed {
			version: VersionMarker::Counter(2)
		})
	);
	let merged = Fields::new().with("title", "theirs").with("description", "mine");
	assert_eq!(h.remote.value(&t1), Some(merged.clone()));
	assert_eq!(h.coordinator.get(&t1), Some(merged));
}

#[tokio::test(start_paused = true)]
async fn remote_deletion_wins_and_is_adopted() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("a"));
	let local = h.op_update(&t1, "title", "b");

	h.clock.advance(Duration::from_secs(10));
	h.remote_write(Operation::delete(t1.clone(), "x".into(), h.clock.now())).await;

	let id = match h.coordinator.submit(local).await {
		Err(SyncError::Conflict { id, conflict_type, .. }) => {
			assert_eq!(conflict_type, ConflictType::StaleWrite);
			id
		}
		other => panic!("expected stale write, got {other:?}"),
	};
	let suggested = h.coordinator.conflict(id).and_then(|record| record.suggested_resolution).unwrap();
	assert_eq!(suggested.resulting_operation, None);

	assert_eq!(h.coordinator.resolve_conflict(id, suggested).await, Ok(Outcome::Adopted));
	assert_eq!(h.coordinator.get(&t1), None);
	assert_eq!(h.coordinator.version(&t1), None);
	assert!(h.coordinator.is_settled());
}

#[tokio::test(start_paused = true)]
async fn clearing_conflicts_refreshes_to_canonical() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.conflict_on_title(&t1).await;

	assert_eq!(h.coordinator.clear_conflicts(), 1);
	assert_eq!(h.coordinator.get(&t1), Some(title("x")));
	assert_eq!(h.coordinator.version(&t1), Some(VersionMarker::Counter(2)));
	assert!(!h.coordinator.has_overlay(&t1));
	assert!(h.coordinator.get_conflicts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn queued_work_waits_behind_a_conflict() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.conflict_on_title(&t1).await;

	let mut queued = h.coordinator.submit(h.op_update(&t1, "description", "later"));
	tokio::time::sleep(Duration::from_secs(1)).await;
	assert_eq!(queued.try_result(), None);

	h.coordinator.clear_conflicts();
	assert!(matches!(queued.await, Ok(Outcome::Committed { .. })));
	assert_eq!(h.remote.value(&t1), Some(Fields::new().with("title", "x").with("description", "later")));
}

#[tokio::test(start_paused = true)]
async fn resolution_errors_are_reported() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	let id = h.conflict_on_title(&t1).await;

	let unknown = h.coordinator.resolve_conflict(ConflictId(999), Resolution::manual(h.op_update(&t1, "title", "z"))).await;
	assert_eq!(unknown, Err(SyncError::UnknownConflict(ConflictId(999))));

	let empty_manual = Resolution {
		strategy: ResolutionStrategy::Manual,
		resulting_operation: None,
	};
	assert!(matches!(
		h.coordinator.resolve_conflict(id, empty_manual).await,
		Err(SyncError::IncompleteResolution(_))
	));

	let overlapping_merge = Resolution {
		strategy: ResolutionStrategy::FieldMerge,
		resulting_operation: None,
	};
	assert!(matches!(
		h.coordinator.resolve_conflict(id, overlapping_merge).await,
		Err(SyncError::IncompleteResolution(_))
	));

	let manual = Resolution::manual(h.op_update(&t1, "title", "both"));
	assert!(matches!(h.coordinator.resolve_conflict(id, manual).await, Ok(Outcome::Committed { .. })));
	assert_eq!(h.remote.value(&t1), Some(title("both")));
}

#[tokio::test(start_paused = true)]
async fn batch_reorder_commits_as_one_move() {
	let h = harness(SyncConfig::default());
	let a = ResourceKey::task("A");
	let b = ResourceKey::task("B");
	h.seed(&a, Fields::new().with("position", 0));
	h.seed(&b, Fields::new().with("position", 1));

	let ops = vec![
		Operation::reorder(a.clone(), "me".into(), 1, h.clock.now()),
		Operation::reorder(b.clone(), "me".into(), 0, h.clock.now()),
	];
	assert_eq!(h.coordinator.submit_batch(ops).await, Ok(Outcome::BatchCommitted { count: 2 }));

	let entries = h.coordinator.history_entries();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0].action, HistoryAction::Move);
	assert_eq!(h.coordinator.get(&a), Some(Fields::new().with("position", 1)));
	assert_eq!(h.coordinator.version(&b), Some(VersionMarker::Counter(2)));
}

#[tokio::test(start_paused = true)]
async fn failed_batch_refreshes_every_item() {
	let h = harness(SyncConfig::default());
	let a = ResourceKey::task("A");
	let b = ResourceKey::task("B");
	h.seed(&a, Fields::new().with("position", 0));
	h.seed(&b, Fields::new().with("position", 1));
	h.remote.inject(Fault::Fail(RemoteError::Network("offline".into())));

	let ops = vec![
		Operation::reorder(a.clone(), "me".into(), 1, h.clock.now()),
		Operation::reorder(b.clone(), "me".into(), 0, h.clock.now()),
	];
	let result = h.coordinator.submit_batch(ops).await;
	assert!(matches!(result, Err(SyncError::BatchFailed { total: 2, .. })));
	assert_eq!(h.coordinator.get(&a), Some(Fields::new().with("position", 0)));
	assert_eq!(h.coordinator.get(&b), Some(Fields::new().with("position", 1)));
	assert_eq!(h.coordinator.history_len(), 0);
	assert!(h.coordinator.is_settled());
}

#[tokio::test(start_paused = true)]
async fn batch_waits_for_busy_lanes() {
	let h = harness(SyncConfig::default());
	let a = ResourceKey::task("A");
	let b = ResourceKey::task("B");
	h.seed(&a, Fields::new().with("position", 0).with("title", "a"));
	h.seed(&b, Fields::new().with("position", 1));

	let edit = h.coordinator.submit(h.op_update(&a, "title", "edited"));
	let batch = h.coordinator.submit_batch(vec![
		Operation::reorder(a.clone(), "me".into(), 1, h.clock.now()),
		Operation::reorder(b.clone(), "me".into(), 0, h.clock.now()),
	]);
	assert_eq!(h.coordinator.lane_status(&b), LaneStatus::Batch);

	assert!(matches!(edit.await, Ok(Outcome::Committed { .. })));
	assert_eq!(batch.await, Ok(Outcome::BatchCommitted { count: 2 }));
	let received = h.remote.received();
	assert_eq!(received[1].baseline_version, Some(VersionMarker::Counter(2)));
}

#[tokio::test(start_paused = true)]
async fn undo_and_redo_stay_local() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("a"));
	h.coordinator.submit(h.op_update(&t1, "title", "b")).await.unwrap();

	assert!(h.coordinator.undo());
	assert_eq!(h.coordinator.get(&t1), Some(title("a")));
	assert!(!h.coordinator.can_undo());
	assert!(h.coordinator.can_redo());
	assert_eq!(h.coordinator.version(&t1), Some(VersionMarker::Counter(2)));

	assert!(h.coordinator.redo());
	assert_eq!(h.coordinator.get(&t1), Some(title("b")));
	assert!(!h.coordinator.redo());
	assert_eq!(h.remote.received().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn history_is_bounded() {
	let h = harness(SyncConfig {
		history_limit: 2,
		..SyncConfig::default()
	});
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("0"));
	for n in 1..=4 {
		h.coordinator.submit(h.op_update(&t1, "title", &n.to_string())).await.unwrap();
	}
	let entries = h.coordinator.history_entries();
	assert_eq!(entries.len(), 2);
	assert_eq!(entries[0].previous.get(&t1), Some(&title("2")));
}

#[tokio::test(start_paused = true)]
async fn remote_notices_apply_in_version_order() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("a"));

	let newer = CommittedMutation::new(
		&Operation::update(t1.clone(), "x".into(), title("x"), h.clock.now()),
		Some(title("x")),
		VersionMarker::Counter(2),
	);
	assert_eq!(h.coordinator.apply_remote(newer.clone()), RemoteApply::Applied);
	assert_eq!(h.coordinator.get(&t1), Some(title("x")));
	assert_eq!(h.coordinator.apply_remote(newer), RemoteApply::Ignored);
}

#[tokio::test(start_paused = true)]
async fn remote_notice_is_deferred_until_lane_is_idle() {
	let h = harness(SyncConfig {
		commit_timeout_ms: 1_000,
		..SyncConfig::default()
	});
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("a"));
	h.remote.inject(Fault::Hang);

	let ticket = h.coordinator.submit(h.op_update(&t1, "title", "mine"));
	let notice = CommittedMutation::new(
		&Operation::update(t1.clone(), "x".into(), title("theirs"), h.clock.now()),
		Some(title("theirs")),
		VersionMarker::Counter(2),
	);
	assert_eq!(h.coordinator.apply_remote(notice), RemoteApply::Deferred);
	assert_eq!(h.coordinator.get(&t1), Some(title("mine")));

	assert!(matches!(ticket.await, Err(SyncError::Network(_))));
	assert_eq!(h.coordinator.get(&t1), Some(title("theirs")));
}

#[tokio::test(start_paused = true)]
async fn commits_are_broadcast_and_observed() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("a"));
	let mut commits = h.coordinator.subscribe_commits();
	let changes = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&changes);
	h.coordinator.observe(move |event| sink.lock().push(event.change));

	h.coordinator.submit(h.op_update(&t1, "title", "b")).await.unwrap();

	let notice = commits.try_recv().unwrap();
	assert_eq!(notice.key, t1);
	assert_eq!(notice.actor.as_str(), "me");
	assert_eq!(notice.value, Some(title("b")));
	assert_eq!(notice.version, VersionMarker::Counter(2));
	assert_eq!(changes.lock().as_slice(), &[StoreChange::Optimistic, StoreChange::Canonical]);
}

#[tokio::test(start_paused = true)]
async fn delete_commit_keeps_tombstone_version() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("a"));

	let ticket = h.coordinator.submit(Operation::delete(t1.clone(), "me".into(), h.clock.now()));
	assert_eq!(h.coordinator.get(&t1), None);
	assert!(matches!(ticket.await, Ok(Outcome::Committed { .. })));
	assert_eq!(h.coordinator.version(&t1), Some(VersionMarker::Counter(2)));
	assert_eq!(h.coordinator.history_entries()[0].action, HistoryAction::Delete);
}

#[tokio::test(start_paused = true)]
async fn late_notice_does_not_resurrect_deleted_resource() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("a"));
	let mut commits = h.coordinator.subscribe_commits();

	h.coordinator.submit(h.op_update(&t1, "title", "b")).await.unwrap();
	let late = commits.try_recv().unwrap();
	assert_eq!(late.version, VersionMarker::Counter(2));
	h.coordinator
		.submit(Operation::delete(t1.clone(), "me".into(), h.clock.now()))
		.await
		.unwrap();

	assert_eq!(h.coordinator.apply_remote(late), RemoteApply::Ignored);
	assert_eq!(h.coordinator.get(&t1), None);
	assert_eq!(h.coordinator.version(&t1), Some(VersionMarker::Counter(3)));
}

#[tokio::test(start_paused = true)]
async fn recreate_after_delete_continues_past_tombstone() {
	let h = harness(SyncConfig::default());
	let t1 = ResourceKey::task("T1");
	h.seed(&t1, title("a"));
	h.coordinator
		.submit(Operation::delete(t1.clone(), "me".into(), h.clock.now()))
		.await
		.unwrap();

	let outcome = h
		.coordinator
		.submit(Operation::create(t1.clone(), "me".into(), title("again"), h.clock.now()))
		.await;
	assert_eq!(
		outcome,
		Ok(Outcome::Committed {
			version: VersionMarker::Counter(3)
		})
	);
	assert_eq!(h.coordinator.get(&t1), Some(title("again")));
}

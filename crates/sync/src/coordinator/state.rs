use std::collections::HashMap;
use std::time::Duration;

use tandem_primitives::{Fields, Operation, OperationKind, ResourceKey, VersionMarker};
use tandem_worker::GenerationClock;

use super::batch::{BatchId, BatchState};
use super::lane::{Flight, Lane, LaneStatus, Origin, Pending, Phase, Queued};
use super::{CommittedMutation, Effects, Env, Outcome, RemoteApply, Responder};
use crate::config::SyncConfig;
use crate::conflict::{ConflictDetector, ConflictId, ConflictLedger, ConflictRecord, ConflictStatus, Detection};
use crate::error::SyncError;
use crate::history::{HistoryAction, HistoryLedger};
use crate::remote::{CommitAck, RemoteError};
use crate::resolution::{Resolution, ResolutionSelector, ResolutionStrategy};
use crate::store::{Collection, EntityStore, Snapshot};
use crate::validate::validate;
use crate::version::VersionTracker;

pub(crate) struct CoordinatorState {
	pub(crate) store: EntityStore,
	pub(crate) history: HistoryLedger<Collection>,
	pub(crate) versions: VersionTracker,
	pub(crate) conflicts: ConflictLedger,
	detector: ConflictDetector,
	selector: ResolutionSelector,
	lanes: HashMap<ResourceKey, Lane>,
	pub(super) batches: HashMap<BatchId, BatchState>,
	/// Remote notices held back while their resource had local work.
	deferred: HashMap<ResourceKey, CommittedMutation>,
	pub(super) generations: GenerationClock,
	pub(super) next_batch: u64,
}

fn history_action(kind: OperationKind) -> HistoryAction {
	match kind {
		OperationKind::Create => HistoryAction::Create,
		OperationKind::Update => HistoryAction::Update,
		OperationKind::Delete => HistoryAction::Delete,
		OperationKind::Reorder => HistoryAction::Move,
	}
}

impl CoordinatorState {
	pub(crate) fn new(config: &SyncConfig) -> Self {
		Self {
			store: EntityStore::new(),
			history: HistoryLedger::new(config.history_limit),
			versions: VersionTracker::new(),
			conflicts: ConflictLedger::default(),
			detector: ConflictDetector::new(),
			selector: ResolutionSelector::new(config.auto_merge_disjoint),
			lanes: HashMap::new(),
			batches: HashMap::new(),
			deferred: HashMap::new(),
			generations: GenerationClock::new(),
			next_batch: 0,
		}
	}

	pub(crate) fn lane_status(&self, key: &ResourceKey) -> LaneStatus {
		self.lanes.get(key).map_or(LaneStatus::Idle, Lane::status)
	}

	pub(crate) fn is_settled(&self) -> bool {
		self.lanes.values().all(Lane::is_vacant) && self.batches.is_empty()
	}

	pub(super) fn lane_mut(&mut self, key: &ResourceKey) -> &mut Lane {
		self.lanes.entry(key.clone()).or_default()
	}

	pub(super) fn lane(&self, key: &ResourceKey) -> Option<&Lane> {
		self.lanes.get(key)
	}

	fn is_busy(&self, key: &ResourceKey) -> bool {
		self.store.has_overlay(key) || self.lanes.get(key).is_some_and(|lane| !lane.is_vacant())
	}

	pub(crate) fn submit(&mut self, env: &Env, op: Operation, responder: Responder, fx: &mut Effects) {
		if let Err(reason) = env.gate.authorize(&op) {
			tracing::debug!(key = %op.key, op = %op.id, %reason, "sync.submit.denied");
			fx.reply_one(responder, Err(SyncError::Permission(reason)));
			return;
		}
		if let Err(error) = validate(&op, self.store.get(&op.key)) {
			tracing::debug!(key = %op.key, op = %op.id, %error, "sync.submit.invalid");
			fx.reply_one(responder, Err(error));
			return;
		}

		let key = op.key.clone();
		let pending = Pending {
			op,
			origin: Origin::Submit,
			waiters: vec![responder],
		};
		let lane = self.lane_mut(&key);
		if lane.queue.is_empty() {
			match std::mem::take(&mut lane.phase) {
				Phase::Idle => {
					self.start(env, &key, pending, fx);
					return;
				}
				Phase::Scheduled(flight) if flight.can_be_superseded_by(&pending.op) => {
					self.supersede(env, &key, flight, pending, fx);
					return;
				}
				other => lane.phase = other,
			}
		}
		tracing::trace!(%key, op = %pending.op.id, queued = lane.queue.len() + 1, "sync.submit.queued");
		lane.queue.push_back(Queued::Op(pending));
	}

	/// Moves `pending` out of idle: stamps its baseline, applies it and
	/// schedules the commit. Returns false if it failed revalidation.
	pub(super) fn start(&mut self, env: &Env, key: &ResourceKey, pending: Pending, fx: &mut Effects) -> bool {
		let Pending { mut op, origin, waiters } = pending;
		if origin == Origin::Submit
			&& let Err(error) = validate(&op, self.store.get(key))
		{
			tracing::debug!(%key, op = %op.id, %error, "sync.start.invalid");
			fx.reply(waiters, Err(error));
			return false;
		}

		op.baseline_version = self.versions.baseline_for(key).cloned();
		let resume_value = match origin {
			Origin::Resolution(_) => Some(self.store.get(key).cloned()),
			Origin::Submit => None,
		};
		let pre_image = self.store.apply(key, |current| op.apply_to(current));
		let delay = match origin {
			Origin::Submit => env.config.debounce(),
			Origin::Resolution(_) => Duration::ZERO,
		};
		let generation = self.generations.next();
		let task = env.schedule_commit(key.clone(), generation, delay);
		tracing::trace!(%key, op = %op.id, kind = op.kind.as_str(), generation, baseline = ?op.baseline_version, "sync.start");

		self.lane_mut(key).phase = Phase::Scheduled(Flight {
			op,
			origin,
			waiters,
			pre_image,
			resume_value,
			task,
		});
		true
	}

	fn supersede(&mut self, env: &Env, key: &ResourceKey, old: Flight, next: Pending, fx: &mut Effects) {
		old.task.cancel();
		let Pending { mut op, waiters, .. } = next;
		if op.kind == OperationKind::Update {
			op.payload = old.op.payload.merged(&op.payload);
		}
		op.baseline_version = old.op.baseline_version.clone();
		tracing::debug!(%key, superseded = %old.op.id, by = %op.id, "sync.submit.superseded");
		fx.reply(old.waiters, Ok(Outcome::Superseded { by: op.id }));

		self.store.apply(key, |current| op.apply_to(current));
		let generation = self.generations.next();
		let task = env.schedule_commit(key.clone(), generation, env.config.debounce());
		self.lane_mut(key).phase = Phase::Scheduled(Flight {
			op,
			origin: Origin::Submit,
			waiters,
			pre_image: old.pre_image,
			resume_value: None,
			task,
		});
	}

	/// Drains the lane of `key` while it is idle.
	pub(super) fn advance(&mut self, env: &Env, key: &ResourceKey, fx: &mut Effects) {
		loop {
			let Some(lane) = self.lanes.get(key) else {
				self.install_deferred(key);
				return;
			};
			if !lane.is_idle() {
				return;
			}
			self.install_deferred(key);

			let Some(lane) = self.lanes.get_mut(key) else {
				return;
			};
			match lane.queue.pop_front() {
				None => {
					self.lanes.remove(key);
					return;
				}
				Some(Queued::Op(pending)) => {
					if self.start(env, key, pending, fx) {
						return;
					}
				}
				Some(Queued::Batch(id)) => {
					lane.phase = Phase::Batch(id);
					self.try_launch_batch(env, id, fx);
					return;
				}
			}
		}
	}

	/// Claims a scheduled flight for dispatch.
	pub(crate) fn begin_flight(&mut self, key: &ResourceKey, generation: u64) -> Option<Operation> {
		let lane = self.lanes.get_mut(key)?;
		match std::mem::take(&mut lane.phase) {
			Phase::Scheduled(flight) if flight.generation() == generation => {
				let op = flight.op.clone();
				lane.phase = Phase::InFlight(flight);
				Some(op)
			}
			other => {
				lane.phase = other;
				tracing::debug!(%key, generation, "sync.commit.stale_dispatch");
				None
			}
		}
	}

	pub(crate) fn on_commit_result(
		&mut self,
		env: &Env,
		key: &ResourceKey,
		generation: u64,
		result: Result<CommitAck, RemoteError>,
		fx: &mut Effects,
	) {
		let Some(lane) = self.lanes.get_mut(key) else {
			tracing::debug!(%key, generation, "sync.commit.stale_result");
			return;
		};
		let flight = match std::mem::take(&mut lane.phase) {
			Phase::InFlight(flight) if flight.generation() == generation => flight,
			other => {
				lane.phase = other;
				tracing::debug!(%key, generation, "sync.commit.stale_result");
				return;
			}
		};

		match result {
			Ok(ack) => self.commit_succeeded(env, key, flight, ack, fx),
			Err(error) => self.commit_failed(env, key, flight, error, fx),
		}
	}

	fn commit_succeeded(&mut self, env: &Env, key: &ResourceKey, flight: Flight, ack: CommitAck, fx: &mut Effects) {
		let Flight {
			op,
			origin,
			waiters,
			pre_image,
			..
		} = flight;

		self.versions.observe(key, ack.version.clone());
		let previous = self.store.canonical_with([(key, &pre_image)]);
		let canonical = match (op.kind, ack.canonical) {
			(OperationKind::Delete, _) => None,
			(_, Some(value)) => Some(value),
			(_, None) => self.store.get(key).cloned(),
		};
		match &canonical {
			Some(value) => self.store.replace(key, value.clone()),
			None => {
				self.store.remove(key);
			}
		}
		let current = self.store.canonical_collection();
		self.history.record(
			history_action(op.kind),
			format!("{} {key}", op.kind.as_str()),
			previous,
			current,
			env.clock.now(),
		);

		if let Origin::Resolution(id) = origin
			&& self.conflicts.resolve(id).is_some()
		{
			tracing::info!(%key, conflict = %id, "sync.conflict.resolved");
		}
		tracing::trace!(%key, op = %op.id, version = %ack.version, "sync.commit.committed");

		fx.notify(CommittedMutation::new(&op, canonical, ack.version.clone()));
		fx.reply(waiters, Ok(Outcome::Committed { version: ack.version }));
		self.advance(env, key, fx);
	}

	fn commit_failed(&mut self, env: &Env, key: &ResourceKey, flight: Flight, error: RemoteError, fx: &mut Effects) {
		let local_value = self.store.get(key).cloned();
		match self.detector.detect(&flight.op, &error, local_value, env.clock.now()) {
			Detection::Conflict(record) => self.escalate(env, key, flight, *record, fx),
			Detection::Plain(sync_error) => {
				tracing::warn!(%key, op = %flight.op.id, error = %sync_error, "sync.commit.rolled_back");
				match (flight.origin, flight.resume_value) {
					(Origin::Resolution(id), Some(resume)) => {
						self.store.set_optimistic(key, resume);
						self.conflicts.set_status(id, ConflictStatus::Pending);
						self.lane_mut(key).phase = Phase::ConflictPending(id);
						fx.reply(flight.waiters, Err(sync_error));
					}
					_ => {
						self.store.revert(key, flight.pre_image);
						fx.reply(flight.waiters, Err(sync_error));
						self.advance(env, key, fx);
					}
				}
			}
		}
	}

	fn escalate(&mut self, env: &Env, key: &ResourceKey, flight: Flight, mut record: ConflictRecord, fx: &mut Effects) {
		self.versions.observe(key, record.observed_version.clone());
		record.suggested_resolution = Some(self.selector.suggest(&record));
		let id = record.id;
		let conflict_type = record.conflict_type;
		tracing::warn!(%key, conflict = %id, kind = %conflict_type, op = %flight.op.id, remote = %record.observed_version, "sync.conflict.detected");

		let auto_merge = match record.suggested_resolution.as_ref() {
			Some(Resolution {
				strategy: ResolutionStrategy::FieldMerge,
				resulting_operation: Some(op),
			}) => match env.gate.authorize(op) {
				Ok(()) => Some(op.clone()),
				Err(reason) => {
					tracing::debug!(%key, conflict = %id, op = %op.id, %reason, "sync.conflict.auto_merge_denied");
					None
				}
			},
			_ => None,
		};

		match flight.origin {
			Origin::Resolution(previous) => self.conflicts.supersede(previous, record),
			Origin::Submit => self.conflicts.insert(record, ConflictStatus::Pending),
		}
		self.lane_mut(key).phase = Phase::ConflictPending(id);

		match auto_merge {
			Some(op) => {
				tracing::debug!(%key, conflict = %id, op = %op.id, "sync.conflict.auto_merge");
				self.conflicts.set_status(id, ConflictStatus::Resolving(op.id));
				let pending = Pending {
					op,
					origin: Origin::Resolution(id),
					waiters: flight.waiters,
				};
				self.start(env, key, pending, fx);
			}
			None => fx.reply(
				flight.waiters,
				Err(SyncError::Conflict {
					id,
					key: key.clone(),
					conflict_type,
				}),
			),
		}
	}

	pub(crate) fn resolve_conflict(&mut self, env: &Env, id: ConflictId, resolution: Resolution, responder: Responder, fx: &mut Effects) {
		if self.conflicts.is_resolved(id) {
			tracing::debug!(conflict = %id, "sync.conflict.already_resolved");
			fx.reply_one(responder, Ok(Outcome::AlreadyResolved));
			return;
		}
		let Some(entry) = self.conflicts.get(id) else {
			fx.reply_one(responder, Err(SyncError::UnknownConflict(id)));
			return;
		};
		let key = entry.record.key.clone();

		if let ConflictStatus::Resolving(_) = entry.status {
			if let Some(lane) = self.lanes.get_mut(&key)
				&& let Phase::Scheduled(flight) | Phase::InFlight(flight) = &mut lane.phase
				&& flight.origin == Origin::Resolution(id)
			{
				flight.waiters.push(responder);
			} else {
				fx.reply_one(responder, Err(SyncError::IncompleteResolution(format!("conflict {id} is already being resolved"))));
			}
			return;
		}

		let op = match self.resulting_operation(&entry.record, resolution.clone()) {
			Ok(op) => op,
			Err(error) => {
				fx.reply_one(responder, Err(error));
				return;
			}
		};
		if !matches!(self.lanes.get(&key).map(|lane| &lane.phase), Some(Phase::ConflictPending(pending)) if *pending == id) {
			fx.reply_one(responder, Err(SyncError::UnknownConflict(id)));
			return;
		}

		if let Some(op) = &op
			&& let Err(reason) = env.gate.authorize(op)
		{
			tracing::debug!(%key, conflict = %id, op = %op.id, %reason, "sync.conflict.denied");
			fx.reply_one(responder, Err(SyncError::Permission(reason)));
			return;
		}

		tracing::info!(%key, conflict = %id, strategy = %resolution.strategy, "sync.conflict.resolving");
		match op {
			None => {
				self.adopt(env, id, fx);
				fx.reply_one(responder, Ok(Outcome::Adopted));
			}
			Some(op) => {
				self.conflicts.set_status(id, ConflictStatus::Resolving(op.id));
				let pending = Pending {
					op,
					origin: Origin::Resolution(id),
					waiters: vec![responder],
				};
				self.start(env, &key, pending, fx);
			}
		}
	}

	/// Operation to commit for `resolution`; `None` adopts the remote state.
	fn resulting_operation(&self, record: &ConflictRecord, resolution: Resolution) -> Result<Option<Operation>, SyncError> {
		let op = match resolution.strategy {
			ResolutionStrategy::FieldMerge => {
				let merged = self.selector.field_merge(record)?;
				resolution.resulting_operation.or(merged.resulting_operation)
			}
			ResolutionStrategy::LastWriteWins { .. } => resolution.resulting_operation,
			ResolutionStrategy::Manual => {
				let op = resolution
					.resulting_operation
					.ok_or_else(|| SyncError::IncompleteResolution("manual resolution without an operation".into()))?;
				validate(&op, record.remote_value.as_ref())?;
				Some(op)
			}
		};
		if let Some(op) = &op
			&& op.key != record.key
		{
			return Err(SyncError::Validation(format!("resolution targets {} instead of {}", op.key, record.key)));
		}
		Ok(op)
	}

	/// Resolves `id` by installing the remote canonical state.
	fn adopt(&mut self, env: &Env, id: ConflictId, fx: &mut Effects) {
		let Some(record) = self.conflicts.resolve(id) else {
			return;
		};
		self.refresh(&record.key, record.remote_value, record.observed_version);
		self.lane_mut(&record.key).phase = Phase::Idle;
		self.advance(env, &record.key, fx);
	}

	pub(crate) fn clear_conflicts(&mut self, env: &Env, fx: &mut Effects) -> usize {
		let mut cleared = 0;
		for id in self.conflicts.ids() {
			let Some(entry) = self.conflicts.discard(id) else {
				continue;
			};
			cleared += 1;
			let key = entry.record.key.clone();
			let lane = self.lane_mut(&key);
			match std::mem::take(&mut lane.phase) {
				Phase::Scheduled(flight) | Phase::InFlight(flight) if flight.origin == Origin::Resolution(id) => {
					flight.task.cancel();
					fx.reply(flight.waiters, Err(SyncError::ConflictCleared(id)));
				}
				Phase::ConflictPending(pending) if pending == id => {}
				other => {
					lane.phase = other;
					continue;
				}
			}
			tracing::debug!(%key, conflict = %id, "sync.conflict.cleared");
			self.refresh(&key, entry.record.remote_value, entry.record.observed_version);
			self.advance(env, &key, fx);
		}
		cleared
	}

	/// Installs a canonical value reported by the remote, clearing any overlay.
	pub(super) fn refresh(&mut self, key: &ResourceKey, value: Option<Fields>, version: VersionMarker) {
		self.versions.observe(key, version);
		self.install(key, value);
	}

	fn install(&mut self, key: &ResourceKey, value: Option<Fields>) {
		match value {
			Some(value) => self.store.replace(key, value),
			None => {
				self.store.remove(key);
			}
		}
	}

	pub(crate) fn apply_remote(&mut self, notice: CommittedMutation) -> RemoteApply {
		let key = notice.key.clone();
		if !self.versions.is_newer(&key, &notice.version) {
			tracing::debug!(%key, version = %notice.version, "sync.remote.ignored");
			return RemoteApply::Ignored;
		}
		self.versions.observe(&key, notice.version.clone());

		if self.is_busy(&key) {
			tracing::debug!(%key, version = %notice.version, "sync.remote.deferred");
			self.deferred.insert(key, notice);
			return RemoteApply::Deferred;
		}
		tracing::trace!(%key, version = %notice.version, actor = %notice.actor, "sync.remote.applied");
		self.install(&key, notice.value);
		RemoteApply::Applied
	}

	/// Installs a deferred remote notice once `key` has no overlay, provided
	/// nothing newer has been observed since.
	fn install_deferred(&mut self, key: &ResourceKey) {
		if self.store.has_overlay(key) {
			return;
		}
		let Some(notice) = self.deferred.remove(key) else {
			return;
		};
		if self.versions.baseline_for(key) == Some(&notice.version) {
			tracing::trace!(%key, version = %notice.version, "sync.remote.deferred_applied");
			self.install(key, notice.value);
		} else {
			tracing::debug!(%key, version = %notice.version, "sync.remote.deferred_dropped");
		}
	}

	pub(crate) fn hydrate(&mut self, key: ResourceKey, value: Fields, version: VersionMarker) -> Result<(), SyncError> {
		if self.is_busy(&key) {
			return Err(SyncError::Validation(format!("{key} has pending changes")));
		}
		if !self.versions.observe(&key, version) {
			return Err(SyncError::Validation(format!("hydration of {key} is older than the known version")));
		}
		self.store.replace(&key, value);
		Ok(())
	}

	pub(crate) fn undo(&mut self) -> bool {
		let Some(snapshot) = self.history.undo().map(|entry| entry.previous.clone()) else {
			return false;
		};
		self.store.restore_collection(&snapshot);
		true
	}

	pub(crate) fn redo(&mut self) -> bool {
		let Some(snapshot) = self.history.redo().map(|entry| entry.current.clone()) else {
			return false;
		};
		self.store.restore_collection(&snapshot);
		true
	}

	/// Pre-images captured for keys, in order.
	pub(super) fn apply_all(&mut self, ops: &mut [Operation]) -> Vec<(ResourceKey, Snapshot)> {
		let mut pre_images = Vec::with_capacity(ops.len());
		for op in ops.iter_mut() {
			op.baseline_version = self.versions.baseline_for(&op.key).cloned();
			let pre_image = self.store.apply(&op.key, |current| op.apply_to(current));
			pre_images.push((op.key.clone(), pre_image));
		}
		pre_images
	}
}

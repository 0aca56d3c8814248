//! All-or-nothing reorder batches.
//!
//! A batch reserves every lane it touches, in submission order, and launches
//! once all of them are reserved. On failure every item is rolled back to its
//! pre-image and then refreshed from whatever canonical values the remote
//! reported; no conflict records are produced.

use tandem_primitives::{Operation, ResourceKey};
use tandem_worker::ScheduledTask;

use super::lane::{Phase, Queued};
use super::state::CoordinatorState;
use super::{CommittedMutation, Effects, Env, Outcome, Responder};
use crate::error::SyncError;
use crate::history::HistoryAction;
use crate::remote::{BatchRejection, CommitAck, RemoteError};
use crate::store::Snapshot;
use crate::validate::validate_batch;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct BatchId(pub(crate) u64);

pub(crate) struct BatchState {
	ops: Vec<Operation>,
	waiters: Vec<Responder>,
	pre_images: Vec<(ResourceKey, Snapshot)>,
	task: Option<ScheduledTask>,
	dispatched: bool,
}

impl CoordinatorState {
	pub(crate) fn submit_batch(&mut self, env: &Env, ops: Vec<Operation>, responder: Responder, fx: &mut Effects) {
		if let Some(reason) = ops.iter().find_map(|op| env.gate.authorize(op).err()) {
			tracing::debug!(items = ops.len(), %reason, "sync.batch.denied");
			fx.reply_one(responder, Err(SyncError::Permission(reason)));
			return;
		}
		if let Err(error) = validate_batch(&ops, |op| self.store.get(&op.key)) {
			tracing::debug!(items = ops.len(), %error, "sync.batch.invalid");
			fx.reply_one(responder, Err(error));
			return;
		}

		self.next_batch += 1;
		let id = BatchId(self.next_batch);
		for op in &ops {
			let lane = self.lane_mut(&op.key);
			if lane.is_vacant() {
				lane.phase = Phase::Batch(id);
			} else {
				lane.queue.push_back(Queued::Batch(id));
			}
		}
		tracing::trace!(batch = id.0, items = ops.len(), "sync.batch.submitted");
		self.batches.insert(
			id,
			BatchState {
				ops,
				waiters: vec![responder],
				pre_images: Vec::new(),
				task: None,
				dispatched: false,
			},
		);
		self.try_launch_batch(env, id, fx);
	}

	/// Applies and dispatches batch `id` once it holds every lane it needs.
	pub(super) fn try_launch_batch(&mut self, env: &Env, id: BatchId, fx: &mut Effects) {
		let Some(batch) = self.batches.get(&id) else {
			return;
		};
		if batch.task.is_some() {
			return;
		}
		let ready = batch
			.ops
			.iter()
			.all(|op| matches!(self.lane(&op.key).map(|lane| &lane.phase), Some(Phase::Batch(owner)) if *owner == id));
		if !ready {
			return;
		}

		let Some(mut batch) = self.batches.remove(&id) else {
			return;
		};
		if let Err(error) = validate_batch(&batch.ops, |op| self.store.get(&op.key)) {
			tracing::debug!(batch = id.0, %error, "sync.batch.invalid_at_launch");
			fx.reply(batch.waiters, Err(error));
			self.release_lanes(env, &batch.ops, fx);
			return;
		}

		batch.pre_images = self.apply_all(&mut batch.ops);
		let generation = self.generations.next();
		batch.task = Some(env.schedule_batch(id, generation));
		self.batches.insert(id, batch);
	}

	pub(crate) fn begin_batch(&mut self, id: BatchId, generation: u64) -> Option<Vec<Operation>> {
		let batch = self.batches.get_mut(&id)?;
		if batch.dispatched || batch.task.as_ref().map(ScheduledTask::generation) != Some(generation) {
			tracing::debug!(batch = id.0, generation, "sync.batch.stale_dispatch");
			return None;
		}
		batch.dispatched = true;
		Some(batch.ops.clone())
	}

	pub(crate) fn on_batch_result(
		&mut self,
		env: &Env,
		id: BatchId,
		generation: u64,
		result: Result<Vec<CommitAck>, BatchRejection>,
		fx: &mut Effects,
	) {
		let current = self.batches.get(&id).and_then(|batch| batch.task.as_ref()).map(ScheduledTask::generation);
		if current != Some(generation) {
			tracing::debug!(batch = id.0, generation, "sync.batch.stale_result");
			return;
		}
		let Some(batch) = self.batches.remove(&id) else {
			return;
		};

		let result = match result {
			Ok(acks) if acks.len() != batch.ops.len() => Err(BatchRejection::new(RemoteError::Validation(format!(
				"expected {} acknowledgements, got {}",
				batch.ops.len(),
				acks.len()
			)))),
			other => other,
		};

		let total = batch.ops.len();
		match result {
			Ok(acks) => {
				let previous = self.store.canonical_with(batch.pre_images.iter().map(|(key, snapshot)| (key, snapshot)));
				for (op, ack) in batch.ops.iter().zip(acks) {
					self.versions.observe(&op.key, ack.version.clone());
					let value = ack.canonical.or_else(|| self.store.get(&op.key).cloned());
					if let Some(value) = &value {
						self.store.replace(&op.key, value.clone());
					}
					fx.notify(CommittedMutation::new(op, value, ack.version));
				}
				let current = self.store.canonical_collection();
				self.history
					.record(HistoryAction::Move, format!("reorder {total} items"), previous, current, env.clock.now());
				tracing::trace!(batch = id.0, items = total, "sync.batch.committed");
				fx.reply(batch.waiters, Ok(Outcome::BatchCommitted { count: total }));
			}
			Err(rejection) => {
				tracing::warn!(batch = id.0, items = total, error = %rejection.error, "sync.batch.failed");
				for (key, pre_image) in batch.pre_images {
					self.store.revert(&key, pre_image);
				}
				for ack in rejection.canonical {
					if batch.ops.iter().any(|op| op.key == ack.key) {
						self.refresh(&ack.key, ack.canonical, ack.version);
					}
				}
				fx.reply(
					batch.waiters,
					Err(SyncError::BatchFailed {
						total,
						reason: rejection.error.to_string(),
					}),
				);
			}
		}
		self.release_lanes(env, &batch.ops, fx);
	}

	fn release_lanes(&mut self, env: &Env, ops: &[Operation], fx: &mut Effects) {
		for op in ops {
			self.lane_mut(&op.key).phase = Phase::Idle;
		}
		for op in ops {
			self.advance(env, &op.key, fx);
		}
	}
}

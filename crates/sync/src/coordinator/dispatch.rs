//! Commit tasks.
//!
//! A task sleeps through its delay, claims its flight under the lock (a
//! superseded or cancelled generation claims nothing), performs the remote
//! call without the lock, then hands the result back.

use std::time::Duration;

use tandem_primitives::ResourceKey;
use tandem_worker::{GenerationToken, ScheduledTask, TaskClass};

use super::Env;
use super::batch::BatchId;
use crate::remote::{self, BatchRejection, RemoteError};

impl Env {
	pub(crate) fn schedule_commit(&self, key: ResourceKey, generation: u64, delay: Duration) -> ScheduledTask {
		let shared = self.shared.clone();
		let remote = self.remote.clone();
		let timeout = self.config.commit_timeout();

		tandem_worker::schedule(TaskClass::Commit, GenerationToken::new(generation), delay, async move {
			let Some(shared) = shared.upgrade() else {
				return;
			};
			let claimed = shared.state.lock().begin_flight(&key, generation);
			let Some(op) = claimed else {
				return;
			};

			tracing::trace!(%key, op = %op.id, kind = op.kind.as_str(), generation, "sync.commit.dispatch");
			let result = match tokio::time::timeout(timeout, remote::commit(remote.as_ref(), &op)).await {
				Ok(result) => result,
				Err(_) => Err(RemoteError::Timeout(timeout)),
			};
			shared.with_state(|state, env, fx| state.on_commit_result(env, &key, generation, result, fx));
		})
	}

	pub(crate) fn schedule_batch(&self, id: BatchId, generation: u64) -> ScheduledTask {
		let shared = self.shared.clone();
		let remote = self.remote.clone();
		let timeout = self.config.commit_timeout();

		tandem_worker::schedule(TaskClass::Commit, GenerationToken::new(generation), Duration::ZERO, async move {
			let Some(shared) = shared.upgrade() else {
				return;
			};
			let claimed = shared.state.lock().begin_batch(id, generation);
			let Some(ops) = claimed else {
				return;
			};

			tracing::trace!(batch = id.0, items = ops.len(), "sync.batch.dispatch");
			let result = match tokio::time::timeout(timeout, remote.reorder_batch(&ops)).await {
				Ok(result) => result,
				Err(_) => Err(BatchRejection::new(RemoteError::Timeout(timeout))),
			};
			shared.with_state(|state, env, fx| state.on_batch_result(env, id, generation, result, fx));
		})
	}
}

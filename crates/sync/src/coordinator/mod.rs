//! Mutation coordinator: optimistic apply, remote commit, rollback and
//! conflict escalation.
//!
//! Every resource has a lane that strictly serializes its operations. A
//! submitted operation is applied to the [`EntityStore`] immediately, waits
//! out a debounce window (during which a compatible follow-up supersedes it),
//! and is then committed. On success the canonical value replaces the overlay
//! and a history entry is recorded; plain failures roll back to the pre-image;
//! rejections caused by a newer remote write become [`ConflictRecord`]s and
//! leave the optimistic value visible until resolved.
//!
//! All state sits behind one mutex. Replies and broadcast notices are
//! collected while it is held and delivered after it is released.
//!
//! [`EntityStore`]: crate::store::EntityStore

mod batch;
mod dispatch;
mod lane;
mod state;

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tandem_primitives::{ActorId, Clock, Fields, Operation, OperationId, OperationKind, ResourceKey, SystemClock, VersionMarker};
use tokio::sync::{broadcast, oneshot};

pub use self::lane::LaneStatus;
use self::state::CoordinatorState;
use crate::config::SyncConfig;
use crate::conflict::{ConflictId, ConflictRecord};
use crate::error::SyncError;
use crate::history::HistoryEntry;
use crate::remote::RemoteStore;
use crate::resolution::Resolution;
use crate::store::{Collection, ObserverId, StoreEvent};
use crate::validate::{AllowAll, SubmitGate};

/// Capacity of the committed-mutation broadcast buffer.
const COMMIT_BROADCAST_CAPACITY: usize = 256;

/// Terminal result of a submitted operation.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
	/// Committed remotely at `version`.
	Committed { version: VersionMarker },
	/// Replaced by a newer operation before dispatch.
	Superseded { by: OperationId },
	/// Every item of a batch committed.
	BatchCommitted { count: usize },
	/// Remote canonical state was adopted without writing.
	Adopted,
	/// The conflict was already resolved; nothing changed.
	AlreadyResolved,
}

/// How [`MutationCoordinator::apply_remote`] handled a notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteApply {
	Applied,
	/// Held until the resource's lane is idle.
	Deferred,
	/// Not newer than the last observed marker.
	Ignored,
}

/// Notice of a committed write, broadcast to other participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommittedMutation {
	pub operation_id: OperationId,
	pub key: ResourceKey,
	pub actor: ActorId,
	pub kind: OperationKind,
	pub changed: Fields,
	/// Canonical value after the write; `None` after a delete.
	pub value: Option<Fields>,
	pub version: VersionMarker,
	pub submitted_at: DateTime<Utc>,
}

impl CommittedMutation {
	pub(crate) fn new(op: &Operation, value: Option<Fields>, version: VersionMarker) -> Self {
		Self {
			operation_id: op.id,
			key: op.key.clone(),
			actor: op.actor.clone(),
			kind: op.kind,
			changed: op.payload.clone(),
			value,
			version,
			submitted_at: op.submitted_at,
		}
	}
}

type Reply = Result<Outcome, SyncError>;
pub(crate) type Responder = oneshot::Sender<Reply>;

/// Pending result of a submission.
///
/// Resolves once the operation reaches a terminal state. Dropping the ticket
/// does not cancel the operation.
#[derive(Debug)]
#[must_use = "a ticket reports whether the operation committed"]
pub struct Ticket {
	rx: oneshot::Receiver<Reply>,
}

impl Ticket {
	fn pair() -> (Self, Responder) {
		let (tx, rx) = oneshot::channel();
		(Self { rx }, tx)
	}

	/// Ticket that is already resolved.
	pub fn ready(result: Reply) -> Self {
		let (ticket, tx) = Self::pair();
		let _ = tx.send(result);
		ticket
	}

	/// Returns the result if the operation has already finished.
	pub fn try_result(&mut self) -> Option<Reply> {
		match self.rx.try_recv() {
			Ok(result) => Some(result),
			Err(oneshot::error::TryRecvError::Empty) => None,
			Err(oneshot::error::TryRecvError::Closed) => Some(Err(SyncError::Closed)),
		}
	}
}

impl Future for Ticket {
	type Output = Reply;

	fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
		Pin::new(&mut self.rx).poll(cx).map(|received| received.unwrap_or(Err(SyncError::Closed)))
	}
}

/// Replies and notices produced under the state lock.
#[derive(Default)]
pub(crate) struct Effects {
	replies: Vec<(Responder, Reply)>,
	notices: Vec<CommittedMutation>,
}

impl Effects {
	pub(crate) fn reply(&mut self, waiters: Vec<Responder>, result: Reply) {
		for waiter in waiters {
			self.replies.push((waiter, result.clone()));
		}
	}

	pub(crate) fn reply_one(&mut self, waiter: Responder, result: Reply) {
		self.replies.push((waiter, result));
	}

	pub(crate) fn notify(&mut self, notice: CommittedMutation) {
		self.notices.push(notice);
	}
}

/// Collaborators and tuning shared by every state transition.
pub(crate) struct Env {
	pub(crate) remote: Arc<dyn RemoteStore>,
	pub(crate) config: SyncConfig,
	pub(crate) clock: Arc<dyn Clock>,
	pub(crate) gate: Arc<dyn SubmitGate>,
	pub(crate) shared: Weak<Shared>,
}

pub(crate) struct Shared {
	env: Env,
	state: Mutex<CoordinatorState>,
	commits: broadcast::Sender<CommittedMutation>,
}

impl Shared {
	fn with_state<R>(&self, f: impl FnOnce(&mut CoordinatorState, &Env, &mut Effects) -> R) -> R {
		let mut effects = Effects::default();
		let out = {
			let mut state = self.state.lock();
			f(&mut state, &self.env, &mut effects)
		};
		self.flush(effects);
		out
	}

	fn flush(&self, effects: Effects) {
		for notice in effects.notices {
			let _ = self.commits.send(notice);
		}
		for (waiter, result) in effects.replies {
			let _ = waiter.send(result);
		}
	}
}

/// Builder for [`MutationCoordinator`].
pub struct CoordinatorBuilder {
	remote: Arc<dyn RemoteStore>,
	config: SyncConfig,
	clock: Arc<dyn Clock>,
	gate: Arc<dyn SubmitGate>,
}

impl CoordinatorBuilder {
	pub fn config(mut self, config: SyncConfig) -> Self {
		self.config = config;
		self
	}

	pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;
		self
	}

	pub fn gate(mut self, gate: Arc<dyn SubmitGate>) -> Self {
		self.gate = gate;
		self
	}

	pub fn build(self) -> MutationCoordinator {
		let (commits, _) = broadcast::channel(COMMIT_BROADCAST_CAPACITY);
		let state = CoordinatorState::new(&self.config);
		let shared = Arc::new_cyclic(|weak| Shared {
			env: Env {
				remote: self.remote,
				config: self.config,
				clock: self.clock,
				gate: self.gate,
				shared: weak.clone(),
			},
			state: Mutex::new(state),
			commits,
		});
		MutationCoordinator { shared }
	}
}

/// Orchestrates optimistic mutations against a remote store.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MutationCoordinator {
	shared: Arc<Shared>,
}

impl MutationCoordinator {
	pub fn builder(remote: Arc<dyn RemoteStore>) -> CoordinatorBuilder {
		CoordinatorBuilder {
			remote,
			config: SyncConfig::default(),
			clock: Arc::new(SystemClock),
			gate: Arc::new(AllowAll),
		}
	}

	pub fn new(remote: Arc<dyn RemoteStore>, config: SyncConfig) -> Self {
		Self::builder(remote).config(config).build()
	}

	pub fn config(&self) -> &SyncConfig {
		&self.shared.env.config
	}

	/// Applies `op` optimistically and schedules its commit.
	///
	/// Authorization and local validation failures resolve the ticket
	/// immediately, before anything is applied.
	pub fn submit(&self, op: Operation) -> Ticket {
		let (ticket, responder) = Ticket::pair();
		self.shared.with_state(|state, env, fx| state.submit(env, op, responder, fx));
		ticket
	}

	/// Submits reorders that commit or fail together.
	pub fn submit_batch(&self, ops: Vec<Operation>) -> Ticket {
		let (ticket, responder) = Ticket::pair();
		self.shared.with_state(|state, env, fx| state.submit_batch(env, ops, responder, fx));
		ticket
	}

	/// Applies `resolution` to a pending conflict.
	///
	/// Resolving an already resolved conflict reports
	/// [`Outcome::AlreadyResolved`] and changes nothing.
	pub fn resolve_conflict(&self, id: ConflictId, resolution: Resolution) -> Ticket {
		let (ticket, responder) = Ticket::pair();
		self.shared.with_state(|state, env, fx| state.resolve_conflict(env, id, resolution, responder, fx));
		ticket
	}

	/// Unresolved conflicts in detection order.
	pub fn get_conflicts(&self) -> Vec<ConflictRecord> {
		self.shared.state.lock().conflicts.records()
	}

	pub fn conflict(&self, id: ConflictId) -> Option<ConflictRecord> {
		self.shared.state.lock().conflicts.get(id).map(|entry| entry.record.clone())
	}

	/// Discards every conflict, refreshing each resource to the canonical
	/// value reported with its rejection. Returns how many were cleared.
	pub fn clear_conflicts(&self) -> usize {
		self.shared.with_state(|state, env, fx| state.clear_conflicts(env, fx))
	}

	pub fn undo(&self) -> bool {
		self.shared.with_state(|state, _, _| state.undo())
	}

	pub fn redo(&self) -> bool {
		self.shared.with_state(|state, _, _| state.redo())
	}

	pub fn can_undo(&self) -> bool {
		self.shared.state.lock().history.can_undo()
	}

	pub fn can_redo(&self) -> bool {
		self.shared.state.lock().history.can_redo()
	}

	pub fn history_len(&self) -> usize {
		self.shared.state.lock().history.len()
	}

	/// Copies of the recorded history entries, oldest first.
	pub fn history_entries(&self) -> Vec<HistoryEntry<Collection>> {
		self.shared.state.lock().history.entries().cloned().collect()
	}

	/// Installs a write committed by another participant.
	pub fn apply_remote(&self, notice: CommittedMutation) -> RemoteApply {
		self.shared.with_state(|state, _, _| state.apply_remote(notice))
	}

	/// Installs canonical data fetched out of band.
	pub fn hydrate(&self, key: ResourceKey, value: Fields, version: VersionMarker) -> Result<(), SyncError> {
		self.shared.with_state(|state, _, _| state.hydrate(key, value, version))
	}

	/// Stream of every write this coordinator commits.
	pub fn subscribe_commits(&self) -> broadcast::Receiver<CommittedMutation> {
		self.shared.commits.subscribe()
	}

	/// Current visible value, optimistic or canonical.
	pub fn get(&self, key: &ResourceKey) -> Option<Fields> {
		self.shared.state.lock().store.get(key).cloned()
	}

	pub fn collection(&self) -> Collection {
		self.shared.state.lock().store.collection()
	}

	/// Last canonical marker observed for `key`.
	pub fn version(&self, key: &ResourceKey) -> Option<VersionMarker> {
		self.shared.state.lock().versions.baseline_for(key).cloned()
	}

	pub fn has_overlay(&self, key: &ResourceKey) -> bool {
		self.shared.state.lock().store.has_overlay(key)
	}

	pub fn lane_status(&self, key: &ResourceKey) -> LaneStatus {
		self.shared.state.lock().lane_status(key)
	}

	/// Returns true when no lane has outstanding work.
	pub fn is_settled(&self) -> bool {
		self.shared.state.lock().is_settled()
	}

	/// Registers a store observer.
	///
	/// Observers run while the coordinator is locked and must not call back
	/// into it.
	pub fn observe(&self, observer: impl FnMut(&StoreEvent) + Send + 'static) -> ObserverId {
		self.shared.state.lock().store.observe(observer)
	}

	pub fn unobserve(&self, id: ObserverId) -> bool {
		self.shared.state.lock().store.unobserve(id)
	}
}

#[cfg(test)]
mod tests;

use std::collections::VecDeque;

use tandem_primitives::{Operation, OperationKind};
use tandem_worker::ScheduledTask;

use super::Responder;
use super::batch::BatchId;
use crate::conflict::ConflictId;
use crate::store::Snapshot;

/// Why an operation entered its lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Origin {
	Submit,
	Resolution(ConflictId),
}

/// Operation waiting for its lane to become idle.
pub(crate) struct Pending {
	pub(crate) op: Operation,
	pub(crate) origin: Origin,
	pub(crate) waiters: Vec<Responder>,
}

pub(crate) enum Queued {
	Op(Pending),
	/// Slot reserved for a batch touching this lane.
	Batch(BatchId),
}

/// Operation that has been applied optimistically and owns a commit task.
pub(crate) struct Flight {
	pub(crate) op: Operation,
	pub(crate) origin: Origin,
	pub(crate) waiters: Vec<Responder>,
	pub(crate) pre_image: Snapshot,
	/// Visible value when a resolution started; restored if it fails plainly.
	pub(crate) resume_value: Option<Snapshot>,
	pub(crate) task: ScheduledTask,
}

impl Flight {
	pub(crate) fn generation(&self) -> u64 {
		self.task.generation()
	}

	/// Compatible follow-ups replace a flight that has not been dispatched.
	pub(crate) fn can_be_superseded_by(&self, next: &Operation) -> bool {
		self.origin == Origin::Submit
			&& self.op.kind == next.kind
			&& matches!(next.kind, OperationKind::Update | OperationKind::Reorder)
	}
}

#[derive(Default)]
pub(crate) enum Phase {
	#[default]
	Idle,
	/// Applied optimistically; commit waits out the debounce window.
	Scheduled(Flight),
	/// Commit request outstanding.
	InFlight(Flight),
	ConflictPending(ConflictId),
	/// Reserved by, or committing as part of, a batch.
	Batch(BatchId),
}

#[derive(Default)]
pub(crate) struct Lane {
	pub(crate) phase: Phase,
	pub(crate) queue: VecDeque<Queued>,
}

impl Lane {
	pub(crate) fn is_idle(&self) -> bool {
		matches!(self.phase, Phase::Idle)
	}

	pub(crate) fn is_vacant(&self) -> bool {
		self.is_idle() && self.queue.is_empty()
	}

	pub(crate) fn status(&self) -> LaneStatus {
		match &self.phase {
			Phase::Idle => LaneStatus::Idle,
			Phase::Scheduled(_) => LaneStatus::Scheduled,
			Phase::InFlight(_) => LaneStatus::InFlight,
			Phase::ConflictPending(id) => LaneStatus::ConflictPending(*id),
			Phase::Batch(_) => LaneStatus::Batch,
		}
	}
}

/// Observable phase of a resource's lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LaneStatus {
	Idle,
	Scheduled,
	InFlight,
	ConflictPending(ConflictId),
	Batch,
}

//! In-process remote store with per-resource counters and fault injection.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tandem_primitives::{ActorId, Fields, Operation, OperationKind, ResourceKey, VersionMarker};

use super::{BatchRejection, CommitAck, RemoteError, RemoteStore, RemoteWrite};

/// Injected behavior for the next remote call.
#[derive(Debug, Clone)]
pub enum Fault {
	/// Reject with the given error without touching state.
	Fail(RemoteError),
	/// Never respond.
	Hang,
}

#[derive(Debug, Clone)]
struct Record {
	value: Fields,
	version: u64,
	last_write: RemoteWrite,
}

#[derive(Debug, Clone)]
struct Tombstone {
	version: u64,
	last_write: RemoteWrite,
}

#[derive(Debug, Default)]
struct RemoteState {
	records: HashMap<ResourceKey, Record>,
	tombstones: HashMap<ResourceKey, Tombstone>,
	faults: VecDeque<Fault>,
	received: Vec<Operation>,
}

enum Step<T> {
	Done(T),
	Hang,
}

/// Canonical store living in memory, shared by every participant holding it.
///
/// Versions are per-resource counters starting at 1 and surviving deletion,
/// so a re-created resource continues past its tombstone.
#[derive(Debug, Default)]
pub struct MemoryRemote {
	state: Mutex<RemoteState>,
}

impl MemoryRemote {
	pub fn new() -> Self {
		Self::default()
	}

	/// Installs canonical data directly, as if written by `system` at version 1.
	pub fn seed(&self, key: ResourceKey, value: Fields) -> VersionMarker {
		let mut state = self.state.lock();
		let version = state.tombstones.remove(&key).map_or(1, |tomb| tomb.version + 1);
		state.records.insert(
			key,
			Record {
				last_write: RemoteWrite {
					actor: ActorId::new("system"),
					kind: OperationKind::Create,
					changed: value.clone(),
					submitted_at: DateTime::<Utc>::UNIX_EPOCH,
				},
				value,
				version,
			},
		);
		VersionMarker::Counter(version)
	}

	/// Canonical value and marker of `key`.
	pub fn snapshot(&self, key: &ResourceKey) -> Option<(Fields, VersionMarker)> {
		let state = self.state.lock();
		state.records.get(key).map(|rec| (rec.value.clone(), VersionMarker::Counter(rec.version)))
	}

	pub fn value(&self, key: &ResourceKey) -> Option<Fields> {
		self.snapshot(key).map(|(value, _)| value)
	}

	/// Queues a fault consumed by the next call.
	pub fn inject(&self, fault: Fault) {
		self.state.lock().faults.push_back(fault);
	}

	/// Every operation received so far, including failed ones.
	pub fn received(&self) -> Vec<Operation> {
		self.state.lock().received.clone()
	}

	fn commit_sync(&self, op: &Operation) -> Step<Result<CommitAck, RemoteError>> {
		let mut state = self.state.lock();
		state.received.push(op.clone());
		match state.faults.pop_front() {
			Some(Fault::Hang) => return Step::Hang,
			Some(Fault::Fail(error)) => return Step::Done(Err(error)),
			None => {}
		}
		Step::Done(state.apply(op))
	}

	fn batch_sync(&self, ops: &[Operation]) -> Step<Result<Vec<CommitAck>, BatchRejection>> {
		let mut state = self.state.lock();
		state.received.extend(ops.iter().cloned());
		match state.faults.pop_front() {
			Some(Fault::Hang) => return Step::Hang,
			Some(Fault::Fail(error)) => {
				return Step::Done(Err(BatchRejection {
					error,
					canonical: state.acks_for(ops),
				}));
			}
			None => {}
		}

		if let Some(error) = ops.iter().find_map(|op| state.check(op).err()) {
			return Step::Done(Err(BatchRejection {
				error,
				canonical: state.acks_for(ops),
			}));
		}
		let mut acks = Vec::with_capacity(ops.len());
		for op in ops {
			match state.apply(op) {
				Ok(ack) => acks.push(ack),
				Err(error) => return Step::Done(Err(BatchRejection::new(error))),
			}
		}
		Step::Done(Ok(acks))
	}
}

impl RemoteState {
	fn write_of(op: &Operation) -> RemoteWrite {
		RemoteWrite {
			actor: op.actor.clone(),
			kind: op.kind,
			changed: op.payload.clone(),
			submitted_at: op.submitted_at,
		}
	}

	fn acks_for(&self, ops: &[Operation]) -> Vec<CommitAck> {
		ops.iter()
			.filter_map(|op| {
				self.records.get(&op.key).map(|rec| CommitAck {
					key: op.key.clone(),
					canonical: Some(rec.value.clone()),
					version: VersionMarker::Counter(rec.version),
				})
			})
			.collect()
	}

	/// Checks `op` against the current head without writing.
	fn check(&self, op: &Operation) -> Result<(), RemoteError> {
		let Some(rec) = self.records.get(&op.key) else {
			if op.kind == OperationKind::Create {
				return Ok(());
			}
			return Err(match self.tombstones.get(&op.key) {
				Some(tomb) => RemoteError::Gone {
					current: VersionMarker::Counter(tomb.version),
					last_write: tomb.last_write.clone(),
				},
				None => RemoteError::Validation(format!("{} does not exist", op.key)),
			});
		};

		let head = VersionMarker::Counter(rec.version);
		if op.kind != OperationKind::Create && op.baseline_version.as_ref() == Some(&head) {
			return Ok(());
		}
		let last_write = rec.last_write.clone();
		let canonical = rec.value.clone();
		Err(match op.kind {
			OperationKind::Reorder => RemoteError::OrderMismatch {
				current: head,
				last_write,
				canonical,
			},
			_ => RemoteError::VersionMismatch {
				current: head,
				last_write,
				canonical,
			},
		})
	}

	fn apply(&mut self, op: &Operation) -> Result<CommitAck, RemoteError> {
		self.check(op)?;
		let write = Self::write_of(op);
		match op.kind {
			OperationKind::Create => {
				let version = self.tombstones.remove(&op.key).map_or(1, |tomb| tomb.version + 1);
				self.records.insert(
					op.key.clone(),
					Record {
						value: op.payload.clone(),
						version,
						last_write: write,
					},
				);
				Ok(CommitAck {
					key: op.key.clone(),
					canonical: Some(op.payload.clone()),
					version: VersionMarker::Counter(version),
				})
			}
			OperationKind::Update | OperationKind::Reorder => {
				let Some(rec) = self.records.get_mut(&op.key) else {
					return Err(RemoteError::Validation(format!("{} does not exist", op.key)));
				};
				rec.value.merge(&op.payload);
				rec.version += 1;
				rec.last_write = write;
				Ok(CommitAck {
					key: op.key.clone(),
					canonical: Some(rec.value.clone()),
					version: VersionMarker::Counter(rec.version),
				})
			}
			OperationKind::Delete => {
				let Some(rec) = self.records.remove(&op.key) else {
					return Err(RemoteError::Validation(format!("{} does not exist", op.key)));
				};
				let version = rec.version + 1;
				self.tombstones.insert(op.key.clone(), Tombstone { version, last_write: write });
				Ok(CommitAck {
					key: op.key.clone(),
					canonical: None,
					version: VersionMarker::Counter(version),
				})
			}
		}
	}
}

impl MemoryRemote {
	async fn respond(&self, op: &Operation) -> Result<CommitAck, RemoteError> {
		match self.commit_sync(op) {
			Step::Done(result) => result,
			Step::Hang => std::future::pending().await,
		}
	}
}

#[async_trait]
impl RemoteStore for MemoryRemote {
	async fn create(&self, op: &Operation) -> Result<CommitAck, RemoteError> {
		self.respond(op).await
	}

	async fn update(&self, op: &Operation) -> Result<CommitAck, RemoteError> {
		self.respond(op).await
	}

	async fn delete(&self, op: &Operation) -> Result<CommitAck, RemoteError> {
		self.respond(op).await
	}

	async fn reorder(&self, op: &Operation) -> Result<CommitAck, RemoteError> {
		self.respond(op).await
	}

	async fn reorder_batch(&self, ops: &[Operation]) -> Result<Vec<CommitAck>, BatchRejection> {
		match self.batch_sync(ops) {
			Step::Done(result) => result,
			Step::Hang => std::future::pending().await,
		}
	}
}

//! Remote store API consumed by the coordinator.

pub mod memory;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tandem_primitives::{ActorId, Fields, Operation, OperationKind, ResourceKey, VersionMarker};
use thiserror::Error;

/// Successful commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitAck {
	pub key: ResourceKey,
	/// Canonical value after the write; `None` after a delete.
	pub canonical: Option<Fields>,
	pub version: VersionMarker,
}

/// Description of the write that moved the remote past a rejected baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteWrite {
	pub actor: ActorId,
	pub kind: OperationKind,
	pub changed: Fields,
	pub submitted_at: DateTime<Utc>,
}

/// Rejection returned by the remote store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RemoteError {
	#[error("transport error: {0}")]
	Network(String),

	#[error("commit timed out after {}ms", .0.as_millis())]
	Timeout(Duration),

	#[error("rejected by remote validation: {0}")]
	Validation(String),

	#[error("denied by remote: {0}")]
	Permission(String),

	/// Baseline is behind the remote head.
	#[error("version mismatch: remote is at {current}")]
	VersionMismatch {
		current: VersionMarker,
		last_write: RemoteWrite,
		canonical: Fields,
	},

	/// The resource was deleted remotely.
	#[error("resource deleted remotely at {current}")]
	Gone { current: VersionMarker, last_write: RemoteWrite },

	/// Position rejected because sibling order moved.
	#[error("order mismatch: remote is at {current}")]
	OrderMismatch {
		current: VersionMarker,
		last_write: RemoteWrite,
		canonical: Fields,
	},
}

/// Failure of a whole batch, with canonical values to refresh from.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{error}")]
pub struct BatchRejection {
	pub error: RemoteError,
	pub canonical: Vec<CommitAck>,
}

impl BatchRejection {
	pub fn new(error: RemoteError) -> Self {
		Self { error, canonical: Vec::new() }
	}
}

/// Request/response API of the canonical store.
///
/// Operations are passed whole so the baseline marker travels with them.
#[async_trait]
pub trait RemoteStore: Send + Sync {
	async fn create(&self, op: &Operation) -> Result<CommitAck, RemoteError>;
	async fn update(&self, op: &Operation) -> Result<CommitAck, RemoteError>;
	async fn delete(&self, op: &Operation) -> Result<CommitAck, RemoteError>;
	async fn reorder(&self, op: &Operation) -> Result<CommitAck, RemoteError>;

	/// Commits every reorder atomically.
	async fn reorder_batch(&self, ops: &[Operation]) -> Result<Vec<CommitAck>, BatchRejection>;
}

/// Dispatches `op` to the endpoint matching its kind.
pub async fn commit(remote: &dyn RemoteStore, op: &Operation) -> Result<CommitAck, RemoteError> {
	match op.kind {
		OperationKind::Create => remote.create(op).await,
		OperationKind::Update => remote.update(op).await,
		OperationKind::Delete => remote.delete(op).await,
		OperationKind::Reorder => remote.reorder(op).await,
	}
}

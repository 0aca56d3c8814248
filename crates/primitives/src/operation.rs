use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::fields::Fields;
use crate::ids::{ActorId, OperationId};
use crate::resource::ResourceKey;
use crate::version::VersionMarker;

/// Field carrying a resource's order index among its siblings.
pub const POSITION_FIELD: &str = "position";

/// Kind of edit intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
	Create,
	Update,
	Delete,
	Reorder,
}

impl OperationKind {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Create => "create",
			Self::Update => "update",
			Self::Delete => "delete",
			Self::Reorder => "reorder",
		}
	}
}

/// Edit intent against one resource.
///
/// Built by a caller, then finalized by the mutation coordinator, which stamps
/// the baseline version when the operation leaves the idle state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
	pub id: OperationId,
	pub key: ResourceKey,
	pub actor: ActorId,
	pub kind: OperationKind,
	pub payload: Fields,
	/// Last canonical marker observed for the resource when the operation started.
	pub baseline_version: Option<VersionMarker>,
	pub submitted_at: DateTime<Utc>,
}

impl Operation {
	pub fn new(kind: OperationKind, key: ResourceKey, actor: ActorId, payload: Fields, submitted_at: DateTime<Utc>) -> Self {
		Self {
			id: OperationId::new(),
			key,
			actor,
			kind,
			payload,
			baseline_version: None,
			submitted_at,
		}
	}

	pub fn create(key: ResourceKey, actor: ActorId, payload: Fields, at: DateTime<Utc>) -> Self {
		Self::new(OperationKind::Create, key, actor, payload, at)
	}

	pub fn update(key: ResourceKey, actor: ActorId, payload: Fields, at: DateTime<Utc>) -> Self {
		Self::new(OperationKind::Update, key, actor, payload, at)
	}

	pub fn delete(key: ResourceKey, actor: ActorId, at: DateTime<Utc>) -> Self {
		Self::new(OperationKind::Delete, key, actor, Fields::new(), at)
	}

	pub fn reorder(key: ResourceKey, actor: ActorId, position: u64, at: DateTime<Utc>) -> Self {
		Self::new(OperationKind::Reorder, key, actor, Fields::new().with(POSITION_FIELD, position), at)
	}

	/// Returns a copy stamped with the given baseline.
	pub fn with_baseline(mut self, baseline: Option<VersionMarker>) -> Self {
		self.baseline_version = baseline;
		self
	}

	/// Requested position for reorder payloads.
	pub fn position(&self) -> Option<u64> {
		self.payload.get(POSITION_FIELD).and_then(Value::as_u64)
	}

	/// Names of the fields this operation changes.
	pub fn changed_keys(&self) -> Vec<String> {
		self.payload.keys().map(str::to_string).collect()
	}

	/// Computes the value the resource takes once this operation is applied to `current`.
	///
	/// `None` means the resource is absent afterwards.
	pub fn apply_to(&self, current: Option<&Fields>) -> Option<Fields> {
		match self.kind {
			OperationKind::Create => Some(self.payload.clone()),
			OperationKind::Update | OperationKind::Reorder => {
				Some(current.map(|value| value.merged(&self.payload)).unwrap_or_else(|| self.payload.clone()))
			}
			OperationKind::Delete => None,
		}
	}
}

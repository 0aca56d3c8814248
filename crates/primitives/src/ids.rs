use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque actor identifier supplied by the identity provider.
///
/// Ordering is lexical and is used as the deterministic tie-break between
/// writes carrying the same timestamp.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActorId(pub String);

impl ActorId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ActorId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ActorId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for ActorId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Opaque identifier of a resource within its [`ResourceType`](crate::ResourceType).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub String);

impl ResourceId {
	pub fn new(id: impl Into<String>) -> Self {
		Self(id.into())
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ResourceId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl From<&str> for ResourceId {
	fn from(value: &str) -> Self {
		Self(value.to_string())
	}
}

impl From<String> for ResourceId {
	fn from(value: String) -> Self {
		Self(value)
	}
}

/// Unique identifier of a submitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OperationId(pub Uuid);

impl OperationId {
	/// Generates a fresh random identifier.
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for OperationId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for OperationId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

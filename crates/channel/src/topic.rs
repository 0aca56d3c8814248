use std::fmt;

use tandem_primitives::{ResourceKey, ResourceType};

/// Channel address.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Topic(String);

impl Topic {
	pub fn new(name: impl Into<String>) -> Self {
		Self(name.into())
	}

	/// Presence topic for one resource: `presence/<type>/<id>`.
	pub fn presence(key: &ResourceKey) -> Self {
		Self(format!("presence/{}/{}", key.kind, key.id))
	}

	/// Committed-mutation broadcast topic for one resource type.
	pub fn mutations(kind: ResourceType) -> Self {
		Self(format!("mutations/{kind}"))
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for Topic {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

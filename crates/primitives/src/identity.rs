use serde::{Deserialize, Serialize};

use crate::ids::ActorId;

/// Actor identity attached to operations and presence records.
///
/// Both fields are opaque to the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
	pub actor: ActorId,
	pub display_name: String,
}

impl Identity {
	pub fn new(actor: impl Into<ActorId>, display_name: impl Into<String>) -> Self {
		Self {
			actor: actor.into(),
			display_name: display_name.into(),
		}
	}
}

/// Source of the local actor's identity.
pub trait IdentityProvider: Send + Sync {
	fn identity(&self) -> Identity;
}

impl IdentityProvider for Identity {
	fn identity(&self) -> Identity {
		self.clone()
	}
}

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_primitives::{ActorId, ResourceKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceType {
	Viewing,
	Editing,
	Commenting,
}

impl PresenceType {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Viewing => "viewing",
			Self::Editing => "editing",
			Self::Commenting => "commenting",
		}
	}
}

impl fmt::Display for PresenceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One actor's liveness on a resource. At most one per actor and resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresenceRecord {
	pub key: ResourceKey,
	pub actor: ActorId,
	pub display_name: String,
	pub presence_type: PresenceType,
	/// Field being edited or commented on, if any.
	pub field: Option<String>,
	pub last_activity_at: DateTime<Utc>,
}

impl PresenceRecord {
	/// Same activity, ignoring the timestamp.
	pub(crate) fn same_activity(&self, other: &PresenceRecord) -> bool {
		self.presence_type == other.presence_type && self.field == other.field && self.display_name == other.display_name
	}
}

/// Typing indicator for one actor on one field.
///
/// `is_typing == false` is a live record ("stopped typing"), distinct from
/// having no record at all.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingRecord {
	pub key: ResourceKey,
	pub actor: ActorId,
	pub display_name: String,
	pub field: String,
	pub is_typing: bool,
	pub updated_at: DateTime<Utc>,
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tandem_primitives::{ActorId, ResourceKey};

use crate::record::{PresenceRecord, TypingRecord};

/// Envelope published on `presence/<type>/<id>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PresenceMessage {
	Announce(PresenceRecord),
	/// Renewal; also introduces the record to peers that missed the announce.
	Heartbeat(PresenceRecord),
	Withdraw {
		key: ResourceKey,
		actor: ActorId,
		at: DateTime<Utc>,
	},
	Typing(TypingRecord),
}

impl PresenceMessage {
	pub fn key(&self) -> &ResourceKey {
		match self {
			Self::Announce(record) | Self::Heartbeat(record) => &record.key,
			Self::Withdraw { key, .. } => key,
			Self::Typing(record) => &record.key,
		}
	}

	pub fn actor(&self) -> &ActorId {
		match self {
			Self::Announce(record) | Self::Heartbeat(record) => &record.actor,
			Self::Withdraw { actor, .. } => actor,
			Self::Typing(record) => &record.actor,
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Self::Announce(_) => "announce",
			Self::Heartbeat(_) => "heartbeat",
			Self::Withdraw { .. } => "withdraw",
			Self::Typing(_) => "typing",
		}
	}
}

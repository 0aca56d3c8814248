use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Presence freshness tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresenceConfig {
	/// Presence records older than this are swept.
	pub ttl_ms: u64,
	/// Typing records older than this are swept.
	pub typing_ttl_ms: u64,
	pub sweep_interval_ms: u64,
	/// Minimum spacing between published heartbeats for one resource.
	pub heartbeat_throttle_ms: u64,
}

impl Default for PresenceConfig {
	fn default() -> Self {
		Self {
			ttl_ms: 30_000,
			typing_ttl_ms: 5_000,
			sweep_interval_ms: 1_000,
			heartbeat_throttle_ms: 750,
		}
	}
}

impl PresenceConfig {
	pub fn ttl(&self) -> Duration {
		Duration::from_millis(self.ttl_ms)
	}

	pub fn typing_ttl(&self) -> Duration {
		Duration::from_millis(self.typing_ttl_ms)
	}

	pub fn sweep_interval(&self) -> Duration {
		Duration::from_millis(self.sweep_interval_ms)
	}

	pub fn heartbeat_throttle(&self) -> Duration {
		Duration::from_millis(self.heartbeat_throttle_ms)
	}
}

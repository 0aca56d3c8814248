//! Client configuration.
//!
//! Read from TOML; every key is optional and falls back to its default.
//!
//! ```toml
//! [sync]
//! history_limit = 50
//! debounce_ms = 300
//! commit_timeout_ms = 10000
//! auto_merge_disjoint = true
//!
//! [presence]
//! ttl_ms = 30000
//! typing_ttl_ms = 5000
//! sweep_interval_ms = 1000
//! heartbeat_throttle_ms = 750
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use tandem_presence::PresenceConfig;
use tandem_sync::SyncConfig;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ClientConfig {
	pub sync: SyncConfig,
	pub presence: PresenceConfig,
}

impl ClientConfig {
	pub fn parse(input: &str) -> Result<Self> {
		let config: Self = toml::from_str(input)?;
		config.validate()?;
		Ok(config)
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self> {
		let path = path.as_ref();
		let input = std::fs::read_to_string(path).map_err(|error| ConfigError::Io {
			path: path.to_path_buf(),
			error,
		})?;
		Self::parse(&input)
	}

	fn validate(&self) -> Result<()> {
		let zero = [
			("sync.history_limit", self.sync.history_limit == 0),
			("sync.commit_timeout_ms", self.sync.commit_timeout_ms == 0),
			("presence.ttl_ms", self.presence.ttl_ms == 0),
			("presence.typing_ttl_ms", self.presence.typing_ttl_ms == 0),
			("presence.sweep_interval_ms", self.presence.sweep_interval_ms == 0),
		];
		match zero.into_iter().find(|(_, is_zero)| *is_zero) {
			Some((key, _)) => Err(ConfigError::Invalid {
				key,
				reason: "must be greater than zero",
			}),
			None => Ok(()),
		}
	}
}

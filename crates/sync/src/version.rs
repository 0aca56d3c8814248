use std::collections::HashMap;

use tandem_primitives::{ResourceKey, VersionMarker};

/// Last canonical marker observed per resource.
///
/// Fed only from remote responses: commit acks, rejections, hydration and
/// remote broadcasts. Never advanced from local state. A committed delete
/// leaves its marker behind as a tombstone so older notices stay rejected.
#[derive(Debug, Default)]
pub struct VersionTracker {
	markers: HashMap<ResourceKey, VersionMarker>,
}

impl VersionTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records `marker` unless it is strictly older than the held one.
	///
	/// Returns whether the marker was accepted.
	pub fn observe(&mut self, key: &ResourceKey, marker: VersionMarker) -> bool {
		if let Some(held) = self.markers.get(key)
			&& marker.is_older_than(held)
		{
			tracing::debug!(%key, held = %held, observed = %marker, "sync.version.older_ignored");
			return false;
		}
		self.markers.insert(key.clone(), marker);
		true
	}

	/// Marker to stamp as the baseline of the next operation on `key`.
	pub fn baseline_for(&self, key: &ResourceKey) -> Option<&VersionMarker> {
		self.markers.get(key)
	}

	/// Returns true if `marker` strictly dominates the held marker, or none is held.
	pub fn is_newer(&self, key: &ResourceKey, marker: &VersionMarker) -> bool {
		self.markers.get(key).is_none_or(|held| marker.is_newer_than(held))
	}
}

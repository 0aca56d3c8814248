use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::ActorId;

/// Monotonic stamp attached by the remote store to every committed write.
///
/// Either a scalar counter or a per-actor vector of counters. Markers of
/// different shapes never compare as ordered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionMarker {
	Counter(u64),
	Vector(BTreeMap<ActorId, u64>),
}

impl VersionMarker {
	/// Partial order between two markers.
	///
	/// Vectors compare by pointwise dominance with absent actors counted as
	/// zero. Returns `None` for concurrent vectors or mismatched shapes.
	pub fn compare(&self, other: &VersionMarker) -> Option<Ordering> {
		match (self, other) {
			(Self::Counter(a), Self::Counter(b)) => Some(a.cmp(b)),
			(Self::Vector(a), Self::Vector(b)) => {
				let mut less = false;
				let mut greater = false;
				for actor in a.keys().chain(b.keys()) {
					let lhs = a.get(actor).copied().unwrap_or(0);
					let rhs = b.get(actor).copied().unwrap_or(0);
					match lhs.cmp(&rhs) {
						Ordering::Less => less = true,
						Ordering::Greater => greater = true,
						Ordering::Equal => {}
					}
				}
				match (less, greater) {
					(false, false) => Some(Ordering::Equal),
					(true, false) => Some(Ordering::Less),
					(false, true) => Some(Ordering::Greater),
					(true, true) => None,
				}
			}
			_ => None,
		}
	}

	/// Returns true when `self` strictly dominates `other`.
	pub fn is_newer_than(&self, other: &VersionMarker) -> bool {
		self.compare(other) == Some(Ordering::Greater)
	}

	/// Returns true when `self` is strictly dominated by `other`.
	pub fn is_older_than(&self, other: &VersionMarker) -> bool {
		self.compare(other) == Some(Ordering::Less)
	}

	/// Returns true if the remote has moved past `baseline`.
	///
	/// A missing baseline means the writer never observed the resource, so
	/// any existing marker counts as advanced. Concurrent markers also count:
	/// the baseline is no longer the remote's head.
	pub fn advanced_past(&self, baseline: Option<&VersionMarker>) -> bool {
		match baseline {
			None => true,
			Some(base) => !matches!(self.compare(base), Some(Ordering::Equal | Ordering::Less)),
		}
	}
}

impl fmt::Display for VersionMarker {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Counter(n) => write!(f, "v{n}"),
			Self::Vector(entries) => {
				f.write_str("{")?;
				for (i, (actor, n)) in entries.iter().enumerate() {
					if i > 0 {
						f.write_str(", ")?;
					}
					write!(f, "{actor}:{n}")?;
				}
				f.write_str("}")
			}
		}
	}
}

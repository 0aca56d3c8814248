use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Ordered field map forming a resource value or an operation payload.
///
/// Values are plain JSON; the core never interprets them beyond the
/// `position` field used by reorder operations.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fields(BTreeMap<String, Value>);

impl Fields {
	pub fn new() -> Self {
		Self::default()
	}

	/// Builder-style insert.
	pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
		self.0.insert(name.into(), value.into());
		self
	}

	pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
		self.0.insert(name.into(), value.into())
	}

	pub fn get(&self, name: &str) -> Option<&Value> {
		self.0.get(name)
	}

	pub fn contains(&self, name: &str) -> bool {
		self.0.contains_key(name)
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn keys(&self) -> impl Iterator<Item = &str> {
		self.0.keys().map(String::as_str)
	}

	pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
		self.0.iter().map(|(k, v)| (k.as_str(), v))
	}

	/// Overlays every field of `other` onto `self`; fields of `other` win.
	pub fn merge(&mut self, other: &Fields) {
		for (name, value) in &other.0 {
			self.0.insert(name.clone(), value.clone());
		}
	}

	/// Returns a copy of `self` with `other` merged on top.
	pub fn merged(&self, other: &Fields) -> Fields {
		let mut out = self.clone();
		out.merge(other);
		out
	}

	/// Field names present in both maps, in order.
	pub fn overlapping_keys(&self, other: &Fields) -> Vec<String> {
		self.0.keys().filter(|k| other.0.contains_key(*k)).cloned().collect()
	}

	/// Returns true when no field name appears in both maps.
	pub fn is_disjoint(&self, other: &Fields) -> bool {
		self.0.keys().all(|k| !other.0.contains_key(k))
	}
}

impl FromIterator<(String, Value)> for Fields {
	fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
		Self(iter.into_iter().collect())
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn merge_prefers_incoming_fields() {
		let mut base = Fields::new().with("title", "a").with("done", false);
		base.merge(&Fields::new().with("title", "b"));
		assert_eq!(base.get("title"), Some(&json!("b")));
		assert_eq!(base.get("done"), Some(&json!(false)));
	}

	#[test]
	fn overlap_and_disjointness_agree() {
		let left = Fields::new().with("title", "a").with("description", "x");
		let right = Fields::new().with("title", "b");
		let other = Fields::new().with("assignee", "y");

		assert_eq!(left.overlapping_keys(&right), vec!["title".to_string()]);
		assert!(!left.is_disjoint(&right));
		assert!(left.is_disjoint(&other));
		assert!(left.overlapping_keys(&other).is_empty());
	}
}

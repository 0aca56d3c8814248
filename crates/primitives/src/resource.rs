use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ids::ResourceId;

/// Kind of shared resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
	Task,
	Project,
	Comment,
}

impl ResourceType {
	/// All resource types, in declaration order.
	pub const ALL: [ResourceType; 3] = [Self::Task, Self::Project, Self::Comment];

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Task => "task",
			Self::Project => "project",
			Self::Comment => "comment",
		}
	}
}

impl fmt::Display for ResourceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Address of one resource: `(resourceType, resourceId)`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
	pub kind: ResourceType,
	pub id: ResourceId,
}

impl ResourceKey {
	pub fn new(kind: ResourceType, id: impl Into<ResourceId>) -> Self {
		Self { kind, id: id.into() }
	}

	pub fn task(id: &str) -> Self {
		Self::new(ResourceType::Task, id)
	}

	pub fn project(id: &str) -> Self {
		Self::new(ResourceType::Project, id)
	}

	pub fn comment(id: &str) -> Self {
		Self::new(ResourceType::Comment, id)
	}
}

impl fmt::Display for ResourceKey {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{} {}", self.kind, self.id)
	}
}

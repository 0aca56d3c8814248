/// Execution classes used for task observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Remote commit of an optimistic mutation, including its debounce window.
	Commit,
	/// Channel publish/unsubscribe work triggered by presence or broadcast.
	Channel,
	/// Periodic maintenance such as presence expiry sweeps.
	Maintenance,
}

impl TaskClass {
	pub(crate) const fn as_str(self) -> &'static str {
		match self {
			Self::Commit => "commit",
			Self::Channel => "channel",
			Self::Maintenance => "maintenance",
		}
	}
}

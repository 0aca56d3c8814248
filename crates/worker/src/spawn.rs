use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tokio::task::JoinHandle;
use tracing::Instrument;

use crate::TaskClass;

/// Runtime used when work is spawned from outside tokio, e.g. by a drop guard
/// running on a plain thread.
fn fallback() -> &'static Runtime {
	static FALLBACK: OnceLock<Runtime> = OnceLock::new();
	FALLBACK.get_or_init(|| {
		Builder::new_multi_thread()
			.worker_threads(1)
			.thread_name("tandem-worker")
			.enable_time()
			.build()
			.expect("tandem-worker fallback runtime")
	})
}

pub(crate) fn runtime_handle() -> Handle {
	Handle::try_current().unwrap_or_else(|_| fallback().handle().clone())
}

/// Spawns `fut` inside a span carrying its class.
pub fn spawn<F>(class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	let span = tracing::trace_span!("task", class = class.as_str());
	tracing::trace!(parent: &span, "worker.spawn");
	runtime_handle().spawn(fut.instrument(span))
}

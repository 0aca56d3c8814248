use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::spawn::runtime_handle;
use crate::{GenerationToken, TaskClass};

/// Handle to delayed work that can be cancelled before or while it runs.
///
/// Dropping the handle detaches the task; cancellation is always explicit.
#[derive(Debug)]
pub struct ScheduledTask {
	token: GenerationToken,
	handle: JoinHandle<()>,
}

impl ScheduledTask {
	pub fn generation(&self) -> u64 {
		self.token.generation()
	}

	/// Requests cancellation. Work that has not started is skipped; work in
	/// progress is dropped at its next suspension point.
	pub fn cancel(&self) {
		self.token.cancel();
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	pub fn is_finished(&self) -> bool {
		self.handle.is_finished()
	}
}

/// Runs `fut` after `delay` unless `token` is cancelled first.
pub fn schedule<F>(class: TaskClass, token: GenerationToken, delay: Duration, fut: F) -> ScheduledTask
where
	F: Future<Output = ()> + Send + 'static,
{
	let generation = token.generation();
	tracing::trace!(worker_class = class.as_str(), generation, delay_ms = delay.as_millis() as u64, "worker.schedule");

	let task_token = token.clone();
	let handle = runtime_handle().spawn(async move {
		tokio::select! {
			biased;
			_ = task_token.cancelled() => {
				tracing::trace!(worker_class = class.as_str(), generation, "worker.schedule.cancelled");
			}
			_ = async move {
				if !delay.is_zero() {
					tokio::time::sleep(delay).await;
				}
				fut.await;
			} => {}
		}
	});

	ScheduledTask { token, handle }
}

/// Calls `tick` every `period` until `cancel` fires.
///
/// The first tick happens one full period after spawning.
pub fn every<F>(class: TaskClass, period: Duration, cancel: CancellationToken, mut tick: F) -> JoinHandle<()>
where
	F: FnMut() + Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), period_ms = period.as_millis() as u64, "worker.every");
	runtime_handle().spawn(async move {
		let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
		interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				biased;
				_ = cancel.cancelled() => break,
				_ = interval.tick() => tick(),
			}
		}
	})
}

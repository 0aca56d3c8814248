//! Tracing setup.

use std::fs::OpenOptions;
use std::path::PathBuf;

use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

/// Filter directive variable, e.g. `TANDEM_LOG=tandem_sync=trace`.
pub const LOG_ENV: &str = "TANDEM_LOG";
/// When set, logs go to `<dir>/tandem.<pid>.log` instead of stderr.
pub const LOG_DIR_ENV: &str = "TANDEM_LOG_DIR";

fn filter(verbose: bool) -> EnvFilter {
	EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| {
		if verbose {
			EnvFilter::new("tandem_demo=debug,tandem_client=debug,tandem_sync=trace,tandem_presence=debug,info")
		} else {
			EnvFilter::new("tandem_demo=info,tandem_sync=info,tandem_presence=info,warn")
		}
	})
}

/// Installs the global subscriber. Later calls are no-ops.
pub fn init(verbose: bool) {
	if let Some(log_dir) = std::env::var_os(LOG_DIR_ENV).map(PathBuf::from)
		&& std::fs::create_dir_all(&log_dir).is_ok()
	{
		let log_path = log_dir.join(format!("tandem.{}.log", std::process::id()));
		if let Ok(file) = OpenOptions::new().create(true).append(true).open(&log_path) {
			let file_layer = tracing_subscriber::fmt::layer().with_writer(file).with_ansi(false).with_target(true);
			if tracing_subscriber::registry().with(filter(verbose)).with(file_layer).try_init().is_ok() {
				tracing::info!(path = ?log_path, "tandem.tracing.initialized");
			}
			return;
		}
	}

	let _ = tracing_subscriber::fmt().with_env_filter(filter(verbose)).with_writer(std::io::stderr).try_init();
}

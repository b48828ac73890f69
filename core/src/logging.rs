//! Tracing setup for binaries and tests embedding a workspace

use std::{fs, io, path::Path};

use tracing_appender::{
	non_blocking::WorkerGuard,
	rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::WorkspaceConfig;

const LOG_FILE_PREFIX: &str = "workspace.log";

/// Log to stdout and to a daily rolling file under the workspace `logs/` dir.
///
/// `RUST_LOG` takes precedence over the configured level. Only the first call
/// in a process installs the subscriber; later calls still return a guard for
/// their own file writer. Keep the guard alive for as long as logs should be
/// flushed to disk.
pub fn init_tracing(config: &WorkspaceConfig) -> io::Result<WorkerGuard> {
	init_tracing_in(&config.logs_dir(), &config.log_level)
}

pub fn init_tracing_in(logs_dir: &Path, default_level: &str) -> io::Result<WorkerGuard> {
	fs::create_dir_all(logs_dir)?;

	let file_appender = RollingFileAppender::new(Rotation::DAILY, logs_dir, LOG_FILE_PREFIX);
	let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	let installed = tracing_subscriber::registry()
		.with(env_filter)
		.with(
			fmt::layer()
				.with_target(true)
				.with_thread_ids(true)
				.with_writer(io::stdout),
		)
		.with(
			fmt::layer()
				.with_target(true)
				.with_thread_ids(true)
				.with_ansi(false)
				.with_writer(non_blocking),
		)
		.try_init()
		.is_ok();

	if installed {
		tracing::info!(logs_dir = %logs_dir.display(), "Tracing initialized");
	}

	Ok(guard)
}

//! Process-wide logging bootstrap (spec §4.7, ambient).
//!
//! Replaces the original's `logging.basicConfig` with an idiomatic
//! `tracing_subscriber::fmt` subscriber. Installed once from the CLI
//! entrypoint.

use tracing_subscriber::EnvFilter;

/// Installs a stdout `fmt` subscriber. `debug` raises the default level
/// from `info` to `debug`; `RUST_LOG` always takes precedence when set.
pub fn init(debug: bool) {
	let default_level = if debug { "debug" } else { "info" };
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

	let _ = tracing_subscriber::fmt()
		.with_env_filter(filter)
		.with_target(true)
		.try_init();
}

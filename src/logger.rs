//! A lightweight stderr logger, installed by both binaries at startup.
//!
//! Grounded directly on the teacher's `logger.rs`: a single `Log` impl writing level-prefixed
//! lines to stderr, no external formatting crate. Extended with an environment variable for
//! verbosity (the teacher's `logging.rs` reads `WAYLAND_DEBUG` the same way for its own,
//! protocol-specific trace channel; `TALLYMUX_LOG` plays the equivalent role here for the
//! standard `log` levels).

use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::Lazy;
use std::{
	env,
	io::{stderr, LineWriter, Stderr, Write as _},
	str::FromStr,
};

/// Read once, like the teacher's `WAYLAND_DEBUG` static: the env var never changes mid-run, so
/// there is no reason to re-parse it on every `enabled()` check.
static MAX_LEVEL: Lazy<LevelFilter> = Lazy::new(|| {
	if let Ok(val) = env::var("TALLYMUX_LOG") {
		if let Ok(level) = LevelFilter::from_str(&val) {
			return level;
		}
	}
	default_level()
});

pub fn init() {
	log::set_boxed_logger(Box::new(Logger(stderr()))).unwrap();
	log::set_max_level(*MAX_LEVEL);
}

#[cfg(debug_assertions)]
fn default_level() -> LevelFilter {
	LevelFilter::Debug
}
#[cfg(not(debug_assertions))]
fn default_level() -> LevelFilter {
	LevelFilter::Info
}

struct Logger(Stderr);

impl Log for Logger {
	fn enabled(&self, metadata: &Metadata) -> bool {
		metadata.level() <= log::max_level()
	}

	fn log(&self, record: &Record) {
		if !self.enabled(record.metadata()) {
			return;
		}
		let mut dest = LineWriter::new(self.0.lock());
		let _ = writeln!(dest, "[{level:>5}] {target}: {args}", level = record.level(), target = record.target(), args = record.args());
		let _ = dest.flush();
	}

	fn flush(&self) {
		let _ = (&self.0).flush();
	}
}

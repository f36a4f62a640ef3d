// SPDX-License-Identifier: MIT
//
// Log subscriber setup.
//
// The library only emits `tracing` events; installing a subscriber is the
// binary's call. Stdout is the terminal being drawn on, so logs go to a
// file or to stderr, never stdout. The filter comes from `N_TERM_LOG`
// (standard `EnvFilter` syntax, e.g. `n_term=debug`), defaulting to `warn`.
//
// Installing twice is harmless: the second call leaves the first
// subscriber in place.

use std::fs::{File, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Mutex;

use tracing_subscriber::EnvFilter;

/// Filter directive variable.
pub const LOG_ENV: &str = "N_TERM_LOG";
/// Log file variable read by the binary.
pub const LOG_FILE_ENV: &str = "N_TERM_LOG_FILE";

const DEFAULT_FILTER: &str = "warn";

fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Log to `path`, appending.
///
/// Returns `Ok(false)` when a subscriber was already installed.
///
/// # Errors
///
/// The file cannot be opened.
pub fn init_to_file(path: impl AsRef<Path>) -> io::Result<bool> {
    let file: File = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .is_ok())
}

/// Log to stderr. Useful when stdout is redirected away from the terminal.
pub fn init_stderr() -> bool {
    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(io::stderr)
        .try_init()
        .is_ok()
}

/// Route logs through the test harness's captured output.
pub fn init_for_tests() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_test_writer()
        .try_init();
}

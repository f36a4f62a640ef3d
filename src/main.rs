// SPDX-License-Identifier: MIT
//
// n-tui: interactive event viewer for the n-term engine.
//
// Drives the whole pipeline against the real terminal: raw input through
// the decoder, mouse gestures through the synthesizer, resize through
// SIGWINCH, device answers through the pending-request table, a repeating
// loop timer, and a background thread waking the loop through the self
// pipe. Everything the engine produces is listed on screen.
//
// Logging is off unless `N_TERM_LOG_FILE` names a file (stdout is the
// screen being drawn). `N_TERM_LOG` sets the filter.

#[cfg(unix)]
mod viewer;

use std::process::ExitCode;

#[cfg(unix)]
fn main() -> ExitCode {
    use std::sync::Arc;
    use std::sync::atomic::AtomicU64;

    use n_term::config::DriverConfig;
    use n_term::driver::Driver;
    use n_term::logging;
    use n_term::tty::TtyBackend;
    use tracing::error;

    use viewer::{Ticker, Viewer, WAKE_TICK};

    if let Ok(path) = std::env::var(logging::LOG_FILE_ENV) {
        if let Err(e) = logging::init_to_file(&path) {
            eprintln!("n-tui: cannot open log file {path}: {e}");
        }
    }

    let config = match DriverConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("n-tui: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut driver = match Driver::new(TtyBackend::new(&config), config) {
        Ok(driver) => driver,
        Err(e) => {
            eprintln!("n-tui: failed to initialize terminal: {e}");
            return ExitCode::FAILURE;
        }
    };

    let wakeups = Arc::new(AtomicU64::new(0));
    let mut ticker = match Ticker::spawn(driver.wake_handle(), Arc::clone(&wakeups), WAKE_TICK) {
        Ok(ticker) => ticker,
        Err(e) => {
            drop(driver);
            eprintln!("n-tui: cannot start ticker thread: {e}");
            return ExitCode::FAILURE;
        }
    };

    let result = driver.run(&mut Viewer::new(wakeups));
    ticker.stop();
    // Restore the terminal before anything is printed.
    let restored = driver.shutdown();
    drop(driver);

    match result.and(restored) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "viewer stopped");
            eprintln!("n-tui: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(not(unix))]
fn main() -> ExitCode {
    eprintln!("n-tui: only unix terminals are supported");
    ExitCode::FAILURE
}

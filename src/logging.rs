//! Logger setup
//!
//! On macOS all `log` records go to the Unified Logging System under
//! [`APP_SUBSYSTEM`]; view them with
//! `log stream --predicate 'subsystem == "ch.srgssr.osreinstaller"'`.
//! Elsewhere a `tracing-subscriber` formatter writes them to stderr, clearing
//! any progress line first.

use anyhow::Result;
use log::LevelFilter;

#[cfg(target_os = "macos")]
use crate::constants::APP_SUBSYSTEM;

/// Install the process-wide logger. Call once, early in `main`.
#[cfg(target_os = "macos")]
pub fn init_logger(level: LevelFilter) -> Result<()> {
    let logger = oslog::OsLogger::new(APP_SUBSYSTEM);
    log::set_boxed_logger(Box::new(logger))
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))?;
    log::set_max_level(level);
    Ok(())
}

/// Install the process-wide logger. Call once, early in `main`.
#[cfg(not(target_os = "macos"))]
pub fn init_logger(level: LevelFilter) -> Result<()> {
    use std::io::IsTerminal;
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(level.as_str().to_ascii_lowercase()))
        .with_writer(progress_aware_stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .without_time()
        .try_init()
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))?;
    // The log bridge opens the facade wide; narrow it back to what is shown
    log::set_max_level(level);
    Ok(())
}

/// Stderr, with the `\r` progress line erased so a record starts on a clean line
#[cfg(not(target_os = "macos"))]
fn progress_aware_stderr() -> std::io::Stderr {
    use std::io::{IsTerminal, Write};

    let mut stderr = std::io::stderr();
    if stderr.is_terminal() {
        let _ = stderr.write_all(b"\r\x1b[2K");
    }
    stderr
}

/// Level for the `--quiet` / `--verbose` flags
pub fn level_for(quiet: bool, verbose: bool) -> LevelFilter {
    if verbose {
        LevelFilter::Debug
    } else if quiet {
        LevelFilter::Warn
    } else {
        LevelFilter::Info
    }
}

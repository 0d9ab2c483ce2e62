//! Diagnostic logging setup.
//!
//! `RUST_LOG` wins when set; otherwise the default filter shows this crate's
//! info-level events. Interactive commands log to a file (or not at all) so
//! diagnostics never interleave with streamed replies.

use std::fs::{File, OpenOptions};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

pub const DEFAULT_FILTER: &str = "relaychat=info";

/// Where diagnostic output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget<'a> {
    Stderr,
    File(&'a Path),
    /// Only log when `RUST_LOG` asks for it, and then to stderr.
    Quiet,
}

fn filter_for(target: LogTarget<'_>) -> Option<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Some(filter),
        Err(_) if target == LogTarget::Quiet => None,
        Err(_) => Some(EnvFilter::new(DEFAULT_FILTER)),
    }
}

fn open_log_file(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Install the global subscriber. Calling this twice is harmless; the second
/// call leaves the first subscriber in place.
pub fn init(target: LogTarget<'_>) -> std::io::Result<()> {
    let Some(filter) = filter_for(target) else {
        return Ok(());
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match target {
        LogTarget::File(path) => {
            let file = open_log_file(path)?;
            builder
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .try_init()
                .ok();
        }
        LogTarget::Stderr | LogTarget::Quiet => {
            builder.with_writer(std::io::stderr).try_init().ok();
        }
    }
    Ok(())
}

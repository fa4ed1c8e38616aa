//! Log subscriber setup
//!
//! Stderr gets `RUST_LOG` (default `info`, `error` when silent) minus the
//! log-only UI records. The log file, if it can be opened, gets everything
//! at debug level.

use anyhow::{Context, Result};
use std::fs::File;
use std::sync::Mutex;
use tracing::warn;
use tracing_subscriber::filter::{FilterExt, filter_fn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::options::Options;
use crate::system::LOG_TARGET;

/// Open the configured log file, truncating it.
///
/// When it cannot be opened, logging to a file is switched off in `options`
/// so failure messages do not point at a file that was never written.
/// Returns the file and, on failure, the reason.
pub fn open_log_file(options: &mut Options) -> (Option<File>, Option<String>) {
    let Some(path) = &options.log_file else {
        return (None, None);
    };
    match File::create(path) {
        Ok(file) => (Some(file), None),
        Err(e) => {
            let reason = format!("Unable to open log file {}: {}", path.display(), e);
            options.log_file = None;
            (None, Some(reason))
        }
    }
}

/// Install the global subscriber. Stderr logging is set up even when the
/// log file is unavailable.
pub fn init(options: &mut Options) -> Result<()> {
    let default_level = if options.silent { "error" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(filter_fn(|meta| meta.target() != LOG_TARGET).and(env_filter));

    let (file, open_error) = open_log_file(options);
    let file_layer = file.map(|file| {
        fmt::layer()
            .with_writer(Mutex::new(file))
            .with_ansi(false)
            .with_filter(EnvFilter::new("drvinst=debug"))
    });

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to install the log subscriber")?;

    if let Some(reason) = open_error {
        warn!("{}; logging to stderr only", reason);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_unopenable_log_file_disables_file_logging() {
        let mut options = Options {
            log_file: Some(PathBuf::from("/nonexistent/dir/drvinst.log")),
            ..Options::default()
        };
        let (file, reason) = open_log_file(&mut options);

        assert!(file.is_none());
        assert!(reason.unwrap().contains("/nonexistent/dir/drvinst.log"));
        assert_eq!(options.log_file, None);
    }

    #[test]
    fn test_log_file_is_truncated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("drvinst.log");
        std::fs::write(&path, "previous run\n").unwrap();

        let mut options = Options {
            log_file: Some(path.clone()),
            ..Options::default()
        };
        let (file, reason) = open_log_file(&mut options);

        assert!(file.is_some());
        assert!(reason.is_none());
        assert_eq!(options.log_file, Some(path.clone()));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "");
    }

    #[test]
    fn test_logging_disabled() {
        let mut options = Options {
            log_file: None,
            ..Options::default()
        };
        assert!(matches!(open_log_file(&mut options), (None, None)));
    }
}

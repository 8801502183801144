//! Logging initialization.
//!
//! The engine logs through `tracing`; initialization installs a
//! `tracing-subscriber` formatter with an env-filter. `RUST_LOG` always wins
//! over the verbose flag.

use crate::errors::EngineError;
use std::fs::File;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Clone)]
struct SharedFile(Arc<File>);

impl Write for SharedFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        (&*self.0).write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        (&*self.0).flush()
    }
}

fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if verbose { "debug" } else { "info" }))
}

/// Installs a console subscriber. Safe to call more than once; later calls
/// are ignored.
pub fn init(verbose: bool) {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .try_init();
}

/// Installs a subscriber writing to a log file.
///
/// Fails only when the log file cannot be created; an already-installed
/// subscriber is left in place.
pub fn init_with_file(path: &Path, verbose: bool) -> Result<(), EngineError> {
    let file =
        File::create(path).map_err(|e| EngineError::io("create log file failed", e))?;
    let writer = SharedFile(Arc::new(file));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter(verbose))
        .with_ansi(false)
        .with_writer(move || writer.clone())
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_is_idempotent() {
        init(false);
        init(true);
    }

    #[test]
    fn test_init_with_file_creates_log() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("run.log");
        init_with_file(&path, true).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_init_with_file_bad_path_errors() {
        let result = init_with_file(Path::new("/nonexistent-dir/run.log"), false);
        assert!(result.is_err());
    }
}

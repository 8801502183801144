//! Remote-execution transport boundary.
//!
//! The engine never talks to machines directly. Actions receive a [`Runner`]
//! bound to one host, obtained from the runtime's [`Connector`]. Any error
//! returned across this boundary is treated as a retryable failure by the
//! task executor.

use crate::host::Host;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::Arc;

/// Opens sessions to hosts.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connects to a host and returns a runner bound to it.
    async fn connect(&self, host: &Host) -> anyhow::Result<Arc<dyn Runner>>;
}

/// Executes remote operations against the one host it is bound to.
///
/// Side effects are entirely on the remote host's filesystem and process
/// state.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs a command and returns its stdout.
    async fn run(&self, cmd: &str) -> anyhow::Result<String>;

    /// Runs a command with elevated privilege and returns its stdout.
    async fn sudo(&self, cmd: &str) -> anyhow::Result<String>;

    /// Copies a local file to a remote path.
    async fn copy(&self, local: &Path, remote: &str) -> anyhow::Result<()>;

    /// Checks whether a remote file exists.
    async fn file_exists(&self, path: &str) -> anyhow::Result<bool>;

    /// Returns the sha256 of a remote file, or `None` when it is absent.
    async fn file_sha256(&self, path: &str) -> anyhow::Result<Option<String>>;
}

/// Computes the sha256 of a local file, hex encoded.
pub fn local_file_sha256(path: &Path) -> anyhow::Result<String> {
    let bytes = std::fs::read(path)?;
    Ok(sha256_hex(&bytes))
}

/// Hex-encoded sha256 of a byte slice.
#[must_use]
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

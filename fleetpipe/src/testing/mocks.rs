//! Mock transport for testing.
//!
//! The mock gives every host an in-memory filesystem and scriptable command
//! responses, so engine behavior (retry, fan-out, cache flow) can be tested
//! without any real machine.

use crate::connector::{sha256_hex, Connector, Runner};
use crate::host::Host;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// A connector handing out one [`MockRunner`] per host name.
#[derive(Debug, Default)]
pub struct MockConnector {
    runners: RwLock<HashMap<String, Arc<MockRunner>>>,
}

impl MockConnector {
    /// Creates a new mock connector.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the runner for a host name, creating it when first asked.
    ///
    /// Tests use this to pre-seed remote files and script command responses
    /// before a pipeline runs.
    #[must_use]
    pub fn runner(&self, host_name: &str) -> Arc<MockRunner> {
        let mut runners = self.runners.write();
        Arc::clone(
            runners
                .entry(host_name.to_string())
                .or_insert_with(|| Arc::new(MockRunner::new(host_name))),
        )
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, host: &Host) -> anyhow::Result<Arc<dyn Runner>> {
        Ok(self.runner(host.name()) as Arc<dyn Runner>)
    }
}

/// A scriptable runner bound to one mock host.
#[derive(Debug)]
pub struct MockRunner {
    host: String,
    files: RwLock<HashMap<String, Vec<u8>>>,
    sticky: RwLock<HashMap<String, String>>,
    queued: RwLock<HashMap<String, VecDeque<String>>>,
    failures: RwLock<HashMap<String, u32>>,
    commands: RwLock<Vec<String>>,
    copies: AtomicUsize,
}

impl MockRunner {
    fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            files: RwLock::new(HashMap::new()),
            sticky: RwLock::new(HashMap::new()),
            queued: RwLock::new(HashMap::new()),
            failures: RwLock::new(HashMap::new()),
            commands: RwLock::new(Vec::new()),
            copies: AtomicUsize::new(0),
        }
    }

    /// Seeds a remote file.
    pub fn push_file(&self, path: impl Into<String>, content: Vec<u8>) {
        self.files.write().insert(path.into(), content);
    }

    /// Returns a remote file's content.
    #[must_use]
    pub fn file(&self, path: &str) -> Option<Vec<u8>> {
        self.files.read().get(path).cloned()
    }

    /// Returns a remote file's content as UTF-8.
    #[must_use]
    pub fn file_str(&self, path: &str) -> Option<String> {
        self.file(path)
            .map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Sets the sticky response for a command.
    pub fn on_command(&self, cmd: impl Into<String>, output: impl Into<String>) {
        self.sticky.write().insert(cmd.into(), output.into());
    }

    /// Queues responses for a command, consumed one per invocation before
    /// the sticky response applies. Useful for poll loops that must observe
    /// a condition becoming true.
    pub fn on_command_seq(
        &self,
        cmd: impl Into<String>,
        outputs: impl IntoIterator<Item = String>,
    ) {
        self.queued
            .write()
            .insert(cmd.into(), outputs.into_iter().collect());
    }

    /// Makes the next `times` invocations of a command fail.
    pub fn fail_times(&self, cmd: impl Into<String>, times: u32) {
        self.failures.write().insert(cmd.into(), times);
    }

    /// Returns every command run so far, sudo ones prefixed with `sudo `.
    #[must_use]
    pub fn commands(&self) -> Vec<String> {
        self.commands.read().clone()
    }

    /// Returns how many file transfers actually happened.
    #[must_use]
    pub fn copies(&self) -> usize {
        self.copies.load(Ordering::SeqCst)
    }

    fn resolve(&self, cmd: &str) -> anyhow::Result<String> {
        {
            let mut failures = self.failures.write();
            if let Some(remaining) = failures.get_mut(cmd) {
                if *remaining > 0 {
                    *remaining -= 1;
                    anyhow::bail!("[{}] command '{}' failed (scripted)", self.host, cmd);
                }
            }
        }
        if let Some(queue) = self.queued.write().get_mut(cmd) {
            if let Some(front) = queue.pop_front() {
                return Ok(front);
            }
        }
        Ok(self.sticky.read().get(cmd).cloned().unwrap_or_default())
    }
}

#[async_trait]
impl Runner for MockRunner {
    async fn run(&self, cmd: &str) -> anyhow::Result<String> {
        self.commands.write().push(cmd.to_string());
        self.resolve(cmd)
    }

    async fn sudo(&self, cmd: &str) -> anyhow::Result<String> {
        self.commands.write().push(format!("sudo {cmd}"));
        self.resolve(cmd)
    }

    async fn copy(&self, local: &Path, remote: &str) -> anyhow::Result<()> {
        let content = std::fs::read(local)?;
        self.files.write().insert(remote.to_string(), content);
        self.copies.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn file_exists(&self, path: &str) -> anyhow::Result<bool> {
        Ok(self.files.read().contains_key(path))
    }

    async fn file_sha256(&self, path: &str) -> anyhow::Result<Option<String>> {
        Ok(self.files.read().get(path).map(|c| sha256_hex(c)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn test_queued_responses_drain_before_sticky() {
        let connector = MockConnector::new();
        let runner = connector.runner("node1");
        runner.on_command("health", "cluster is healthy");
        runner.on_command_seq("health", vec!["unhealthy".to_string()]);

        assert_eq!(runner.run("health").await.unwrap(), "unhealthy");
        assert_eq!(runner.run("health").await.unwrap(), "cluster is healthy");
    }

    #[tokio::test]
    async fn test_fail_times_then_succeed() {
        let connector = MockConnector::new();
        let runner = connector.runner("node1");
        runner.fail_times("flaky", 2);

        assert!(runner.run("flaky").await.is_err());
        assert!(runner.run("flaky").await.is_err());
        assert!(runner.run("flaky").await.is_ok());
    }

    #[tokio::test]
    async fn test_runner_is_per_host() {
        let connector = MockConnector::new();
        connector.runner("node1").push_file("/etc/etcd.env", vec![1]);

        assert!(connector
            .runner("node1")
            .file_exists("/etc/etcd.env")
            .await
            .unwrap());
        assert!(!connector
            .runner("node2")
            .file_exists("/etc/etcd.env")
            .await
            .unwrap());
    }
}

//! Result status state machine and per-host error aggregation.
//!
//! A result's status is write-once-wins: once set to a terminal value it is
//! never silently overwritten by a later normal or skipped completion, but an
//! explicit error append always forces `Failed` regardless of the current
//! value.

use crate::errors::EngineError;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::fmt;

/// Terminal status of a task or module execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResultStatus {
    /// Execution has not resolved yet.
    #[default]
    Null,
    /// Every dispatched host succeeded.
    Success,
    /// At least one host recorded an error.
    Failed,
    /// Every host was gated out by its prepare predicate.
    Skipped,
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResultStatus::Null => "null",
            ResultStatus::Success => "success",
            ResultStatus::Failed => "failed",
            ResultStatus::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// An error recorded against one host.
#[derive(Debug)]
pub struct HostError {
    /// The host's name.
    pub host: String,
    /// What went wrong there.
    pub error: anyhow::Error,
}

#[derive(Debug)]
struct ResultInner {
    status: ResultStatus,
    errors: Vec<HostError>,
    start: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
}

impl ResultInner {
    fn new() -> Self {
        Self {
            status: ResultStatus::Null,
            errors: Vec::new(),
            start: Utc::now(),
            end: None,
        }
    }

    fn mark(&mut self, status: ResultStatus) {
        if self.status != ResultStatus::Null {
            return;
        }
        self.status = status;
        self.end = Some(Utc::now());
    }

    fn append_err(&mut self, host: impl Into<String>, error: anyhow::Error) {
        self.errors.push(HostError {
            host: host.into(),
            error,
        });
        self.status = ResultStatus::Failed;
        self.end = Some(Utc::now());
    }

    fn combine_err(&self) -> Option<EngineError> {
        if self.errors.is_empty() {
            return None;
        }
        let lines: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("failed: [{}] {:#}", e.host, e.error))
            .collect();
        Some(EngineError::Task(lines.join("\n")))
    }
}

/// The outcome of one task execution across its target hosts.
///
/// Multiple host workers append errors concurrently through internal locking;
/// the caller reads the result after [`Task::execute`](crate::task::Task::execute)
/// returns it by value, so a completed result can never receive late writes.
#[derive(Debug)]
pub struct TaskResult {
    inner: Mutex<ResultInner>,
}

impl TaskResult {
    /// Creates a result in the `Null` state with the start time set to now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ResultInner::new()),
        }
    }

    /// Marks the result successful, unless a terminal status is already set.
    pub fn mark_success(&self) {
        self.inner.lock().mark(ResultStatus::Success);
    }

    /// Marks the result skipped, unless a terminal status is already set.
    pub fn mark_skipped(&self) {
        self.inner.lock().mark(ResultStatus::Skipped);
    }

    /// Marks the result failed, unless a terminal status is already set.
    pub fn mark_failed(&self) {
        self.inner.lock().mark(ResultStatus::Failed);
    }

    /// Records a host error. Always forces `Failed`.
    pub fn append_err(&self, host: impl Into<String>, error: anyhow::Error) {
        self.inner.lock().append_err(host, error);
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ResultStatus {
        self.inner.lock().status
    }

    /// Returns true when any host recorded an error.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status() == ResultStatus::Failed
    }

    /// Returns true when every host was gated out.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.status() == ResultStatus::Skipped
    }

    /// Returns `(host, message)` pairs for every recorded error, in append
    /// order.
    #[must_use]
    pub fn errors(&self) -> Vec<(String, String)> {
        self.inner
            .lock()
            .errors
            .iter()
            .map(|e| (e.host.clone(), format!("{:#}", e.error)))
            .collect()
    }

    /// Renders one `failed: [<host>] <message>` line per recorded error,
    /// joined into a single error. Returns `None` when nothing failed.
    #[must_use]
    pub fn combine_err(&self) -> Option<EngineError> {
        self.inner.lock().combine_err()
    }

    /// Returns the start timestamp.
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.inner.lock().start
    }

    /// Returns the end timestamp, once a terminal status is set.
    #[must_use]
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().end
    }
}

impl Default for TaskResult {
    fn default() -> Self {
        Self::new()
    }
}

/// The outcome of one module execution, derived from its tasks' results.
#[derive(Debug)]
pub struct ModuleResult {
    inner: Mutex<ResultInner>,
}

impl ModuleResult {
    /// Creates a result in the `Null` state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ResultInner::new()),
        }
    }

    /// Marks the result successful, unless a terminal status is already set.
    pub fn mark_success(&self) {
        self.inner.lock().mark(ResultStatus::Success);
    }

    /// Marks the result skipped, unless a terminal status is already set.
    pub fn mark_skipped(&self) {
        self.inner.lock().mark(ResultStatus::Skipped);
    }

    /// Copies a failed task's host errors into this result, forcing `Failed`.
    pub fn absorb(&self, task_result: &TaskResult) {
        let mut inner = self.inner.lock();
        for (host, message) in task_result.errors() {
            inner.append_err(host, anyhow::anyhow!(message));
        }
    }

    /// Returns the current status.
    #[must_use]
    pub fn status(&self) -> ResultStatus {
        self.inner.lock().status
    }

    /// Returns true when any host error was absorbed.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status() == ResultStatus::Failed
    }

    /// Renders the combined error, as for [`TaskResult::combine_err`].
    #[must_use]
    pub fn combine_err(&self) -> Option<EngineError> {
        self.inner.lock().combine_err()
    }

    /// Returns the start timestamp.
    #[must_use]
    pub fn start_time(&self) -> DateTime<Utc> {
        self.inner.lock().start
    }

    /// Returns the end timestamp, once a terminal status is set.
    #[must_use]
    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().end
    }
}

impl Default for ModuleResult {
    fn default() -> Self {
        Self::new()
    }
}

//! The remote fan-out executor.
//!
//! A task binds a name, a target host subset, an action, an optional prepare
//! gate, a parallelism mode, and a retry count. `execute` resolves every
//! target host (success, exhausted retry, or gated out) before returning; a
//! failure on one host never cancels siblings already in flight, because many
//! actions must not be left half-applied across the fleet.

use crate::action::{Action, ActionContext};
use crate::host::Host;
use crate::module::ModuleContext;
use crate::prepare::{Prepare, PrepareContext};
use crate::results::TaskResult;
use futures::StreamExt;
use std::sync::Arc;

/// A named, host-scoped, potentially-parallel, retryable unit of action
/// dispatch.
pub struct Task {
    name: String,
    desc: String,
    hosts: Vec<Arc<Host>>,
    action: Arc<dyn Action>,
    prepare: Option<Arc<dyn Prepare>>,
    parallel: bool,
    retry: u32,
    concurrency: f64,
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("name", &self.name)
            .field("desc", &self.desc)
            .field("hosts", &self.hosts)
            .field("parallel", &self.parallel)
            .field("retry", &self.retry)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Task {
    /// Creates a sequential task with no prepare gate and a single attempt.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        hosts: Vec<Arc<Host>>,
        action: Arc<dyn Action>,
    ) -> Self {
        Self {
            name: name.into(),
            desc: String::new(),
            hosts,
            action,
            prepare: None,
            parallel: false,
            retry: 0,
            concurrency: 1.0,
        }
    }

    /// Sets the user-facing description.
    #[must_use]
    pub fn with_desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    /// Gates the task behind a prepare predicate, evaluated per host.
    #[must_use]
    pub fn with_prepare(mut self, prepare: Arc<dyn Prepare>) -> Self {
        self.prepare = Some(prepare);
        self
    }

    /// Dispatches hosts through a bounded worker pool instead of strictly in
    /// target-list order.
    #[must_use]
    pub fn parallel(mut self) -> Self {
        self.parallel = true;
        self
    }

    /// Sets the number of additional attempts per host; 0 means a single
    /// attempt. Retries are immediate.
    #[must_use]
    pub fn with_retry(mut self, retry: u32) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the parallel concurrency fraction in (0,1]. The worker pool size
    /// is `ceil(fraction * host_count)`, clamped to `[1, host_count]`.
    #[must_use]
    pub fn with_concurrency(mut self, fraction: f64) -> Self {
        self.concurrency = fraction;
        self
    }

    /// Returns the task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the user-facing description.
    #[must_use]
    pub fn desc(&self) -> &str {
        &self.desc
    }

    pub(crate) fn calculate_concurrency(&self, host_count: usize) -> usize {
        let limit = (self.concurrency * host_count as f64).ceil() as usize;
        limit.clamp(1, host_count.max(1))
    }

    /// Executes the action across the target hosts and returns the resolved
    /// result by value, so a completed result cannot receive late writes.
    pub async fn execute(&self, ctx: &ModuleContext) -> TaskResult {
        let result = TaskResult::new();

        if self.hosts.is_empty() {
            // a no-op task is not an error
            result.mark_success();
            return result;
        }

        let selected = self.gate_hosts(ctx, &result);

        if selected.is_empty() {
            if !result.is_failed() {
                result.mark_skipped();
            }
            return result;
        }

        if self.parallel {
            let limit = self.calculate_concurrency(selected.len());
            futures::stream::iter(selected)
                .for_each_concurrent(limit, |host| self.run_host(host, ctx, &result))
                .await;
        } else {
            for host in selected {
                self.run_host(host, ctx, &result).await;
            }
        }

        if !result.is_failed() {
            result.mark_success();
        }
        result
    }

    /// Evaluates the prepare gate per host. Gated hosts never see the action;
    /// a prepare error counts as that host's failure.
    fn gate_hosts(&self, ctx: &ModuleContext, result: &TaskResult) -> Vec<Arc<Host>> {
        let Some(prepare) = &self.prepare else {
            return self.hosts.clone();
        };

        let mut selected = Vec::with_capacity(self.hosts.len());
        for host in &self.hosts {
            let pctx = PrepareContext {
                host,
                runtime: &ctx.runtime,
                pipeline_cache: &ctx.pipeline_cache,
                module_cache: &ctx.module_cache,
            };
            match prepare.pre_check(&pctx) {
                Ok(true) => selected.push(Arc::clone(host)),
                Ok(false) => {
                    tracing::debug!(task = %self.name, host = host.name(), "host gated out");
                }
                Err(err) => {
                    result.append_err(host.name(), anyhow::Error::from(err));
                }
            }
        }
        selected
    }

    async fn run_host(&self, host: Arc<Host>, ctx: &ModuleContext, result: &TaskResult) {
        let attempts = self.retry + 1;
        let mut last_err: Option<anyhow::Error> = None;

        for attempt in 1..=attempts {
            match self.attempt_host(&host, ctx).await {
                Ok(()) => {
                    tracing::debug!(task = %self.name, host = host.name(), attempt, "host done");
                    return;
                }
                Err(err) => {
                    tracing::warn!(
                        task = %self.name,
                        host = host.name(),
                        attempt,
                        attempts,
                        error = %err,
                        "attempt failed"
                    );
                    last_err = Some(err);
                }
            }
        }

        // exactly one recorded error per exhausted host
        if let Some(err) = last_err {
            result.append_err(host.name(), err);
        }
    }

    async fn attempt_host(&self, host: &Arc<Host>, ctx: &ModuleContext) -> anyhow::Result<()> {
        let runner = ctx.runtime.connector().connect(host).await?;
        let actx = ActionContext {
            host: Arc::clone(host),
            runner,
            runtime: Arc::clone(&ctx.runtime),
            pipeline_cache: Arc::clone(&ctx.pipeline_cache),
            module_cache: Arc::clone(&ctx.module_cache),
            task_name: self.name.clone(),
        };
        self.action.execute(&actx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FnAction;
    use crate::prepare::{Condition, FirstHostOfRole};
    use crate::results::ResultStatus;
    use crate::testing::fixtures;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn concurrency_of(fraction: f64, host_count: usize) -> usize {
        let task = Task::new(
            "probe",
            Vec::new(),
            Arc::new(FnAction::new(|_| async { Ok(()) }.boxed())),
        )
        .with_concurrency(fraction);
        task.calculate_concurrency(host_count)
    }

    #[test]
    fn test_calculate_concurrency_table() {
        assert_eq!(concurrency_of(0.5, 3), 2);
        assert_eq!(concurrency_of(0.5, 4), 2);
        assert_eq!(concurrency_of(0.4, 4), 2);
        assert_eq!(concurrency_of(0.1, 4), 1);
        assert_eq!(concurrency_of(0.222_222_222, 4), 1);
        assert_eq!(concurrency_of(1.0, 4), 4);
    }

    #[tokio::test]
    async fn test_empty_host_list_is_success() {
        let (ctx, _connector) = fixtures::mock_module_context("test", Vec::new());
        let task = Task::new(
            "noop",
            Vec::new(),
            Arc::new(FnAction::new(|_| async { Ok(()) }.boxed())),
        );

        let result = task.execute(&ctx).await;
        assert_eq!(result.status(), ResultStatus::Success);
        assert!(result.errors().is_empty());
    }

    #[tokio::test]
    async fn test_all_hosts_gated_out_is_skipped_and_action_never_runs() {
        let hosts = vec![fixtures::etcd_host("node1", 1), fixtures::etcd_host("node2", 2)];
        let (ctx, _connector) = fixtures::mock_module_context("test", hosts);

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let task = Task::new(
            "gated",
            ctx.runtime.all_hosts(),
            Arc::new(FnAction::new(move |_| {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })),
        )
        .with_prepare(Arc::new(Condition::new(false)));

        let result = task.execute(&ctx).await;
        assert_eq!(result.status(), ResultStatus::Skipped);
        assert!(result.errors().is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_third_attempt() {
        let hosts = vec![fixtures::etcd_host("node1", 1)];
        let (ctx, connector) = fixtures::mock_module_context("test", hosts);
        connector.runner("node1").fail_times("flaky", 2);

        let task = Task::new(
            "retrying",
            ctx.runtime.all_hosts(),
            Arc::new(FnAction::new(|actx| {
                async move {
                    actx.runner.run("flaky").await?;
                    Ok(())
                }
                .boxed()
            })),
        )
        .with_retry(2);

        let result = task.execute(&ctx).await;
        assert_eq!(result.status(), ResultStatus::Success);
        assert!(result.errors().is_empty());
    }

    #[tokio::test]
    async fn test_retry_exhausted_records_exactly_one_error() {
        let hosts = vec![fixtures::etcd_host("node1", 1)];
        let (ctx, connector) = fixtures::mock_module_context("test", hosts);
        connector.runner("node1").fail_times("flaky", 3);

        let task = Task::new(
            "retrying",
            ctx.runtime.all_hosts(),
            Arc::new(FnAction::new(|actx| {
                async move {
                    actx.runner.run("flaky").await?;
                    Ok(())
                }
                .boxed()
            })),
        )
        .with_retry(2);

        let result = task.execute(&ctx).await;
        assert_eq!(result.status(), ResultStatus::Failed);
        assert_eq!(result.errors().len(), 1);
        assert_eq!(result.errors()[0].0, "node1");
    }

    #[tokio::test]
    async fn test_one_host_failure_does_not_cancel_siblings() {
        let hosts = vec![
            fixtures::etcd_host("node1", 1),
            fixtures::etcd_host("node2", 2),
            fixtures::etcd_host("node3", 3),
        ];
        let (ctx, connector) = fixtures::mock_module_context("test", hosts);
        connector.runner("node1").fail_times("step", 1);

        let completed = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&completed);
        let task = Task::new(
            "fanout",
            ctx.runtime.all_hosts(),
            Arc::new(FnAction::new(move |actx| {
                let counted = Arc::clone(&counted);
                async move {
                    actx.runner.run("step").await?;
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })),
        )
        .parallel()
        .with_concurrency(1.0);

        let result = task.execute(&ctx).await;
        assert_eq!(result.status(), ResultStatus::Failed);
        assert_eq!(result.errors().len(), 1);
        // the two healthy hosts still ran to completion
        assert_eq!(completed.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sequential_mode_preserves_host_order() {
        let hosts = vec![
            fixtures::etcd_host("node1", 1),
            fixtures::etcd_host("node2", 2),
            fixtures::etcd_host("node3", 3),
        ];
        let (ctx, _connector) = fixtures::mock_module_context("test", hosts);

        let order = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let recorded = Arc::clone(&order);
        let task = Task::new(
            "ordered",
            ctx.runtime.all_hosts(),
            Arc::new(FnAction::new(move |actx| {
                let recorded = Arc::clone(&recorded);
                async move {
                    recorded.lock().push(actx.host.name().to_string());
                    Ok(())
                }
                .boxed()
            })),
        );

        task.execute(&ctx).await;
        assert_eq!(*order.lock(), vec!["node1", "node2", "node3"]);
    }

    #[tokio::test]
    async fn test_parallel_in_flight_never_exceeds_limit() {
        let hosts = vec![
            fixtures::etcd_host("node1", 1),
            fixtures::etcd_host("node2", 2),
            fixtures::etcd_host("node3", 3),
            fixtures::etcd_host("node4", 4),
        ];
        let (ctx, _connector) = fixtures::mock_module_context("test", hosts);

        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let in_flight_c = Arc::clone(&in_flight);
        let peak_c = Arc::clone(&peak);

        let task = Task::new(
            "bounded",
            ctx.runtime.all_hosts(),
            Arc::new(FnAction::new(move |_| {
                let in_flight = Arc::clone(&in_flight_c);
                let peak = Arc::clone(&peak_c);
                async move {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    in_flight.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })),
        )
        .parallel()
        .with_concurrency(0.5);

        let result = task.execute(&ctx).await;
        assert_eq!(result.status(), ResultStatus::Success);
        let observed = peak.load(Ordering::SeqCst);
        assert!(observed >= 1 && observed <= 2, "peak was {observed}");
    }

    #[tokio::test]
    async fn test_prepare_error_is_recorded_against_the_host() {
        let hosts = vec![fixtures::etcd_host("node1", 1), fixtures::etcd_host("node2", 2)];
        let (ctx, _connector) = fixtures::mock_module_context("test", hosts);

        let task = Task::new(
            "needs-fact",
            ctx.runtime.all_hosts(),
            Arc::new(FnAction::new(|_| async { Ok(()) }.boxed())),
        )
        .with_prepare(Arc::new(crate::prepare::PipelineCacheBool::new("never-set")));

        let result = task.execute(&ctx).await;
        assert_eq!(result.status(), ResultStatus::Failed);
        assert_eq!(result.errors().len(), 2);
        assert!(result.errors()[0].1.contains("never-set"));
    }

    #[tokio::test]
    async fn test_first_host_gate_runs_action_once() {
        let hosts = vec![
            fixtures::etcd_host("node1", 1),
            fixtures::etcd_host("node2", 2),
            fixtures::etcd_host("node3", 3),
        ];
        let (ctx, _connector) = fixtures::mock_module_context("test", hosts);

        let calls = Arc::new(AtomicUsize::new(0));
        let counted = Arc::clone(&calls);
        let task = Task::new(
            "first-only",
            ctx.runtime.all_hosts(),
            Arc::new(FnAction::new(move |_| {
                let counted = Arc::clone(&counted);
                async move {
                    counted.fetch_add(1, Ordering::SeqCst);
                    Ok(())
                }
                .boxed()
            })),
        )
        .with_prepare(Arc::new(FirstHostOfRole::new(crate::host::Role::Etcd)));

        let result = task.execute(&ctx).await;
        assert_eq!(result.status(), ResultStatus::Success);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}

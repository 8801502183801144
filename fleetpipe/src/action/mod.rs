//! The unit of actual remote work a task performs per host.
//!
//! Actions operate against one host through the [`Runner`] bound to that
//! invocation. The engine treats any returned error as retryable; actions
//! that wait for a remote condition implement their own bounded poll loop
//! instead of relying on task-level retry.

mod command;
mod copy;

pub use command::Command;
pub use copy::Copy;

use crate::cache::Cache;
use crate::connector::Runner;
use crate::host::Host;
use crate::runtime::Runtime;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// Everything one action invocation sees: the bound host and runner, the
/// registry, the two shared caches, and the owning task's name.
#[derive(Clone)]
pub struct ActionContext {
    /// The host this invocation is bound to.
    pub host: Arc<Host>,
    /// The runner connected to that host.
    pub runner: Arc<dyn Runner>,
    /// The host registry.
    pub runtime: Arc<Runtime>,
    /// The run-wide cache, the only channel to later modules.
    pub pipeline_cache: Arc<Cache>,
    /// The current module's cache.
    pub module_cache: Arc<Cache>,
    /// The owning task's name, for logging.
    pub task_name: String,
}

/// A unit of remote work, executed once per target host that passes its
/// task's prepare gate.
#[async_trait]
pub trait Action: Send + Sync {
    /// Executes against the context's host.
    async fn execute(&self, ctx: &ActionContext) -> anyhow::Result<()>;
}

/// Adapts an async closure into an [`Action`].
///
/// This is how workflows express one-off steps without a dedicated type:
///
/// ```rust,ignore
/// use futures::FutureExt;
///
/// let probe = FnAction::new(|ctx| {
///     async move {
///         let exists = ctx.runner.file_exists("/etc/etcd.env").await?;
///         ctx.host.cache().set("etcd.node-exists", exists);
///         Ok(())
///     }
///     .boxed()
/// });
/// ```
pub struct FnAction<F>
where
    F: for<'a> Fn(&'a ActionContext) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync,
{
    func: F,
}

impl<F> FnAction<F>
where
    F: for<'a> Fn(&'a ActionContext) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync,
{
    /// Creates a closure-backed action.
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: for<'a> Fn(&'a ActionContext) -> BoxFuture<'a, anyhow::Result<()>> + Send + Sync,
{
    async fn execute(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        (self.func)(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::fixtures;
    use futures::FutureExt;

    #[tokio::test]
    async fn test_fn_action_sees_the_bound_host() {
        let (runtime, connector) = fixtures::mock_runtime("test", vec![fixtures::etcd_host("node1", 1)]);
        let host = runtime.all_hosts()[0].clone();
        let runner = connector.runner("node1");

        let ctx = ActionContext {
            host: Arc::clone(&host),
            runner,
            runtime,
            pipeline_cache: Arc::new(Cache::new()),
            module_cache: Arc::new(Cache::new()),
            task_name: "probe".to_string(),
        };

        let action = FnAction::new(|ctx| {
            async move {
                ctx.module_cache.set("seen", ctx.host.name());
                Ok(())
            }
            .boxed()
        });

        action.execute(&ctx).await.unwrap();
        assert_eq!(
            ctx.module_cache.get_as::<String>("seen").unwrap(),
            "node1"
        );
    }
}

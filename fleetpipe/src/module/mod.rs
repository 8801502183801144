//! Modules: ordered groups of tasks, one deployment phase each.
//!
//! A module's `plan` builds its task list immediately before execution. That
//! is where branching workflow logic lives — e.g. choosing the "new cluster"
//! or "existing cluster" task sequence from a fact in the pipeline cache. The
//! branch is decided once, synchronously, before any task runs.

use crate::cache::Cache;
use crate::errors::EngineError;
use crate::runtime::Runtime;
use crate::task::Task;
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;

/// How the pipeline dispatches a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// Runs its tasks synchronously; a failure aborts the pipeline.
    Task,
    /// Launched in the background; the pipeline does not wait for it.
    Server,
}

/// The shared context the engine injects into each module: the registry plus
/// the pipeline- and module-scoped caches.
///
/// The pipeline cache is the only legal channel for handing discovered facts
/// to a later module. The module cache is exclusively owned by the currently
/// running module and must not be referenced after the module resolves.
#[derive(Clone)]
pub struct ModuleContext {
    /// The host registry.
    pub runtime: Arc<Runtime>,
    /// The run-wide cache.
    pub pipeline_cache: Arc<Cache>,
    /// This module's scoped cache.
    pub module_cache: Arc<Cache>,
}

/// One deployment phase: either an ordered task list or a background server.
#[async_trait]
pub trait Module: Send + Sync {
    /// Returns the module name, used in error wrapping and logs.
    fn name(&self) -> &str;

    /// Returns how the pipeline dispatches this module.
    fn kind(&self) -> ModuleKind {
        ModuleKind::Task
    }

    /// Returns true when the pipeline should skip this module entirely: no
    /// cache acquired, no result recorded.
    fn is_skip(&self) -> bool {
        false
    }

    /// Module-specific precondition check; an error here is fatal to the
    /// pipeline.
    fn auto_assert(&self, _ctx: &ModuleContext) -> Result<(), EngineError> {
        Ok(())
    }

    /// Builds the ordered task list for this execution. May consult the
    /// pipeline cache to choose between alternative sequences.
    fn plan(&self, _ctx: &ModuleContext) -> Result<Vec<Task>, EngineError> {
        Ok(Vec::new())
    }

    /// Returns the user-facing announcement logged before the module runs.
    fn slogan(&self) -> Option<String> {
        None
    }

    /// The body of a [`ModuleKind::Server`] module. Task modules never call
    /// this.
    async fn serve(&self, _ctx: ModuleContext) {}
}

/// A task module configured with a planner closure.
///
/// Covers the common case where a phase is fully described by its task list
/// and needs no bespoke type.
pub struct TaskModule<F>
where
    F: Fn(&ModuleContext) -> Result<Vec<Task>, EngineError> + Send + Sync,
{
    name: String,
    slogan: Option<String>,
    skip: bool,
    planner: F,
}

impl<F> TaskModule<F>
where
    F: Fn(&ModuleContext) -> Result<Vec<Task>, EngineError> + Send + Sync,
{
    /// Creates a task module.
    pub fn new(name: impl Into<String>, planner: F) -> Self {
        Self {
            name: name.into(),
            slogan: None,
            skip: false,
            planner,
        }
    }

    /// Sets the user-facing announcement.
    #[must_use]
    pub fn with_slogan(mut self, slogan: impl Into<String>) -> Self {
        self.slogan = Some(slogan.into());
        self
    }

    /// Marks the module skipped for this run.
    #[must_use]
    pub fn skip(mut self, skip: bool) -> Self {
        self.skip = skip;
        self
    }
}

#[async_trait]
impl<F> Module for TaskModule<F>
where
    F: Fn(&ModuleContext) -> Result<Vec<Task>, EngineError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn is_skip(&self) -> bool {
        self.skip
    }

    fn plan(&self, ctx: &ModuleContext) -> Result<Vec<Task>, EngineError> {
        (self.planner)(ctx)
    }

    fn slogan(&self) -> Option<String> {
        self.slogan.clone()
    }
}

/// A background module configured with a serve closure.
///
/// Used for long-lived auxiliary processes that accompany a run, e.g. a local
/// status server. The pipeline spawns it and moves on.
pub struct ServerModule<F>
where
    F: Fn(ModuleContext) -> BoxFuture<'static, ()> + Send + Sync,
{
    name: String,
    func: F,
}

impl<F> ServerModule<F>
where
    F: Fn(ModuleContext) -> BoxFuture<'static, ()> + Send + Sync,
{
    /// Creates a server module.
    pub fn new(name: impl Into<String>, func: F) -> Self {
        Self {
            name: name.into(),
            func,
        }
    }
}

#[async_trait]
impl<F> Module for ServerModule<F>
where
    F: Fn(ModuleContext) -> BoxFuture<'static, ()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> ModuleKind {
        ModuleKind::Server
    }

    async fn serve(&self, ctx: ModuleContext) {
        (self.func)(ctx).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::FnAction;
    use crate::testing::fixtures;
    use futures::FutureExt;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_task_module_plans_from_context() {
        let (ctx, _connector) =
            fixtures::mock_module_context("test", vec![fixtures::etcd_host("node1", 1)]);
        ctx.pipeline_cache.set("cluster-exists", true);

        let module = TaskModule::new("Configure", |ctx: &ModuleContext| {
            let name = if ctx.pipeline_cache.get_bool("cluster-exists") == Some(true) {
                "join"
            } else {
                "bootstrap"
            };
            Ok(vec![Task::new(
                name,
                ctx.runtime.all_hosts(),
                Arc::new(FnAction::new(|_| async { Ok(()) }.boxed())),
            )])
        });

        let tasks = module.plan(&ctx).unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].name(), "join");
    }

    #[test]
    fn test_task_module_defaults() {
        let module = TaskModule::new("Phase", |_: &ModuleContext| Ok(Vec::new()));
        assert_eq!(module.kind(), ModuleKind::Task);
        assert!(!module.is_skip());
        assert!(module.slogan().is_none());
    }

    #[test]
    fn test_skip_flag() {
        let module = TaskModule::new("Phase", |_: &ModuleContext| Ok(Vec::new())).skip(true);
        assert!(module.is_skip());
    }

    #[tokio::test]
    async fn test_server_module_serves() {
        let (ctx, _connector) =
            fixtures::mock_module_context("test", vec![fixtures::etcd_host("node1", 1)]);

        let module = ServerModule::new("StatusServer", |ctx: ModuleContext| {
            async move {
                ctx.module_cache.set("served", true);
            }
            .boxed()
        });

        assert_eq!(module.kind(), ModuleKind::Server);
        let module_cache = Arc::clone(&ctx.module_cache);
        module.serve(ctx).await;
        assert_eq!(module_cache.get_bool("served"), Some(true));
    }
}

//! Top-level sequencing of modules for one workflow invocation.
//!
//! The pipeline runs its modules strictly in order. Any module failure
//! terminates the run immediately: later modules never start. There is no
//! checkpoint or resume across process restarts; re-runs are safe because
//! individual actions are idempotent, not because the pipeline keeps state.

use crate::cache::{Cache, CachePool};
use crate::errors::EngineError;
use crate::module::{Module, ModuleContext, ModuleKind};
use crate::results::ModuleResult;
use crate::runtime::Runtime;
use parking_lot::Mutex;
use std::sync::Arc;
use uuid::Uuid;

/// The ordered sequence of modules for one workflow invocation.
pub struct Pipeline {
    name: String,
    run_id: Uuid,
    runtime: Arc<Runtime>,
    modules: Vec<Arc<dyn Module>>,
    pipeline_cache: Arc<Cache>,
    module_cache_pool: CachePool,
    initialized: Mutex<bool>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    #[must_use]
    pub fn new(name: impl Into<String>, runtime: Arc<Runtime>) -> Self {
        Self {
            name: name.into(),
            run_id: Uuid::new_v4(),
            runtime,
            modules: Vec::new(),
            pipeline_cache: Arc::new(Cache::new()),
            module_cache_pool: CachePool::new(),
            initialized: Mutex::new(false),
        }
    }

    /// Appends a module to the ordered list.
    #[must_use]
    pub fn with_module(mut self, module: Arc<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    /// Returns the pipeline name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns this run's identifier.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns the run-wide cache.
    #[must_use]
    pub fn pipeline_cache(&self) -> Arc<Cache> {
        Arc::clone(&self.pipeline_cache)
    }

    /// Materializes the working directory and initializes the logger.
    ///
    /// Idempotent; `start` calls it when it has not run yet. Fatal on
    /// filesystem errors since no remote work can proceed without a workdir.
    pub fn init(&self) -> Result<(), EngineError> {
        let mut done = self.initialized.lock();
        if *done {
            return Ok(());
        }
        self.runtime.generate_work_dir()?;
        self.runtime.init_logger()?;
        *done = true;
        Ok(())
    }

    /// Runs the modules in order to completion or first fatal error.
    pub async fn start(&self) -> Result<(), EngineError> {
        self.init()
            .map_err(|e| EngineError::pipeline(&self.name, e))?;

        tracing::info!(pipeline = %self.name, run_id = %self.run_id, "pipeline started");

        for module in &self.modules {
            if module.is_skip() {
                tracing::info!(module = module.name(), "module skipped");
                continue;
            }
            self.run_module(module)
                .await
                .map_err(|e| EngineError::pipeline(&self.name, e))?;
        }

        tracing::info!(pipeline = %self.name, "pipeline execute successful");
        Ok(())
    }

    async fn run_module(&self, module: &Arc<dyn Module>) -> Result<(), EngineError> {
        let module_cache = self.module_cache_pool.acquire();
        let ctx = ModuleContext {
            runtime: Arc::clone(&self.runtime),
            pipeline_cache: Arc::clone(&self.pipeline_cache),
            module_cache: Arc::clone(&module_cache),
        };

        if let Err(err) = module.auto_assert(&ctx) {
            drop(ctx);
            self.module_cache_pool.release(module_cache);
            return Err(EngineError::module(module.name(), err));
        }

        match module.slogan() {
            Some(slogan) => tracing::info!(module = module.name(), "{slogan}"),
            None => tracing::info!(module = module.name(), "module started"),
        }

        match module.kind() {
            ModuleKind::Server => {
                // the spawned module keeps its cache; it never returns to
                // the pool
                let module = Arc::clone(module);
                tokio::spawn(async move {
                    module.serve(ctx).await;
                });
                Ok(())
            }
            ModuleKind::Task => {
                let outcome = self.run_tasks(module, &ctx).await;
                drop(ctx);
                self.module_cache_pool.release(module_cache);
                outcome.map_err(|e| EngineError::module(module.name(), e))
            }
        }
    }

    async fn run_tasks(
        &self,
        module: &Arc<dyn Module>,
        ctx: &ModuleContext,
    ) -> Result<(), EngineError> {
        let tasks = module.plan(ctx)?;
        let module_result = ModuleResult::new();

        for task in &tasks {
            tracing::info!(module = module.name(), task = task.name(), desc = task.desc(), "task started");
            let result = task.execute(ctx).await;
            tracing::info!(
                module = module.name(),
                task = task.name(),
                status = %result.status(),
                "task finished"
            );
            if result.is_failed() {
                module_result.absorb(&result);
                // the combined error always exists when the result failed
                let combined = module_result
                    .combine_err()
                    .unwrap_or_else(|| EngineError::Task(String::new()));
                return Err(combined);
            }
        }

        module_result.mark_success();
        tracing::debug!(
            module = module.name(),
            status = %module_result.status(),
            "module resolved"
        );
        Ok(())
    }
}

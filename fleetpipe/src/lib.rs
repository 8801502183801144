//! # Fleetpipe
//!
//! An orchestration engine for running staged operations across a fleet of
//! hosts.
//!
//! Fleetpipe structures multi-host work as a pipeline of modules:
//!
//! - **Pipeline**: the ordered sequence of modules for one invocation, with
//!   a run-wide cache and a pooled per-module scratch cache
//! - **Module**: one installation phase, planning its tasks from runtime
//!   facts at execution time
//! - **Task**: one operation fanned out across hosts, sequentially or with
//!   fractional concurrency, with per-host retry and prepare gating
//! - **Action**: the per-host payload, executed over a pluggable transport
//!
//! Facts discovered on one host flow to later work through caches, never
//! through shared mutable state in the modules themselves.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fleetpipe::prelude::*;
//!
//! let runtime = Arc::new(Runtime::new("my-cluster", connector));
//! runtime.append_host(host);
//!
//! let pipeline = Pipeline::new("BootstrapEtcdCluster", runtime)
//!     .with_module(Arc::new(PreCheckModule::new(settings.clone())))
//!     .with_module(Arc::new(CertsModule::new(settings.clone())))
//!     .with_module(Arc::new(ConfigureModule::new(settings)));
//!
//! pipeline.start().await?;
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod action;
pub mod cache;
pub mod connector;
pub mod errors;
pub mod host;
pub mod logging;
pub mod module;
pub mod pipeline;
pub mod prepare;
pub mod results;
pub mod runtime;
pub mod task;
pub mod testing;
pub mod workflows;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::action::{Action, ActionContext, Command, Copy, FnAction};
    pub use crate::cache::{Cache, CachePool};
    pub use crate::connector::{Connector, Runner};
    pub use crate::errors::EngineError;
    pub use crate::host::{Arch, Host, Role};
    pub use crate::module::{Module, ModuleContext, ModuleKind, ServerModule, TaskModule};
    pub use crate::pipeline::Pipeline;
    pub use crate::prepare::{
        CacheValueEq, Condition, FirstHostOfRole, HostCacheBool, OnlyRole, OnlyWorker,
        PipelineCacheBool, Prepare, PrepareCollection, PrepareContext,
    };
    pub use crate::results::{ModuleResult, ResultStatus, TaskResult};
    pub use crate::runtime::Runtime;
    pub use crate::task::Task;
    pub use crate::workflows::etcd::{
        CertsModule, ConfigureModule, EtcdSettings, PreCheckModule,
    };
}

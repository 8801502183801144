//! Composable boolean gates deciding whether a task runs on a host.
//!
//! Every variant carries a `not` flag that inverts its own result before
//! composition. Errors pass through inversion untouched: a cache-derived
//! predicate whose key was never populated fails with
//! [`EngineError::CacheMiss`] instead of silently returning false, so
//! "precondition false" stays distinguishable from "precondition
//! indeterminate".

use crate::cache::Cache;
use crate::errors::EngineError;
use crate::host::{Host, Role};
use crate::runtime::Runtime;
use serde_json::Value;
use std::sync::Arc;

/// Everything a predicate may consult: the candidate host, the registry, and
/// the pipeline/module caches.
pub struct PrepareContext<'a> {
    /// The host the task is about to run on.
    pub host: &'a Host,
    /// The host registry.
    pub runtime: &'a Runtime,
    /// The run-wide cache.
    pub pipeline_cache: &'a Cache,
    /// The current module's cache.
    pub module_cache: &'a Cache,
}

/// A boolean gate evaluated per host before a task's action is dispatched.
pub trait Prepare: Send + Sync {
    /// Returns whether the task should run on the context's host.
    fn pre_check(&self, ctx: &PrepareContext<'_>) -> Result<bool, EngineError>;
}

fn flip(value: bool, not: bool) -> bool {
    value != not
}

/// A static boolean condition decided at task-list construction time.
#[derive(Debug, Default)]
pub struct Condition {
    cond: bool,
    not: bool,
}

impl Condition {
    /// Creates a condition.
    #[must_use]
    pub fn new(cond: bool) -> Self {
        Self { cond, not: false }
    }

    /// Inverts the result.
    #[must_use]
    pub fn not(mut self) -> Self {
        self.not = true;
        self
    }
}

impl Prepare for Condition {
    fn pre_check(&self, _ctx: &PrepareContext<'_>) -> Result<bool, EngineError> {
        Ok(flip(self.cond, self.not))
    }
}

/// Passes only on the first host registered with a role.
///
/// Used for first-node-generates protocols, e.g. the first etcd node signs
/// the cluster certificates and the rest read them from the pipeline cache.
#[derive(Debug)]
pub struct FirstHostOfRole {
    role: Role,
    not: bool,
}

impl FirstHostOfRole {
    /// Creates the predicate for a role.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self { role, not: false }
    }

    /// Inverts the result.
    #[must_use]
    pub fn not(mut self) -> Self {
        self.not = true;
        self
    }
}

impl Prepare for FirstHostOfRole {
    fn pre_check(&self, ctx: &PrepareContext<'_>) -> Result<bool, EngineError> {
        let is_first = ctx
            .runtime
            .first_host_of_role(self.role)
            .is_some_and(|first| first.name() == ctx.host.name());
        Ok(flip(is_first, self.not))
    }
}

/// Passes when the host holds a role.
#[derive(Debug)]
pub struct OnlyRole {
    role: Role,
    not: bool,
}

impl OnlyRole {
    /// Creates the predicate for a role.
    #[must_use]
    pub fn new(role: Role) -> Self {
        Self { role, not: false }
    }

    /// Inverts the result.
    #[must_use]
    pub fn not(mut self) -> Self {
        self.not = true;
        self
    }
}

impl Prepare for OnlyRole {
    fn pre_check(&self, ctx: &PrepareContext<'_>) -> Result<bool, EngineError> {
        Ok(flip(ctx.host.has_role(self.role), self.not))
    }
}

/// Passes on pure workers: hosts holding the worker role but not master.
#[derive(Debug, Default)]
pub struct OnlyWorker {
    not: bool,
}

impl OnlyWorker {
    /// Creates the predicate.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inverts the result.
    #[must_use]
    pub fn not(mut self) -> Self {
        self.not = true;
        self
    }
}

impl Prepare for OnlyWorker {
    fn pre_check(&self, ctx: &PrepareContext<'_>) -> Result<bool, EngineError> {
        let is_worker = ctx.host.has_role(Role::Worker) && !ctx.host.has_role(Role::Master);
        Ok(flip(is_worker, self.not))
    }
}

/// Passes when a pipeline-cache boolean is true.
///
/// The key absent means a prior task never populated it, which is an error,
/// not a false.
#[derive(Debug)]
pub struct PipelineCacheBool {
    key: String,
    not: bool,
}

impl PipelineCacheBool {
    /// Creates the predicate for a key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            not: false,
        }
    }

    /// Inverts the result.
    #[must_use]
    pub fn not(mut self) -> Self {
        self.not = true;
        self
    }
}

impl Prepare for PipelineCacheBool {
    fn pre_check(&self, ctx: &PrepareContext<'_>) -> Result<bool, EngineError> {
        let value = ctx
            .pipeline_cache
            .get_bool(&self.key)
            .ok_or_else(|| EngineError::CacheMiss(self.key.clone()))?;
        Ok(flip(value, self.not))
    }
}

/// Passes when the host's own cache holds a true boolean under the key.
///
/// Used for host-local facts, e.g. "this node already runs etcd".
#[derive(Debug)]
pub struct HostCacheBool {
    key: String,
    not: bool,
}

impl HostCacheBool {
    /// Creates the predicate for a key.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            not: false,
        }
    }

    /// Inverts the result.
    #[must_use]
    pub fn not(mut self) -> Self {
        self.not = true;
        self
    }
}

impl Prepare for HostCacheBool {
    fn pre_check(&self, ctx: &PrepareContext<'_>) -> Result<bool, EngineError> {
        let value = ctx
            .host
            .cache()
            .get_bool(&self.key)
            .ok_or_else(|| EngineError::CacheMiss(self.key.clone()))?;
        Ok(flip(value, self.not))
    }
}

/// Passes when a pipeline-cache value equals an expected value, e.g. the
/// configured kubernetes distribution being `k3s`.
#[derive(Debug)]
pub struct CacheValueEq {
    key: String,
    expected: Value,
    not: bool,
}

impl CacheValueEq {
    /// Creates the predicate for a key and expected value.
    #[must_use]
    pub fn new(key: impl Into<String>, expected: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            expected: expected.into(),
            not: false,
        }
    }

    /// Inverts the result.
    #[must_use]
    pub fn not(mut self) -> Self {
        self.not = true;
        self
    }
}

impl Prepare for CacheValueEq {
    fn pre_check(&self, ctx: &PrepareContext<'_>) -> Result<bool, EngineError> {
        let value = ctx
            .pipeline_cache
            .get(&self.key)
            .ok_or_else(|| EngineError::CacheMiss(self.key.clone()))?;
        Ok(flip(value == self.expected, self.not))
    }
}

/// Logical AND over a sequence of predicates, short-circuiting on the first
/// false. A collection is itself a predicate and can be inverted like any
/// other.
#[derive(Default)]
pub struct PrepareCollection {
    items: Vec<Arc<dyn Prepare>>,
    not: bool,
}

impl PrepareCollection {
    /// Creates an empty collection, which passes.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a predicate.
    #[must_use]
    pub fn with(mut self, prepare: Arc<dyn Prepare>) -> Self {
        self.items.push(prepare);
        self
    }

    /// Inverts the combined result.
    #[must_use]
    pub fn not(mut self) -> Self {
        self.not = true;
        self
    }
}

impl Prepare for PrepareCollection {
    fn pre_check(&self, ctx: &PrepareContext<'_>) -> Result<bool, EngineError> {
        for item in &self.items {
            if !item.pre_check(ctx)? {
                return Ok(flip(false, self.not));
            }
        }
        Ok(flip(true, self.not))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::mocks::MockConnector;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        runtime: Runtime,
        pipeline_cache: Cache,
        module_cache: Cache,
    }

    impl Fixture {
        fn new() -> Self {
            let runtime = Runtime::new("test", Arc::new(MockConnector::new()));
            runtime.append_host(Arc::new(
                Host::new("node1", "10.0.0.1")
                    .with_role(Role::Master)
                    .with_role(Role::Etcd),
            ));
            runtime.append_host(Arc::new(
                Host::new("node2", "10.0.0.2")
                    .with_role(Role::Worker)
                    .with_role(Role::Etcd),
            ));
            Self {
                runtime,
                pipeline_cache: Cache::new(),
                module_cache: Cache::new(),
            }
        }

        fn ctx<'a>(&'a self, host: &'a Host) -> PrepareContext<'a> {
            PrepareContext {
                host,
                runtime: &self.runtime,
                pipeline_cache: &self.pipeline_cache,
                module_cache: &self.module_cache,
            }
        }

        fn host(&self, name: &str) -> Arc<Host> {
            self.runtime
                .all_hosts()
                .into_iter()
                .find(|h| h.name() == name)
                .unwrap()
        }
    }

    /// Counts evaluations so short-circuiting is observable.
    struct Counting {
        result: bool,
        calls: AtomicUsize,
    }

    impl Prepare for Counting {
        fn pre_check(&self, _ctx: &PrepareContext<'_>) -> Result<bool, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.result)
        }
    }

    #[test]
    fn test_condition_and_not() {
        let f = Fixture::new();
        let host = f.host("node1");
        assert!(Condition::new(true).pre_check(&f.ctx(&host)).unwrap());
        assert!(!Condition::new(true).not().pre_check(&f.ctx(&host)).unwrap());
        assert!(Condition::new(false).not().pre_check(&f.ctx(&host)).unwrap());
    }

    #[test]
    fn test_first_host_of_role() {
        let f = Fixture::new();
        let first = f.host("node1");
        let second = f.host("node2");

        let prepare = FirstHostOfRole::new(Role::Etcd);
        assert!(prepare.pre_check(&f.ctx(&first)).unwrap());
        assert!(!prepare.pre_check(&f.ctx(&second)).unwrap());

        let inverted = FirstHostOfRole::new(Role::Etcd).not();
        assert!(inverted.pre_check(&f.ctx(&second)).unwrap());
    }

    #[test]
    fn test_only_worker_excludes_masters() {
        let f = Fixture::new();
        let master = f.host("node1");
        let worker = f.host("node2");

        let prepare = OnlyWorker::new();
        assert!(!prepare.pre_check(&f.ctx(&master)).unwrap());
        assert!(prepare.pre_check(&f.ctx(&worker)).unwrap());
    }

    #[test]
    fn test_pipeline_cache_bool_missing_key_is_an_error() {
        let f = Fixture::new();
        let host = f.host("node1");

        let prepare = PipelineCacheBool::new("cluster-exists");
        let err = prepare.pre_check(&f.ctx(&host)).unwrap_err();
        assert!(matches!(err, EngineError::CacheMiss(key) if key == "cluster-exists"));

        // `not` must not mask the error either
        let inverted = PipelineCacheBool::new("cluster-exists").not();
        assert!(inverted.pre_check(&f.ctx(&host)).is_err());
    }

    #[test]
    fn test_pipeline_cache_bool_false_is_not_an_error() {
        let f = Fixture::new();
        let host = f.host("node1");
        f.pipeline_cache.set("cluster-exists", false);

        let prepare = PipelineCacheBool::new("cluster-exists");
        assert_eq!(prepare.pre_check(&f.ctx(&host)).unwrap(), false);

        let inverted = PipelineCacheBool::new("cluster-exists").not();
        assert_eq!(inverted.pre_check(&f.ctx(&host)).unwrap(), true);
    }

    #[test]
    fn test_host_cache_bool_reads_host_local_fact() {
        let f = Fixture::new();
        let host = f.host("node2");
        host.cache().set("etcd.node-exists", true);

        let prepare = HostCacheBool::new("etcd.node-exists");
        assert!(prepare.pre_check(&f.ctx(&host)).unwrap());

        let other = f.host("node1");
        assert!(prepare.pre_check(&f.ctx(&other)).is_err());
    }

    #[test]
    fn test_cache_value_eq() {
        let f = Fixture::new();
        let host = f.host("node1");
        f.pipeline_cache.set("kubernetes.type", json!("k3s"));

        assert!(CacheValueEq::new("kubernetes.type", "k3s")
            .pre_check(&f.ctx(&host))
            .unwrap());
        assert!(!CacheValueEq::new("kubernetes.type", "kubeadm")
            .pre_check(&f.ctx(&host))
            .unwrap());
    }

    #[test]
    fn test_collection_is_logical_and() {
        let f = Fixture::new();
        let host = f.host("node1");

        let both = PrepareCollection::new()
            .with(Arc::new(Condition::new(true)))
            .with(Arc::new(Condition::new(true)));
        assert!(both.pre_check(&f.ctx(&host)).unwrap());

        let one_false = PrepareCollection::new()
            .with(Arc::new(Condition::new(true)))
            .with(Arc::new(Condition::new(false)));
        assert!(!one_false.pre_check(&f.ctx(&host)).unwrap());
    }

    #[test]
    fn test_collection_short_circuits() {
        let f = Fixture::new();
        let host = f.host("node1");

        let tail = Arc::new(Counting {
            result: true,
            calls: AtomicUsize::new(0),
        });
        let collection = PrepareCollection::new()
            .with(Arc::new(Condition::new(false)))
            .with(Arc::clone(&tail) as Arc<dyn Prepare>);

        assert!(!collection.pre_check(&f.ctx(&host)).unwrap());
        assert_eq!(tail.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_collection_not_inverts_combined_result() {
        let f = Fixture::new();
        let host = f.host("node1");

        let collection = PrepareCollection::new()
            .with(Arc::new(Condition::new(true)))
            .with(Arc::new(Condition::new(false)))
            .not();
        assert!(collection.pre_check(&f.ctx(&host)).unwrap());
    }

    #[test]
    fn test_empty_collection_passes() {
        let f = Fixture::new();
        let host = f.host("node1");
        assert!(PrepareCollection::new().pre_check(&f.ctx(&host)).unwrap());
    }
}

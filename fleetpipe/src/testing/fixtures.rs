//! Test fixtures: hosts, runtimes, and module contexts backed by the mock
//! transport.

use super::mocks::MockConnector;
use crate::cache::Cache;
use crate::host::{Host, Role};
use crate::module::ModuleContext;
use crate::runtime::Runtime;
use std::sync::Arc;
use uuid::Uuid;

/// Builds a host tagged with the etcd role at `10.0.0.<octet>`.
#[must_use]
pub fn etcd_host(name: &str, octet: u8) -> Arc<Host> {
    Arc::new(
        Host::new(name, format!("10.0.0.{octet}"))
            .with_internal_address(format!("10.0.1.{octet}"))
            .with_role(Role::Etcd),
    )
}

/// Builds a host with an explicit role set.
#[must_use]
pub fn host_with_roles(name: &str, address: &str, roles: &[Role]) -> Arc<Host> {
    let mut host = Host::new(name, address);
    for role in roles {
        host = host.with_role(*role);
    }
    Arc::new(host)
}

/// Builds a runtime over the given hosts, backed by a fresh mock connector,
/// with its working directory rooted in a unique temp subdirectory.
#[must_use]
pub fn mock_runtime(name: &str, hosts: Vec<Arc<Host>>) -> (Arc<Runtime>, Arc<MockConnector>) {
    let connector = Arc::new(MockConnector::new());
    let base = std::env::temp_dir().join(format!("fleetpipe-{}", Uuid::new_v4()));
    let runtime = Runtime::new(name, Arc::clone(&connector) as _).with_base_dir(base);
    for host in hosts {
        runtime.append_host(host);
    }
    (Arc::new(runtime), connector)
}

/// As [`mock_runtime`], with the working directory already materialized.
#[must_use]
pub fn mock_runtime_with_workdir(
    name: &str,
    hosts: Vec<Arc<Host>>,
) -> (Arc<Runtime>, Arc<MockConnector>) {
    let (runtime, connector) = mock_runtime(name, hosts);
    // temp-dir creation only fails when the filesystem itself is broken
    if let Err(err) = runtime.generate_work_dir() {
        panic!("fixture work dir: {err}");
    }
    (runtime, connector)
}

/// Builds a module context with fresh caches over a mock runtime.
#[must_use]
pub fn mock_module_context(
    name: &str,
    hosts: Vec<Arc<Host>>,
) -> (ModuleContext, Arc<MockConnector>) {
    let (runtime, connector) = mock_runtime(name, hosts);
    let ctx = ModuleContext {
        runtime,
        pipeline_cache: Arc::new(Cache::new()),
        module_cache: Arc::new(Cache::new()),
    };
    (ctx, connector)
}

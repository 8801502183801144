//! Test support: the mock transport and common fixtures.

pub mod fixtures;
pub mod mocks;

pub use fixtures::{etcd_host, host_with_roles, mock_module_context, mock_runtime, mock_runtime_with_workdir};
pub use mocks::{MockConnector, MockRunner};

//! Host identity, roles, and the per-host cache.

use crate::cache::Cache;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// A label determining which tasks target a host.
///
/// A host can hold multiple roles simultaneously.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Control-plane node.
    Master,
    /// Workload node.
    Worker,
    /// Etcd cluster member.
    Etcd,
    /// Any node that runs kubernetes components.
    K8s,
    /// The machine driving the deployment.
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Role::Master => "master",
            Role::Worker => "worker",
            Role::Etcd => "etcd",
            Role::K8s => "k8s",
            Role::Client => "client",
        };
        f.write_str(s)
    }
}

/// CPU architecture of a managed machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    /// x86-64.
    #[default]
    Amd64,
    /// 64-bit ARM.
    Arm64,
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Arch::Amd64 => f.write_str("amd64"),
            Arch::Arm64 => f.write_str("arm64"),
        }
    }
}

/// One managed machine: identity, credentials, role tags, and a private
/// cache for host-local discovered facts.
///
/// Hosts are created once from configuration; role tags may be appended
/// afterwards. The host cache lives for the process lifetime.
#[derive(Debug)]
pub struct Host {
    name: String,
    address: String,
    internal_address: String,
    port: u16,
    user: String,
    password: Option<String>,
    private_key_path: Option<PathBuf>,
    arch: Arch,
    roles: RwLock<Vec<Role>>,
    cache: Cache,
}

impl Host {
    /// Creates a host with defaults: port 22, user `root`, amd64, internal
    /// address equal to the SSH address.
    #[must_use]
    pub fn new(name: impl Into<String>, address: impl Into<String>) -> Self {
        let address = address.into();
        Self {
            name: name.into(),
            internal_address: address.clone(),
            address,
            port: 22,
            user: "root".to_string(),
            password: None,
            private_key_path: None,
            arch: Arch::default(),
            roles: RwLock::new(Vec::new()),
            cache: Cache::new(),
        }
    }

    /// Sets the internal (cluster-facing) address.
    #[must_use]
    pub fn with_internal_address(mut self, address: impl Into<String>) -> Self {
        self.internal_address = address.into();
        self
    }

    /// Sets the SSH port.
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Sets the SSH user.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Sets the SSH password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Sets the private key path.
    #[must_use]
    pub fn with_private_key_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.private_key_path = Some(path.into());
        self
    }

    /// Sets the CPU architecture.
    #[must_use]
    pub fn with_arch(mut self, arch: Arch) -> Self {
        self.arch = arch;
        self
    }

    /// Adds a role tag.
    #[must_use]
    pub fn with_role(self, role: Role) -> Self {
        self.add_role(role);
        self
    }

    /// Returns the host name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the SSH address.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the internal address.
    #[must_use]
    pub fn internal_address(&self) -> &str {
        &self.internal_address
    }

    /// Returns the SSH port.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the SSH user.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// Returns the SSH password, if set.
    #[must_use]
    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Returns the private key path, if set.
    #[must_use]
    pub fn private_key_path(&self) -> Option<&PathBuf> {
        self.private_key_path.as_ref()
    }

    /// Returns the CPU architecture.
    #[must_use]
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Appends a role tag. Appending a role the host already holds is a
    /// no-op.
    pub fn add_role(&self, role: Role) {
        let mut roles = self.roles.write();
        if !roles.contains(&role) {
            roles.push(role);
        }
    }

    /// Returns true if the host holds the role.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        self.roles.read().contains(&role)
    }

    /// Returns a snapshot of the host's role tags.
    #[must_use]
    pub fn roles(&self) -> Vec<Role> {
        self.roles.read().clone()
    }

    /// Returns the private per-host cache.
    #[must_use]
    pub fn cache(&self) -> &Cache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_host_defaults() {
        let host = Host::new("node1", "192.168.1.10");
        assert_eq!(host.port(), 22);
        assert_eq!(host.user(), "root");
        assert_eq!(host.internal_address(), "192.168.1.10");
        assert_eq!(host.arch(), Arch::Amd64);
    }

    #[test]
    fn test_host_holds_multiple_roles() {
        let host = Host::new("node1", "192.168.1.10")
            .with_role(Role::Master)
            .with_role(Role::Etcd);

        assert!(host.has_role(Role::Master));
        assert!(host.has_role(Role::Etcd));
        assert!(!host.has_role(Role::Worker));
    }

    #[test]
    fn test_add_role_after_creation_deduplicates() {
        let host = Host::new("node1", "192.168.1.10").with_role(Role::Worker);
        host.add_role(Role::Worker);
        host.add_role(Role::K8s);

        assert_eq!(host.roles(), vec![Role::Worker, Role::K8s]);
    }

    #[test]
    fn test_host_cache_is_private_to_the_host() {
        let a = Host::new("a", "10.0.0.1");
        let b = Host::new("b", "10.0.0.2");

        a.cache().set("fact", true);
        assert_eq!(a.cache().get_bool("fact"), Some(true));
        assert_eq!(b.cache().get_bool("fact"), None);
    }

    #[test]
    fn test_role_display() {
        assert_eq!(Role::Etcd.to_string(), "etcd");
        assert_eq!(Arch::Arm64.to_string(), "arm64");
    }
}

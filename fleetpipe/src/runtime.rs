//! The host registry and per-run working directory.

use crate::connector::Connector;
use crate::errors::EngineError;
use crate::host::{Host, Role};
use crate::logging;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owns the full host list, the role index, the transport, and the working
/// directory layout for one invocation.
///
/// Invariant: every host in the role index also appears in the flat list and
/// vice versa. [`Runtime::append_host`] and [`Runtime::delete_host`] keep the
/// two consistent.
pub struct Runtime {
    name: String,
    connector: Arc<dyn Connector>,
    verbose: bool,
    base_dir: PathBuf,
    work_dir: RwLock<Option<PathBuf>>,
    hosts: RwLock<Vec<Arc<Host>>>,
    roles: RwLock<HashMap<Role, Vec<Arc<Host>>>>,
}

impl Runtime {
    /// Creates a runtime with the working directory rooted in the current
    /// directory.
    #[must_use]
    pub fn new(name: impl Into<String>, connector: Arc<dyn Connector>) -> Self {
        Self {
            name: name.into(),
            connector,
            verbose: false,
            base_dir: PathBuf::from("."),
            work_dir: RwLock::new(None),
            hosts: RwLock::new(Vec::new()),
            roles: RwLock::new(HashMap::new()),
        }
    }

    /// Sets the directory under which the working directory is created.
    #[must_use]
    pub fn with_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.base_dir = dir.into();
        self
    }

    /// Enables debug-level logging.
    #[must_use]
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Returns the runtime name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the transport.
    #[must_use]
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::clone(&self.connector)
    }

    /// Returns the verbose flag.
    #[must_use]
    pub fn verbose(&self) -> bool {
        self.verbose
    }

    /// Registers a host and indexes its current role tags.
    pub fn append_host(&self, host: Arc<Host>) {
        let mut roles = self.roles.write();
        for role in host.roles() {
            roles.entry(role).or_default().push(Arc::clone(&host));
        }
        self.hosts.write().push(host);
    }

    /// Appends a role to a registered host and keeps the index consistent.
    ///
    /// Returns false when no host with that name is registered.
    pub fn add_role(&self, host_name: &str, role: Role) -> bool {
        let host = {
            let hosts = self.hosts.read();
            match hosts.iter().find(|h| h.name() == host_name) {
                Some(h) => Arc::clone(h),
                None => return false,
            }
        };
        if !host.has_role(role) {
            host.add_role(role);
            self.roles.write().entry(role).or_default().push(host);
        }
        true
    }

    /// Removes a host from the flat list and every role bucket.
    ///
    /// Removing a host that is not present is a no-op.
    pub fn delete_host(&self, name: &str) {
        self.hosts.write().retain(|h| h.name() != name);
        let mut roles = self.roles.write();
        for bucket in roles.values_mut() {
            bucket.retain(|h| h.name() != name);
        }
    }

    /// Returns all registered hosts.
    #[must_use]
    pub fn all_hosts(&self) -> Vec<Arc<Host>> {
        self.hosts.read().clone()
    }

    /// Returns the hosts holding a role, in registration order.
    ///
    /// An unknown role yields an empty list, never an error.
    #[must_use]
    pub fn hosts_by_role(&self, role: Role) -> Vec<Arc<Host>> {
        self.roles.read().get(&role).cloned().unwrap_or_default()
    }

    /// Returns the first host registered with a role.
    #[must_use]
    pub fn first_host_of_role(&self, role: Role) -> Option<Arc<Host>> {
        self.roles
            .read()
            .get(&role)
            .and_then(|bucket| bucket.first().cloned())
    }

    /// Creates the working directory tree: the root, a `logs` subdirectory,
    /// and one subdirectory per currently-registered host.
    ///
    /// Idempotent; must run before the first remote operation. Filesystem
    /// errors are fatal and propagated.
    pub fn generate_work_dir(&self) -> Result<(), EngineError> {
        let root = self.base_dir.join(&self.name);
        std::fs::create_dir_all(&root)
            .map_err(|e| EngineError::io("create work dir failed", e))?;

        std::fs::create_dir_all(root.join("logs"))
            .map_err(|e| EngineError::io("create logs dir failed", e))?;

        for host in self.hosts.read().iter() {
            std::fs::create_dir_all(root.join(host.name()))
                .map_err(|e| EngineError::io("create host work dir failed", e))?;
        }

        *self.work_dir.write() = Some(root);
        Ok(())
    }

    /// Returns the working directory root, once generated.
    #[must_use]
    pub fn work_dir(&self) -> Option<PathBuf> {
        self.work_dir.read().clone()
    }

    /// Returns a host's subdirectory under the working directory.
    #[must_use]
    pub fn host_work_dir(&self, host: &Host) -> Option<PathBuf> {
        self.work_dir.read().as_ref().map(|d| d.join(host.name()))
    }

    /// Initializes file logging under the working directory's `logs`
    /// subdirectory, generating the working directory first when needed.
    pub fn init_logger(&self) -> Result<(), EngineError> {
        if self.work_dir.read().is_none() {
            self.generate_work_dir()?;
        }
        let log_file = {
            let guard = self.work_dir.read();
            // generate_work_dir above guarantees the path is set
            match guard.as_ref() {
                Some(dir) => dir.join("logs").join(format!("{}.log", self.name)),
                None => return Ok(()),
            }
        };
        logging::init_with_file(&log_file, self.verbose)
    }
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("name", &self.name)
            .field("hosts", &self.hosts.read().len())
            .field("work_dir", &*self.work_dir.read())
            .finish()
    }
}

/// Builds the work-dir path helper used by actions writing per-host
/// artifacts.
#[must_use]
pub fn host_artifact_path(work_dir: &Path, host: &Host, file: &str) -> PathBuf {
    work_dir.join(host.name()).join(file)
}

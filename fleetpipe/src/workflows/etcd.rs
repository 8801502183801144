//! Etcd cluster bootstrap, expressed as engine configuration.
//!
//! Three phases: a status probe discovering whether a cluster already
//! exists, certificate generation on the first etcd node with distribution
//! through the pipeline cache, and configuration — where the task sequence
//! is chosen in `plan` from the probe's pipeline-cache fact: a fresh cluster
//! bootstraps every node with state `new`, an existing cluster takes added
//! nodes through `member add`, restart, and a bounded health-check poll.
//!
//! Facts flow exclusively through the caches: the probe leaves a host-local
//! "this node already runs etcd" flag in each host cache, and the peer list,
//! cluster-exists flag, and certificate material in the pipeline cache.

use crate::action::{Action, ActionContext, Command, FnAction};
use crate::cache::Cache;
use crate::errors::EngineError;
use crate::host::{Host, Role};
use crate::module::{Module, ModuleContext};
use crate::prepare::HostCacheBool;
use crate::task::Task;
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Pipeline-cache key: does an etcd cluster already exist somewhere in the
/// fleet.
pub const CLUSTER_EXISTS_KEY: &str = "etcd.cluster-exists";
/// Pipeline-cache key: accumulating list of `name=https://addr:2380` peer
/// entries.
pub const PEERS_KEY: &str = "etcd.peers";
/// Pipeline-cache key: certificate material keyed by file name.
pub const CERTS_KEY: &str = "etcd.certs";
/// Host-cache key: this node already runs etcd.
pub const NODE_EXISTS_KEY: &str = "etcd.node-exists";

/// Tunables for the etcd workflow.
#[derive(Debug, Clone)]
pub struct EtcdSettings {
    /// Remote path of the etcd environment file.
    pub env_path: String,
    /// Remote directory holding the cluster certificates.
    pub cert_dir: String,
    /// Command probing cluster health.
    pub health_cmd: String,
    /// Poll attempts inside the health-check action.
    pub health_attempts: u32,
    /// Sleep between poll attempts.
    pub health_interval: Duration,
}

impl Default for EtcdSettings {
    fn default() -> Self {
        Self {
            env_path: "/etc/etcd.env".to_string(),
            cert_dir: "/etc/ssl/etcd/ssl".to_string(),
            health_cmd: "etcdctl endpoint health --cluster".to_string(),
            health_attempts: 20,
            health_interval: Duration::from_secs(5),
        }
    }
}

/// State written into `ETCD_INITIAL_CLUSTER_STATE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClusterState {
    New,
    Existing,
}

impl ClusterState {
    fn as_str(self) -> &'static str {
        match self {
            ClusterState::New => "new",
            ClusterState::Existing => "existing",
        }
    }
}

fn peer_entry(host: &Host) -> String {
    format!("{}=https://{}:2380", host.name(), host.internal_address())
}

fn append_peer(pipeline_cache: &Cache, entry: &str) -> Vec<String> {
    let mut peers: Vec<String> = pipeline_cache.get_as(PEERS_KEY).unwrap_or_default();
    if !peers.iter().any(|p| p == entry) {
        peers.push(entry.to_string());
        pipeline_cache.set(PEERS_KEY, serde_json::json!(peers));
    }
    peers
}

fn render_env(host: &Host, peers: &[String], state: ClusterState) -> String {
    format!(
        "ETCD_NAME={name}\n\
         ETCD_LISTEN_PEER_URLS=https://{addr}:2380\n\
         ETCD_LISTEN_CLIENT_URLS=https://{addr}:2379\n\
         ETCD_INITIAL_CLUSTER={peers}\n\
         ETCD_INITIAL_CLUSTER_STATE={state}\n",
        name = host.name(),
        addr = host.internal_address(),
        peers = peers.join(","),
        state = state.as_str(),
    )
}

/// Renders content into the host's work directory, then pushes it to the
/// remote path. Rendering locally keeps a copy of everything the run applied.
async fn push_text(ctx: &ActionContext, remote: &str, content: &str) -> anyhow::Result<()> {
    let dir = ctx
        .runtime
        .host_work_dir(&ctx.host)
        .ok_or_else(|| anyhow::anyhow!("work dir not generated"))?;
    let local = dir.join(remote.trim_start_matches('/').replace('/', "_"));
    std::fs::write(&local, content)?;
    ctx.runner.copy(&local, remote).await
}

fn probe_action(settings: &EtcdSettings) -> Arc<dyn Action> {
    let env_path = settings.env_path.clone();
    Arc::new(FnAction::new(move |ctx: &ActionContext| {
        let env_path = env_path.clone();
        async move {
            let exists = ctx.runner.file_exists(&env_path).await?;
            ctx.host.cache().set(NODE_EXISTS_KEY, exists);
            if exists {
                ctx.pipeline_cache.set(CLUSTER_EXISTS_KEY, true);
                append_peer(&ctx.pipeline_cache, &peer_entry(&ctx.host));
            } else if !ctx.pipeline_cache.contains_key(CLUSTER_EXISTS_KEY) {
                ctx.pipeline_cache.set(CLUSTER_EXISTS_KEY, false);
            }
            tracing::debug!(host = ctx.host.name(), exists, "etcd status probed");
            Ok(())
        }
        .boxed()
    }))
}

fn generate_certs_action(settings: &EtcdSettings) -> Arc<dyn Action> {
    let cert_dir = settings.cert_dir.clone();
    Arc::new(FnAction::new(move |ctx: &ActionContext| {
        let cert_dir = cert_dir.clone();
        async move {
            let members: Vec<String> = ctx
                .runtime
                .hosts_by_role(Role::Etcd)
                .iter()
                .map(|h| h.name().to_string())
                .collect();
            let fingerprint = crate::connector::sha256_hex(members.join(",").as_bytes());

            let mut certs = BTreeMap::new();
            for file in ["ca.pem", "admin.pem", "node.pem"] {
                certs.insert(
                    format!("{cert_dir}/{file}"),
                    format!(
                        "-----BEGIN CERTIFICATE-----\n{fingerprint}:{file}\n-----END CERTIFICATE-----\n"
                    ),
                );
            }
            for (path, content) in &certs {
                push_text(ctx, path, content).await?;
            }
            // the one write other nodes read; replaces any channel-based
            // handoff
            ctx.pipeline_cache.set(CERTS_KEY, serde_json::json!(certs));
            Ok(())
        }
        .boxed()
    }))
}

fn sync_certs_action() -> Arc<dyn Action> {
    Arc::new(FnAction::new(|ctx: &ActionContext| {
        async move {
            let certs: BTreeMap<String, String> = ctx
                .pipeline_cache
                .get_as(CERTS_KEY)
                .ok_or_else(|| anyhow::anyhow!("certs were never generated"))?;
            for (path, content) in &certs {
                push_text(ctx, path, content).await?;
            }
            Ok(())
        }
        .boxed()
    }))
}

fn generate_config_action(settings: &EtcdSettings, state: ClusterState) -> Arc<dyn Action> {
    let env_path = settings.env_path.clone();
    Arc::new(FnAction::new(move |ctx: &ActionContext| {
        let env_path = env_path.clone();
        async move {
            // sequential dispatch: each new node adds itself and sees every
            // peer configured before it
            let peers = append_peer(&ctx.pipeline_cache, &peer_entry(&ctx.host));
            let env = render_env(&ctx.host, &peers, state);
            push_text(ctx, &env_path, &env).await
        }
        .boxed()
    }))
}

fn refresh_config_action(settings: &EtcdSettings, state: ClusterState) -> Arc<dyn Action> {
    let env_path = settings.env_path.clone();
    Arc::new(FnAction::new(move |ctx: &ActionContext| {
        let env_path = env_path.clone();
        async move {
            let peers: Vec<String> = ctx
                .pipeline_cache
                .get_as(PEERS_KEY)
                .ok_or_else(|| anyhow::anyhow!("peer list was never populated"))?;
            let env = render_env(&ctx.host, &peers, state);
            push_text(ctx, &env_path, &env).await
        }
        .boxed()
    }))
}

fn join_member_action() -> Arc<dyn Action> {
    Arc::new(FnAction::new(|ctx: &ActionContext| {
        async move {
            let cmd = format!(
                "etcdctl member add {} --peer-urls=https://{}:2380",
                ctx.host.name(),
                ctx.host.internal_address()
            );
            ctx.runner.run(&cmd).await?;
            Ok(())
        }
        .boxed()
    }))
}

fn check_member_action() -> Arc<dyn Action> {
    Arc::new(FnAction::new(|ctx: &ActionContext| {
        async move {
            let output = ctx.runner.run("etcdctl member list").await?;
            if output.contains(ctx.host.name()) {
                Ok(())
            } else {
                anyhow::bail!("member '{}' not present in member list", ctx.host.name())
            }
        }
        .boxed()
    }))
}

/// A bounded poll loop, not task-level retry: the remote condition needs
/// time, not a fresh attempt at a failed call.
fn health_check_action(settings: &EtcdSettings) -> Arc<dyn Action> {
    let cmd = settings.health_cmd.clone();
    let attempts = settings.health_attempts;
    let interval = settings.health_interval;
    Arc::new(FnAction::new(move |ctx: &ActionContext| {
        let cmd = cmd.clone();
        async move {
            for attempt in 1..=attempts {
                match ctx.runner.run(&cmd).await {
                    Ok(output) if output.contains("healthy") => {
                        tracing::debug!(host = ctx.host.name(), attempt, "etcd healthy");
                        return Ok(());
                    }
                    Ok(output) => {
                        tracing::debug!(host = ctx.host.name(), attempt, %output, "etcd not ready");
                    }
                    Err(err) => {
                        tracing::debug!(host = ctx.host.name(), attempt, error = %err, "health probe failed");
                    }
                }
                if attempt < attempts {
                    tokio::time::sleep(interval).await;
                }
            }
            anyhow::bail!("etcd cluster not healthy after {attempts} attempts")
        }
        .boxed()
    }))
}

/// Probes every etcd node for an existing installation.
pub struct PreCheckModule {
    settings: EtcdSettings,
}

impl PreCheckModule {
    /// Creates the module.
    #[must_use]
    pub fn new(settings: EtcdSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Module for PreCheckModule {
    fn name(&self) -> &str {
        "EtcdPreCheck"
    }

    fn auto_assert(&self, ctx: &ModuleContext) -> Result<(), EngineError> {
        if ctx.runtime.hosts_by_role(Role::Etcd).is_empty() {
            return Err(EngineError::Precondition(
                "no hosts hold the etcd role".to_string(),
            ));
        }
        Ok(())
    }

    fn plan(&self, ctx: &ModuleContext) -> Result<Vec<Task>, EngineError> {
        // sequential so the peer list accumulates in registration order
        Ok(vec![Task::new(
            "GetEtcdStatus",
            ctx.runtime.hosts_by_role(Role::Etcd),
            probe_action(&self.settings),
        )
        .with_desc("Get etcd status")])
    }

    fn slogan(&self) -> Option<String> {
        Some("Probing etcd cluster status".to_string())
    }
}

/// Signs cluster certificates on the first etcd node and distributes them
/// through the pipeline cache.
pub struct CertsModule {
    settings: EtcdSettings,
}

impl CertsModule {
    /// Creates the module.
    #[must_use]
    pub fn new(settings: EtcdSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Module for CertsModule {
    fn name(&self) -> &str {
        "EtcdCerts"
    }

    fn plan(&self, ctx: &ModuleContext) -> Result<Vec<Task>, EngineError> {
        let etcd_hosts = ctx.runtime.hosts_by_role(Role::Etcd);
        let first = crate::prepare::FirstHostOfRole::new(Role::Etcd);
        let rest = crate::prepare::FirstHostOfRole::new(Role::Etcd).not();

        Ok(vec![
            Task::new(
                "GenerateCerts",
                etcd_hosts.clone(),
                generate_certs_action(&self.settings),
            )
            .with_desc("Generate certs on the first etcd node")
            .with_prepare(Arc::new(first))
            .parallel()
            .with_retry(1),
            Task::new("SyncCertsFile", etcd_hosts, sync_certs_action())
                .with_desc("Synchronize certs to the other etcd nodes")
                .with_prepare(Arc::new(rest))
                .parallel()
                .with_retry(1),
        ])
    }

    fn slogan(&self) -> Option<String> {
        Some("Signing etcd cluster certs".to_string())
    }
}

/// Configures and converges the etcd cluster.
///
/// The probe's pipeline-cache fact decides in `plan` whether this run
/// bootstraps a fresh cluster or joins new members into an existing one.
pub struct ConfigureModule {
    settings: EtcdSettings,
}

impl ConfigureModule {
    /// Creates the module.
    #[must_use]
    pub fn new(settings: EtcdSettings) -> Self {
        Self { settings }
    }

    fn new_cluster_tasks(&self, etcd_hosts: Vec<Arc<Host>>) -> Vec<Task> {
        let s = &self.settings;
        vec![
            Task::new(
                "ExistEtcdHealthCheck",
                etcd_hosts.clone(),
                health_check_action(s),
            )
            .with_desc("Health check on existing etcd nodes")
            .with_prepare(Arc::new(HostCacheBool::new(NODE_EXISTS_KEY)))
            .parallel(),
            Task::new(
                "GenerateEtcdConfig",
                etcd_hosts.clone(),
                generate_config_action(s, ClusterState::New),
            )
            .with_desc("Generate etcd.env on new etcd nodes")
            .with_prepare(Arc::new(HostCacheBool::new(NODE_EXISTS_KEY).not())),
            Task::new(
                "AllRefreshEtcdConfig",
                etcd_hosts.clone(),
                refresh_config_action(s, ClusterState::New),
            )
            .with_desc("Refresh etcd.env on all etcd nodes"),
            Task::new(
                "RestartEtcd",
                etcd_hosts.clone(),
                Arc::new(Command::new("systemctl restart etcd").sudo()),
            )
            .with_desc("Restart etcd")
            .with_prepare(Arc::new(HostCacheBool::new(NODE_EXISTS_KEY).not()))
            .parallel(),
            Task::new(
                "AllEtcdNodeHealthCheck",
                etcd_hosts.clone(),
                health_check_action(s),
            )
            .with_desc("Health check on all etcd nodes")
            .parallel(),
            Task::new(
                "RefreshEtcdConfigToExisting",
                etcd_hosts.clone(),
                refresh_config_action(s, ClusterState::Existing),
            )
            .with_desc("Refresh etcd.env to existing mode"),
            Task::new(
                "FinalEtcdHealthCheck",
                etcd_hosts,
                health_check_action(s),
            )
            .with_desc("Final health check on all etcd nodes")
            .parallel(),
        ]
    }

    fn existing_cluster_tasks(&self, etcd_hosts: Vec<Arc<Host>>) -> Vec<Task> {
        let s = &self.settings;
        let joined = || Arc::new(HostCacheBool::new(NODE_EXISTS_KEY));
        let added = || Arc::new(HostCacheBool::new(NODE_EXISTS_KEY).not());
        vec![
            Task::new(
                "ExistEtcdHealthCheck",
                etcd_hosts.clone(),
                health_check_action(s),
            )
            .with_desc("Health check on existing etcd nodes")
            .with_prepare(joined())
            .parallel(),
            Task::new(
                "GenerateEtcdConfig",
                etcd_hosts.clone(),
                generate_config_action(s, ClusterState::Existing),
            )
            .with_desc("Generate etcd.env on added etcd nodes")
            .with_prepare(added()),
            Task::new("JoinEtcdMember", etcd_hosts.clone(), join_member_action())
                .with_desc("Join added nodes as etcd members")
                .with_prepare(added()),
            Task::new(
                "RestartEtcd",
                etcd_hosts.clone(),
                Arc::new(Command::new("systemctl restart etcd").sudo()),
            )
            .with_desc("Restart etcd on added nodes")
            .with_prepare(added())
            .parallel(),
            Task::new(
                "NewEtcdNodeHealthCheck",
                etcd_hosts.clone(),
                health_check_action(s),
            )
            .with_desc("Health check on added etcd nodes")
            .with_prepare(added())
            .parallel(),
            Task::new("CheckEtcdMember", etcd_hosts.clone(), check_member_action())
                .with_desc("Verify added nodes appear in the member list")
                .with_prepare(added())
                .parallel(),
            Task::new(
                "AllRefreshEtcdConfig",
                etcd_hosts.clone(),
                refresh_config_action(s, ClusterState::Existing),
            )
            .with_desc("Refresh etcd.env on all etcd nodes"),
            Task::new(
                "FinalEtcdHealthCheck",
                etcd_hosts,
                health_check_action(s),
            )
            .with_desc("Final health check on all etcd nodes")
            .parallel(),
        ]
    }
}

#[async_trait]
impl Module for ConfigureModule {
    fn name(&self) -> &str {
        "EtcdConfigure"
    }

    fn plan(&self, ctx: &ModuleContext) -> Result<Vec<Task>, EngineError> {
        let exists = ctx
            .pipeline_cache
            .get_bool(CLUSTER_EXISTS_KEY)
            .ok_or_else(|| EngineError::CacheMiss(CLUSTER_EXISTS_KEY.to_string()))?;
        let etcd_hosts = ctx.runtime.hosts_by_role(Role::Etcd);

        if exists {
            Ok(self.existing_cluster_tasks(etcd_hosts))
        } else {
            Ok(self.new_cluster_tasks(etcd_hosts))
        }
    }

    fn slogan(&self) -> Option<String> {
        Some("Configuring etcd cluster".to_string())
    }
}

/// The full workflow in phase order.
#[must_use]
pub fn etcd_modules(settings: &EtcdSettings) -> Vec<Arc<dyn Module>> {
    vec![
        Arc::new(PreCheckModule::new(settings.clone())),
        Arc::new(CertsModule::new(settings.clone())),
        Arc::new(ConfigureModule::new(settings.clone())),
    ]
}

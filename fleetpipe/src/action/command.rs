//! Shell command action.

use super::{Action, ActionContext};
use async_trait::async_trait;

/// Runs a shell command on the bound host, optionally with elevated
/// privilege, optionally storing the trimmed stdout in the module cache.
pub struct Command {
    cmd: String,
    sudo: bool,
    output_key: Option<String>,
}

impl Command {
    /// Creates a command action.
    #[must_use]
    pub fn new(cmd: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            sudo: false,
            output_key: None,
        }
    }

    /// Runs the command with elevated privilege.
    #[must_use]
    pub fn sudo(mut self) -> Self {
        self.sudo = true;
        self
    }

    /// Stores the command's trimmed stdout in the module cache under the key.
    #[must_use]
    pub fn with_output_key(mut self, key: impl Into<String>) -> Self {
        self.output_key = Some(key.into());
        self
    }
}

#[async_trait]
impl Action for Command {
    async fn execute(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        let output = if self.sudo {
            ctx.runner.sudo(&self.cmd).await?
        } else {
            ctx.runner.run(&self.cmd).await?
        };
        tracing::debug!(
            host = ctx.host.name(),
            task = %ctx.task_name,
            cmd = %self.cmd,
            "command finished"
        );
        if let Some(key) = &self.output_key {
            ctx.module_cache.set(key.clone(), output.trim());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::Cache;
    use crate::testing::fixtures;
    use std::sync::Arc;

    fn ctx() -> (ActionContext, Arc<crate::testing::mocks::MockRunner>) {
        let (runtime, connector) =
            fixtures::mock_runtime("test", vec![fixtures::etcd_host("node1", 1)]);
        let host = runtime.all_hosts()[0].clone();
        let runner = connector.runner("node1");
        let ctx = ActionContext {
            host,
            runner: Arc::clone(&runner) as _,
            runtime,
            pipeline_cache: Arc::new(Cache::new()),
            module_cache: Arc::new(Cache::new()),
            task_name: "cmd".to_string(),
        };
        (ctx, runner)
    }

    #[tokio::test]
    async fn test_command_caches_trimmed_output() {
        let (ctx, runner) = ctx();
        runner.on_command("etcdctl member list", "  node1=started  \n");

        let action = Command::new("etcdctl member list").with_output_key("members");
        action.execute(&ctx).await.unwrap();

        assert_eq!(
            ctx.module_cache.get_as::<String>("members").unwrap(),
            "node1=started"
        );
    }

    #[tokio::test]
    async fn test_sudo_goes_through_the_privileged_path() {
        let (ctx, runner) = ctx();

        Command::new("systemctl restart etcd")
            .sudo()
            .execute(&ctx)
            .await
            .unwrap();

        assert_eq!(runner.commands(), vec!["sudo systemctl restart etcd"]);
    }

    #[tokio::test]
    async fn test_command_error_propagates() {
        let (ctx, runner) = ctx();
        runner.fail_times("bad", 1);

        let result = Command::new("bad").execute(&ctx).await;
        assert!(result.is_err());
    }
}

//! Local-to-remote file copy action.

use super::{Action, ActionContext};
use crate::connector::local_file_sha256;
use async_trait::async_trait;
use std::path::PathBuf;

/// Copies a local file to a remote path, skipping the transfer when the
/// remote file already has the same sha256. Skipping is what makes re-runs of
/// a failed pipeline cheap.
pub struct Copy {
    src: PathBuf,
    dest: String,
}

impl Copy {
    /// Creates a copy action.
    #[must_use]
    pub fn new(src: impl Into<PathBuf>, dest: impl Into<String>) -> Self {
        Self {
            src: src.into(),
            dest: dest.into(),
        }
    }
}

#[async_trait]
impl Action for Copy {
    async fn execute(&self, ctx: &ActionContext) -> anyhow::Result<()> {
        let local_sum = local_file_sha256(&self.src)?;
        if let Some(remote_sum) = ctx.runner.file_sha256(&self.dest).await? {
            if remote_sum == local_sum {
                tracing::debug!(
                    host = ctx.host.name(),
                    dest = %self.dest,
                    "remote file up to date, skipping copy"
                );
                return Ok(());
            }
        }
        ctx.runner.copy(&self.src, &self.dest).await?;
        tracing::debug!(
            host = ctx.host.name(),
            src = %self.src.display(),
            dest = %self.dest,
            "file copied"
        );
        Ok(())
    }
}

mod command;
mod options;
#[cfg(test)]
pub(crate) mod testing;

use std::path::Path;

use async_trait::async_trait;

pub use command::{CommandResult, ExecutionError, GitExecutor, RunOptions};
pub use options::{GitOptions, RetryPolicy};

/// Seam between resolution and the git executable.
#[async_trait]
pub trait GitCommand: Send + Sync {
    async fn run(
        &self,
        cwd: Option<&Path>,
        args: &[String],
        options: &RunOptions,
    ) -> Result<CommandResult, ExecutionError>;
}

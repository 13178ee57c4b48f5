mod cache;
mod git;
mod refs;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::{
    git::ExecutionError,
    model::{hosted::HostedGitDescriptor, resolved::ResolvedRef},
};

pub use cache::{CacheKey, CachingResolver};
pub use git::GitRefResolver;
pub use refs::{RefMatch, RemoteRefs};

#[async_trait]
pub trait RefResolver: Send + Sync {
    /// Pins the descriptor's committish to a full commit hash.
    async fn resolve(
        &self,
        descriptor: &HostedGitDescriptor,
    ) -> Result<ResolvedRef, ResolutionError> {
        self.resolve_with_cancel(descriptor, &CancellationToken::new())
            .await
    }

    /// Like [`RefResolver::resolve`]. Once `cancel` fires, running git
    /// processes are killed and the call returns [`ResolutionError::Cancelled`].
    async fn resolve_with_cancel(
        &self,
        descriptor: &HostedGitDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ResolvedRef, ResolutionError>;
}

#[derive(Error, Debug, Clone)]
pub enum ResolutionError {
    #[error("{}", not_found_message(url, committish.as_deref()))]
    NotFound {
        url: String,
        committish: Option<String>,
    },
    #[error("Ref {committish} is ambiguous in {url}, it matches {}", candidates.join(", "))]
    AmbiguousRef {
        url: String,
        committish: String,
        candidates: Vec<String>,
    },
    #[error("Could not reach {url} after {attempts} attempt(s): {message}")]
    NetworkError {
        url: String,
        message: String,
        attempts: u32,
    },
    #[error("Resolution was cancelled")]
    Cancelled,
    #[error(transparent)]
    Execution(Arc<ExecutionError>),
}

impl ResolutionError {
    /// Only connectivity failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ResolutionError::NetworkError { .. })
    }
}

impl From<ExecutionError> for ResolutionError {
    fn from(error: ExecutionError) -> Self {
        match error {
            ExecutionError::Cancelled { .. } => ResolutionError::Cancelled,
            error => ResolutionError::Execution(Arc::new(error)),
        }
    }
}

fn not_found_message(url: &str, committish: Option<&str>) -> String {
    match committish {
        Some(committish) => format!("No ref matching {committish} was found in {url}"),
        None => format!("Repository {url} was not found or is not accessible"),
    }
}

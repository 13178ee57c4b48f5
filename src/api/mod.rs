use futures::future::join_all;
use log::{debug, warn};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    git::{GitExecutor, GitOptions},
    model::{hosted::HostedGitDescriptor, resolved::ResolvedRef},
    resolver::{CachingResolver, GitRefResolver, RefResolver, ResolutionError},
};

mod builder;

pub use builder::{BuildError, GitSourceBuilder};

/// One resolution session: parsed specifiers are pinned to commits through a
/// shared cache until the session is dropped.
pub struct GitSource {
    resolver: CachingResolver<GitRefResolver<GitExecutor>>,
    options: GitOptions,
}

/// What became of one specifier in a batch.
#[derive(Debug, Clone)]
pub enum SourceOutcome {
    /// Not a git reference, left for other dependency kinds.
    NotGit,
    Resolved(ResolvedRef),
    Failed {
        descriptor: HostedGitDescriptor,
        error: ResolutionError,
    },
}

impl SourceOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, SourceOutcome::Failed { .. })
    }
}

/// Serializable summary of a [`SourceOutcome`].
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeReport {
    NotGit {
        specifier: String,
    },
    Resolved {
        specifier: String,
        #[serde(flatten)]
        resolved: ResolvedRef,
    },
    Failed {
        specifier: String,
        error: String,
        descriptor: HostedGitDescriptor,
    },
}

impl OutcomeReport {
    pub fn new(specifier: &str, outcome: SourceOutcome) -> OutcomeReport {
        let specifier = specifier.to_owned();
        match outcome {
            SourceOutcome::NotGit => OutcomeReport::NotGit { specifier },
            SourceOutcome::Resolved(resolved) => OutcomeReport::Resolved {
                specifier,
                resolved,
            },
            SourceOutcome::Failed { descriptor, error } => OutcomeReport::Failed {
                specifier,
                error: error.to_string(),
                descriptor,
            },
        }
    }
}

impl GitSource {
    pub fn builder() -> GitSourceBuilder {
        GitSourceBuilder::default()
    }

    pub fn options(&self) -> &GitOptions {
        &self.options
    }

    /// Parses a dependency specifier, `None` if it is not a git reference.
    pub fn parse(&self, specifier: &str) -> Option<HostedGitDescriptor> {
        HostedGitDescriptor::parse(specifier)
    }

    /// Pins the committish of `descriptor` to a full commit hash.
    pub async fn resolve(
        &self,
        descriptor: &HostedGitDescriptor,
    ) -> Result<ResolvedRef, ResolutionError> {
        self.resolver.resolve(descriptor).await
    }

    /// Like [`GitSource::resolve`], abandoning the resolution and killing any
    /// running git process once `cancel` fires.
    pub async fn resolve_with_cancel(
        &self,
        descriptor: &HostedGitDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ResolvedRef, ResolutionError> {
        if cancel.is_cancelled() {
            debug!("Resolution of {} was cancelled", descriptor);
            return Err(ResolutionError::Cancelled);
        }
        self.resolver.resolve_with_cancel(descriptor, cancel).await
    }

    pub async fn resolve_specifier(
        &self,
        specifier: &str,
        cancel: &CancellationToken,
    ) -> SourceOutcome {
        let Some(descriptor) = self.parse(specifier) else {
            debug!("{} is not a git reference", specifier);
            return SourceOutcome::NotGit;
        };
        match self.resolve_with_cancel(&descriptor, cancel).await {
            Ok(resolved) => SourceOutcome::Resolved(resolved),
            Err(error) => {
                warn!("Could not resolve {}: {}", specifier, error);
                SourceOutcome::Failed { descriptor, error }
            }
        }
    }

    /// Resolves every specifier concurrently. Outcomes are returned in input
    /// order and a failure never stops the other resolutions.
    pub async fn resolve_all<S: AsRef<str>>(
        &self,
        specifiers: &[S],
        cancel: &CancellationToken,
    ) -> Vec<SourceOutcome> {
        join_all(
            specifiers
                .iter()
                .map(|specifier| self.resolve_specifier(specifier.as_ref(), cancel)),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    fn source() -> GitSource {
        GitSource::builder()
            .ignore_environment()
            .git_path("/nonexistent/bin/git")
            .retries(0)
            .try_build()
            .unwrap()
    }

    #[tokio::test]
    async fn full_sha_resolves_without_git() {
        let sha = "0123456789abcdef0123456789abcdef01234567";
        let outcome = source()
            .resolve_specifier(&format!("github:foo/bar#{sha}"), &CancellationToken::new())
            .await;
        match outcome {
            SourceOutcome::Resolved(resolved) => assert_eq!(resolved.sha, sha),
            other => panic!("unexpected outcome {other:?}"),
        }
    }

    #[tokio::test]
    async fn batch_reports_each_specifier() {
        let sha = "0123456789abcdef0123456789abcdef01234567";
        let specifiers = [
            format!("foo/bar#{sha}"),
            "not-a-git-thing".to_owned(),
            "github:foo/bar#main".to_owned(),
        ];
        let outcomes = source()
            .resolve_all(&specifiers, &CancellationToken::new())
            .await;
        assert_eq!(outcomes.len(), 3);
        assert!(matches!(outcomes[0], SourceOutcome::Resolved(_)));
        assert!(matches!(outcomes[1], SourceOutcome::NotGit));
        assert!(outcomes[2].is_failure());
    }

    #[tokio::test]
    async fn cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = source();
        let descriptor = source.parse("github:foo/bar#main").unwrap();
        let result = source.resolve_with_cancel(&descriptor, &cancel).await;
        assert!(matches!(result, Err(ResolutionError::Cancelled)));
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn cancellation_stops_a_running_git() {
        use std::{os::unix::fs::PermissionsExt, time::Duration};

        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("git.pid");
        let script = dir.path().join("git");
        std::fs::write(
            &script,
            format!("#!/bin/sh\nsleep 30 &\necho $! > '{}'\nwait\n", pid_file.display()),
        )
        .unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let source = GitSource::builder()
            .ignore_environment()
            .git_path(&script)
            .retries(0)
            .try_build()
            .unwrap();
        let descriptor = source.parse("github:foo/bar#main").unwrap();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        let (result, ()) = tokio::join!(
            source.resolve_with_cancel(&descriptor, &cancel),
            async move {
                tokio::time::sleep(Duration::from_millis(500)).await;
                trigger.cancel();
            }
        );
        assert!(matches!(result, Err(ResolutionError::Cancelled)), "{result:?}");

        let helper = std::fs::read_to_string(&pid_file).unwrap();
        let stat = format!("/proc/{}/stat", helper.trim());
        for _ in 0..100 {
            // A zombie has exited, it only waits for its parent to reap it.
            let running = std::fs::read_to_string(&stat).is_ok_and(|stat| {
                !stat
                    .rsplit(')')
                    .next()
                    .is_some_and(|rest| rest.trim_start().starts_with('Z'))
            });
            if !running {
                return;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("git helper {} is still running", helper.trim());
    }

    #[test]
    fn report_serializes_as_toml() {
        let outcome = SourceOutcome::NotGit;
        let report = OutcomeReport::new("left-pad@1.0.0", outcome);
        assert_eq!(
            toml::to_string(&report).unwrap(),
            "status = \"not_git\"\nspecifier = \"left-pad@1.0.0\"\n"
        );
    }
}

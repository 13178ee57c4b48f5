use std::sync::OnceLock;

use async_trait::async_trait;
use log::{debug, info, warn};
use regex_lite::Regex;
use tokio_util::sync::CancellationToken;

use crate::{
    git::{ExecutionError, GitCommand, GitOptions, RunOptions},
    model::{
        hosted::HostedGitDescriptor,
        resolved::{is_full_sha, ResolvedRef},
    },
};

use super::{RefMatch, RefResolver, RemoteRefs, ResolutionError};

/// Resolves committishes by listing the refs of the remote with `git ls-remote`.
pub struct GitRefResolver<G> {
    git: G,
    options: GitOptions,
}

impl<G: GitCommand> GitRefResolver<G> {
    pub fn new(git: G, options: GitOptions) -> Self {
        GitRefResolver { git, options }
    }

    pub fn git(&self) -> &G {
        &self.git
    }

    pub fn options(&self) -> &GitOptions {
        &self.options
    }

    /// Lists remote refs, retrying connectivity failures with backoff.
    pub async fn ls_remote(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteRefs, ResolutionError> {
        let retry = self.options.retry;
        let mut attempt = 0;
        loop {
            match self.ls_remote_once(url, cancel).await {
                Err(error) if error.is_retryable() && attempt < retry.retries => {
                    let delay = retry.backoff(attempt);
                    warn!(
                        "Listing refs of {} failed, retrying in {:?}: {}",
                        url, delay, error
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = cancel.cancelled() => return Err(ResolutionError::Cancelled),
                    }
                    attempt += 1;
                }
                Err(ResolutionError::NetworkError { url, message, .. }) => {
                    return Err(ResolutionError::NetworkError {
                        url,
                        message,
                        attempts: attempt + 1,
                    })
                }
                result => return result,
            }
        }
    }

    async fn ls_remote_once(
        &self,
        url: &str,
        cancel: &CancellationToken,
    ) -> Result<RemoteRefs, ResolutionError> {
        let args = ["ls-remote".to_owned(), "--".to_owned(), url.to_owned()];
        let options = RunOptions::from(&self.options).with_cancel(cancel.clone());
        match self.git.run(None, &args, &options).await {
            Ok(output) => {
                let refs = RemoteRefs::parse(&output.stdout);
                debug!("{} advertises {} refs", url, refs.len());
                Ok(refs)
            }
            Err(error) => Err(classify(url, error)),
        }
    }
}

#[async_trait]
impl<G: GitCommand> RefResolver for GitRefResolver<G> {
    async fn resolve_with_cancel(
        &self,
        descriptor: &HostedGitDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ResolvedRef, ResolutionError> {
        let committish = descriptor.committish_or_head();
        if is_full_sha(committish) {
            debug!("{} is already a commit hash", committish);
            return Ok(ResolvedRef::new(descriptor.clone(), committish));
        }

        let url = descriptor.clone_url(self.options.default_protocol);
        match self.ls_remote(&url, cancel).await?.resolve(committish) {
            RefMatch::Found { name, sha } => {
                info!("Resolved {} {} to {} ({})", url, committish, sha, name);
                Ok(ResolvedRef::new(descriptor.clone(), sha))
            }
            RefMatch::Missing => Err(ResolutionError::NotFound {
                url,
                committish: Some(committish.to_owned()),
            }),
            RefMatch::Ambiguous(candidates) => Err(ResolutionError::AmbiguousRef {
                url,
                committish: committish.to_owned(),
                candidates,
            }),
        }
    }
}

fn connection_error_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(remote error: Internal Server Error|The remote end hung up unexpectedly|Connection timed out|Operation timed out|Failed to connect to .* Timed out|Connection reset by peer|Connection refused|SSL_ERROR_SYSCALL|Could not resolve host|unable to look up|early EOF|The requested URL returned error: 5\d\d)",
        )
        .expect("static regex is valid")
    })
}

fn missing_repository_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?i)(Repository not found|repository '.*' not found|does not appear to be a git repository|Could not read from remote repository|The requested URL returned error: 40[134]|Authentication failed|could not read Username|terminal prompts disabled|Permission denied \(publickey)",
        )
        .expect("static regex is valid")
    })
}

/// Sorts a failed `ls-remote` into the resolution error taxonomy.
fn classify(url: &str, error: ExecutionError) -> ResolutionError {
    match &error {
        ExecutionError::NonZeroExit { stderr, .. } if connection_error_regex().is_match(stderr) => {
            ResolutionError::NetworkError {
                url: url.to_owned(),
                message: stderr.trim().to_owned(),
                attempts: 1,
            }
        }
        ExecutionError::NonZeroExit { stderr, .. }
            if missing_repository_regex().is_match(stderr) =>
        {
            ResolutionError::NotFound {
                url: url.to_owned(),
                committish: None,
            }
        }
        ExecutionError::Timeout { .. } => ResolutionError::NetworkError {
            url: url.to_owned(),
            message: error.to_string(),
            attempts: 1,
        },
        _ => error.into(),
    }
}

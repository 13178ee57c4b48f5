use std::{collections::BTreeMap, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::{
    config::GitSourceConfig,
    git::{GitExecutor, GitOptions, RetryPolicy},
    model::hosted::Protocol,
    platform::Platform,
    resolver::{CachingResolver, GitRefResolver},
    GitSource,
};

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("Could not load configuration: {0}")]
    Config(anyhow::Error),
    #[error("Git timeout must be greater than zero")]
    ZeroTimeout,
}

pub struct GitSourceBuilder {
    git_path: Option<PathBuf>,
    cwd: Option<PathBuf>,
    env: BTreeMap<String, String>,
    timeout: Option<Duration>,
    retries: Option<u32>,
    default_protocol: Option<Protocol>,
    platform: Option<Platform>,
    load_environment: bool,
}

impl Default for GitSourceBuilder {
    fn default() -> Self {
        GitSourceBuilder {
            git_path: None,
            cwd: None,
            env: BTreeMap::new(),
            timeout: None,
            retries: None,
            default_protocol: None,
            platform: None,
            load_environment: true,
        }
    }
}

impl GitSourceBuilder {
    /// Git executable to run.
    ///
    /// Defaults to `git` from the search path.
    pub fn git_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.git_path = Some(path.into());
        self
    }

    /// Working directory of git invocations.
    ///
    /// Defaults to the current directory.
    pub fn cwd(mut self, path: impl Into<PathBuf>) -> Self {
        self.cwd = Some(path.into());
        self
    }

    /// Extra environment variable for every git invocation.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Upper bound on a single git invocation.
    ///
    /// Defaults to one minute.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Number of retries after a network failure.
    ///
    /// Defaults to 2.
    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Protocol of clone URLs for descriptors that do not pin one.
    ///
    /// Defaults to `https`.
    pub fn default_protocol(mut self, protocol: Protocol) -> Self {
        self.default_protocol = Some(protocol);
        self
    }

    /// Platform to prepare git invocations for instead of the host's.
    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = Some(platform);
        self
    }

    /// Skip `GITSOURCE_*` environment variables.
    pub fn ignore_environment(mut self) -> Self {
        self.load_environment = false;
        self
    }

    pub fn try_build(self) -> Result<GitSource, BuildError> {
        let Self {
            git_path,
            cwd,
            env,
            timeout,
            retries,
            default_protocol,
            platform,
            load_environment,
        } = self;
        let config = if load_environment {
            GitSourceConfig::load().map_err(BuildError::Config)?
        } else {
            GitSourceConfig::default()
        };

        let defaults = GitOptions::default();
        let timeout = timeout.or(config.timeout).unwrap_or(defaults.timeout);
        if timeout.is_zero() {
            return Err(BuildError::ZeroTimeout);
        }
        let retry = match retries.or(config.retries) {
            Some(retries) => RetryPolicy {
                retries,
                ..Default::default()
            },
            None => defaults.retry,
        };
        let options = GitOptions {
            fake_platform: platform.or(config.platform),
            cwd,
            git_path: git_path.or(config.git_path),
            env,
            timeout,
            retry,
            default_protocol: default_protocol
                .or(config.default_protocol)
                .unwrap_or(defaults.default_protocol),
        };

        let executor = GitExecutor::new(&options);
        let resolver = CachingResolver::new(
            GitRefResolver::new(executor, options.clone()),
            options.default_protocol,
        );
        Ok(GitSource { resolver, options })
    }
}

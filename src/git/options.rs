use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::{
    model::hosted::Protocol,
    platform::{platform_of, Platform},
};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// Settings shared by every git invocation of a resolution session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitOptions {
    /// Platform to prepare invocations for instead of the host's.
    pub fake_platform: Option<Platform>,
    pub cwd: Option<PathBuf>,
    /// Explicit git executable, `git` from the search path otherwise.
    pub git_path: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub default_protocol: Protocol,
}

impl Default for GitOptions {
    fn default() -> Self {
        GitOptions {
            fake_platform: None,
            cwd: None,
            git_path: None,
            env: BTreeMap::new(),
            timeout: DEFAULT_TIMEOUT,
            retry: RetryPolicy::default(),
            default_protocol: Protocol::default(),
        }
    }
}

impl GitOptions {
    pub fn program(&self) -> &Path {
        self.git_path
            .as_deref()
            .unwrap_or_else(|| Path::new(platform_of(self).git_executable()))
    }
}

/// Exponential backoff applied to network failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts made after the first one fails.
    pub retries: u32,
    pub factor: u32,
    pub min_timeout: Duration,
    pub max_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            retries: 2,
            factor: 10,
            min_timeout: Duration::from_secs(1),
            max_timeout: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        RetryPolicy {
            retries: 0,
            ..Default::default()
        }
    }

    /// Delay before retry number `attempt`, counting from zero.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let multiplier = self.factor.saturating_pow(attempt);
        self.min_timeout
            .saturating_mul(multiplier)
            .min(self.max_timeout)
    }
}

use std::{collections::HashMap, path::PathBuf, time::Duration};

use config::{Config, ConfigError, Environment};
use serde::Deserialize;

use crate::{model::hosted::Protocol, platform::Platform};

/// Settings picked up from `GITSOURCE_*` environment variables.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct GitSourceConfig {
    pub git_path: Option<PathBuf>,
    pub timeout: Option<Duration>,
    pub retries: Option<u32>,
    pub default_protocol: Option<Protocol>,
    pub platform: Option<Platform>,
}

impl GitSourceConfig {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_raw(RawConfig::load(None)?)
    }

    fn from_raw(raw_config: RawConfig) -> anyhow::Result<Self> {
        let platform = match raw_config.platform {
            Some(platform) => Some(platform.parse::<Platform>()?),
            None => None,
        };
        Ok(Self {
            git_path: raw_config.git.path,
            timeout: raw_config.git.timeout.map(Duration::from_millis),
            retries: raw_config.git.retries,
            default_protocol: raw_config.git.protocol,
            platform,
        })
    }
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct RawConfig {
    #[serde(default)]
    git: GitConfig,
    platform: Option<String>,
}

#[derive(Default, Debug, Deserialize, PartialEq, Eq)]
struct GitConfig {
    path: Option<PathBuf>,
    /// Milliseconds.
    timeout: Option<u64>,
    retries: Option<u32>,
    protocol: Option<Protocol>,
}

impl RawConfig {
    fn load(env: Option<HashMap<String, String>>) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(
                Environment::with_prefix("GITSOURCE")
                    .separator("_")
                    .source(env),
            )
            .build()?
            .try_deserialize()
    }
}

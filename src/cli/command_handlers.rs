use std::{error::Error, time::Duration};

use log::{debug, info};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::{
    api::OutcomeReport,
    cli::args::CliArgs,
    model::hosted::{HostedGitDescriptor, Protocol},
    GitSource,
};

#[derive(Debug, Serialize)]
struct DescriptorReport {
    #[serde(flatten)]
    descriptor: HostedGitDescriptor,
    clone_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    https_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    browse_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    docs_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tarball_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    shortcut: Option<String>,
}

impl DescriptorReport {
    fn new(descriptor: HostedGitDescriptor, default_protocol: Protocol) -> Self {
        DescriptorReport {
            clone_url: descriptor.clone_url(default_protocol),
            https_url: descriptor.https_url(),
            ssh_url: descriptor.ssh_url(),
            browse_url: descriptor.browse_url(),
            docs_url: descriptor.docs_url(),
            tarball_url: descriptor.tarball_url(),
            shortcut: descriptor.shortcut(),
            descriptor,
        }
    }
}

#[derive(Debug, Serialize)]
struct ResolveReport {
    outcome: Vec<OutcomeReport>,
}

/// Builds the session from command line flags layered over the environment.
pub fn build_source(args: &CliArgs) -> Result<GitSource, Box<dyn Error>> {
    let mut builder = GitSource::builder();
    if let Some(git_path) = &args.git_path {
        builder = builder.git_path(git_path);
    }
    if let Some(timeout_ms) = args.timeout_ms {
        builder = builder.timeout(Duration::from_millis(timeout_ms));
    }
    if let Some(platform) = args.platform {
        builder = builder.platform(platform);
    }
    if let Some(protocol) = args.protocol {
        builder = builder.default_protocol(protocol);
    }
    if let Some(directory) = &args.directory {
        builder = builder.cwd(directory);
    }
    Ok(builder.try_build()?)
}

/// Handler to parse command
pub fn do_parse(source: &GitSource, specifier: &str) -> Result<String, Box<dyn Error>> {
    match source.parse(specifier) {
        Some(descriptor) => {
            debug!("Parsed {} as {:?}", specifier, descriptor);
            let report = DescriptorReport::new(descriptor, source.options().default_protocol);
            Ok(toml::to_string_pretty(&report)?)
        }
        None => Err(format!("{specifier} is not a git reference").into()),
    }
}

/// Handler to resolve command
/// Resolves all specifiers concurrently, the report lists every outcome
/// even when some of them failed.
pub async fn do_resolve(
    source: &GitSource,
    specifiers: &[String],
    cancel: &CancellationToken,
) -> Result<(String, usize), Box<dyn Error>> {
    let outcomes = source.resolve_all(specifiers, cancel).await;
    let failures = outcomes.iter().filter(|outcome| outcome.is_failure()).count();
    info!(
        "Resolved {} of {} specifiers",
        outcomes.len() - failures,
        outcomes.len()
    );

    let report = ResolveReport {
        outcome: specifiers
            .iter()
            .zip(outcomes)
            .map(|(specifier, outcome)| OutcomeReport::new(specifier, outcome))
            .collect(),
    };
    Ok((toml::to_string_pretty(&report)?, failures))
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::{model::hosted::Protocol, platform::Platform};

/// Resolves git dependency specifiers to the commits they point at.
#[derive(Debug, Parser)]
#[clap(version)]
pub struct CliArgs {
    #[clap(subcommand)]
    pub cmd: Command,
    /// Git executable to run, `git` from the search path by default
    #[clap(long, global = true)]
    pub git_path: Option<PathBuf>,
    /// Timeout of a single git invocation in milliseconds
    #[clap(long, global = true)]
    pub timeout_ms: Option<u64>,
    /// Platform to prepare git invocations for (windows or posix)
    #[clap(long, global = true)]
    pub platform: Option<Platform>,
    /// Protocol of clone URLs for hosted repositories (https or ssh)
    #[clap(long, global = true)]
    pub protocol: Option<Protocol>,
    /// Working directory of git invocations
    #[clap(short = 'C', long = "directory", global = true)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    ///Parses a specifier and prints the repository it points at
    Parse { specifier: String },
    ///Resolves specifiers to commit hashes
    Resolve {
        #[clap(required = true)]
        specifiers: Vec<String>,
    },
}

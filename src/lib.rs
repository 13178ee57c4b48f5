pub mod cli;
pub mod config;
pub mod git;
pub mod model;
pub mod platform;
pub mod resolver;

mod api;

pub use api::{BuildError, GitSource, GitSourceBuilder, OutcomeReport, SourceOutcome};

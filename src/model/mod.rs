use thiserror::Error;

pub mod hosted;
pub mod resolved;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid protocol: {0}")]
    InvalidProtocol(String),
    #[error("Invalid platform: {0}")]
    InvalidPlatform(String),
}

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::hosted::HostedGitDescriptor;

pub const SHA_LENGTH: usize = 40;

/// A descriptor pinned to the commit its committish pointed at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedRef {
    pub sha: String,
    pub resolved_at: DateTime<Utc>,
    pub descriptor: HostedGitDescriptor,
}

impl ResolvedRef {
    pub fn new(descriptor: HostedGitDescriptor, sha: impl Into<String>) -> ResolvedRef {
        ResolvedRef {
            sha: sha.into(),
            resolved_at: Utc::now(),
            descriptor,
        }
    }
}

/// Whether `committish` is a complete 40 character hex object name.
pub fn is_full_sha(committish: &str) -> bool {
    committish.len() == SHA_LENGTH && is_hex(committish)
}

pub(crate) fn is_hex(value: &str) -> bool {
    !value.is_empty() && value.bytes().all(|b| b.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_sha_detection() {
        assert!(is_full_sha("0123456789abcdef0123456789ABCDEF01234567"));
        assert!(!is_full_sha("0123456789abcdef"));
        assert!(!is_full_sha("g123456789abcdef0123456789abcdef01234567"));
        assert!(!is_full_sha("0123456789abcdef0123456789abcdef012345678"));
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use log::{debug, trace};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::model::{
    hosted::{HostedGitDescriptor, Protocol},
    resolved::ResolvedRef,
};

use super::{RefResolver, ResolutionError};

type Pending = Arc<OnceCell<Result<ResolvedRef, ResolutionError>>>;

/// Identity of a resolution: the repository that is asked and the committish
/// it is asked about.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub url: String,
    pub committish: String,
}

impl CacheKey {
    pub fn new(descriptor: &HostedGitDescriptor, default_protocol: Protocol) -> CacheKey {
        CacheKey {
            url: descriptor.clone_url(default_protocol),
            committish: descriptor.committish_or_head().to_owned(),
        }
    }
}

/// Memoizes successful resolutions for the lifetime of a session and
/// collapses concurrent requests for the same key into one lookup.
///
/// Failures are handed to every caller waiting on the lookup that failed,
/// but are not remembered, so the next request tries again.
pub struct CachingResolver<R> {
    inner: R,
    default_protocol: Protocol,
    resolved: DashMap<CacheKey, ResolvedRef>,
    in_flight: DashMap<CacheKey, Pending>,
}

impl<R: RefResolver> CachingResolver<R> {
    pub fn new(inner: R, default_protocol: Protocol) -> Self {
        CachingResolver {
            inner,
            default_protocol,
            resolved: DashMap::new(),
            in_flight: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &R {
        &self.inner
    }

    pub fn cached(&self, descriptor: &HostedGitDescriptor) -> Option<ResolvedRef> {
        let key = CacheKey::new(descriptor, self.default_protocol);
        self.resolved
            .get(&key)
            .map(|entry| with_descriptor(entry.value(), descriptor))
    }

    pub fn len(&self) -> usize {
        self.resolved.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolved.is_empty()
    }

    fn join(&self, key: CacheKey) -> InFlight<'_> {
        let pending = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .value()
            .clone();
        InFlight {
            map: &self.in_flight,
            key,
            pending,
        }
    }
}

/// A caller's membership in the lookup of one key.
///
/// The map entry goes away with the first member to leave once the lookup has
/// a result, or with the last member to leave an unfinished one.
struct InFlight<'a> {
    map: &'a DashMap<CacheKey, Pending>,
    key: CacheKey,
    pending: Pending,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        let finished = self.pending.initialized();
        // Clones are only taken under the shard lock held here, so the count
        // cannot grow while it is checked.
        self.map.remove_if(&self.key, |_, current| {
            Arc::ptr_eq(current, &self.pending) && (finished || Arc::strong_count(current) == 2)
        });
    }
}

#[async_trait]
impl<R: RefResolver> RefResolver for CachingResolver<R> {
    async fn resolve_with_cancel(
        &self,
        descriptor: &HostedGitDescriptor,
        cancel: &CancellationToken,
    ) -> Result<ResolvedRef, ResolutionError> {
        if let Some(hit) = self.cached(descriptor) {
            trace!("Cache hit for {}", descriptor);
            return Ok(hit);
        }

        let in_flight = self.join(CacheKey::new(descriptor, self.default_protocol));
        // A lookup may have finished between the first check and joining it.
        if let Some(hit) = self.cached(descriptor) {
            return Ok(hit);
        }

        // A cancelled lookup leaves the cell empty for the next member.
        let lookup = in_flight.pending.get_or_try_init(|| async {
            let key = &in_flight.key;
            debug!("Resolving {} {}", key.url, key.committish);
            match self.inner.resolve_with_cancel(descriptor, cancel).await {
                Err(ResolutionError::Cancelled) => Err(ResolutionError::Cancelled),
                result => {
                    if let Ok(resolved) = &result {
                        self.resolved.insert(key.clone(), resolved.clone());
                    }
                    Ok(result)
                }
            }
        });
        let result = tokio::select! {
            biased;
            lookup = lookup => match lookup {
                Ok(result) => result.clone(),
                Err(error) => Err(error),
            },
            _ = cancel.cancelled() => Err(ResolutionError::Cancelled),
        };

        result.map(|resolved| with_descriptor(&resolved, descriptor))
    }
}

/// Shares one resolution between descriptors spelled differently.
fn with_descriptor(resolved: &ResolvedRef, descriptor: &HostedGitDescriptor) -> ResolvedRef {
    ResolvedRef {
        sha: resolved.sha.clone(),
        resolved_at: resolved.resolved_at,
        descriptor: descriptor.clone(),
    }
}

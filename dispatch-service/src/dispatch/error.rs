//! Outcomes of a dispatch that did not reach every queue.

use std::time::Duration;

use thiserror::Error;

use super::types::ResourceId;
use crate::storage::FetchError;

/// A queue append that did not go through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueFailure {
    pub queue: String,
    pub reason: String,
}

/// Every way `request_dispatch` can end without reaching all queues.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// A cooldown marker exists for this image. Expected control flow.
    #[error("rate limited, retry after {}s", ceil_secs(.retry_after))]
    RateLimited { retry_after: Duration },

    /// The image bytes could not be retrieved. The cooldown stays in place.
    #[error("failed to fetch image {resource_id}")]
    ResourceFetchFailed {
        resource_id: ResourceId,
        #[source]
        source: FetchError,
    },

    /// Some queue appends failed. Earlier appends are not rolled back and the
    /// cooldown stays in place.
    #[error(
        "dispatch of {resource_id} reached {} queue(s), {} failed",
        .published.len(),
        .failed.len()
    )]
    PartialDispatchFailure {
        resource_id: ResourceId,
        published: Vec<String>,
        failed: Vec<QueueFailure>,
    },

    /// The atomic set-if-absent round trip itself failed.
    #[error("cooldown store unavailable")]
    CooldownUnavailable(#[source] anyhow::Error),

    #[error("failed to encode dispatch payload")]
    Encode(#[from] serde_json::Error),
}

impl DispatchError {
    /// Seconds the caller should wait, rounded up, for rate-limited calls.
    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            DispatchError::RateLimited { retry_after } => Some(ceil_secs(retry_after)),
            _ => None,
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, DispatchError::RateLimited { .. })
    }
}

fn ceil_secs(duration: &Duration) -> u64 {
    let secs = duration.as_secs();
    if duration.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}

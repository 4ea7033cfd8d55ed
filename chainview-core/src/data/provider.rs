//! Chunk source trait and structured error types.
//!
//! The ChunkSource trait abstracts over the transport (HTTP, scripted test
//! sources) so the fetch path can be mocked. The local cache and the slot
//! state machine sit above this trait: sources don't know about either.

use crate::domain::{ChunkId, MetricKey};
use thiserror::Error;

/// Structured error types for fetch operations.
///
/// None of these are surfaced to the user as a hard error: a failed chunk
/// simply stays as it was and is retried on the next trigger.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("host {host} skipped (circuit breaker open)")]
    CircuitOpen { host: String },

    #[error("local cache error: {0}")]
    LocalCache(String),

    #[error("fetch error: {0}")]
    Other(String),
}

/// Transport that turns a URL into a response body.
pub trait ChunkSource: Send + Sync {
    /// Human-readable name of this source.
    fn name(&self) -> &str;

    /// GET `url`, returning the body of a successful response.
    fn get(&self, url: &str) -> Result<String, FetchError>;
}

/// Primary and optional backup endpoint roots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub primary: String,
    pub backup: Option<String>,
}

impl Endpoints {
    pub fn new(primary: impl Into<String>, backup: Option<String>) -> Self {
        Self {
            primary: primary.into(),
            backup,
        }
    }

    /// `{root}/{metric path}?chunk={id}`
    pub fn chunk_url(root: &str, key: &MetricKey, chunk: ChunkId) -> String {
        format!("{}/{}?chunk={}", root.trim_end_matches('/'), key.path(), chunk)
    }

    pub fn primary_url(&self, key: &MetricKey, chunk: ChunkId) -> String {
        Self::chunk_url(&self.primary, key, chunk)
    }

    pub fn backup_url(&self, key: &MetricKey, chunk: ChunkId) -> Option<String> {
        self.backup
            .as_deref()
            .map(|root| Self::chunk_url(root, key, chunk))
    }
}

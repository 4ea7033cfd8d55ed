//! Data access: payload parsing, transport, fetch dispatch and the local cache.

pub mod circuit_breaker;
pub mod fetcher;
pub mod http;
pub mod local_cache;
pub mod payload;
pub mod provider;

pub use circuit_breaker::{BreakerRegistry, CircuitBreaker};
pub use fetcher::{fetch_with_fallback, FetchCompletion, FetchJob, Fetcher, ThreadFetcher};
pub use http::HttpSource;
pub use local_cache::{CacheStatus, FileStore, LocalCache, LocalStore, MemoryStore};
pub use payload::ChunkPayload;
pub use provider::{ChunkSource, Endpoints, FetchError};

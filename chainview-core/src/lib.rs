//! chainview core: chunked time-series cache and incremental sync engine.
//!
//! This crate contains:
//! - Index schemes mapping dates and block heights to chunk ids
//! - Per-chunk fetch slots with freshness windows, backup fallback and a
//!   persistent local cache
//! - The resource cache of series, keyed by metric and scheme
//! - Visible-range tracking, incremental merge and pane/series sync
//! - A live bridge folding streaming ticks into the last rendered point

pub mod config;
pub mod data;
pub mod domain;
pub mod engine;
pub mod scheme;
pub mod testing;
pub mod view;

pub use config::{ConfigError, EngineConfig};
pub use engine::{Engine, EngineError, FetchDecision};

#[cfg(test)]
mod tests {
    use super::*;

    /// Compile-time check: types that cross the fetch-worker boundary are
    /// Send (+ Sync where shared).
    #[allow(dead_code)]
    fn assert_send_sync() {
        fn require_send<T: Send>() {}
        fn require_sync<T: Sync>() {}

        require_send::<domain::MetricKey>();
        require_sync::<domain::MetricKey>();
        require_send::<domain::RawSeries>();
        require_sync::<domain::RawSeries>();
        require_send::<data::ChunkPayload>();
        require_sync::<data::ChunkPayload>();
        require_send::<data::FetchJob>();
        require_send::<data::FetchCompletion>();
        require_send::<data::FetchError>();
        require_sync::<data::FetchError>();

        require_send::<data::HttpSource>();
        require_sync::<data::HttpSource>();
        require_send::<data::FileStore>();
        require_sync::<data::FileStore>();
        require_send::<data::ThreadFetcher>();
        require_send::<data::LocalCache>();

        require_send::<engine::Engine>();
        require_send::<EngineConfig>();
        require_sync::<EngineConfig>();
    }

    /// The engine is scheme-agnostic: both schemes are usable as trait objects.
    #[test]
    fn schemes_are_object_safe() {
        let schemes = scheme::Schemes::from_config(&EngineConfig::default());
        let all: [&dyn scheme::IndexScheme; 2] = [
            schemes.get(domain::SchemeKind::ByDate),
            schemes.get(domain::SchemeKind::ByHeight),
        ];
        assert_eq!(all[0].kind(), domain::SchemeKind::ByDate);
        assert_eq!(all[1].kind(), domain::SchemeKind::ByHeight);
    }
}

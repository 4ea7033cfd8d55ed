//! The fetch engine: slots, series, the resource cache, and the context
//! object that drives them.
//!
//! `Engine` is single-owner. All state changes happen on the thread that owns
//! it; network requests run on the fetcher's workers and come back through a
//! completion channel that the owner drains with [`Engine::pump`] or
//! [`Engine::wait_idle`].

pub mod cache;
pub mod series;
pub mod slot;

pub use cache::ResourceCache;
pub use series::{Revision, Series};
pub use slot::{FetchSlot, SkipReason, SlotChange, SlotState};

use crate::config::{ConfigError, EngineConfig};
use crate::data::{
    BreakerRegistry, ChunkPayload, Endpoints, FetchCompletion, FetchError, FetchJob, Fetcher,
    FileStore, HttpSource, LocalCache, ThreadFetcher,
};
use crate::domain::{ChunkId, MetricKey, RawSeries, SchemeKind};
use crate::scheme::{IndexScheme, Schemes};
use crate::view::range::ActiveChunkSet;
use chrono::{DateTime, Utc};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("chunk {chunk} is outside the valid range of the {scheme} scheme")]
    ChunkOutOfRange { scheme: SchemeKind, chunk: ChunkId },

    #[error("series is indexed {found}, chart is indexed {expected}")]
    SchemeMismatch {
        expected: SchemeKind,
        found: SchemeKind,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// What `fetch` decided for one chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchDecision {
    /// A request went out with this sequence id.
    Dispatched { seq: u64 },
    /// Slot is loading or fresh.
    Skipped(SkipReason),
    /// The scheme holds this chunk back until the previous one is complete.
    Blocked,
}

pub struct Engine {
    config: EngineConfig,
    schemes: Schemes,
    endpoints: Endpoints,
    cache: ResourceCache,
    local: LocalCache,
    fetcher: Box<dyn Fetcher>,
    reply: Sender<FetchCompletion>,
    completions: Receiver<FetchCompletion>,
    in_flight: usize,
}

impl Engine {
    pub fn new(config: EngineConfig, fetcher: Box<dyn Fetcher>, local: LocalCache) -> Self {
        let (reply, completions) = mpsc::channel();
        Self {
            schemes: Schemes::from_config(&config),
            endpoints: Endpoints::new(config.base_url.clone(), config.backup_url.clone()),
            config,
            cache: ResourceCache::new(),
            local,
            fetcher,
            reply,
            completions,
            in_flight: 0,
        }
    }

    /// HTTP fetch workers plus a file-backed local cache, both from `config`.
    pub fn connect(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let breakers = BreakerRegistry::new(config.breaker_threshold, config.breaker_cooldown());
        let source = HttpSource::new(config.request_timeout(), breakers)?;
        let fetcher = ThreadFetcher::new(Arc::new(source), config.fetch_workers);
        let local = LocalCache::background(Arc::new(FileStore::new(config.cache_dir.clone())));
        Ok(Self::new(config, Box::new(fetcher), local))
    }

    /// Replace the schemes built from config (fixed year, known chain tip).
    pub fn with_schemes(mut self, schemes: Schemes) -> Self {
        self.schemes = schemes;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn scheme(&self, kind: SchemeKind) -> &dyn IndexScheme {
        self.schemes.get(kind)
    }

    pub fn schemes_mut(&mut self) -> &mut Schemes {
        &mut self.schemes
    }

    pub fn cache(&self) -> &ResourceCache {
        &self.cache
    }

    pub fn series(&self, key: &MetricKey) -> Option<&Series> {
        self.cache.get(key)
    }

    pub fn get_or_create(&mut self, key: &MetricKey) -> &mut Series {
        self.cache.get_or_create(key)
    }

    pub fn subscribe(&mut self, key: &MetricKey) -> Receiver<Revision> {
        self.cache.get_or_create(key).subscribe()
    }

    /// Concatenated data of every ready chunk, or `None` for an unknown key.
    pub fn full_data(&self, key: &MetricKey) -> Option<RawSeries> {
        self.cache.get(key).map(Series::full_data)
    }

    /// Requests dispatched and not yet applied.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Make sure one chunk is fresh, dispatching a request when it is not.
    pub fn fetch(
        &mut self,
        key: &MetricKey,
        chunk: ChunkId,
        now: DateTime<Utc>,
    ) -> Result<FetchDecision, EngineError> {
        let scheme = self.schemes.get(key.scheme);
        if !scheme.contains(chunk) {
            return Err(EngineError::ChunkOutOfRange {
                scheme: key.scheme,
                chunk,
            });
        }

        let series = self.cache.get_or_create(key);
        let newest = series.newest_ready();
        let window = if newest.map_or(true, |n| chunk >= n) {
            self.config.fresh_window_recent()
        } else {
            self.config.fresh_window_closed()
        };

        let seq = match series.slot_mut(chunk).begin(now, window) {
            Ok(seq) => seq,
            Err(reason) => return Ok(FetchDecision::Skipped(reason)),
        };

        let url = self.endpoints.primary_url(key, chunk);

        if series.slot_mut(chunk).payload().is_none() {
            if let Some(body) = self.local.read(&url) {
                match ChunkPayload::parse(&body, chunk, scheme) {
                    Ok(payload) if series.shape().map_or(true, |s| s == payload.shape()) => {
                        let shape = payload.shape();
                        if series.slot_mut(chunk).paint_cached(seq, payload) {
                            series.set_shape(shape);
                            series.notify();
                            debug!(%key, %chunk, "painted from local cache");
                        }
                    }
                    Ok(_) => debug!(%key, %chunk, "cached payload has a different shape"),
                    Err(e) => debug!(%key, %chunk, error = %e, "ignoring unreadable cache entry"),
                }
            }
        }

        let job = FetchJob {
            key: key.clone(),
            chunk,
            seq,
            url,
            backup_url: self.endpoints.backup_url(key, chunk),
        };
        debug!(%key, %chunk, seq, "dispatching fetch");
        self.fetcher.dispatch(job, self.reply.clone());
        self.in_flight += 1;
        Ok(FetchDecision::Dispatched { seq })
    }

    /// Fetch every chunk of an active set in order, honouring the scheme's
    /// rule about holding a chunk back until its predecessor is complete.
    pub fn fetch_active(
        &mut self,
        key: &MetricKey,
        active: &ActiveChunkSet,
        now: DateTime<Utc>,
    ) -> Result<Vec<(ChunkId, FetchDecision)>, EngineError> {
        let mut decisions = Vec::with_capacity(active.len());
        let mut previous: Option<ChunkId> = None;
        for &chunk in active.ids() {
            let previous_rows = previous.map(|p| self.cache.get(key).map_or(0, |s| s.rows(p)));
            let decision = if self.schemes.get(key.scheme).may_fetch(previous_rows) {
                self.fetch(key, chunk, now)?
            } else {
                FetchDecision::Blocked
            };
            decisions.push((chunk, decision));
            previous = Some(chunk);
        }
        Ok(decisions)
    }

    /// Apply one completion to its slot.
    pub fn apply(&mut self, completion: FetchCompletion, now: DateTime<Utc>) -> SlotChange {
        self.in_flight = self.in_flight.saturating_sub(1);
        let FetchCompletion {
            key,
            chunk,
            seq,
            url,
            result,
        } = completion;

        let scheme = self.schemes.get(key.scheme);
        let Some(series) = self.cache.get_mut(&key) else {
            warn!(%key, "completion for unknown series");
            return SlotChange::Discarded;
        };

        let outcome = match &result {
            Ok(body) => match ChunkPayload::parse(body, chunk, scheme) {
                Ok(payload) if payload.is_empty() => Some(payload),
                Ok(payload) if series.shape().map_or(true, |s| s == payload.shape()) => {
                    Some(payload)
                }
                Ok(payload) => {
                    let shape = payload.shape();
                    warn!(%key, %chunk, ?shape, "payload shape changed, ignoring");
                    None
                }
                Err(e) => {
                    warn!(%key, %chunk, error = %e, "unusable payload");
                    None
                }
            },
            Err(e) => {
                warn!(%key, %chunk, error = %e, "fetch failed on primary and backup");
                None
            }
        };
        let shape = outcome.as_ref().map(ChunkPayload::shape);

        let change = series.slot_mut(chunk).complete(seq, now, outcome);
        match change {
            SlotChange::Replaced => {
                if let Some(shape) = shape {
                    series.set_shape(shape);
                }
                if let Ok(body) = &result {
                    self.local.persist(&url, body);
                }
                series.notify();
                info!(%key, %chunk, rows = series.rows(chunk), "chunk updated");
            }
            SlotChange::Unchanged => debug!(%key, %chunk, "chunk unchanged"),
            SlotChange::Empty => debug!(%key, %chunk, "empty response, keeping state"),
            SlotChange::Discarded => debug!(%key, %chunk, seq, "stale completion discarded"),
            SlotChange::Failed => {}
        }
        change
    }

    /// Apply every completion that has already arrived. Never blocks.
    pub fn pump(&mut self, now: DateTime<Utc>) -> usize {
        let mut applied = 0;
        while let Ok(completion) = self.completions.try_recv() {
            self.apply(completion, now);
            applied += 1;
        }
        applied
    }

    /// Block until nothing is in flight or `timeout` elapses.
    pub fn wait_idle(&mut self, timeout: Duration) -> usize {
        let deadline = Instant::now() + timeout;
        let mut applied = 0;
        while self.in_flight > 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.completions.recv_timeout(remaining) {
                Ok(completion) => {
                    self.apply(completion, Utc::now());
                    applied += 1;
                }
                Err(RecvTimeoutError::Timeout) => {
                    warn!(in_flight = self.in_flight, "gave up waiting for fetches");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        applied
    }
}

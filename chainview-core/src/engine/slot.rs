//! Fetch slot: per-chunk fetch state machine.
//!
//! ```text
//! EMPTY ──begin──▶ LOADING ──complete──▶ READY
//!                     ▲                    │
//!                     └──────begin─────────┘   (refresh once stale)
//! ```
//!
//! Invariants:
//! - at most one request in flight (`begin` while loading is a no-op);
//! - `last_fetched_at` only advances on a completed request (replaced or
//!   confirmed unchanged), never on failure or an empty response;
//! - a slot that has held a payload never goes back to EMPTY;
//! - completions older than the newest applied one are discarded.

use crate::data::ChunkPayload;
use chrono::{DateTime, TimeDelta, Utc};
use std::sync::Arc;

/// Observable state of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Loading,
    Ready,
}

/// Why `begin` declined to start a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// A request for this slot is already in flight.
    Loading,
    /// Last fetch is still inside the freshness window.
    Fresh,
}

/// What a completion did to the slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotChange {
    /// Older than an already applied completion; ignored.
    Discarded,
    /// Network or parse failure; payload kept, retry on next trigger.
    Failed,
    /// Zero entries; nothing applied.
    Empty,
    /// Same tail as the held payload; freshness advanced, no notification.
    Unchanged,
    /// New payload installed; dependents must be notified.
    Replaced,
}

impl SlotChange {
    pub fn notifies(self) -> bool {
        self == SlotChange::Replaced
    }
}

#[derive(Debug, Clone, Default)]
pub struct FetchSlot {
    payload: Option<Arc<ChunkPayload>>,
    loading: bool,
    last_fetched_at: Option<DateTime<Utc>>,
    issued_seq: u64,
    applied_seq: u64,
}

impl FetchSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SlotState {
        if self.loading {
            SlotState::Loading
        } else if self.payload.is_some() {
            SlotState::Ready
        } else {
            SlotState::Empty
        }
    }

    pub fn payload(&self) -> Option<&Arc<ChunkPayload>> {
        self.payload.as_ref()
    }

    pub fn is_loading(&self) -> bool {
        self.loading
    }

    pub fn last_fetched_at(&self) -> Option<DateTime<Utc>> {
        self.last_fetched_at
    }

    /// Rows held, zero when nothing is held.
    pub fn rows(&self) -> usize {
        self.payload.as_ref().map_or(0, |p| p.len())
    }

    /// Start a request unless one is in flight or the slot is still fresh.
    /// Returns the new request's sequence id.
    pub fn begin(&mut self, now: DateTime<Utc>, window: TimeDelta) -> Result<u64, SkipReason> {
        if self.loading {
            return Err(SkipReason::Loading);
        }
        if let Some(at) = self.last_fetched_at {
            if now - at < window {
                return Err(SkipReason::Fresh);
            }
        }
        self.loading = true;
        self.issued_seq += 1;
        Ok(self.issued_seq)
    }

    /// Paint a locally cached payload while the network request is pending.
    /// Only applies when nothing is held yet; freshness is not advanced.
    pub fn paint_cached(&mut self, seq: u64, payload: ChunkPayload) -> bool {
        if self.payload.is_some() || seq < self.applied_seq || payload.is_empty() {
            return false;
        }
        self.payload = Some(Arc::new(payload));
        true
    }

    /// Apply the outcome of request `seq`; `None` means the request failed.
    pub fn complete(
        &mut self,
        seq: u64,
        now: DateTime<Utc>,
        outcome: Option<ChunkPayload>,
    ) -> SlotChange {
        if seq == self.issued_seq {
            self.loading = false;
        }
        if seq < self.applied_seq {
            return SlotChange::Discarded;
        }

        let Some(payload) = outcome else {
            return SlotChange::Failed;
        };
        if payload.is_empty() {
            return SlotChange::Empty;
        }

        self.applied_seq = seq;
        self.last_fetched_at = Some(now);

        if let Some(held) = &self.payload {
            if held.same_tail(&payload) {
                return SlotChange::Unchanged;
            }
        }
        self.payload = Some(Arc::new(payload));
        SlotChange::Replaced
    }
}

//! Series: one metric under one index scheme, split into fetch slots.

use super::slot::FetchSlot;
use crate::domain::{ChunkId, MetricKey, RawSeries, ValueShape};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Receiver, Sender};

/// Change notification sent to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub key: MetricKey,
    pub revision: u64,
}

#[derive(Debug)]
pub struct Series {
    key: MetricKey,
    path: String,
    slots: BTreeMap<ChunkId, FetchSlot>,
    shape: Option<ValueShape>,
    revision: u64,
    subscribers: Vec<Sender<Revision>>,
}

impl Series {
    pub fn new(key: MetricKey) -> Self {
        let path = key.path();
        Self {
            key,
            path,
            slots: BTreeMap::new(),
            shape: None,
            revision: 0,
            subscribers: Vec::new(),
        }
    }

    pub fn key(&self) -> &MetricKey {
        &self.key
    }

    /// Endpoint path relative to the base URL.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Value shape, fixed by the first payload that landed.
    pub fn shape(&self) -> Option<ValueShape> {
        self.shape
    }

    pub(crate) fn set_shape(&mut self, shape: ValueShape) {
        self.shape.get_or_insert(shape);
    }

    pub fn slot(&self, id: ChunkId) -> Option<&FetchSlot> {
        self.slots.get(&id)
    }

    pub fn slot_mut(&mut self, id: ChunkId) -> &mut FetchSlot {
        self.slots.entry(id).or_default()
    }

    pub fn chunk_ids(&self) -> impl Iterator<Item = ChunkId> + '_ {
        self.slots.keys().copied()
    }

    /// Highest chunk id holding a payload.
    pub fn newest_ready(&self) -> Option<ChunkId> {
        self.slots
            .iter()
            .rev()
            .find(|(_, slot)| slot.payload().is_some())
            .map(|(id, _)| *id)
    }

    /// Rows held for a chunk; zero when unknown.
    pub fn rows(&self, id: ChunkId) -> usize {
        self.slots.get(&id).map_or(0, FetchSlot::rows)
    }

    /// Number of notified changes so far.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn subscribe(&mut self) -> Receiver<Revision> {
        let (tx, rx) = mpsc::channel();
        self.subscribers.push(tx);
        rx
    }

    /// Bump the revision and tell every live subscriber.
    pub(crate) fn notify(&mut self) {
        self.revision += 1;
        let revision = Revision {
            key: self.key.clone(),
            revision: self.revision,
        };
        self.subscribers.retain(|tx| tx.send(revision.clone()).is_ok());
    }

    /// All held payloads concatenated in chunk order.
    pub fn full_data(&self) -> RawSeries {
        let shape = self.shape.unwrap_or(ValueShape::Scalar);
        let mut out = RawSeries::empty(shape);
        for payload in self.slots.values().filter_map(FetchSlot::payload) {
            if payload.shape() != shape {
                continue;
            }
            out.positions.extend_from_slice(&payload.data.positions);
            out.values.extend_from(&payload.data.values);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::ChunkPayload;
    use crate::domain::SchemeKind;
    use crate::scheme::HeightScheme;
    use chrono::{DateTime, TimeDelta, Utc};

    fn load(series: &mut Series, id: i64, values: &str) {
        let body = format!(r#"{{"dataset":{{"map":[{values}]}},"chunk":{{"id":{id}}}}}"#);
        let payload = ChunkPayload::parse(&body, ChunkId(id), &HeightScheme::new(10)).unwrap();
        series.set_shape(payload.shape());
        let now = DateTime::<Utc>::from_timestamp(0, 0).unwrap();
        let slot = series.slot_mut(ChunkId(id));
        let seq = slot.begin(now, TimeDelta::zero()).unwrap();
        slot.complete(seq, now, Some(payload));
    }

    fn series() -> Series {
        Series::new(MetricKey::new("close", SchemeKind::ByHeight))
    }

    #[test]
    fn full_data_concatenates_in_chunk_order() {
        let mut s = series();
        load(&mut s, 10, "3.0,4.0");
        load(&mut s, 0, "1.0,2.0");

        let full = s.full_data();
        assert_eq!(full.positions, vec![0, 1, 10, 11]);
        assert_eq!(full.len(), 4);
    }

    #[test]
    fn full_data_skips_empty_slots() {
        let mut s = series();
        load(&mut s, 0, "1.0");
        s.slot_mut(ChunkId(20));
        assert_eq!(s.full_data().positions, vec![0]);
        assert_eq!(s.newest_ready(), Some(ChunkId(0)));
    }

    #[test]
    fn notify_reaches_live_subscribers_only() {
        let mut s = series();
        let rx = s.subscribe();
        drop(s.subscribe());

        s.notify();
        assert_eq!(rx.try_recv().unwrap().revision, 1);
        assert_eq!(s.subscribers.len(), 1);
    }

    #[test]
    fn shape_is_fixed_by_first_payload() {
        let mut s = series();
        s.set_shape(ValueShape::Ohlc);
        s.set_shape(ValueShape::Scalar);
        assert_eq!(s.shape(), Some(ValueShape::Ohlc));
    }
}

//! Resource cache: keyed registry of series.
//!
//! At most one `Series` exists per `MetricKey`. Series are never evicted:
//! the metric count is small and bounded, and each series' memory is bounded
//! by its domain range.

use super::series::Series;
use crate::domain::MetricKey;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct ResourceCache {
    series: HashMap<MetricKey, Series>,
}

impl ResourceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent: the second call for a key returns the first call's series.
    pub fn get_or_create(&mut self, key: &MetricKey) -> &mut Series {
        self.series
            .entry(key.clone())
            .or_insert_with(|| Series::new(key.clone()))
    }

    pub fn get(&self, key: &MetricKey) -> Option<&Series> {
        self.series.get(key)
    }

    pub fn get_mut(&mut self, key: &MetricKey) -> Option<&mut Series> {
        self.series.get_mut(key)
    }

    pub fn len(&self) -> usize {
        self.series.len()
    }

    pub fn is_empty(&self) -> bool {
        self.series.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MetricKey> {
        self.series.keys()
    }
}

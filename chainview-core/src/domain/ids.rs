use serde::{Deserialize, Serialize};
use std::fmt;

/// Position in a scheme's native coordinate.
///
/// Date scheme: days since 1970-01-01 (UTC). Height scheme: block height.
pub type Position = i64;

/// Discrete, network-addressable slice of a metric's domain.
///
/// For the date scheme this is a calendar year, for the height scheme the
/// first height of the bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChunkId(pub i64);

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which index scheme a series is keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchemeKind {
    ByDate,
    ByHeight,
}

impl SchemeKind {
    /// Prefix used in endpoint paths (`date-to-close`, `height-to-close`).
    pub fn slug(self) -> &'static str {
        match self {
            SchemeKind::ByDate => "date",
            SchemeKind::ByHeight => "height",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "date" | "by_date" => Some(SchemeKind::ByDate),
            "height" | "by_height" => Some(SchemeKind::ByHeight),
            _ => None,
        }
    }
}

impl fmt::Display for SchemeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.slug())
    }
}

/// `(metric, scheme)` - identifies exactly one logical series.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MetricKey {
    pub metric: String,
    pub scheme: SchemeKind,
}

impl MetricKey {
    pub fn new(metric: impl Into<String>, scheme: SchemeKind) -> Self {
        Self {
            metric: metric.into(),
            scheme,
        }
    }

    /// Endpoint path relative to the base URL, e.g. `date-to-close`.
    pub fn path(&self) -> String {
        format!("{}-to-{}", self.scheme.slug(), self.metric)
    }
}

impl fmt::Display for MetricKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.scheme, self.metric)
    }
}

//! Live update bridge: folds streaming ticks into the last rendered point.
//!
//! Ticks never touch fetch state. Fetched data covering a live bucket
//! supersedes it; live bars past the end of the fetched data survive refreshes.

use super::merge::{Bucketing, MergedSeries};
use crate::domain::{Ohlc, PointValue, Position, RenderPoint, SchemeKind};
use serde::{Deserialize, Serialize};

const SECS_PER_DAY: i64 = 86_400;

/// One streaming price update.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Tick {
    /// Unix seconds.
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    /// Chain tip at tick time; needed to place ticks on height-indexed series.
    #[serde(default)]
    pub height: Option<Position>,
}

impl Tick {
    /// Raw position of the tick under a scheme.
    pub fn position(&self, scheme: SchemeKind) -> Option<Position> {
        match scheme {
            SchemeKind::ByDate => Some(self.time.div_euclid(SECS_PER_DAY)),
            SchemeKind::ByHeight => self.height,
        }
    }

    fn ohlc(&self) -> Ohlc {
        Ohlc::new(self.open, self.high, self.low, self.close)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LiveOutcome {
    /// Older than the last point, no history yet, or no position.
    Ignored,
    /// Last point rewritten in place.
    Updated(RenderPoint),
    /// New bucket appended.
    Appended(RenderPoint),
}

impl LiveOutcome {
    pub fn point(&self) -> Option<RenderPoint> {
        match self {
            LiveOutcome::Ignored => None,
            LiveOutcome::Updated(p) | LiveOutcome::Appended(p) => Some(*p),
        }
    }
}

/// Fold `tick` into `merged`.
pub fn apply_tick(
    merged: &mut MergedSeries,
    tick: &Tick,
    scheme: SchemeKind,
    bucketing: Bucketing,
) -> LiveOutcome {
    let Some(raw) = tick.position(scheme) else {
        return LiveOutcome::Ignored;
    };
    let Some(last) = merged.last().copied() else {
        return LiveOutcome::Ignored;
    };
    let position = bucketing.bucket(raw);

    if position < last.position {
        LiveOutcome::Ignored
    } else if position == last.position {
        let value = match last.value {
            PointValue::Ohlc(mut bar) => {
                bar.absorb(&Ohlc::new(f64::NAN, tick.high, tick.low, tick.close));
                PointValue::Ohlc(bar)
            }
            PointValue::Scalar(_) => PointValue::Scalar(tick.close),
        };
        let point = RenderPoint { position, value };
        merged.replace_last(point);
        LiveOutcome::Updated(point)
    } else {
        let point = match last.value {
            PointValue::Ohlc(_) => RenderPoint::ohlc(position, tick.ohlc()),
            PointValue::Scalar(_) => RenderPoint::scalar(position, tick.close),
        };
        merged.push(point);
        LiveOutcome::Appended(point)
    }
}

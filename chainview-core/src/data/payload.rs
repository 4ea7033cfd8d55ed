//! Chunk payload parsing.
//!
//! Wire shape:
//!
//! ```json
//! { "dataset": { "map": [1.0, null, 2.5] }, "chunk": { "id": 850000 } }
//! { "dataset": { "map": { "2021-06-01": [1, 2, 0.5, 1.5] } }, "chunk": { "id": 2021 } }
//! ```
//!
//! Array maps are positioned by offset from the chunk start, object maps by
//! their parsed keys. The value shape (scalar vs OHLC) is resolved once per
//! payload from the first non-null entry.

use super::provider::FetchError;
use crate::domain::{ChunkId, Ohlc, Position, RawSeries, ValueColumn, ValueShape};
use crate::scheme::IndexScheme;
use serde::Deserialize;
use serde_json::Value;

#[derive(Debug, Deserialize)]
struct Envelope {
    dataset: Dataset,
    chunk: ChunkMeta,
}

#[derive(Debug, Deserialize)]
struct Dataset {
    map: Value,
}

#[derive(Debug, Deserialize)]
struct ChunkMeta {
    id: i64,
}

impl Envelope {
    fn decode(body: &str, expected: ChunkId) -> Result<Self, FetchError> {
        let envelope: Envelope = serde_json::from_str(body)
            .map_err(|e| FetchError::Malformed(format!("chunk {expected}: {e}")))?;
        let chunk = ChunkId(envelope.chunk.id);
        if chunk != expected {
            return Err(FetchError::Malformed(format!(
                "asked for chunk {expected}, response is chunk {chunk}"
            )));
        }
        Ok(envelope)
    }
}

/// A single decoded entry before the column shape is known.
#[derive(Debug, Clone, Copy)]
enum Entry {
    Null,
    Scalar(f64),
    Ohlc(Ohlc),
}

/// Parsed, immutable content of one chunk response.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkPayload {
    pub chunk: ChunkId,
    pub data: RawSeries,
}

impl ChunkPayload {
    /// Decode a response body for `expected` under `scheme`.
    pub fn parse(
        body: &str,
        expected: ChunkId,
        scheme: &dyn IndexScheme,
    ) -> Result<Self, FetchError> {
        let envelope = Envelope::decode(body, expected)?;
        let chunk = expected;

        let entries: Vec<(Position, Entry)> = match envelope.dataset.map {
            Value::Array(items) => items
                .iter()
                .enumerate()
                .map(|(i, v)| Ok((scheme.offset_position(chunk, i), decode_entry(v)?)))
                .collect::<Result<_, FetchError>>()?,
            Value::Object(map) => {
                let mut entries = map
                    .iter()
                    .map(|(k, v)| {
                        let pos = scheme.parse_key(k).ok_or_else(|| {
                            FetchError::Malformed(format!("unparsable key '{k}' in chunk {chunk}"))
                        })?;
                        Ok((pos, decode_entry(v)?))
                    })
                    .collect::<Result<Vec<_>, FetchError>>()?;
                entries.sort_by_key(|(pos, _)| *pos);
                entries
            }
            other => {
                return Err(FetchError::Malformed(format!(
                    "dataset.map must be an array or object, got {}",
                    type_name(&other)
                )))
            }
        };

        Ok(Self {
            chunk,
            data: into_columns(entries)?,
        })
    }

    /// Cheap structural check that needs no scheme: valid JSON, the
    /// requested chunk id, and an array or object map. Fetch workers run it
    /// before deciding whether the backup is needed.
    pub fn check_envelope(body: &str, expected: ChunkId) -> Result<(), FetchError> {
        let envelope = Envelope::decode(body, expected)?;
        match envelope.dataset.map {
            Value::Array(_) | Value::Object(_) => Ok(()),
            other => Err(FetchError::Malformed(format!(
                "dataset.map must be an array or object, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn shape(&self) -> ValueShape {
        self.data.shape()
    }

    /// True when both payloads end on the same position with the same value.
    pub fn same_tail(&self, other: &ChunkPayload) -> bool {
        match (self.data.last(), other.data.last()) {
            (Some((pa, va)), Some((pb, vb))) => pa == pb && va.same_as(&vb),
            (None, None) => true,
            _ => false,
        }
    }
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn number_or_nan(v: &Value) -> Option<f64> {
    match v {
        Value::Null => Some(f64::NAN),
        Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn decode_entry(v: &Value) -> Result<Entry, FetchError> {
    match v {
        Value::Null => Ok(Entry::Null),
        Value::Number(n) => n
            .as_f64()
            .map(Entry::Scalar)
            .ok_or_else(|| FetchError::Malformed(format!("non-finite number {n}"))),
        Value::Array(items) if items.len() == 4 => {
            let fields: Option<Vec<f64>> = items.iter().map(number_or_nan).collect();
            match fields.as_deref() {
                Some(&[open, high, low, close]) => {
                    Ok(Entry::Ohlc(Ohlc::new(open, high, low, close)))
                }
                _ => Err(FetchError::Malformed(format!("bad OHLC tuple {v}"))),
            }
        }
        Value::Object(obj) => {
            let field = |name: &str| obj.get(name).and_then(number_or_nan);
            match (field("open"), field("high"), field("low"), field("close")) {
                (Some(open), Some(high), Some(low), Some(close)) => {
                    Ok(Entry::Ohlc(Ohlc::new(open, high, low, close)))
                }
                _ => Err(FetchError::Malformed(format!("bad OHLC object {v}"))),
            }
        }
        other => Err(FetchError::Malformed(format!(
            "unsupported value {}",
            type_name(other)
        ))),
    }
}

fn into_columns(entries: Vec<(Position, Entry)>) -> Result<RawSeries, FetchError> {
    let shape = entries
        .iter()
        .find_map(|(_, e)| match e {
            Entry::Null => None,
            Entry::Scalar(_) => Some(ValueShape::Scalar),
            Entry::Ohlc(_) => Some(ValueShape::Ohlc),
        })
        .unwrap_or(ValueShape::Scalar);

    let mut positions = Vec::with_capacity(entries.len());
    let values = match shape {
        ValueShape::Scalar => {
            let mut values = Vec::with_capacity(entries.len());
            for (pos, entry) in entries {
                let v = match entry {
                    Entry::Null => f64::NAN,
                    Entry::Scalar(v) => v,
                    Entry::Ohlc(_) => {
                        return Err(FetchError::Malformed(format!(
                            "OHLC entry at {pos} in a scalar series"
                        )))
                    }
                };
                positions.push(pos);
                values.push(v);
            }
            ValueColumn::Scalar(values)
        }
        ValueShape::Ohlc => {
            let mut values = Vec::with_capacity(entries.len());
            for (pos, entry) in entries {
                let v = match entry {
                    Entry::Null => Ohlc::gap(),
                    Entry::Ohlc(o) => o,
                    Entry::Scalar(_) => {
                        return Err(FetchError::Malformed(format!(
                            "scalar entry at {pos} in an OHLC series"
                        )))
                    }
                };
                positions.push(pos);
                values.push(v);
            }
            ValueColumn::Ohlc(values)
        }
    };

    Ok(RawSeries::new(positions, values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::PointValue;
    use crate::scheme::{date_to_position, DateScheme, HeightScheme};
    use chrono::NaiveDate;

    fn height() -> HeightScheme {
        HeightScheme::new(10_000)
    }

    #[test]
    fn array_map_positions_from_chunk_start() {
        let body = r#"{"dataset":{"map":[1.0,null,2.5]},"chunk":{"id":850000}}"#;
        let payload = ChunkPayload::parse(body, ChunkId(850_000), &height()).unwrap();

        assert_eq!(payload.data.positions, vec![850_000, 850_001, 850_002]);
        match &payload.data.values {
            ValueColumn::Scalar(v) => {
                assert_eq!(v[0], 1.0);
                assert!(v[1].is_nan());
                assert_eq!(v[2], 2.5);
            }
            other => panic!("expected scalar column, got {other:?}"),
        }
    }

    #[test]
    fn object_map_positions_from_sorted_keys() {
        let scheme = DateScheme::new(2009, 2026);
        let body = r#"{"dataset":{"map":{
            "2021-06-02":{"open":2,"high":3,"low":1,"close":2.5},
            "2021-06-01":[1,2,0.5,1.5]
        }},"chunk":{"id":2021}}"#;
        let payload = ChunkPayload::parse(body, ChunkId(2021), &scheme).unwrap();

        let jun1 = date_to_position(NaiveDate::from_ymd_opt(2021, 6, 1).unwrap());
        assert_eq!(payload.data.positions, vec![jun1, jun1 + 1]);
        assert_eq!(payload.shape(), ValueShape::Ohlc);
        assert_eq!(
            payload.data.last(),
            Some((jun1 + 1, PointValue::Ohlc(Ohlc::new(2.0, 3.0, 1.0, 2.5))))
        );
    }

    #[test]
    fn shape_comes_from_first_non_null() {
        let body = r#"{"dataset":{"map":[null,[1,2,0,1]]},"chunk":{"id":0}}"#;
        let payload = ChunkPayload::parse(body, ChunkId(0), &height()).unwrap();
        assert_eq!(payload.shape(), ValueShape::Ohlc);
    }

    #[test]
    fn mixed_shapes_are_malformed() {
        let body = r#"{"dataset":{"map":[1.0,[1,2,0,1]]},"chunk":{"id":0}}"#;
        let err = ChunkPayload::parse(body, ChunkId(0), &height()).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn wrong_chunk_id_is_malformed() {
        let body = r#"{"dataset":{"map":[1.0]},"chunk":{"id":860000}}"#;
        assert!(ChunkPayload::parse(body, ChunkId(850_000), &height()).is_err());
    }

    #[test]
    fn garbage_body_is_malformed() {
        let err = ChunkPayload::parse("<html>502</html>", ChunkId(0), &height()).unwrap_err();
        assert!(matches!(err, FetchError::Malformed(_)));
    }

    #[test]
    fn empty_map_parses_to_empty_payload() {
        let body = r#"{"dataset":{"map":[]},"chunk":{"id":0}}"#;
        let payload = ChunkPayload::parse(body, ChunkId(0), &height()).unwrap();
        assert!(payload.is_empty());
    }

    #[test]
    fn same_tail_compares_last_entry_only() {
        let a = ChunkPayload::parse(
            r#"{"dataset":{"map":[1.0,2.0]},"chunk":{"id":0}}"#,
            ChunkId(0),
            &height(),
        )
        .unwrap();
        let b = ChunkPayload::parse(
            r#"{"dataset":{"map":[9.0,2.0]},"chunk":{"id":0}}"#,
            ChunkId(0),
            &height(),
        )
        .unwrap();
        let c = ChunkPayload::parse(
            r#"{"dataset":{"map":[1.0,2.0,3.0]},"chunk":{"id":0}}"#,
            ChunkId(0),
            &height(),
        )
        .unwrap();
        assert!(a.same_tail(&b));
        assert!(!a.same_tail(&c));
    }

    #[test]
    fn envelope_check_rejects_what_parse_would() {
        let ok = r#"{"dataset":{"map":{}},"chunk":{"id":2021}}"#;
        assert!(ChunkPayload::check_envelope(ok, ChunkId(2021)).is_ok());

        for bad in [
            "<html>maintenance</html>",
            r#"{"dataset":{"map":[1.0,"#,
            r#"{"dataset":{"map":[1.0]},"chunk":{"id":2020}}"#,
            r#"{"dataset":{"map":3},"chunk":{"id":2021}}"#,
        ] {
            assert!(matches!(
                ChunkPayload::check_envelope(bad, ChunkId(2021)),
                Err(FetchError::Malformed(_))
            ));
        }
    }
}

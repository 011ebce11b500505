//! Metric record types shared by the agent, the server, and the stores.
//!
//! A record is identified by its [`MetricKey`], the `(kind, name)` pair, so
//! a gauge and a counter may share a name without conflict. The kind lives
//! inside [`MetricValue`], which makes "exactly one of value/delta is set"
//! hold by construction; the optional-field form only exists on the wire
//! ([`RawMetric`]).

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::codec::CodecError;

// ── Kind ───────────────────────────────────────────────────────────

/// The two metric kinds understood by the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricKind {
    /// Point-in-time value, overwritten on every update.
    Gauge,
    /// Accumulator, every update adds to the stored value.
    Counter,
}

impl MetricKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Gauge => "gauge",
            MetricKind::Counter => "counter",
        }
    }

    /// The other kind. Used to tell "unknown" from "stored under the other kind".
    pub fn other(&self) -> MetricKind {
        match self {
            MetricKind::Gauge => MetricKind::Counter,
            MetricKind::Counter => MetricKind::Gauge,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MetricKind {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "gauge" => Ok(MetricKind::Gauge),
            "counter" => Ok(MetricKind::Counter),
            other => Err(CodecError::UnknownKind(other.to_string())),
        }
    }
}

// ── Value ──────────────────────────────────────────────────────────

/// A metric value tagged with its kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricValue {
    Gauge(f64),
    Counter(i64),
}

impl MetricValue {
    pub fn kind(&self) -> MetricKind {
        match self {
            MetricValue::Gauge(_) => MetricKind::Gauge,
            MetricValue::Counter(_) => MetricKind::Counter,
        }
    }

    /// Parse a textual value for the given kind, as carried by path-encoded
    /// updates. Gauges must be finite; counters must be integral.
    pub fn parse(kind: MetricKind, raw: &str) -> Result<Self, CodecError> {
        let invalid = || CodecError::InvalidValue {
            kind,
            raw: raw.to_string(),
        };
        match kind {
            MetricKind::Gauge => {
                let v: f64 = raw.parse().map_err(|_| invalid())?;
                if !v.is_finite() {
                    return Err(invalid());
                }
                Ok(MetricValue::Gauge(v))
            }
            MetricKind::Counter => raw.parse().map(MetricValue::Counter).map_err(|_| invalid()),
        }
    }
}

impl fmt::Display for MetricValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetricValue::Gauge(v) => write!(f, "{v}"),
            MetricValue::Counter(d) => write!(f, "{d}"),
        }
    }
}

// ── Record ─────────────────────────────────────────────────────────

/// Identity of a stored metric.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MetricKey {
    pub kind: MetricKind,
    pub name: String,
}

impl MetricKey {
    pub fn new(kind: MetricKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

/// A single metric as exchanged between agent and server and as persisted.
///
/// Serializes as `{"id", "type", "delta", "value"}` with the unused field
/// set to `null`. Deserialization rejects unknown kinds, empty names, and
/// records missing the field their kind requires.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawMetric", into = "RawMetric")]
pub struct MetricRecord {
    pub name: String,
    pub value: MetricValue,
}

impl MetricRecord {
    pub fn gauge(name: impl Into<String>, value: f64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Gauge(value),
        }
    }

    pub fn counter(name: impl Into<String>, delta: i64) -> Self {
        Self {
            name: name.into(),
            value: MetricValue::Counter(delta),
        }
    }

    pub fn kind(&self) -> MetricKind {
        self.value.kind()
    }

    pub fn key(&self) -> MetricKey {
        MetricKey::new(self.kind(), self.name.clone())
    }
}

/// Wire form of a [`MetricRecord`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMetric {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub delta: Option<i64>,
    pub value: Option<f64>,
}

impl TryFrom<RawMetric> for MetricRecord {
    type Error = CodecError;

    fn try_from(raw: RawMetric) -> Result<Self, Self::Error> {
        if raw.id.is_empty() {
            return Err(CodecError::EmptyName);
        }
        let kind: MetricKind = raw.kind.parse()?;
        let missing = |field| CodecError::MissingField {
            name: raw.id.clone(),
            kind,
            field,
        };
        let value = match kind {
            MetricKind::Gauge => MetricValue::Gauge(raw.value.ok_or_else(|| missing("value"))?),
            MetricKind::Counter => MetricValue::Counter(raw.delta.ok_or_else(|| missing("delta"))?),
        };
        Ok(MetricRecord { name: raw.id, value })
    }
}

impl From<MetricRecord> for RawMetric {
    fn from(record: MetricRecord) -> Self {
        let (delta, value) = match record.value {
            MetricValue::Gauge(v) => (None, Some(v)),
            MetricValue::Counter(d) => (Some(d), None),
        };
        RawMetric {
            id: record.name,
            kind: record.value.kind().as_str().to_string(),
            delta,
            value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_parses_known_names_only() {
        assert_eq!("gauge".parse::<MetricKind>().unwrap(), MetricKind::Gauge);
        assert_eq!("counter".parse::<MetricKind>().unwrap(), MetricKind::Counter);
        assert!(matches!(
            "coutner".parse::<MetricKind>(),
            Err(CodecError::UnknownKind(k)) if k == "coutner"
        ));
        assert!("Gauge".parse::<MetricKind>().is_err());
    }

    #[test]
    fn value_parse_rejects_wrong_shapes() {
        assert_eq!(
            MetricValue::parse(MetricKind::Gauge, "20.1").unwrap(),
            MetricValue::Gauge(20.1)
        );
        assert_eq!(
            MetricValue::parse(MetricKind::Counter, "-3").unwrap(),
            MetricValue::Counter(-3)
        );
        assert!(MetricValue::parse(MetricKind::Counter, "1.12").is_err());
        assert!(MetricValue::parse(MetricKind::Counter, "aaaaa").is_err());
        assert!(MetricValue::parse(MetricKind::Gauge, "aaaaa").is_err());
        assert!(MetricValue::parse(MetricKind::Gauge, "NaN").is_err());
        assert!(MetricValue::parse(MetricKind::Gauge, "inf").is_err());
    }

    #[test]
    fn value_display_is_compact() {
        assert_eq!(MetricValue::Gauge(20.1).to_string(), "20.1");
        assert_eq!(MetricValue::Gauge(10.0).to_string(), "10");
        assert_eq!(MetricValue::Gauge(233184.0).to_string(), "233184");
        assert_eq!(MetricValue::Counter(8).to_string(), "8");
    }

    #[test]
    fn record_wire_form_has_null_for_unused_field() {
        let json = serde_json::to_value(MetricRecord::counter("hits", 2)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "hits", "type": "counter", "delta": 2, "value": null})
        );

        let json = serde_json::to_value(MetricRecord::gauge("temp", 1.5)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"id": "temp", "type": "gauge", "delta": null, "value": 1.5})
        );
    }

    #[test]
    fn record_decode_requires_field_for_kind() {
        let ok: MetricRecord =
            serde_json::from_str(r#"{"id":"temp","type":"gauge","value":3.5}"#).unwrap();
        assert_eq!(ok, MetricRecord::gauge("temp", 3.5));

        // A counter carrying only `value` is missing its delta.
        assert!(serde_json::from_str::<MetricRecord>(r#"{"id":"hits","type":"counter","value":1}"#).is_err());
        assert!(serde_json::from_str::<MetricRecord>(r#"{"id":"temp","type":"gauge","delta":1}"#).is_err());
        assert!(serde_json::from_str::<MetricRecord>(r#"{"id":"x","type":"histogram","value":1}"#).is_err());
        assert!(serde_json::from_str::<MetricRecord>(r#"{"id":"","type":"gauge","value":1}"#).is_err());
    }

    #[test]
    fn record_decode_ignores_field_of_other_kind() {
        let rec: MetricRecord =
            serde_json::from_str(r#"{"id":"hits","type":"counter","delta":4,"value":9.5}"#).unwrap();
        assert_eq!(rec, MetricRecord::counter("hits", 4));
    }

    #[test]
    fn gauge_and_counter_with_same_name_have_distinct_keys() {
        let g = MetricRecord::gauge("load", 1.0);
        let c = MetricRecord::counter("load", 1);
        assert_ne!(g.key(), c.key());
        assert_eq!(g.key().kind.other(), c.key().kind);
    }
}

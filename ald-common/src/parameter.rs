//! Parameter metadata and sampled values (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque parameter identifier, e.g. `"chamber_temperature"`.
pub type ParameterId = String;

/// Data-type tag driving register <-> value coercion in the PLC gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Float,
    Integer,
    Boolean,
}

/// Canonical float scaling factor: a holding register stores `value * 100`.
///
/// Confirmed against `original_source` as a global convention, not a
/// per-parameter field (see SPEC_FULL.md §2, open question 1).
pub const FLOAT_SCALE: f64 = 100.0;

/// Parameter metadata, loaded once at startup and cached with a short TTL.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Parameter {
    pub id: ParameterId,
    pub name: String,
    pub modbus_address: u16,
    pub data_type: DataType,
    pub min_value: Option<f64>,
    pub max_value: Option<f64>,
    pub read_cadence_ms: Option<u64>,
    pub active: bool,
}

impl Parameter {
    /// Whether `value` lies within the declared bounds. Parameters without
    /// bounds accept any value.
    pub fn within_bounds(&self, value: f64) -> bool {
        if let Some(min) = self.min_value {
            if value < min {
                return false;
            }
        }
        if let Some(max) = self.max_value {
            if value > max {
                return false;
            }
        }
        true
    }
}

/// Sample quality, stamped by the PLC gateway on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quality {
    Good,
    Bad,
    Uncertain,
}

/// A single sampled (or write-echoed) parameter value. Immutable once
/// produced (spec.md §3).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterValue {
    pub parameter_id: ParameterId,
    pub value: f64,
    pub set_point: Option<f64>,
    pub timestamp: DateTime<Utc>,
    pub quality: Quality,
    pub source: String,
}

impl ParameterValue {
    pub fn good(parameter_id: impl Into<String>, value: f64, source: impl Into<String>) -> Self {
        Self {
            parameter_id: parameter_id.into(),
            value,
            set_point: None,
            timestamp: Utc::now(),
            quality: Quality::Good,
            source: source.into(),
        }
    }

    pub fn bad(parameter_id: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            parameter_id: parameter_id.into(),
            value: 0.0,
            set_point: None,
            timestamp: Utc::now(),
            quality: Quality::Bad,
            source: source.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn param(min: Option<f64>, max: Option<f64>) -> Parameter {
        Parameter {
            id: "p1".into(),
            name: "Pressure".into(),
            modbus_address: 10,
            data_type: DataType::Float,
            min_value: min,
            max_value: max,
            read_cadence_ms: None,
            active: true,
        }
    }

    #[test]
    fn bounds_accept_unbounded_parameter() {
        let p = param(None, None);
        assert!(p.within_bounds(f64::MAX));
        assert!(p.within_bounds(f64::MIN));
    }

    #[test]
    fn bounds_reject_out_of_range() {
        let p = param(Some(0.0), Some(100.0));
        assert!(p.within_bounds(50.0));
        assert!(!p.within_bounds(-1.0));
        assert!(!p.within_bounds(100.1));
    }
}

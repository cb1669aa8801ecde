//! Feature extraction from exported activity records.
//!
//! Each signal contributes one dimension: the squared activity count.
//! Squaring stretches the gap between small and large counts so extreme
//! values isolate in fewer partitions. Malformed input never drops a
//! record; it is coerced to 0 and counted so the caller can warn.

use serde::Serialize;
use serde_json::Value;

use vigil_core::{Observation, SignalType, UserId};

/// Numeric model input derived from one observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeatureVector(Vec<f64>);

impl FeatureVector {
    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }
}

impl AsRef<[f64]> for FeatureVector {
    fn as_ref(&self) -> &[f64] {
        &self.0
    }
}

/// Clamp to a finite, non-negative count and square it.
pub fn stabilize(raw_value: f64) -> f64 {
    let v = if raw_value.is_finite() && raw_value > 0.0 {
        raw_value
    } else {
        0.0
    };
    (v * v).min(f64::MAX)
}

pub fn extract(observation: &Observation) -> FeatureVector {
    FeatureVector(vec![stabilize(observation.raw_value)])
}

pub fn extract_batch(observations: &[Observation]) -> Vec<FeatureVector> {
    observations.iter().map(extract).collect()
}

/// Coerce a raw JSON count. Returns the count and whether coercion applied.
///
/// Accepts numbers and numeric strings (SQL `COUNT` results often arrive as
/// strings). Missing, null, negative, non-finite or non-numeric values
/// become 0.
pub fn coerce_count(value: Option<&Value>) -> (f64, bool) {
    let parsed = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    match parsed {
        Some(v) if v.is_finite() && v >= 0.0 => (v, false),
        _ => (0.0, true),
    }
}

/// Coerce a raw user id. Missing or malformed ids become 0.
pub fn coerce_user_id(value: Option<&Value>) -> (UserId, bool) {
    let parsed = match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64)),
        Some(Value::String(s)) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    match parsed {
        Some(id) => (id, false),
        None => (0, true),
    }
}

/// Observations built from one record file, plus how many needed coercion.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RecordBatch {
    pub observations: Vec<Observation>,
    /// Records with a malformed `user_id` or count field.
    pub coerced: usize,
}

/// Build a signal's observation batch from raw exported records.
pub fn observations_from_records(records: &[Value], signal: SignalType) -> RecordBatch {
    let mut batch = RecordBatch {
        observations: Vec::with_capacity(records.len()),
        coerced: 0,
    };
    for record in records {
        let (user_id, bad_id) = coerce_user_id(record.get("user_id"));
        let (count, bad_count) = coerce_count(record.get(signal.record_field()));
        if bad_id || bad_count {
            batch.coerced += 1;
        }
        batch
            .observations
            .push(Observation::new(user_id, signal, count));
    }
    batch
}

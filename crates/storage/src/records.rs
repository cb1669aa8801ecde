//! Exported activity record files.

use std::path::Path;

use serde_json::Value;
use tracing::{debug, warn};

/// Read a JSON record export.
///
/// Never fails: a missing, empty or unparsable file yields an empty batch
/// with a warning. A single top-level object is a one-record batch; any
/// other non-array value is ignored.
pub fn load_records(path: &Path) -> Vec<Value> {
    let text = match std::fs::read_to_string(path) {
        Ok(t) => t,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "record file unreadable, using empty batch");
            return Vec::new();
        }
    };
    if text.trim().is_empty() {
        warn!(path = %path.display(), "record file empty");
        return Vec::new();
    }

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Array(records)) => {
            debug!(path = %path.display(), records = records.len(), "records loaded");
            records
        }
        Ok(obj @ Value::Object(_)) => vec![obj],
        Ok(other) => {
            warn!(path = %path.display(), kind = json_kind(&other), "record file is not an array");
            Vec::new()
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "record file is not valid JSON");
            Vec::new()
        }
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

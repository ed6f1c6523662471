//! Canonical JSON
//!
//! Compact JSON with object keys sorted by byte order at every depth.
//! Arrays keep their order; strings and numbers use `serde_json` formatting.
//! Every hash and signature in the crate is computed over this form.

use serde::Serialize;
use serde_json::Value;

use crate::error::EvidenceError;

/// Serialize any value to its canonical JSON string.
pub fn to_canonical_string<T: Serialize + ?Sized>(data: &T) -> Result<String, EvidenceError> {
    let value = serde_json::to_value(data)?;
    let mut out = String::new();
    write_value(&value, &mut out)?;
    Ok(out)
}

/// Serialize any value to canonical JSON bytes.
pub fn to_canonical_bytes<T: Serialize + ?Sized>(data: &T) -> Result<Vec<u8>, EvidenceError> {
    to_canonical_string(data).map(String::into_bytes)
}

fn write_value(value: &Value, out: &mut String) -> Result<(), EvidenceError> {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(&serde_json::to_string(s)?),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out)?;
            }
            out.push(']');
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();

            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&serde_json::to_string(key)?);
                out.push(':');
                write_value(&map[key], out)?;
            }
            out.push('}');
        }
    }
    Ok(())
}

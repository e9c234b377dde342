// src/aicf/attest.rs
//
// Attestation canonicalization. Bundles arrive as loosely formatted JSON;
// before hashing they are normalized into one canonical byte layout so
// semantically equivalent bundles always yield the same job id:
//
//   • object keys sorted, compact separators, UTF-8
//   • integral floats lowered to integers
//   • remaining fractions rounded to 6 decimal places
//
// Canonicalization is a pure function; the job id binds (kind, spec,
// attestation, submitter, nonce) through it.

use serde_json::{Map, Number, Value};

use crate::error::CoreError;
use crate::types::{content_hash, Address, Hash32};
use crate::Result;

/// Round non-integral fractions to this many decimal places.
const FRACTION_DECIMALS: i32 = 6;

/* ---------------------------------------------------------------------
   Normalization
---------------------------------------------------------------------*/
fn normalize_number(n: &Number) -> Value {
    if n.is_i64() || n.is_u64() {
        return Value::Number(n.clone());
    }
    let f = n.as_f64().unwrap_or(0.0);
    if f.fract() == 0.0 && f.abs() < 9_007_199_254_740_992.0 {
        // Integral float: lower to an integer.
        return Value::Number(Number::from(f as i64));
    }
    let scale = 10f64.powi(FRACTION_DECIMALS);
    let rounded = (f * scale).round() / scale;
    Number::from_f64(rounded)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Recursively rebuild a JSON value into its canonical shape. Key order is
/// handled by the sorted map representation at serialization time.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Number(n) => normalize_number(n),
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        Value::Object(fields) => {
            let mut out = Map::new();
            for (k, v) in fields {
                out.insert(k.clone(), normalize(v));
            }
            Value::Object(out)
        }
        other => other.clone(),
    }
}

/// Validate and normalize an attestation bundle. Bundles must be JSON
/// objects; anything else is malformed.
pub fn normalize_attestation(bundle: &Value) -> Result<Value> {
    if !bundle.is_object() {
        return Err(CoreError::BadAttestation(
            "attestation bundle must be a JSON object".into(),
        ));
    }
    Ok(normalize(bundle))
}

/// Canonical UTF-8 bytes of a normalized value: sorted keys, compact
/// separators.
pub fn canonical_bytes(value: &Value) -> Vec<u8> {
    let mut out = Vec::new();
    write_canonical(&mut out, value);
    out
}

fn write_canonical(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Object(fields) => {
            let mut keys: Vec<&String> = fields.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(
                    serde_json::to_string(key).unwrap_or_default().as_bytes(),
                );
                out.push(b':');
                write_canonical(out, &fields[*key]);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(out, item);
            }
            out.push(b']');
        }
        other => {
            out.extend_from_slice(serde_json::to_string(other).unwrap_or_default().as_bytes());
        }
    }
}

pub fn attestation_digest(bundle: &Value) -> Result<Hash32> {
    let normalized = normalize_attestation(bundle)?;
    Ok(content_hash(&canonical_bytes(&normalized)))
}

/* ---------------------------------------------------------------------
   Job id
---------------------------------------------------------------------*/

/// `job_id = H(canonical{kind, spec, attestation, submitter, nonce})`.
/// Equivalent attestations (key order, whitespace, integral floats) hash
/// identically.
pub fn job_id(
    kind: &str,
    spec: &Value,
    attestation: &Value,
    submitter: &Address,
    nonce: u64,
) -> Result<Hash32> {
    let normalized_attestation = normalize_attestation(attestation)?;
    let envelope = serde_json::json!({
        "kind": kind,
        "spec": normalize(spec),
        "attestation": normalized_attestation,
        "submitter": submitter.to_string(),
        "nonce": nonce,
    });
    Ok(content_hash(&canonical_bytes(&envelope)))
}

/* ---------------------------------------------------------------------
   Tests
---------------------------------------------------------------------*/

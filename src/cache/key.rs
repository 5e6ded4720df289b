//! Deterministic cache key derivation
//!
//! A key is the SHA-256 digest of (model id, operation, input, params).
//! Each component is length-prefixed before hashing so adjacent components
//! cannot collide ("ab"+"c" vs "a"+"bc"), and params are serialized with
//! recursively sorted object keys so two semantically identical parameter
//! maps always produce the same key regardless of insertion order.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Derive the cache key for one inference call
pub fn derive_key(model_id: &str, operation: &str, input: &str, params: &Value) -> String {
    let mut hasher = Sha256::new();

    for component in [model_id, operation, input] {
        hasher.update((component.len() as u64).to_le_bytes());
        hasher.update(component.as_bytes());
    }

    let mut canon = Vec::new();
    write_canonical(params, &mut canon);
    hasher.update((canon.len() as u64).to_le_bytes());
    hasher.update(&canon);

    hex_encode(&hasher.finalize())
}

/// Serialize a JSON value with object keys in sorted order at every level
fn write_canonical(value: &Value, out: &mut Vec<u8>) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push(b'{');
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                out.extend_from_slice(format!("{:?}:", key).as_bytes());
                write_canonical(&map[key.as_str()], out);
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out);
            }
            out.push(b']');
        }
        // Scalars already have a single serde_json rendering
        other => out.extend_from_slice(other.to_string().as_bytes()),
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        s.push_str(&format!("{:02x}", b));
    }
    s
}

//! Pipeline hashing.
//!
//! A phash identifies "the pipeline up to and including step N" for one
//! file column. It is a recipe hash, not a content hash: two pipelines with
//! the same file, column, components and parameter values always hash the
//! same, so the digest doubles as cache file stem and job deduplication key.

use serde_json::{json, Value};
use sha2::{Digest, Sha224};

use crate::models::Step;

/// Parameter keys that carry form bookkeeping rather than settings.
pub const BOOKKEEPING_KEYS: [&str; 2] = ["_position", "_internal_type_marker"];

/// Hash the `(file, column)` pair followed by every step of `prefix`.
///
/// Each element is hashed as its canonical JSON text, in order. Parameters
/// are sorted by key with bookkeeping keys removed.
pub fn phash(file_name: &str, text_column: &str, prefix: &[Step]) -> String {
    let mut hasher = Sha224::new();
    hasher.update(json!([file_name, text_column]).to_string().as_bytes());
    for step in prefix {
        hasher.update(canonical_step(step).to_string().as_bytes());
    }
    hex::encode(hasher.finalize())
}

fn canonical_step(step: &Step) -> Value {
    // `Params` is a BTreeMap, so iteration is already key-sorted.
    let params: Vec<Value> = step
        .params
        .iter()
        .filter(|(k, _)| !BOOKKEEPING_KEYS.contains(&k.as_str()))
        .map(|(k, v)| json!([k, v.to_json()]))
        .collect();
    json!([step.component, params])
}

use crate::value::Value;
use xxhash_rust::xxh3::Xxh3;

/// Value-hash format version byte used by canonical digest encoding.
pub(crate) const VALUE_HASH_VERSION: u8 = 1;

/// Stable XXH3 seed used by hashed shard-key parts.
pub(crate) const VALUE_HASH_SEED: u64 = 0;

/// Canonical 64-bit digest of a value, used by hashed shard-key parts.
///
/// The encoding feeds the canonical rank before the payload so that values
/// of different variants can never collide through payload aliasing.
#[must_use]
pub fn value_hash(value: &Value) -> u64 {
    let mut hasher = Xxh3::with_seed(VALUE_HASH_SEED);
    hasher.update(&[VALUE_HASH_VERSION]);
    feed_value(&mut hasher, value);
    hasher.digest()
}

fn feed_value(hasher: &mut Xxh3, value: &Value) {
    hasher.update(&[value.canonical_rank()]);

    match value {
        Value::Nothing | Value::Undefined | Value::Null => {}
        Value::Int(v) => hasher.update(&v.to_be_bytes()),
        Value::Float(v) => hasher.update(&v.to_bits().to_be_bytes()),
        Value::Text(v) => {
            hasher.update(&(v.len() as u64).to_be_bytes());
            hasher.update(v.as_bytes());
        }
        Value::Bool(v) => hasher.update(&[u8::from(*v)]),
        Value::Timestamp(v) => hasher.update(&v.to_be_bytes()),
        Value::RecordId(v) => hasher.update(&v.to_be_bytes()),
        Value::Array(items) => {
            hasher.update(&(items.len() as u64).to_be_bytes());
            for item in items {
                feed_value(hasher, item);
            }
        }
        Value::Object(fields) => {
            hasher.update(&(fields.len() as u64).to_be_bytes());
            for (name, field_value) in fields {
                hasher.update(&(name.len() as u64).to_be_bytes());
                hasher.update(name.as_bytes());
                feed_value(hasher, field_value);
            }
        }
    }
}

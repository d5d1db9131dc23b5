use crate::value::Value;

///
/// Canonical Value Rank
///
/// Stable rank used for cross-variant ordering.
///
/// IMPORTANT:
/// Rank order is part of deterministic sort behavior and must remain fixed.
/// In particular `Nothing`, `Undefined`, and `Null` occupy three distinct
/// ranks: the sort-key sentinel for an empty leaf array (`Undefined`) must
/// never collapse into the missing-field key (`Null`).
///
#[must_use]
pub const fn canonical_rank(value: &Value) -> u8 {
    match value {
        Value::Nothing => 0,
        Value::Undefined => 1,
        Value::Null => 2,
        Value::Int(_) | Value::Float(_) => 3,
        Value::Text(_) => 4,
        Value::Object(_) => 5,
        Value::Array(_) => 6,
        Value::Bool(_) => 7,
        Value::Timestamp(_) => 8,
        Value::RecordId(_) => 9,
    }
}

use crate::value::Value;
use num_traits::ToPrimitive;
use std::cmp::Ordering;

/// Total canonical comparator used by sort-key folds, merge keys, and
/// de-duplication.
///
/// Ordering rules:
/// 1. Canonical variant rank
/// 2. Variant-specific comparison for same-ranked values
///
/// `Int` and `Float` share a rank and compare numerically; all other
/// mixed-variant comparisons are rank-only and deterministic.
#[must_use]
pub fn canonical_cmp(left: &Value, right: &Value) -> Ordering {
    let rank = left.canonical_rank().cmp(&right.canonical_rank());
    if rank != Ordering::Equal {
        return rank;
    }

    canonical_cmp_same_rank(left, right)
}

fn canonical_cmp_same_rank(left: &Value, right: &Value) -> Ordering {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a.cmp(b),
        (Value::Float(a), Value::Float(b)) => a.total_cmp(b),
        (Value::Int(a), Value::Float(b)) => numeric_widen(*a).total_cmp(b),
        (Value::Float(a), Value::Int(b)) => a.total_cmp(&numeric_widen(*b)),
        (Value::Text(a), Value::Text(b)) => a.cmp(b),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        (Value::Timestamp(a), Value::Timestamp(b)) => a.cmp(b),
        (Value::RecordId(a), Value::RecordId(b)) => a.cmp(b),
        (Value::Array(a), Value::Array(b)) => canonical_cmp_list(a, b),
        (Value::Object(a), Value::Object(b)) => canonical_cmp_object(a, b),
        (Value::Nothing, Value::Nothing)
        | (Value::Undefined, Value::Undefined)
        | (Value::Null, Value::Null) => Ordering::Equal,
        _ => Ordering::Equal,
    }
}

// i64 widening for cross-width numeric ordering. Values beyond the f64
// mantissa lose precision here, matching the execution engine's numeric
// comparison contract.
fn numeric_widen(value: i64) -> f64 {
    value.to_f64().unwrap_or(f64::NAN)
}

fn canonical_cmp_list(left: &[Value], right: &[Value]) -> Ordering {
    for (left, right) in left.iter().zip(right.iter()) {
        let cmp = canonical_cmp(left, right);
        if cmp != Ordering::Equal {
            return cmp;
        }
    }

    left.len().cmp(&right.len())
}

fn canonical_cmp_object(left: &[(String, Value)], right: &[(String, Value)]) -> Ordering {
    for ((left_name, left_value), (right_name, right_value)) in left.iter().zip(right.iter()) {
        let name_cmp = left_name.cmp(right_name);
        if name_cmp != Ordering::Equal {
            return name_cmp;
        }

        let value_cmp = canonical_cmp(left_value, right_value);
        if value_cmp != Ordering::Equal {
            return value_cmp;
        }
    }

    left.len().cmp(&right.len())
}

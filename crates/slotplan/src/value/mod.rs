mod compare;
mod hash;
mod rank;


use serde::{Deserialize, Serialize};

// re-exports
pub use compare::canonical_cmp;
pub use hash::value_hash;
pub use rank::canonical_rank;

///
/// Value
///
/// Dynamically typed document value as seen by compiled expressions and
/// mock scans. `Nothing` is the explicit "no value" marker used to bind
/// declared-but-unreachable outputs; `Undefined` is the sort-key sentinel
/// produced for empty leaf arrays and ranks differently from both
/// `Nothing` and `Null`.
///
/// Objects preserve field order; reconstruction and projection semantics
/// depend on it.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Nothing,
    Undefined,
    Null,
    Int(i64),
    Float(f64),
    Text(String),
    Object(Vec<(String, Value)>),
    Array(Vec<Value>),
    Bool(bool),
    Timestamp(u64),
    RecordId(i64),
}

impl Value {
    #[must_use]
    pub const fn is_nothing(&self) -> bool {
        matches!(self, Self::Nothing)
    }

    #[must_use]
    pub const fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    #[must_use]
    pub const fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    /// Read a field from an object value. Non-objects and absent fields
    /// both yield `None`.
    #[must_use]
    pub fn get_field(&self, name: &str) -> Option<&Self> {
        match self {
            Self::Object(fields) => fields
                .iter()
                .find(|(field, _)| field == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Construct an object value from ordered field pairs.
    #[must_use]
    pub fn object(fields: impl IntoIterator<Item = (impl Into<String>, Self)>) -> Self {
        Self::Object(
            fields
                .into_iter()
                .map(|(name, value)| (name.into(), value))
                .collect(),
        )
    }

    #[must_use]
    pub const fn canonical_rank(&self) -> u8 {
        rank::canonical_rank(self)
    }
}

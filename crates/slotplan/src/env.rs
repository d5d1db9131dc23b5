use crate::{
    error::InternalError,
    interface::{ReadGate, ShardOwnershipOracle, TextMatcher},
    slot::{SlotGenerator, SlotId},
    value::Value,
};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

///
/// WELL-KNOWN ENVIRONMENT NAMES
///

/// Time-zone table for datetime expression evaluation. Always registered.
pub const TIME_ZONE_DB: &str = "time_zone_db";

/// Query collation handle. Registered only when the query carries one.
pub const COLLATION: &str = "collation";

/// Last-seen record id for tailable-scan resumption. Registered by the
/// tailable union builder; written by the execution engine across yields.
pub const RESUME_RECORD_ID: &str = "resume_record_id";

/// Storage read gate handle. Registered when the query context carries one.
pub const READ_GATE: &str = "read_gate";

/// Shard-ownership oracle handle. Registered on first shard-filter build.
pub const SHARD_ORACLE: &str = "shard_oracle";

/// Name prefix for per-index text matcher handles.
pub const TEXT_MATCHER_PREFIX: &str = "text_matcher";

///
/// TextMode
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TextMode {
    Cs, // case-sensitive
    Ci, // case-insensitive
}

///
/// Collation
///
/// Shared comparison-key transform applied to leaf values before ranking.
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Collation {
    pub mode: TextMode,
}

impl Collation {
    #[must_use]
    pub const fn new(mode: TextMode) -> Self {
        Self { mode }
    }

    /// Transform a value into its comparison key under this collation.
    /// Non-text scalars pass through; containers are transformed
    /// recursively.
    #[must_use]
    pub fn comparison_key(&self, value: &Value) -> Value {
        match (self.mode, value) {
            (TextMode::Cs, _) => value.clone(),
            (TextMode::Ci, Value::Text(text)) => Value::Text(text.to_lowercase()),
            (TextMode::Ci, Value::Array(items)) => {
                Value::Array(items.iter().map(|item| self.comparison_key(item)).collect())
            }
            (TextMode::Ci, Value::Object(fields)) => Value::Object(
                fields
                    .iter()
                    .map(|(name, field)| (name.clone(), self.comparison_key(field)))
                    .collect(),
            ),
            (TextMode::Ci, other) => other.clone(),
        }
    }
}

///
/// TimeZoneDb
///
/// Named-zone offset table shared by datetime expressions across the whole
/// plan. Registered once per compilation.
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct TimeZoneDb {
    zones: Vec<(String, i32)>,
}

impl Default for TimeZoneDb {
    fn default() -> Self {
        Self {
            zones: vec![("UTC".to_string(), 0)],
        }
    }
}

impl TimeZoneDb {
    #[must_use]
    pub fn offset_minutes(&self, zone: &str) -> Option<i32> {
        self.zones
            .iter()
            .find(|(name, _)| name == zone)
            .map(|(_, offset)| *offset)
    }
}

///
/// EnvValue
///
/// One named, globally shared value readable by reference from any
/// operator in the compiled tree. `Marker` entries hold plain values that
/// the execution engine may overwrite across yield points (e.g. the
/// tailable resume record id).
///

#[derive(Clone)]
pub enum EnvValue {
    Collation(Collation),
    TimeZones(TimeZoneDb),
    Marker(Value),
    TextMatcher(Arc<dyn TextMatcher>),
    ShardOracle(Arc<dyn ShardOwnershipOracle>),
    ReadGate(Arc<dyn ReadGate>),
}

impl fmt::Debug for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Collation(collation) => write!(f, "Collation({collation:?})"),
            Self::TimeZones(_) => write!(f, "TimeZones"),
            Self::Marker(value) => write!(f, "Marker({value:?})"),
            Self::TextMatcher(_) => write!(f, "TextMatcher"),
            Self::ShardOracle(_) => write!(f, "ShardOracle"),
            Self::ReadGate(_) => write!(f, "ReadGate"),
        }
    }
}

///
/// RuntimeEnvironment
///
/// Compilation-scoped table of named shared values, each addressed by a
/// dedicated slot id. Entries are registered once, before or during tree
/// construction, and never removed; registering a duplicate name is an
/// invariant violation.
///

#[derive(Debug, Default)]
pub struct RuntimeEnvironment {
    entries: Vec<(String, SlotId, EnvValue)>,
}

impl RuntimeEnvironment {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Register a named value and allocate its slot.
    pub fn register(
        &mut self,
        name: &str,
        value: EnvValue,
        slots: &mut SlotGenerator,
    ) -> Result<SlotId, InternalError> {
        if self.slot(name).is_some() {
            return Err(InternalError::env_invariant(format!(
                "environment name '{name}' registered twice"
            )));
        }

        let slot = slots.generate();
        self.entries.push((name.to_string(), slot, value));

        Ok(slot)
    }

    /// Slot bound to `name`, if registered.
    #[must_use]
    pub fn slot(&self, name: &str) -> Option<SlotId> {
        self.entries
            .iter()
            .find(|(entry, _, _)| entry == name)
            .map(|(_, slot, _)| *slot)
    }

    /// Value registered under `slot`, if any.
    #[must_use]
    pub fn value_for_slot(&self, slot: SlotId) -> Option<&EnvValue> {
        self.entries
            .iter()
            .find(|(_, entry, _)| *entry == slot)
            .map(|(_, _, value)| value)
    }

    /// Collation handle, if one was registered.
    #[must_use]
    pub fn collation(&self) -> Option<&Collation> {
        self.entries.iter().find_map(|(_, _, value)| match value {
            EnvValue::Collation(collation) => Some(collation),
            _ => None,
        })
    }

    /// Append `name=slot` pairs to a plan debug rendering.
    pub(crate) fn debug_string_into(&self, out: &mut String) {
        for (name, slot, _) in &self.entries {
            out.push_str(&format!("{name}={slot} "));
        }
    }
}

///
/// TESTS
///

use serde::{Deserialize, Serialize};
use std::fmt;

///
/// FieldPath
///
/// Dotted document path split into non-empty segments. Used by key
/// patterns, sort patterns, and shard-key parts.
///

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parse a dotted path. Rejects empty paths and empty segments.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        if raw.is_empty() {
            return None;
        }

        let segments: Vec<String> = raw.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return None;
        }

        Some(Self { segments })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.segments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Whether `level` names the last path segment.
    #[must_use]
    pub fn is_leaf(&self, level: usize) -> bool {
        level + 1 == self.segments.len()
    }

    #[must_use]
    pub fn segment(&self, level: usize) -> &str {
        &self.segments[level]
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// First path segment.
    #[must_use]
    pub fn head(&self) -> &str {
        &self.segments[0]
    }

    /// Full dotted rendering of the path.
    #[must_use]
    pub fn dotted(&self) -> String {
        self.segments.join(".")
    }

    /// Whether `self` is a strict ancestor of `other` (e.g. `a` of `a.b`).
    #[must_use]
    pub fn is_ancestor_of(&self, other: &Self) -> bool {
        self.segments.len() < other.segments.len()
            && self
                .segments
                .iter()
                .zip(other.segments.iter())
                .all(|(a, b)| a == b)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.dotted())
    }
}

///
/// TESTS
///

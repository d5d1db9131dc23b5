//! Input vocabulary: the optimizer-produced logical solution tree and the
//! per-query context that accompanies it into compilation.

use crate::{interface::ReadGate, path::FieldPath, value::Value};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

///
/// CollectionId
///

#[derive(Clone, Debug, Eq, Hash, PartialEq, Serialize, Deserialize)]
pub struct CollectionId(pub String);

impl fmt::Display for CollectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

///
/// ScanDirection
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub enum ScanDirection {
    #[default]
    Forward,
    Backward,
}

///
/// SortDirection
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum SortDirection {
    Ascending,
    Descending,
}

///
/// SortPart
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SortPart {
    pub path: FieldPath,
    pub direction: SortDirection,
}

///
/// SortPattern
///
/// Ordered list of sort parts. The part order is the key significance
/// order.
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SortPattern {
    pub parts: Vec<SortPart>,
}

impl SortPattern {
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Distinct first segments across all parts, in first-seen order.
    #[must_use]
    pub fn distinct_head_segments(&self) -> Vec<&str> {
        let mut heads: Vec<&str> = Vec::new();
        for part in &self.parts {
            let head = part.path.head();
            if !heads.contains(&head) {
                heads.push(head);
            }
        }
        heads
    }
}

///
/// KeyOrdering
///
/// Per-component ordering of an index or shard key pattern.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum KeyOrdering {
    Ascending,
    Descending,
    Hashed,
}

///
/// KeyPattern
///
/// Ordered key components (index key pattern or shard key pattern).
/// Component order defines the key layout; positions are zero-based.
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct KeyPattern {
    pub parts: Vec<(FieldPath, KeyOrdering)>,
}

impl KeyPattern {
    #[must_use]
    pub fn len(&self) -> usize {
        self.parts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Zero-based position of `path` in this pattern, if present.
    #[must_use]
    pub fn position(&self, path: &FieldPath) -> Option<usize> {
        self.parts.iter().position(|(part, _)| part == path)
    }

    #[must_use]
    pub fn contains(&self, path: &FieldPath) -> bool {
        self.position(path).is_some()
    }

    #[must_use]
    pub fn paths(&self) -> impl Iterator<Item = &FieldPath> {
        self.parts.iter().map(|(path, _)| path)
    }
}

///
/// IndexDescriptor
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct IndexDescriptor {
    pub name: String,
    pub key_pattern: KeyPattern,
}

///
/// IndexBounds
///
/// Simple single-interval bounds over the full composite key.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct IndexBounds {
    pub start_key: Value,
    pub start_inclusive: bool,
    pub end_key: Value,
    pub end_inclusive: bool,
}

///
/// CompareOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum CompareOp {
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
}

///
/// Predicate
///
/// Logical filter AST, lowered to scalar expressions by the caller's
/// expression sub-compiler.
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    Compare {
        path: FieldPath,
        op: CompareOp,
        value: Value,
    },
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
    Not(Box<Predicate>),
    Exists(FieldPath),
}

///
/// Projection
///
/// Logical projection AST for the general (default) projection path.
///

#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Projection {
    Include(Vec<String>),
    Exclude(Vec<String>),
}

///
/// CollectionScanNode
///

#[derive(Clone, Debug, PartialEq)]
pub struct CollectionScanNode {
    pub filter: Option<Predicate>,
    pub direction: ScanDirection,
    pub tailable: bool,
    pub track_latest_timestamp: bool,
    pub request_resume_token: bool,
}

///
/// VirtualScanKind
///
/// What each row of a virtual scan represents: full documents, or index
/// key entries laid out per `index_key_pattern`.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum VirtualScanKind {
    Documents,
    IndexKeys,
}

///
/// VirtualScanNode
///
/// In-memory mock scan over caller-supplied rows. When `has_record_id` is
/// set, each row is a two-element array of record id then payload.
///

#[derive(Clone, Debug, PartialEq)]
pub struct VirtualScanNode {
    pub docs: Vec<Value>,
    pub has_record_id: bool,
    pub kind: VirtualScanKind,
    pub index_key_pattern: Option<KeyPattern>,
}

///
/// IndexScanNode
///

#[derive(Clone, Debug, PartialEq)]
pub struct IndexScanNode {
    pub index: IndexDescriptor,
    pub bounds: IndexBounds,
    pub direction: ScanDirection,
    /// Also surface the key-value and key-pattern metadata used by
    /// return-key answers.
    pub add_key_metadata: bool,
}

///
/// LogicalNode
///
/// The optimizer's physical-access-plan tree. Each variant maps to one
/// build operation.
///

#[derive(Clone, Debug, PartialEq)]
pub enum LogicalNode {
    CollectionScan(CollectionScanNode),
    VirtualScan(VirtualScanNode),
    IndexScan(IndexScanNode),
    Fetch {
        child: Box<LogicalNode>,
        filter: Option<Predicate>,
    },
    Limit {
        child: Box<LogicalNode>,
        limit: u64,
    },
    Skip {
        child: Box<LogicalNode>,
        skip: u64,
    },
    Sort {
        child: Box<LogicalNode>,
        pattern: SortPattern,
        limit: Option<u64>,
    },
    SortKeyGenerator {
        child: Box<LogicalNode>,
        pattern: SortPattern,
    },
    SortMerge {
        children: Vec<LogicalNode>,
        pattern: SortPattern,
        dedup: bool,
    },
    ProjectionSimple {
        child: Box<LogicalNode>,
        fields: Vec<String>,
    },
    ProjectionCovered {
        child: Box<LogicalNode>,
        fields: Vec<String>,
        covered_key: KeyPattern,
    },
    ProjectionDefault {
        child: Box<LogicalNode>,
        projection: Projection,
    },
    Or {
        children: Vec<LogicalNode>,
        dedup: bool,
        filter: Option<Predicate>,
    },
    AndHash {
        children: Vec<LogicalNode>,
    },
    AndSorted {
        children: Vec<LogicalNode>,
    },
    TextMatch {
        child: Box<LogicalNode>,
        index_name: String,
        query: String,
    },
    ReturnKey {
        child: Box<LogicalNode>,
    },
    ShardFilter {
        child: Box<LogicalNode>,
    },
    EmptySet,
}

impl LogicalNode {
    /// Stable node-kind label used for tracing and debug output.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::CollectionScan(_) => "collection_scan",
            Self::VirtualScan(_) => "virtual_scan",
            Self::IndexScan(_) => "index_scan",
            Self::Fetch { .. } => "fetch",
            Self::Limit { .. } => "limit",
            Self::Skip { .. } => "skip",
            Self::Sort { .. } => "sort",
            Self::SortKeyGenerator { .. } => "sort_key_generator",
            Self::SortMerge { .. } => "sort_merge",
            Self::ProjectionSimple { .. } => "projection_simple",
            Self::ProjectionCovered { .. } => "projection_covered",
            Self::ProjectionDefault { .. } => "projection_default",
            Self::Or { .. } => "or",
            Self::AndHash { .. } => "and_hash",
            Self::AndSorted { .. } => "and_sorted",
            Self::TextMatch { .. } => "text_match",
            Self::ReturnKey { .. } => "return_key",
            Self::ShardFilter { .. } => "shard_filter",
            Self::EmptySet => "empty_set",
        }
    }

    /// Child nodes in plan order.
    #[must_use]
    pub fn children(&self) -> Vec<&LogicalNode> {
        match self {
            Self::CollectionScan(_) | Self::VirtualScan(_) | Self::IndexScan(_) | Self::EmptySet => {
                Vec::new()
            }
            Self::Fetch { child, .. }
            | Self::Limit { child, .. }
            | Self::Skip { child, .. }
            | Self::Sort { child, .. }
            | Self::SortKeyGenerator { child, .. }
            | Self::ProjectionSimple { child, .. }
            | Self::ProjectionCovered { child, .. }
            | Self::ProjectionDefault { child, .. }
            | Self::TextMatch { child, .. }
            | Self::ReturnKey { child }
            | Self::ShardFilter { child } => vec![child.as_ref()],
            Self::SortMerge { children, .. }
            | Self::Or { children, .. }
            | Self::AndHash { children }
            | Self::AndSorted { children } => children.iter().collect(),
        }
    }

    /// Whether this subtree materializes full documents (as opposed to
    /// covered index data only).
    #[must_use]
    pub fn fetched(&self) -> bool {
        match self {
            Self::CollectionScan(_) | Self::Fetch { .. } => true,
            Self::VirtualScan(scan) => scan.kind == VirtualScanKind::Documents,
            Self::IndexScan(_) | Self::EmptySet => false,
            Self::SortMerge { children, .. }
            | Self::Or { children, .. }
            | Self::AndHash { children }
            | Self::AndSorted { children } => children.iter().any(LogicalNode::fetched),
            Self::Limit { child, .. }
            | Self::Skip { child, .. }
            | Self::Sort { child, .. }
            | Self::SortKeyGenerator { child, .. }
            | Self::ProjectionSimple { child, .. }
            | Self::ProjectionCovered { child, .. }
            | Self::ProjectionDefault { child, .. }
            | Self::TextMatch { child, .. }
            | Self::ReturnKey { child }
            | Self::ShardFilter { child } => child.fetched(),
        }
    }

    /// First collection-scan descendant, if any (self included).
    #[must_use]
    pub fn find_collection_scan(&self) -> Option<&CollectionScanNode> {
        if let Self::CollectionScan(scan) = self {
            return Some(scan);
        }
        self.children()
            .iter()
            .find_map(|child| child.find_collection_scan())
    }

    /// First virtual-scan descendant, if any (self included).
    #[must_use]
    pub fn find_virtual_scan(&self) -> Option<&VirtualScanNode> {
        if let Self::VirtualScan(scan) = self {
            return Some(scan);
        }
        self.children()
            .iter()
            .find_map(|child| child.find_virtual_scan())
    }

    /// First index-scan descendant, if any (self included).
    #[must_use]
    pub fn find_index_scan(&self) -> Option<&IndexScanNode> {
        if let Self::IndexScan(scan) = self {
            return Some(scan);
        }
        self.children()
            .iter()
            .find_map(|child| child.find_index_scan())
    }
}

///
/// QuerySolution
///

#[derive(Clone, Debug, PartialEq)]
pub struct QuerySolution {
    pub root: LogicalNode,
}

impl QuerySolution {
    #[must_use]
    pub const fn new(root: LogicalNode) -> Self {
        Self { root }
    }
}

///
/// QueryContext
///
/// Per-query knobs that accompany the solution into compilation. The
/// tailable flag comes from the query level, not the scan node, so the
/// builder can decide up front whether a resume union is needed.
///

#[derive(Clone)]
pub struct QueryContext {
    pub collation: Option<crate::env::Collation>,
    pub tailable: bool,
    pub sort_memory_budget_bytes: u64,
    pub allow_disk_use: bool,
    pub read_gate: Option<Arc<dyn ReadGate>>,
}

impl fmt::Debug for QueryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryContext")
            .field("collation", &self.collation)
            .field("tailable", &self.tailable)
            .field("sort_memory_budget_bytes", &self.sort_memory_budget_bytes)
            .field("allow_disk_use", &self.allow_disk_use)
            .field("read_gate", &self.read_gate.is_some())
            .finish()
    }
}

impl Default for QueryContext {
    fn default() -> Self {
        Self {
            collation: None,
            tailable: false,
            sort_memory_budget_bytes: 100 * 1024 * 1024,
            allow_disk_use: false,
            read_gate: None,
        }
    }
}

///
/// TESTS
///

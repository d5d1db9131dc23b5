//! Output vocabulary: the physical operator tree handed to the execution
//! engine.
//!
//! Stages are plain data with strict parent ownership. Slots referenced by
//! a stage are either bound by that stage (outputs) or by a descendant
//! (inputs); the environment's slots are readable from anywhere.

use crate::{
    build::IndexKeySet,
    expr::Expr,
    logical::{CollectionId, IndexBounds, KeyPattern, ScanDirection, SortDirection},
    slot::SlotId,
    value::Value,
};

///
/// CollectionScanStage
///
/// Full collection scan. `read_gate`, when present, names the environment
/// slot holding the storage gating callback invoked per fetched row.
/// `resume_from` names the environment marker slot a tailable resume
/// branch seeks past before emitting rows.
///

#[derive(Clone, Debug, PartialEq)]
pub struct CollectionScanStage {
    pub collection: CollectionId,
    pub result: SlotId,
    pub record_id: SlotId,
    pub direction: ScanDirection,
    pub resume_from: Option<SlotId>,
    pub latest_timestamp: Option<SlotId>,
    pub track_resume: bool,
    pub read_gate: Option<SlotId>,
}

///
/// SeekStage
///
/// Single-row point lookup keyed by the record id found in `seek_slot`
/// (correlated from the enclosing loop join's outer side).
///

#[derive(Clone, Debug, PartialEq)]
pub struct SeekStage {
    pub collection: CollectionId,
    pub seek_slot: SlotId,
    pub result: SlotId,
    pub record_id: SlotId,
    pub read_gate: Option<SlotId>,
}

///
/// IndexSeekStage
///
/// Bounded index range scan. `components` names which key-pattern
/// positions are individually exposed; `key_slots` binds them in the same
/// order. Raw key objects and rehydrated documents are assembled above
/// this stage by projection expressions over the component slots.
///

#[derive(Clone, Debug, PartialEq)]
pub struct IndexSeekStage {
    pub index_name: String,
    pub key_pattern: KeyPattern,
    pub bounds: IndexBounds,
    pub direction: ScanDirection,
    pub components: IndexKeySet,
    pub key_slots: Vec<SlotId>,
    pub record_id: Option<SlotId>,
    pub read_gate: Option<SlotId>,
}

///
/// SortStage
///

#[derive(Clone, Debug, PartialEq)]
pub struct SortStage {
    pub input: Box<Stage>,
    pub order_by: Vec<SlotId>,
    pub directions: Vec<SortDirection>,
    /// Non-key slots carried through the sort unchanged.
    pub forwarded: Vec<SlotId>,
    pub limit: Option<u64>,
    pub memory_budget_bytes: u64,
    pub allow_disk_use: bool,
}

///
/// FieldBehavior
///
/// Whether `MakeObject::fields` names fields to keep from the root or
/// fields to drop from it.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FieldBehavior {
    Keep,
    Drop,
}

///
/// Stage
///

#[derive(Clone, Debug, PartialEq)]
pub enum Stage {
    CollectionScan(CollectionScanStage),

    Seek(SeekStage),

    IndexSeek(IndexSeekStage),

    /// In-memory scan over constant rows; row `i` binds `slots`
    /// positionally from `rows[i]`.
    VirtualScan {
        rows: Vec<Vec<Value>>,
        slots: Vec<SlotId>,
    },

    /// Zero-slot infinite row source; always paired with a limit.
    CoScan,

    LimitSkip {
        input: Box<Stage>,
        limit: Option<u64>,
        skip: Option<u64>,
    },

    /// Bind each slot to its expression's value, once per input row.
    Project {
        input: Box<Stage>,
        bindings: Vec<(SlotId, Expr)>,
    },

    /// Document construction: start from the object in `root` (or an
    /// empty object), keep or drop `fields`, then append `computed`
    /// name/slot pairs in order. Binds `output`.
    MakeObject {
        input: Box<Stage>,
        output: SlotId,
        root: Option<SlotId>,
        behavior: FieldBehavior,
        fields: Vec<String>,
        computed: Vec<(String, SlotId)>,
    },

    /// Row filter. A `constant` filter is evaluated once per subtree open
    /// instead of once per row and gates the whole branch.
    Filter {
        input: Box<Stage>,
        predicate: Expr,
        constant: bool,
    },

    Sort(SortStage),

    /// K-way merge of already-sorted inputs. `key_slots[i]` and
    /// `input_slots[i]` describe child `i`; outputs are shared.
    SortedMerge {
        inputs: Vec<Stage>,
        key_slots: Vec<Vec<SlotId>>,
        directions: Vec<SortDirection>,
        input_slots: Vec<Vec<SlotId>>,
        output_slots: Vec<SlotId>,
    },

    /// Concatenation of child streams into shared output slots;
    /// `input_slots[i]` must match `output_slots` in arity.
    Union {
        inputs: Vec<Stage>,
        input_slots: Vec<Vec<SlotId>>,
        output_slots: Vec<SlotId>,
    },

    /// Drop rows whose key-slot tuple was already emitted. State is the
    /// seen-key set, unbounded.
    Unique {
        input: Box<Stage>,
        key_slots: Vec<SlotId>,
    },

    /// Hash equi-join; rows from the inner side are exposed alongside the
    /// projected outer slots.
    HashJoin {
        outer: Box<Stage>,
        inner: Box<Stage>,
        outer_keys: Vec<SlotId>,
        outer_projects: Vec<SlotId>,
        inner_keys: Vec<SlotId>,
        inner_projects: Vec<SlotId>,
        collation: Option<SlotId>,
    },

    /// Merge equi-join over inputs pre-sorted on their key slots.
    MergeJoin {
        outer: Box<Stage>,
        inner: Box<Stage>,
        outer_keys: Vec<SlotId>,
        outer_projects: Vec<SlotId>,
        inner_keys: Vec<SlotId>,
        inner_projects: Vec<SlotId>,
        directions: Vec<SortDirection>,
    },

    /// Nested-loop join: the inner side re-opens per outer row and may
    /// read the `correlated` outer slots.
    LoopJoin {
        outer: Box<Stage>,
        inner: Box<Stage>,
        outer_projects: Vec<SlotId>,
        correlated: Vec<SlotId>,
    },
}

impl Stage {
    /// Stable stage-kind label for tracing and debug output.
    #[must_use]
    pub const fn kind_name(&self) -> &'static str {
        match self {
            Self::CollectionScan(_) => "collection_scan",
            Self::Seek(_) => "seek",
            Self::IndexSeek(_) => "index_seek",
            Self::VirtualScan { .. } => "virtual_scan",
            Self::CoScan => "co_scan",
            Self::LimitSkip { .. } => "limit_skip",
            Self::Project { .. } => "project",
            Self::MakeObject { .. } => "make_object",
            Self::Filter { .. } => "filter",
            Self::Sort(_) => "sort",
            Self::SortedMerge { .. } => "sorted_merge",
            Self::Union { .. } => "union",
            Self::Unique { .. } => "unique",
            Self::HashJoin { .. } => "hash_join",
            Self::MergeJoin { .. } => "merge_join",
            Self::LoopJoin { .. } => "loop_join",
        }
    }

    /// Child stages in plan order.
    #[must_use]
    pub fn children(&self) -> Vec<&Stage> {
        match self {
            Self::CollectionScan(_)
            | Self::Seek(_)
            | Self::IndexSeek(_)
            | Self::VirtualScan { .. }
            | Self::CoScan => Vec::new(),
            Self::LimitSkip { input, .. }
            | Self::Project { input, .. }
            | Self::MakeObject { input, .. }
            | Self::Filter { input, .. }
            | Self::Unique { input, .. } => vec![input.as_ref()],
            Self::Sort(sort) => vec![sort.input.as_ref()],
            Self::SortedMerge { inputs, .. } | Self::Union { inputs, .. } => {
                inputs.iter().collect()
            }
            Self::HashJoin { outer, inner, .. }
            | Self::MergeJoin { outer, inner, .. }
            | Self::LoopJoin { outer, inner, .. } => {
                vec![outer.as_ref(), inner.as_ref()]
            }
        }
    }

    /// Slots bound (written) by this stage itself, excluding descendants.
    #[must_use]
    pub fn bound_slots(&self) -> Vec<SlotId> {
        match self {
            Self::CollectionScan(scan) => {
                let mut slots = vec![scan.result, scan.record_id];
                slots.extend(scan.latest_timestamp);
                slots
            }
            Self::Seek(seek) => vec![seek.result, seek.record_id],
            Self::IndexSeek(seek) => {
                let mut slots = seek.key_slots.clone();
                slots.extend(seek.record_id);
                slots
            }
            Self::VirtualScan { slots, .. } => slots.clone(),
            Self::Project { bindings, .. } => bindings.iter().map(|(slot, _)| *slot).collect(),
            Self::MakeObject { output, .. } => vec![*output],
            Self::SortedMerge { output_slots, .. } | Self::Union { output_slots, .. } => {
                output_slots.clone()
            }
            Self::CoScan
            | Self::LimitSkip { .. }
            | Self::Filter { .. }
            | Self::Sort(_)
            | Self::Unique { .. }
            | Self::HashJoin { .. }
            | Self::MergeJoin { .. }
            | Self::LoopJoin { .. } => Vec::new(),
        }
    }
}

///
/// TESTS
///

//! Requirement/registry protocol.
//!
//! Requirements flow parent-to-child as small copied values; the only
//! mutation pattern is "copy, then adjust the copy". Output registries
//! flow child-to-parent and must bind every requested role.

use crate::{MAX_KEY_COMPONENTS, error::InternalError, slot::SlotGenerator, slot::SlotId};

///
/// SlotRole
///
/// Fixed enumeration of the named outputs a subtree can be asked for.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SlotRole {
    /// The materialized result document.
    Result,
    /// The storage record id of the current row.
    RecordId,
    /// The raw index key object (return-key answers).
    ReturnKey,
    /// The latest observed storage timestamp (resume tokens).
    ResumeTimestamp,
}

impl SlotRole {
    /// All roles, in canonical binding order.
    pub const ALL: [Self; 4] = [
        Self::Result,
        Self::RecordId,
        Self::ReturnKey,
        Self::ResumeTimestamp,
    ];

    const fn bit(self) -> u8 {
        match self {
            Self::Result => 1,
            Self::RecordId => 1 << 1,
            Self::ReturnKey => 1 << 2,
            Self::ResumeTimestamp => 1 << 3,
        }
    }

    const fn index(self) -> usize {
        match self {
            Self::Result => 0,
            Self::RecordId => 1,
            Self::ReturnKey => 2,
            Self::ResumeTimestamp => 3,
        }
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Result => "result",
            Self::RecordId => "record_id",
            Self::ReturnKey => "return_key",
            Self::ResumeTimestamp => "resume_timestamp",
        }
    }
}

///
/// IndexKeySet
///
/// Fixed-size bitset over index key-pattern component positions.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct IndexKeySet(u32);

impl IndexKeySet {
    #[must_use]
    pub const fn empty() -> Self {
        Self(0)
    }

    /// All components of a pattern with `len` parts set.
    ///
    /// # Panics
    /// If `len` exceeds the component bound.
    #[must_use]
    pub fn all_of(len: usize) -> Self {
        assert!(len <= MAX_KEY_COMPONENTS, "key pattern too wide");
        if len == 32 {
            Self(u32::MAX)
        } else {
            Self((1u32 << len) - 1)
        }
    }

    /// # Panics
    /// If `position` exceeds the component bound.
    #[must_use]
    pub fn with(self, position: usize) -> Self {
        assert!(position < MAX_KEY_COMPONENTS, "key component out of range");
        Self(self.0 | (1 << position))
    }

    #[must_use]
    pub const fn test(self, position: usize) -> bool {
        position < MAX_KEY_COMPONENTS && self.0 & (1 << position) != 0
    }

    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    #[must_use]
    pub const fn count(self) -> usize {
        self.0.count_ones() as usize
    }

    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Whether every component in `other` is also set here.
    #[must_use]
    pub const fn contains_all(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Set positions, ascending.
    pub fn iter(self) -> impl Iterator<Item = usize> {
        (0..MAX_KEY_COMPONENTS).filter(move |position| self.test(*position))
    }
}

///
/// StageRequirements
///
/// What a parent asks of a child subtree. A value type: parents hand
/// children a copy and never observe mutation.
///

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct StageRequirements {
    roles: u8,
    index_keys: Option<IndexKeySet>,
    resume_branch: bool,
    building_tailable_union: bool,
}

impl StageRequirements {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            roles: 0,
            index_keys: None,
            resume_branch: false,
            building_tailable_union: false,
        }
    }

    #[must_use]
    pub const fn with(mut self, role: SlotRole) -> Self {
        self.roles |= role.bit();
        self
    }

    #[must_use]
    pub const fn without(mut self, role: SlotRole) -> Self {
        self.roles &= !role.bit();
        self
    }

    #[must_use]
    pub const fn with_if(self, role: SlotRole, condition: bool) -> Self {
        if condition { self.with(role) } else { self }
    }

    #[must_use]
    pub const fn has(self, role: SlotRole) -> bool {
        self.roles & role.bit() != 0
    }

    #[must_use]
    pub const fn has_any_role(self) -> bool {
        self.roles != 0
    }

    #[must_use]
    pub const fn with_index_keys(mut self, keys: IndexKeySet) -> Self {
        self.index_keys = Some(keys);
        self
    }

    #[must_use]
    pub const fn without_index_keys(mut self) -> Self {
        self.index_keys = None;
        self
    }

    #[must_use]
    pub const fn index_keys(self) -> Option<IndexKeySet> {
        self.index_keys
    }

    /// Mark the tailable resume branch: row caps are suppressed below
    /// this point.
    #[must_use]
    pub const fn for_resume_branch(mut self) -> Self {
        self.resume_branch = true;
        self
    }

    #[must_use]
    pub const fn is_resume_branch(self) -> bool {
        self.resume_branch
    }

    /// Mark that the tailable union wrapper is already above us, so scan
    /// dispatch must not wrap again.
    #[must_use]
    pub const fn inside_tailable_union(mut self) -> Self {
        self.building_tailable_union = true;
        self
    }

    #[must_use]
    pub const fn is_inside_tailable_union(self) -> bool {
        self.building_tailable_union
    }
}

///
/// StageOutputs
///
/// What a subtree bound: one slot per satisfied role, plus individually
/// exposed index key components keyed by key-pattern position. Created
/// fresh per builder invocation and never shared across siblings.
///

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct StageOutputs {
    slots: [Option<SlotId>; 4],
    index_key_slots: Option<Vec<(usize, SlotId)>>,
}

impl StageOutputs {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [None; 4],
            index_key_slots: None,
        }
    }

    /// Allocate a fresh slot for every role and component in `reqs`.
    /// Used where outputs must be fresh shared slots (unions, zero-row
    /// plans) rather than rebinding a child's.
    #[must_use]
    pub fn from_requirements(reqs: StageRequirements, slots: &mut SlotGenerator) -> Self {
        let mut outputs = Self::new();
        for role in SlotRole::ALL {
            if reqs.has(role) {
                outputs.set(role, slots.generate());
            }
        }
        if let Some(keys) = reqs.index_keys() {
            outputs.index_key_slots = Some(
                keys.iter()
                    .map(|position| (position, slots.generate()))
                    .collect(),
            );
        }
        outputs
    }

    pub fn set(&mut self, role: SlotRole, slot: SlotId) {
        self.slots[role.index()] = Some(slot);
    }

    pub fn clear(&mut self, role: SlotRole) {
        self.slots[role.index()] = None;
    }

    #[must_use]
    pub const fn get_opt(&self, role: SlotRole) -> Option<SlotId> {
        self.slots[role.index()]
    }

    #[must_use]
    pub const fn has(&self, role: SlotRole) -> bool {
        self.get_opt(role).is_some()
    }

    /// Slot bound for `role`; missing bindings are a broken builder
    /// contract.
    pub fn get(&self, role: SlotRole) -> Result<SlotId, InternalError> {
        self.get_opt(role).ok_or_else(|| {
            InternalError::build_invariant(format!("no slot bound for role '{}'", role.name()))
        })
    }

    pub fn set_index_key_slots(&mut self, slots: Vec<(usize, SlotId)>) {
        self.index_key_slots = Some(slots);
    }

    #[must_use]
    pub fn index_key_slots(&self) -> Option<&[(usize, SlotId)]> {
        self.index_key_slots.as_deref()
    }

    #[must_use]
    pub fn index_key_slot(&self, position: usize) -> Option<SlotId> {
        self.index_key_slots.as_ref().and_then(|slots| {
            slots
                .iter()
                .find(|(entry, _)| *entry == position)
                .map(|(_, slot)| *slot)
        })
    }

    /// Drop component bindings the parent did not ask for.
    pub fn narrow_index_keys(&mut self, keep: Option<IndexKeySet>) {
        match keep {
            None => self.index_key_slots = None,
            Some(keep) => {
                if let Some(slots) = &mut self.index_key_slots {
                    slots.retain(|(position, _)| keep.test(*position));
                }
            }
        }
    }

    /// All slots bound here, in canonical order: roles first, then index
    /// key components ascending by position.
    #[must_use]
    pub fn all_slots(&self) -> Vec<SlotId> {
        let mut out: Vec<SlotId> = SlotRole::ALL
            .iter()
            .filter_map(|role| self.get_opt(*role))
            .collect();
        if let Some(slots) = &self.index_key_slots {
            out.extend(slots.iter().map(|(_, slot)| *slot));
        }
        out
    }

    /// Slots for exactly the roles/components in `reqs`, in canonical
    /// order. Missing bindings are a broken builder contract.
    pub fn slots_for(&self, reqs: StageRequirements) -> Result<Vec<SlotId>, InternalError> {
        let mut out = Vec::new();
        for role in SlotRole::ALL {
            if reqs.has(role) {
                out.push(self.get(role)?);
            }
        }
        if let Some(keys) = reqs.index_keys() {
            for position in keys.iter() {
                out.push(self.index_key_slot(position).ok_or_else(|| {
                    InternalError::build_invariant(format!(
                        "no slot bound for index key component {position}"
                    ))
                })?);
            }
        }
        Ok(out)
    }

    /// Postcondition check: every requested role/component is bound.
    pub fn verify_satisfies(&self, reqs: StageRequirements) -> Result<(), InternalError> {
        self.slots_for(reqs).map(|_| ())
    }
}

///
/// TESTS
///

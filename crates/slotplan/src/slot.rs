use derive_more::Display;
use serde::{Deserialize, Serialize};

///
/// SlotId
///
/// Opaque name of one register in the execution register file. Unique for
/// the lifetime of one compilation; never reused; bound by exactly one
/// operator on any given execution path.
///

#[repr(transparent)]
#[derive(
    Clone, Copy, Debug, Display, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize,
)]
#[display("s{_0}")]
pub struct SlotId(u64);

impl SlotId {
    #[must_use]
    pub(crate) const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

///
/// SlotGenerator
///
/// Monotonic slot-id allocator scoped to one compilation. No reuse, no
/// free; allocation is the only mutation the compiler performs outside the
/// runtime environment.
///

#[derive(Debug, Default)]
pub struct SlotGenerator {
    next: u64,
}

impl SlotGenerator {
    #[must_use]
    pub const fn new() -> Self {
        Self { next: 0 }
    }

    /// Allocate one fresh slot id.
    pub const fn generate(&mut self) -> SlotId {
        let id = SlotId::new(self.next);
        self.next += 1;
        id
    }

    /// Allocate `count` fresh slot ids.
    pub fn generate_multiple(&mut self, count: usize) -> Vec<SlotId> {
        (0..count).map(|_| self.generate()).collect()
    }

    /// Total number of slot ids handed out so far.
    #[must_use]
    pub const fn allocated(&self) -> u64 {
        self.next
    }
}

///
/// TESTS
///

#[cfg(test)]
mod tests {
    use super::SlotGenerator;
    use proptest::prelude::*;
    use std::collections::BTreeSet;

    #[test]
    fn slot_ids_are_monotonic_and_distinct() {
        let mut generator = SlotGenerator::new();
        let slots = generator.generate_multiple(64);

        let unique: BTreeSet<_> = slots.iter().copied().collect();
        assert_eq!(unique.len(), slots.len());
        assert_eq!(generator.allocated(), 64);

        let mut sorted = slots.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, slots);
    }

    #[test]
    fn display_uses_register_notation() {
        let mut generator = SlotGenerator::new();
        generator.generate();
        let slot = generator.generate();
        assert_eq!(slot.to_string(), "s1");
    }

    proptest! {
        #[test]
        fn arbitrary_allocation_counts_stay_pairwise_distinct(count in 0usize..256) {
            let mut generator = SlotGenerator::new();
            let slots = generator.generate_multiple(count);
            let unique: BTreeSet<_> = slots.iter().copied().collect();
            prop_assert_eq!(unique.len(), count);
        }
    }
}

//! Boolean composition over index streams: OR, AND (hash and sorted),
//! and sorted-merge.

use crate::{
    build::{IndexKeySet, SlotRole, StageBuilder, StageOutputs, StageRequirements},
    error::{BuildError, InternalError},
    logical::{LogicalNode, Predicate, SortPattern},
    physical::Stage,
    slot::SlotId,
};

impl StageBuilder<'_> {
    /// Union of child streams. De-duplication keys on record id;
    /// a residual filter runs last, over the unioned stream.
    pub(crate) fn build_or(
        &mut self,
        children: &[LogicalNode],
        dedup: bool,
        filter: Option<&Predicate>,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        if children.is_empty() {
            return Err(InternalError::build_invariant("or node with no children").into());
        }

        let child_reqs = reqs
            .with_if(SlotRole::RecordId, dedup)
            .with_if(SlotRole::Result, filter.is_some());

        let mut inputs = Vec::with_capacity(children.len());
        let mut input_slots = Vec::with_capacity(children.len());
        for child in children {
            let (stage, outputs) = self.build_node(child, child_reqs)?;
            input_slots.push(outputs.slots_for(child_reqs)?);
            inputs.push(stage);
        }

        let outputs = StageOutputs::from_requirements(child_reqs, &mut self.slots);
        let mut stage = Stage::Union {
            inputs,
            input_slots,
            output_slots: outputs.slots_for(child_reqs)?,
        };

        if dedup {
            stage = Stage::Unique {
                input: Box::new(stage),
                key_slots: vec![outputs.get(SlotRole::RecordId)?],
            };
        }

        if let Some(filter) = filter {
            let result = outputs.get(SlotRole::Result)?;
            let predicate = self
                .lowering
                .lower_predicate(filter, result, &mut self.slots)?;
            stage = Stage::Filter {
                input: Box::new(stage),
                predicate,
                constant: false,
            };
        }

        Ok((stage, outputs))
    }

    /// N-way intersection by record id via chained hash joins. Each new
    /// child joins against the accumulated stream; the freshly joined
    /// child's slots are the ones exposed downstream.
    pub(crate) fn build_and_hash(
        &mut self,
        children: &[LogicalNode],
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        self.build_intersection(children, reqs, false)
    }

    /// Same shape as the hash variant over a merge join. Children's
    /// record-id streams must already be sorted ascending; that is the
    /// optimizer's contract and is not re-verified here.
    pub(crate) fn build_and_sorted(
        &mut self,
        children: &[LogicalNode],
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        self.build_intersection(children, reqs, true)
    }

    fn build_intersection(
        &mut self,
        children: &[LogicalNode],
        reqs: StageRequirements,
        sorted: bool,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        if children.len() < 2 {
            return Err(
                InternalError::build_invariant("intersection needs at least two children").into(),
            );
        }

        let child_reqs = reqs.with(SlotRole::Result).with(SlotRole::RecordId);

        let (mut stage, mut outputs) = self.build_node(&children[0], child_reqs)?;
        for child in &children[1..] {
            let (child_stage, child_outputs) = self.build_node(child, child_reqs)?;

            let outer_key = outputs.get(SlotRole::RecordId)?;
            let inner_key = child_outputs.get(SlotRole::RecordId)?;
            let inner_projects: Vec<SlotId> = child_outputs
                .all_slots()
                .into_iter()
                .filter(|slot| *slot != inner_key)
                .collect();

            stage = if sorted {
                Stage::MergeJoin {
                    outer: Box::new(stage),
                    inner: Box::new(child_stage),
                    outer_keys: vec![outer_key],
                    outer_projects: Vec::new(),
                    inner_keys: vec![inner_key],
                    inner_projects,
                    directions: vec![crate::logical::SortDirection::Ascending],
                }
            } else {
                Stage::HashJoin {
                    outer: Box::new(stage),
                    inner: Box::new(child_stage),
                    outer_keys: vec![outer_key],
                    outer_projects: Vec::new(),
                    inner_keys: vec![inner_key],
                    inner_projects,
                    collation: self.collation_slot,
                }
            };
            outputs = child_outputs;
        }

        Ok((stage, outputs))
    }

    /// K-way merge of pre-ordered index streams sharing one sort pattern.
    /// Each child exposes its own key components, reordered into
    /// sort-pattern order via the child's key-pattern position map.
    pub(crate) fn build_sort_merge(
        &mut self,
        children: &[LogicalNode],
        pattern: &SortPattern,
        dedup: bool,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        if children.is_empty() {
            return Err(InternalError::build_invariant("sort merge with no children").into());
        }
        if pattern.is_empty() {
            return Err(
                InternalError::build_invariant("sort merge with an empty sort pattern").into(),
            );
        }

        let role_reqs = reqs
            .with_if(SlotRole::RecordId, dedup)
            .without_index_keys();

        let mut inputs = Vec::with_capacity(children.len());
        let mut input_slots = Vec::with_capacity(children.len());
        let mut key_slots = Vec::with_capacity(children.len());
        for child in children {
            let Some(scan) = child.find_index_scan() else {
                return Err(InternalError::build_invariant(
                    "sort merge child does not read an index",
                )
                .into());
            };

            // Map each sort part to the child's own key-pattern position.
            let mut positions = Vec::with_capacity(pattern.len());
            let mut wanted = IndexKeySet::empty();
            for part in &pattern.parts {
                let Some(position) = scan.index.key_pattern.position(&part.path) else {
                    return Err(InternalError::build_invariant(format!(
                        "sort merge child index does not cover sort path '{}'",
                        part.path
                    ))
                    .into());
                };
                positions.push(position);
                wanted = wanted.with(position);
            }

            let (stage, outputs) = self.build_node(child, role_reqs.with_index_keys(wanted))?;

            let child_keys: Vec<SlotId> = positions
                .iter()
                .map(|position| {
                    outputs.index_key_slot(*position).ok_or_else(|| {
                        InternalError::build_invariant(format!(
                            "sort merge component {position} missing from child outputs"
                        ))
                    })
                })
                .collect::<Result<_, _>>()?;

            let mut slots = outputs.slots_for(role_reqs)?;
            slots.extend(&child_keys);
            input_slots.push(slots);
            key_slots.push(child_keys);
            inputs.push(stage);
        }

        // Merged outputs: role slots plus one shared slot per sort part,
        // ordered the same way as every child's input slot list.
        let merged_reqs = role_reqs.with_index_keys(IndexKeySet::all_of(pattern.len()));
        let merged = StageOutputs::from_requirements(merged_reqs, &mut self.slots);
        let output_slots = merged.slots_for(merged_reqs)?;

        let mut stage = Stage::SortedMerge {
            inputs,
            key_slots,
            directions: pattern.parts.iter().map(|part| part.direction).collect(),
            input_slots,
            output_slots,
        };

        if dedup {
            stage = Stage::Unique {
                input: Box::new(stage),
                key_slots: vec![merged.get(SlotRole::RecordId)?],
            };
        }

        // The merged key slots are positional sort parts, not components
        // of any one child's index pattern; drop them from the registry.
        let mut outputs = merged;
        outputs.narrow_index_keys(reqs.index_keys());

        Ok((stage, outputs))
    }
}

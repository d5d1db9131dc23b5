//! Index-scan builder and index-key reconstruction.

use crate::{
    build::{IndexKeySet, SlotRole, StageBuilder, StageOutputs, StageRequirements},
    error::{BuildError, InternalError},
    expr::Expr,
    logical::{IndexScanNode, KeyPattern},
    path::FieldPath,
    physical::{IndexSeekStage, Stage},
    slot::SlotId,
};

///
/// KeyPatternTree
///
/// Prefix tree over key-pattern paths used to rehydrate a nested document
/// from flat key components. Child order follows first registration.
///

#[derive(Debug, Default)]
pub struct KeyPatternTree {
    children: Vec<(String, KeyPatternTree)>,
    slot: Option<SlotId>,
}

impl KeyPatternTree {
    /// Build the tree from parallel path/slot lists. When a path is a
    /// strict descendant of an already-registered path, it is skipped
    /// entirely; the ancestor binding wins.
    #[must_use]
    pub fn build(parts: &[(FieldPath, SlotId)]) -> Self {
        let mut root = Self::default();
        'parts: for (path, slot) in parts {
            let mut node = &mut root;
            for (level, segment) in path.segments().iter().enumerate() {
                if node.slot.is_some() {
                    continue 'parts;
                }
                let position = match node
                    .children
                    .iter()
                    .position(|(name, _)| name == segment)
                {
                    Some(position) => position,
                    None => {
                        node.children.push((segment.clone(), Self::default()));
                        node.children.len() - 1
                    }
                };
                node = &mut node.children[position].1;
                if path.is_leaf(level) && node.slot.is_none() {
                    node.slot = Some(*slot);
                }
            }
        }
        root
    }

    /// Synthesize the nested object-construction expression. A node with
    /// a slot contributes that slot's value directly; its children (paths
    /// registered after an ancestor) are ignored.
    #[must_use]
    pub fn rehydrate(&self) -> Expr {
        Expr::ObjectConstruct(
            self.children
                .iter()
                .map(|(name, child)| (name.clone(), Self::rehydrate_node(child)))
                .collect(),
        )
    }

    fn rehydrate_node(node: &Self) -> Expr {
        match node.slot {
            Some(slot) => Expr::variable(slot),
            None => node.rehydrate(),
        }
    }
}

/// Component positions of `pattern` whose dotted path appears in `fields`.
#[must_use]
pub fn make_index_key_inclusion_set(pattern: &KeyPattern, fields: &[String]) -> IndexKeySet {
    let mut set = IndexKeySet::empty();
    for (position, (path, _)) in pattern.parts.iter().enumerate() {
        if fields.iter().any(|field| *field == path.dotted()) {
            set = set.with(position);
        }
    }
    set
}

impl StageBuilder<'_> {
    /// Index scan. Storage is asked for exactly the component bitset
    /// needed: the parent's explicit set, widened to all components when
    /// the full document or the raw key object must be reconstructed.
    /// Outputs are narrowed back to the parent's set afterward.
    pub(crate) fn build_index_scan(
        &mut self,
        scan: &IndexScanNode,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        if reqs.has(SlotRole::ResumeTimestamp) {
            return Err(InternalError::build_invariant(
                "index scans do not track storage timestamps",
            )
            .into());
        }

        let pattern = &scan.index.key_pattern;
        if pattern.is_empty() {
            return Err(
                InternalError::build_invariant("index scan over an empty key pattern").into(),
            );
        }

        if scan.add_key_metadata && !reqs.has(SlotRole::ReturnKey) {
            return Err(InternalError::build_invariant(
                "key metadata flagged on a scan whose parent never asked for the return key",
            )
            .into());
        }

        let want_return_key = reqs.has(SlotRole::ReturnKey);
        let need_all = reqs.has(SlotRole::Result) || want_return_key;
        let parent_keys = reqs.index_keys().unwrap_or_default();
        let components = if need_all {
            IndexKeySet::all_of(pattern.len())
        } else {
            parent_keys
        };

        let key_slots = self.slots.generate_multiple(components.count());
        let record_id = reqs.has(SlotRole::RecordId).then(|| self.slots.generate());

        let mut stage = Stage::IndexSeek(IndexSeekStage {
            index_name: scan.index.name.clone(),
            key_pattern: pattern.clone(),
            bounds: scan.bounds.clone(),
            direction: scan.direction,
            components,
            key_slots: key_slots.clone(),
            record_id,
            read_gate: self.read_gate_slot,
        });

        let component_slots: Vec<(usize, SlotId)> =
            components.iter().zip(key_slots).collect();

        let mut outputs = StageOutputs::new();
        if let Some(slot) = record_id {
            outputs.set(SlotRole::RecordId, slot);
        }

        let mut bindings = Vec::new();

        if reqs.has(SlotRole::Result) {
            // Nested rehydration through the key-pattern tree.
            let parts: Vec<(FieldPath, SlotId)> = pattern
                .parts
                .iter()
                .enumerate()
                .map(|(position, (path, _))| {
                    component_slot(&component_slots, position).map(|slot| (path.clone(), slot))
                })
                .collect::<Result<_, _>>()?;
            let result = self.slots.generate();
            bindings.push((result, KeyPatternTree::build(&parts).rehydrate()));
            outputs.set(SlotRole::Result, result);
        }

        if want_return_key {
            // Flat key object in pattern order; no nested-path collapsing.
            let fields = pattern
                .parts
                .iter()
                .enumerate()
                .map(|(position, (path, _))| {
                    component_slot(&component_slots, position)
                        .map(|slot| (path.dotted(), Expr::variable(slot)))
                })
                .collect::<Result<_, _>>()?;
            let return_key = self.slots.generate();
            bindings.push((return_key, Expr::ObjectConstruct(fields)));
            outputs.set(SlotRole::ReturnKey, return_key);
        }

        if !bindings.is_empty() {
            stage = Stage::Project {
                input: Box::new(stage),
                bindings,
            };
        }

        outputs.set_index_key_slots(component_slots);
        outputs.narrow_index_keys(reqs.index_keys());

        Ok((stage, outputs))
    }
}

fn component_slot(slots: &[(usize, SlotId)], position: usize) -> Result<SlotId, InternalError> {
    slots
        .iter()
        .find(|(entry, _)| *entry == position)
        .map(|(_, slot)| *slot)
        .ok_or_else(|| {
            InternalError::build_invariant(format!(
                "index key component {position} was not requested from storage"
            ))
        })
}

///
/// TESTS
///

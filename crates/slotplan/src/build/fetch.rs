//! Fetch builder: join from a record-id stream to full documents.

use crate::{
    build::{SlotRole, StageBuilder, StageOutputs, StageRequirements},
    error::BuildError,
    logical::{LogicalNode, Predicate},
    physical::{SeekStage, Stage},
};

impl StageBuilder<'_> {
    /// Point lookup per child row: a nested-loop join whose inner side is
    /// a single-row storage seek keyed by the child's record id. Result
    /// and record id are rebound to the seek's outputs; every other slot
    /// the parent asked for is forwarded across the join unchanged.
    pub(crate) fn build_fetch(
        &mut self,
        child: &LogicalNode,
        filter: Option<&Predicate>,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        // The fetch needs a record id regardless of what the parent
        // asked for; the child never needs to produce the document.
        let child_reqs = reqs.without(SlotRole::Result).with(SlotRole::RecordId);
        let (child_stage, child_outputs) = self.build_node(child, child_reqs)?;

        let seek_slot = child_outputs.get(SlotRole::RecordId)?;
        let result = self.slots.generate();
        let record_id = self.slots.generate();

        let inner = Stage::Seek(SeekStage {
            collection: self.collection.clone(),
            seek_slot,
            result,
            record_id,
            read_gate: self.read_gate_slot,
        });

        let forwarded: Vec<_> = child_outputs
            .all_slots()
            .into_iter()
            .filter(|slot| *slot != seek_slot)
            .collect();

        let mut stage = Stage::LoopJoin {
            outer: Box::new(child_stage),
            inner: Box::new(inner),
            outer_projects: forwarded,
            correlated: vec![seek_slot],
        };

        let mut outputs = child_outputs;
        outputs.set(SlotRole::Result, result);
        outputs.set(SlotRole::RecordId, record_id);

        if let Some(filter) = filter {
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
}

//! Tailable-scan resume union.

use crate::{
    build::{StageBuilder, StageOutputs, StageRequirements},
    env,
    error::{BuildError, InternalError},
    expr::Expr,
    logical::LogicalNode,
    physical::Stage,
    value::Value,
};

impl StageBuilder<'_> {
    /// Two structurally identical branches over the same logical subtree,
    /// selected by a data-dependent constant filter on the resume marker:
    /// the anchor branch runs while the marker is unset, the resume
    /// branch skips one pre-positioning row and runs while it is set.
    /// Both branches feed one union with fresh shared output slots.
    pub(crate) fn build_tailable_union(
        &mut self,
        node: &LogicalNode,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        let resume_slot = match self.env.slot(env::RESUME_RECORD_ID) {
            Some(slot) => slot,
            None => self.env.register(
                env::RESUME_RECORD_ID,
                crate::env::EnvValue::Marker(Value::Nothing),
                &mut self.slots,
            )?,
        };

        let anchor_reqs = reqs.inside_tailable_union();
        let resume_reqs = reqs.inside_tailable_union().for_resume_branch();

        let (anchor_stage, anchor_outputs) = self.build_node(node, anchor_reqs)?;
        let anchor_stage = Stage::Filter {
            input: Box::new(anchor_stage),
            predicate: Expr::not(Expr::exists(Expr::variable(resume_slot))),
            constant: true,
        };

        let (resume_stage, resume_outputs) = self.build_node(node, resume_reqs)?;
        let resume_stage = Stage::Filter {
            input: Box::new(Stage::LimitSkip {
                input: Box::new(resume_stage),
                limit: None,
                skip: Some(1),
            }),
            predicate: Expr::exists(Expr::variable(resume_slot)),
            constant: true,
        };

        let anchor_slots = anchor_outputs.slots_for(reqs)?;
        let resume_slots = resume_outputs.slots_for(reqs)?;
        if anchor_slots.len() != resume_slots.len() {
            return Err(InternalError::build_invariant(
                "tailable union branches bound differing slot arities",
            )
            .into());
        }

        let outputs = StageOutputs::from_requirements(reqs, &mut self.slots);
        let stage = Stage::Union {
            inputs: vec![anchor_stage, resume_stage],
            input_slots: vec![anchor_slots, resume_slots],
            output_slots: outputs.slots_for(reqs)?,
        };

        Ok((stage, outputs))
    }
}

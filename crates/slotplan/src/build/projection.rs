//! Limit/skip, projection, return-key, and text-match builders.

use crate::{
    build::{
        SlotRole, StageBuilder, StageOutputs, StageRequirements, make_index_key_inclusion_set,
    },
    env,
    error::{BuildError, InternalError},
    expr::{Expr, Function},
    logical::{KeyPattern, LogicalNode, Projection},
    physical::{FieldBehavior, Stage},
};

impl StageBuilder<'_> {
    /// Row cap. Collapses a directly nested skip into one limit/skip
    /// stage. On a tailable resume branch the cap is dropped entirely:
    /// it only ever applied to the first (anchor) execution.
    pub(crate) fn build_limit(
        &mut self,
        child: &LogicalNode,
        limit: u64,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        if reqs.is_resume_branch() {
            return self.build_node(child, reqs);
        }

        if let LogicalNode::Skip {
            child: inner,
            skip,
        } = child
        {
            let (stage, outputs) = self.build_node(inner, reqs)?;
            return Ok((
                Stage::LimitSkip {
                    input: Box::new(stage),
                    limit: Some(limit),
                    skip: Some(*skip),
                },
                outputs,
            ));
        }

        let (stage, outputs) = self.build_node(child, reqs)?;
        Ok((
            Stage::LimitSkip {
                input: Box::new(stage),
                limit: Some(limit),
                skip: None,
            },
            outputs,
        ))
    }

    pub(crate) fn build_skip(
        &mut self,
        child: &LogicalNode,
        skip: u64,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        if reqs.is_resume_branch() {
            return self.build_node(child, reqs);
        }

        let (stage, outputs) = self.build_node(child, reqs)?;
        Ok((
            Stage::LimitSkip {
                input: Box::new(stage),
                limit: None,
                skip: Some(skip),
            },
            outputs,
        ))
    }

    /// Top-level field inclusion over the full document.
    pub(crate) fn build_projection_simple(
        &mut self,
        child: &LogicalNode,
        fields: &[String],
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        let child_reqs = reqs.with(SlotRole::Result);
        let (stage, mut outputs) = self.build_node(child, child_reqs)?;

        let root = outputs.get(SlotRole::Result)?;
        let output = self.slots.generate();
        let stage = Stage::MakeObject {
            input: Box::new(stage),
            output,
            root: Some(root),
            behavior: FieldBehavior::Keep,
            fields: fields.to_vec(),
            computed: Vec::new(),
        };
        outputs.set(SlotRole::Result, output);

        Ok((stage, outputs))
    }

    /// Covered projection: the document is assembled purely from index
    /// key components, without ever fetching it.
    pub(crate) fn build_projection_covered(
        &mut self,
        child: &LogicalNode,
        fields: &[String],
        covered_key: &KeyPattern,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        if child.fetched() {
            return Err(InternalError::build_invariant(
                "covered projection over a subtree that fetches documents",
            )
            .into());
        }

        let inclusion = make_index_key_inclusion_set(covered_key, fields);
        let child_reqs = reqs
            .without(SlotRole::Result)
            .with_index_keys(match reqs.index_keys() {
                Some(parent) => parent.union(inclusion),
                None => inclusion,
            });
        let (stage, mut outputs) = self.build_node(child, child_reqs)?;

        let mut computed = Vec::with_capacity(inclusion.count());
        for (position, (path, _)) in covered_key.parts.iter().enumerate() {
            if !inclusion.test(position) {
                continue;
            }
            let slot = outputs.index_key_slot(position).ok_or_else(|| {
                InternalError::build_invariant(format!(
                    "covered projection component {position} missing from child outputs"
                ))
            })?;
            computed.push((path.dotted(), slot));
        }

        let output = self.slots.generate();
        let stage = Stage::MakeObject {
            input: Box::new(stage),
            output,
            root: None,
            behavior: FieldBehavior::Keep,
            fields: Vec::new(),
            computed,
        };
        outputs.set(SlotRole::Result, output);
        outputs.narrow_index_keys(reqs.index_keys());

        Ok((stage, outputs))
    }

    /// General projection path: delegate to the expression sub-compiler.
    pub(crate) fn build_projection_default(
        &mut self,
        child: &LogicalNode,
        projection: &Projection,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        let child_reqs = reqs.with(SlotRole::Result);
        let (stage, mut outputs) = self.build_node(child, child_reqs)?;

        let root = outputs.get(SlotRole::Result)?;
        let expr = self
            .lowering
            .lower_projection(projection, root, &mut self.slots)?;

        let output = self.slots.generate();
        let stage = Stage::Project {
            input: Box::new(stage),
            bindings: vec![(output, expr)],
        };
        outputs.set(SlotRole::Result, output);

        Ok((stage, outputs))
    }

    /// Answer with the raw index key instead of the document: the child
    /// is asked for the return key, which is then rebound as the result.
    pub(crate) fn build_return_key(
        &mut self,
        child: &LogicalNode,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        let child_reqs = reqs.without(SlotRole::Result).with(SlotRole::ReturnKey);
        let (stage, mut outputs) = self.build_node(child, child_reqs)?;

        let return_key = outputs.get(SlotRole::ReturnKey)?;
        outputs.set(SlotRole::Result, return_key);
        if !reqs.has(SlotRole::ReturnKey) {
            outputs.clear(SlotRole::ReturnKey);
        }

        Ok((stage, outputs))
    }

    /// Text-search filter over full documents. Non-object inputs fail the
    /// row's evaluation rather than silently not matching.
    pub(crate) fn build_text_match(
        &mut self,
        child: &LogicalNode,
        index_name: &str,
        query: &str,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        let Some(provider) = self.text_matchers else {
            return Err(InternalError::build_invariant(
                "text match requested without a matcher provider",
            )
            .into());
        };
        let matcher = provider.matcher_for(index_name, query)?;

        let handle_name = format!("{}:{index_name}", env::TEXT_MATCHER_PREFIX);
        let handle = match self.env.slot(&handle_name) {
            Some(slot) => slot,
            None => self.env.register(
                &handle_name,
                crate::env::EnvValue::TextMatcher(matcher),
                &mut self.slots,
            )?,
        };

        let child_reqs = reqs.with(SlotRole::Result);
        let (stage, outputs) = self.build_node(child, child_reqs)?;
        let result = outputs.get(SlotRole::Result)?;

        let predicate = Expr::if_then_else(
            Expr::call(Function::IsObject, vec![Expr::variable(result)]),
            Expr::call(
                Function::TextMatch,
                vec![Expr::variable(handle), Expr::variable(result)],
            ),
            Expr::fail("text match input must be an object"),
        );

        let stage = Stage::Filter {
            input: Box::new(stage),
            predicate,
            constant: false,
        };

        Ok((stage, outputs))
    }
}

//! Plan compilation: logical solution tree in, physical operator tree out.
//!
//! One `StageBuilder` compiles exactly one solution; `build` consumes the
//! builder, so a second compilation requires a fresh instance. Slot
//! allocation and environment registration are the only shared state, and
//! both are threaded through `self`.

mod boolean;
mod fetch;
mod index_scan;
mod projection;
mod reqs;
mod scan;
mod shard;
mod sort;
mod tailable;

#[cfg(test)]
mod tests;

pub use index_scan::{KeyPatternTree, make_index_key_inclusion_set};
pub use reqs::{IndexKeySet, SlotRole, StageOutputs, StageRequirements};

use crate::{
    env::{self, Collation, EnvValue, RuntimeEnvironment, TimeZoneDb},
    error::{BuildError, InternalError, UnsupportedFeature},
    interface::{ExpressionLowering, ShardOwnershipOracle, TextMatcherProvider},
    logical::{CollectionId, LogicalNode, QueryContext, QuerySolution},
    physical::Stage,
    slot::{SlotGenerator, SlotId},
    trace::{BuildTraceEvent, BuildTraceSink},
};
use std::sync::Arc;

///
/// CompiledPlan
///
/// The compilation result: the operator tree, the top-level output
/// registry, and the runtime environment the tree reads from.
///

#[derive(Debug)]
pub struct CompiledPlan {
    pub root: Stage,
    pub outputs: StageOutputs,
    pub env: RuntimeEnvironment,
    pub slots_allocated: u64,
}

impl CompiledPlan {
    /// Indented one-line-per-stage rendering for diagnostics.
    #[must_use]
    pub fn debug_string(&self) -> String {
        let mut out = String::new();
        out.push_str("env: ");
        self.env.debug_string_into(&mut out);
        out.push('\n');
        render_stage(&self.root, 0, &mut out);
        out
    }
}

fn render_stage(stage: &Stage, depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str(stage.kind_name());
    let bound = stage.bound_slots();
    if !bound.is_empty() {
        out.push_str(" [");
        for (i, slot) in bound.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            out.push_str(&slot.to_string());
        }
        out.push(']');
    }
    out.push('\n');
    for child in stage.children() {
        render_stage(child, depth + 1, out);
    }
}

///
/// StageBuilder
///
/// Single-use compiler over one logical solution. Consumed by `build`.
///

pub struct StageBuilder<'a> {
    collection: CollectionId,
    context: QueryContext,
    lowering: &'a mut dyn ExpressionLowering,
    shard_oracle: Option<Arc<dyn ShardOwnershipOracle>>,
    text_matchers: Option<&'a dyn TextMatcherProvider>,
    trace: Option<&'a dyn BuildTraceSink>,
    slots: SlotGenerator,
    env: RuntimeEnvironment,
    collation_slot: Option<SlotId>,
    read_gate_slot: Option<SlotId>,
    // Set during `build` from flags detected on the input tree.
    tailable_union: bool,
    depth: u32,
}

impl<'a> StageBuilder<'a> {
    pub fn new(
        collection: CollectionId,
        context: QueryContext,
        lowering: &'a mut dyn ExpressionLowering,
    ) -> Result<Self, BuildError> {
        let mut slots = SlotGenerator::new();
        let mut runtime_env = RuntimeEnvironment::new();

        runtime_env.register(
            env::TIME_ZONE_DB,
            EnvValue::TimeZones(TimeZoneDb::default()),
            &mut slots,
        )?;

        let collation_slot = match &context.collation {
            Some(collation) => Some(runtime_env.register(
                env::COLLATION,
                EnvValue::Collation(Collation::new(collation.mode)),
                &mut slots,
            )?),
            None => None,
        };

        let read_gate_slot = match &context.read_gate {
            Some(gate) => Some(runtime_env.register(
                env::READ_GATE,
                EnvValue::ReadGate(gate.clone()),
                &mut slots,
            )?),
            None => None,
        };

        Ok(Self {
            collection,
            context,
            lowering,
            shard_oracle: None,
            text_matchers: None,
            trace: None,
            slots,
            env: runtime_env,
            collation_slot,
            read_gate_slot,
            tailable_union: false,
            depth: 0,
        })
    }

    #[must_use]
    pub fn with_shard_oracle(mut self, oracle: Arc<dyn ShardOwnershipOracle>) -> Self {
        self.shard_oracle = Some(oracle);
        self
    }

    #[must_use]
    pub fn with_text_matchers(mut self, provider: &'a dyn TextMatcherProvider) -> Self {
        self.text_matchers = Some(provider);
        self
    }

    #[must_use]
    pub fn with_trace(mut self, sink: &'a dyn BuildTraceSink) -> Self {
        self.trace = Some(sink);
        self
    }

    /// Compile the solution. Consumes the builder; compiling a second
    /// solution requires a fresh instance.
    pub fn build(mut self, solution: &QuerySolution) -> Result<CompiledPlan, BuildError> {
        let scan = solution.root.find_collection_scan();
        let track_latest_timestamp = scan.is_some_and(|s| s.track_latest_timestamp);
        let request_resume_token = scan.is_some_and(|s| s.request_resume_token);
        self.tailable_union = self.context.tailable && scan.is_some_and(|s| s.tailable);

        let reqs = StageRequirements::new()
            .with(SlotRole::Result)
            .with_if(SlotRole::RecordId, request_resume_token || self.context.tailable)
            .with_if(SlotRole::ResumeTimestamp, track_latest_timestamp);

        match self.build_node(&solution.root, reqs) {
            Ok((root, outputs)) => {
                outputs.verify_satisfies(reqs).map_err(|err| {
                    self.trace_error(&err);
                    err
                })?;
                if let Some(sink) = self.trace {
                    sink.on_event(BuildTraceEvent::Finish {
                        stage_kind: root.kind_name(),
                        slots_allocated: self.slots.allocated(),
                    });
                }
                Ok(CompiledPlan {
                    root,
                    outputs,
                    env: self.env,
                    slots_allocated: self.slots.allocated(),
                })
            }
            Err(err) => {
                if let BuildError::Internal(internal) = &err {
                    self.trace_error(internal);
                }
                Err(err)
            }
        }
    }

    fn trace_error(&self, err: &InternalError) {
        if let Some(sink) = self.trace {
            sink.on_event(BuildTraceEvent::Error {
                class: err.class,
                origin: err.origin,
            });
        }
    }

    /// Dispatch one logical node. The tailable interception happens
    /// before per-kind dispatch: a scan (or the limit/skip directly above
    /// it) of a tailable query is compiled as a resume union instead,
    /// unless we are already inside that union.
    pub(crate) fn build_node(
        &mut self,
        node: &LogicalNode,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        if self.tailable_union
            && !reqs.is_inside_tailable_union()
            && matches!(
                node,
                LogicalNode::CollectionScan(_) | LogicalNode::Limit { .. } | LogicalNode::Skip { .. }
            )
        {
            return self.build_tailable_union(node, reqs);
        }

        if let Some(sink) = self.trace {
            sink.on_event(BuildTraceEvent::Enter {
                node_kind: node.kind_name(),
                depth: self.depth,
            });
        }
        self.depth += 1;

        let built = match node {
            LogicalNode::CollectionScan(scan) => self.build_collection_scan(scan, reqs),
            LogicalNode::VirtualScan(scan) => self.build_virtual_scan(scan, reqs),
            LogicalNode::IndexScan(scan) => self.build_index_scan(scan, reqs),
            LogicalNode::Fetch { child, filter } => self.build_fetch(child, filter.as_ref(), reqs),
            LogicalNode::Limit { child, limit } => self.build_limit(child, *limit, reqs),
            LogicalNode::Skip { child, skip } => self.build_skip(child, *skip, reqs),
            LogicalNode::Sort {
                child,
                pattern,
                limit,
            } => self.build_sort(child, pattern, *limit, reqs),
            LogicalNode::SortKeyGenerator { .. } => Err(BuildError::unsupported(
                UnsupportedFeature::SortKeyGenerator,
            )),
            LogicalNode::SortMerge {
                children,
                pattern,
                dedup,
            } => self.build_sort_merge(children, pattern, *dedup, reqs),
            LogicalNode::ProjectionSimple { child, fields } => {
                self.build_projection_simple(child, fields, reqs)
            }
            LogicalNode::ProjectionCovered {
                child,
                fields,
                covered_key,
            } => self.build_projection_covered(child, fields, covered_key, reqs),
            LogicalNode::ProjectionDefault { child, projection } => {
                self.build_projection_default(child, projection, reqs)
            }
            LogicalNode::Or {
                children,
                dedup,
                filter,
            } => self.build_or(children, *dedup, filter.as_ref(), reqs),
            LogicalNode::AndHash { children } => self.build_and_hash(children, reqs),
            LogicalNode::AndSorted { children } => self.build_and_sorted(children, reqs),
            LogicalNode::TextMatch {
                child,
                index_name,
                query,
            } => self.build_text_match(child, index_name, query, reqs),
            LogicalNode::ReturnKey { child } => self.build_return_key(child, reqs),
            LogicalNode::ShardFilter { child } => self.build_shard_filter(child, reqs),
            LogicalNode::EmptySet => self.build_eof(reqs),
        };

        self.depth -= 1;
        built
    }

    /// Zero-row plan that still binds every requested slot: a limit-0
    /// unit scan under a projection binding each output to the explicit
    /// no-value marker.
    pub(crate) fn build_eof(
        &mut self,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        let outputs = StageOutputs::from_requirements(reqs, &mut self.slots);

        let bindings = outputs
            .all_slots()
            .into_iter()
            .map(|slot| {
                (
                    slot,
                    crate::expr::Expr::constant(crate::value::Value::Nothing),
                )
            })
            .collect();

        let stage = Stage::Project {
            input: Box::new(Stage::LimitSkip {
                input: Box::new(Stage::CoScan),
                limit: Some(0),
                skip: None,
            }),
            bindings,
        };

        Ok((stage, outputs))
    }
}

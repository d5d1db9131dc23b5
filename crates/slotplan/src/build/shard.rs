//! Shard ownership filter.

use crate::{
    build::{IndexKeySet, SlotRole, StageBuilder, StageOutputs, StageRequirements},
    env,
    error::{BuildError, InternalError},
    expr::{BinaryOp, Expr, Function},
    logical::{KeyOrdering, KeyPattern, LogicalNode},
    physical::Stage,
    slot::SlotId,
    value::Value,
};

impl StageBuilder<'_> {
    /// Ownership filtering against the external oracle. When the child
    /// is an unfetched index scan whose pattern covers every shard-key
    /// field, the key is assembled from component slots and the full
    /// document is never materialized; otherwise the document is required
    /// and each part is read by dotted path.
    pub(crate) fn build_shard_filter(
        &mut self,
        child: &LogicalNode,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        let Some(oracle) = self.shard_oracle.clone() else {
            return Err(InternalError::build_invariant(
                "shard filter requested without a shard-ownership oracle",
            )
            .into());
        };

        let shard_key = oracle.key_pattern().clone();
        if shard_key.is_empty() {
            return Err(InternalError::build_invariant("empty shard key pattern").into());
        }

        let handle = match self.env.slot(env::SHARD_ORACLE) {
            Some(slot) => slot,
            None => self.env.register(
                env::SHARD_ORACLE,
                crate::env::EnvValue::ShardOracle(oracle),
                &mut self.slots,
            )?,
        };

        // The covered path only applies when the parent can live without
        // the full document.
        let covered = if reqs.has(SlotRole::Result) {
            None
        } else {
            covered_positions(child, &shard_key)
        };
        match covered {
            Some(positions) => self.build_covered_shard_filter(child, &shard_key, &positions, handle, reqs),
            None => self.build_uncovered_shard_filter(child, &shard_key, handle, reqs),
        }
    }

    fn build_covered_shard_filter(
        &mut self,
        child: &LogicalNode,
        shard_key: &KeyPattern,
        positions: &[(usize, KeyOrdering)],
        handle: SlotId,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        let mut shard_set = IndexKeySet::empty();
        for (position, _) in positions {
            shard_set = shard_set.with(*position);
        }
        let child_keys = match reqs.index_keys() {
            Some(parent) => parent.union(shard_set),
            None => shard_set,
        };

        let (stage, mut outputs) = self.build_node(child, reqs.with_index_keys(child_keys))?;

        let mut fields = Vec::with_capacity(shard_key.len());
        for ((path, ordering), (position, index_ordering)) in
            shard_key.parts.iter().zip(positions)
        {
            let slot = outputs.index_key_slot(*position).ok_or_else(|| {
                InternalError::build_invariant(format!(
                    "shard key component {position} missing from child outputs"
                ))
            })?;
            let mut value = Expr::variable(slot);
            // Hashed shard parts hash the stored value unless the index
            // itself stores hashes.
            if *ordering == KeyOrdering::Hashed && *index_ordering != KeyOrdering::Hashed {
                value = Expr::call(Function::ShardHash, vec![value]);
            }
            fields.push((path.dotted(), value));
        }

        let stage = Stage::Filter {
            input: Box::new(stage),
            predicate: Expr::call(
                Function::ShardFilter,
                vec![Expr::variable(handle), Expr::ObjectConstruct(fields)],
            ),
            constant: false,
        };

        outputs.narrow_index_keys(reqs.index_keys());
        Ok((stage, outputs))
    }

    fn build_uncovered_shard_filter(
        &mut self,
        child: &LogicalNode,
        shard_key: &KeyPattern,
        handle: SlotId,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        let child_reqs = reqs.with(SlotRole::Result);
        let (stage, outputs) = self.build_node(child, child_reqs)?;
        let result = outputs.get(SlotRole::Result)?;

        let mut all_present: Option<Expr> = None;
        let mut fields = Vec::with_capacity(shard_key.len());
        for (path, ordering) in &shard_key.parts {
            let mut read = Expr::variable(result);
            for segment in path.segments() {
                read = Expr::field_read(read, segment.clone());
            }

            let present = Expr::exists(read.clone());
            all_present = Some(match all_present {
                None => present,
                Some(expr) => Expr::binary(BinaryOp::And, expr, present),
            });

            let value = if *ordering == KeyOrdering::Hashed {
                Expr::call(Function::ShardHash, vec![read])
            } else {
                read
            };
            fields.push((path.dotted(), value));
        }

        // A row missing any shard-key part keys as the no-value sentinel,
        // keeping ownership-check semantics uniform across both paths.
        let key = Expr::if_then_else(
            all_present.unwrap_or_else(|| Expr::constant(Value::Bool(true))),
            Expr::ObjectConstruct(fields),
            Expr::constant(Value::Nothing),
        );

        let stage = Stage::Filter {
            input: Box::new(stage),
            predicate: Expr::call(Function::ShardFilter, vec![Expr::variable(handle), key]),
            constant: false,
        };

        Ok((stage, outputs))
    }
}

/// Index positions covering every shard-key path, when the child is an
/// unfetched index scan whose pattern contains them all.
fn covered_positions(
    child: &LogicalNode,
    shard_key: &KeyPattern,
) -> Option<Vec<(usize, KeyOrdering)>> {
    if child.fetched() {
        return None;
    }
    let scan = child.find_index_scan()?;

    shard_key
        .parts
        .iter()
        .map(|(path, _)| {
            scan.index
                .key_pattern
                .position(path)
                .map(|position| (position, scan.index.key_pattern.parts[position].1))
        })
        .collect()
}

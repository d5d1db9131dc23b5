//! Sort builder: sort-key generation, array traversal, and the
//! parallel-arrays guard.

use crate::{
    build::{SlotRole, StageBuilder, StageOutputs, StageRequirements},
    error::{BuildError, InternalError, UnsupportedFeature},
    expr::{BinaryOp, Expr, Function, TraverseFold},
    logical::{LogicalNode, SortDirection, SortPattern},
    path::FieldPath,
    physical::{SortStage, Stage},
    slot::SlotId,
    value::Value,
};

const PARALLEL_ARRAYS_ERROR: &str = "cannot sort with keys that are parallel arrays";

impl StageBuilder<'_> {
    /// Sort reads full documents: the child is always asked for the
    /// result regardless of what the parent wanted.
    pub(crate) fn build_sort(
        &mut self,
        child: &LogicalNode,
        pattern: &SortPattern,
        limit: Option<u64>,
        reqs: StageRequirements,
    ) -> Result<(Stage, StageOutputs), BuildError> {
        if pattern.is_empty() {
            return Err(InternalError::build_invariant("sort with an empty pattern").into());
        }
        if pattern.parts.iter().any(|part| part.path.head().starts_with('$')) {
            return Err(BuildError::unsupported(UnsupportedFeature::SortByMetadata));
        }

        let child_reqs = reqs.with(SlotRole::Result);
        let (mut stage, outputs) = self.build_node(child, child_reqs)?;
        let result = outputs.get(SlotRole::Result)?;

        // Independent per-part traversal is only sound when no two parts
        // share a leading path segment; otherwise cross-field array
        // correlation forces a single combined key-generation routine.
        let independent = pattern.distinct_head_segments().len() == pattern.len();

        let (order_by, directions) = if independent {
            let mut order_by = Vec::with_capacity(pattern.len());
            let mut bindings = Vec::with_capacity(pattern.len());
            for part in &pattern.parts {
                let key = self.sort_part_key_expr(result, &part.path, part.direction);
                let slot = self.slots.generate();
                bindings.push((slot, key));
                order_by.push(slot);
            }

            if pattern.len() >= 2 {
                stage = Stage::Filter {
                    input: Box::new(stage),
                    predicate: self.parallel_arrays_guard(result, pattern),
                    constant: false,
                };
            }

            stage = Stage::Project {
                input: Box::new(stage),
                bindings,
            };

            let directions = pattern.parts.iter().map(|part| part.direction).collect();
            (order_by, directions)
        } else {
            // One combined key slot holding the per-part key array;
            // directions stay per array element.
            let slot = self.slots.generate();
            stage = Stage::Project {
                input: Box::new(stage),
                bindings: vec![(
                    slot,
                    Expr::SortKey {
                        pattern: pattern.clone(),
                        input: Box::new(Expr::variable(result)),
                    },
                )],
            };
            let directions = pattern.parts.iter().map(|part| part.direction).collect();
            (vec![slot], directions)
        };

        let forwarded = outputs
            .all_slots()
            .into_iter()
            .filter(|slot| !order_by.contains(slot))
            .collect();

        let stage = Stage::Sort(SortStage {
            input: Box::new(stage),
            order_by,
            directions,
            forwarded,
            limit,
            memory_budget_bytes: self.context.sort_memory_budget_bytes,
            allow_disk_use: self.context.allow_disk_use,
        });

        Ok((stage, outputs))
    }

    /// Key derivation for one independent sort part. Per nesting level a
    /// field read feeds an array-flattening traverse folding min
    /// (ascending) or max (descending); missing fields key as null at
    /// every level, an empty array at the leaf as the undefined sentinel.
    pub(crate) fn sort_part_key_expr(
        &mut self,
        document: SlotId,
        path: &FieldPath,
        direction: SortDirection,
    ) -> Expr {
        let fold = match direction {
            SortDirection::Ascending => TraverseFold::Min,
            SortDirection::Descending => TraverseFold::Max,
        };
        self.sort_traverse_level(Expr::variable(document), path, 0, fold)
    }

    fn sort_traverse_level(
        &mut self,
        input: Expr,
        path: &FieldPath,
        level: usize,
        fold: TraverseFold,
    ) -> Expr {
        let field = Expr::field_read(input, path.segment(level));
        let binding = self.slots.generate();

        if path.is_leaf(level) {
            let element = match self.collation_slot {
                Some(collation) => Expr::call(
                    Function::CollationKey,
                    vec![Expr::variable(collation), Expr::variable(binding)],
                ),
                None => Expr::variable(binding),
            };
            return Expr::if_then_else(
                Expr::exists(field.clone()),
                Expr::fill_empty_undefined(Expr::Traverse {
                    input: Box::new(field),
                    binding,
                    inner: Box::new(element),
                    fold,
                }),
                Expr::constant(Value::Null),
            );
        }

        let inner = self.sort_traverse_level(Expr::variable(binding), path, level + 1, fold);
        Expr::fill_empty_null(Expr::Traverse {
            input: Box::new(field),
            binding,
            inner: Box::new(inner),
            fold,
        })
    }

    /// Sorting is ambiguous when two or more parts resolve to arrays for
    /// the same row. The guard counts array-valued parts with an O(k)
    /// expression and fails the row when the count exceeds one.
    pub(crate) fn parallel_arrays_guard(&self, document: SlotId, pattern: &SortPattern) -> Expr {
        let mut count: Option<Expr> = None;
        for part in &pattern.parts {
            let is_array = path_hits_array_expr(Expr::variable(document), &part.path, 0);
            let as_int = Expr::binary(
                BinaryOp::Cmp3w,
                is_array,
                Expr::constant(Value::Bool(false)),
            );
            count = Some(match count {
                None => as_int,
                Some(total) => Expr::binary(BinaryOp::Add, total, as_int),
            });
        }
        let count = count.unwrap_or_else(|| Expr::constant(Value::Int(0)));

        Expr::if_then_else(
            Expr::binary(BinaryOp::Lte, count, Expr::constant(Value::Int(1))),
            Expr::constant(Value::Bool(true)),
            Expr::fail(PARALLEL_ARRAYS_ERROR),
        )
    }
}

/// Whether any level of `path` resolves to an array. The or-chain
/// short-circuits at the outermost array, so deeper reads never run on
/// array values.
fn path_hits_array_expr(input: Expr, path: &FieldPath, level: usize) -> Expr {
    let field = Expr::field_read(input, path.segment(level));
    let here = Expr::call(Function::IsArray, vec![field.clone()]);
    if path.is_leaf(level) {
        return here;
    }
    Expr::binary(
        BinaryOp::Or,
        here,
        path_hits_array_expr(field, path, level + 1),
    )
}

///
/// TESTS
///

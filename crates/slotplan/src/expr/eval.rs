//! Reference interpreter for the expression IR.
//!
//! This is not the execution engine; it exists so compiled expressions can
//! be checked against their intended semantics in tests, and it doubles as
//! the executable definition of each builtin's contract.

use crate::{
    env::{EnvValue, RuntimeEnvironment},
    error::EvalError,
    expr::{BinaryOp, Expr, Function, TraverseFold, UnaryOp},
    logical::{SortDirection, SortPattern},
    path::FieldPath,
    slot::SlotId,
    value::{Value, canonical_cmp, value_hash},
};
use std::{cmp::Ordering, collections::BTreeMap};

///
/// SlotRow
///
/// One row of slot bindings as seen by an expression.
///

#[derive(Clone, Debug, Default)]
pub struct SlotRow {
    bindings: BTreeMap<SlotId, Value>,
}

impl SlotRow {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, slot: SlotId, value: Value) {
        self.bindings.insert(slot, value);
    }

    #[must_use]
    pub fn get(&self, slot: SlotId) -> Option<&Value> {
        self.bindings.get(&slot)
    }
}

/// Evaluate an expression over one row, with environment handles resolved
/// by slot.
pub fn eval(expr: &Expr, row: &SlotRow, env: &RuntimeEnvironment) -> Result<Value, EvalError> {
    match expr {
        Expr::Constant(value) => Ok(value.clone()),

        Expr::Variable(slot) => eval_variable(*slot, row, env),

        Expr::FieldRead { input, field } => {
            let input = eval(input, row, env)?;
            Ok(input.get_field(field).cloned().unwrap_or(Value::Nothing))
        }

        Expr::ObjectConstruct(fields) => {
            let mut out = Vec::with_capacity(fields.len());
            for (name, field_expr) in fields {
                let value = eval(field_expr, row, env)?;
                if !value.is_nothing() {
                    out.push((name.clone(), value));
                }
            }
            Ok(Value::Object(out))
        }

        Expr::If {
            condition,
            then_branch,
            else_branch,
        } => match eval(condition, row, env)? {
            Value::Bool(true) => eval(then_branch, row, env),
            Value::Bool(false) => eval(else_branch, row, env),
            _ => Err(EvalError::type_mismatch("if condition must be boolean")),
        },

        Expr::Unary { op, input } => {
            let input = eval(input, row, env)?;
            match (op, input) {
                (UnaryOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
                (UnaryOp::Not, _) => Err(EvalError::type_mismatch("not input must be boolean")),
            }
        }

        Expr::Binary { op, left, right } => eval_binary(*op, left, right, row, env),

        Expr::Call { function, args } => eval_call(*function, args, row, env),

        Expr::Traverse {
            input,
            binding,
            inner,
            fold,
        } => {
            let input = eval(input, row, env)?;
            eval_traverse(&input, *binding, inner, *fold, row, env)
        }

        Expr::SortKey { pattern, input } => {
            let document = eval(input, row, env)?;
            eval_sort_key(pattern, &document, env)
        }

        Expr::Fail { message } => Err(EvalError::fail(message.clone())),
    }
}

fn eval_variable(
    slot: SlotId,
    row: &SlotRow,
    env: &RuntimeEnvironment,
) -> Result<Value, EvalError> {
    if let Some(value) = row.get(slot) {
        return Ok(value.clone());
    }

    match env.value_for_slot(slot) {
        Some(EnvValue::Marker(value)) => Ok(value.clone()),
        Some(_) => Err(EvalError::type_mismatch(
            "environment handle slot read as a plain value",
        )),
        None => Ok(Value::Nothing),
    }
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    row: &SlotRow,
    env: &RuntimeEnvironment,
) -> Result<Value, EvalError> {
    // Logical operators short-circuit; a Fail on the pruned side never
    // fires.
    match op {
        BinaryOp::And => {
            return match eval(left, row, env)? {
                Value::Bool(false) => Ok(Value::Bool(false)),
                Value::Bool(true) => match eval(right, row, env)? {
                    b @ Value::Bool(_) => Ok(b),
                    _ => Err(EvalError::type_mismatch("and operand must be boolean")),
                },
                _ => Err(EvalError::type_mismatch("and operand must be boolean")),
            };
        }
        BinaryOp::Or => {
            return match eval(left, row, env)? {
                Value::Bool(true) => Ok(Value::Bool(true)),
                Value::Bool(false) => match eval(right, row, env)? {
                    b @ Value::Bool(_) => Ok(b),
                    _ => Err(EvalError::type_mismatch("or operand must be boolean")),
                },
                _ => Err(EvalError::type_mismatch("or operand must be boolean")),
            };
        }
        _ => {}
    }

    let left = eval(left, row, env)?;
    let right = eval(right, row, env)?;

    match op {
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
        BinaryOp::Add => eval_add(&left, &right),
        BinaryOp::Eq => Ok(Value::Bool(canonical_cmp(&left, &right) == Ordering::Equal)),
        BinaryOp::Lt => Ok(Value::Bool(canonical_cmp(&left, &right) == Ordering::Less)),
        BinaryOp::Lte => Ok(Value::Bool(
            canonical_cmp(&left, &right) != Ordering::Greater,
        )),
        BinaryOp::Gt => Ok(Value::Bool(
            canonical_cmp(&left, &right) == Ordering::Greater,
        )),
        BinaryOp::Gte => Ok(Value::Bool(canonical_cmp(&left, &right) != Ordering::Less)),
        BinaryOp::Cmp3w => Ok(Value::Int(match canonical_cmp(&left, &right) {
            Ordering::Less => -1,
            Ordering::Equal => 0,
            Ordering::Greater => 1,
        })),
    }
}

fn eval_add(left: &Value, right: &Value) -> Result<Value, EvalError> {
    match (left, right) {
        (Value::Int(a), Value::Int(b)) => a
            .checked_add(*b)
            .map(Value::Int)
            .ok_or_else(|| EvalError::fail("integer addition overflow")),
        (Value::Float(a), Value::Float(b)) => Ok(Value::Float(a + b)),
        (Value::Int(a), Value::Float(b)) => Ok(Value::Float(*a as f64 + b)),
        (Value::Float(a), Value::Int(b)) => Ok(Value::Float(a + *b as f64)),
        _ => Err(EvalError::type_mismatch("add operands must be numeric")),
    }
}

fn eval_call(
    function: Function,
    args: &[Expr],
    row: &SlotRow,
    env: &RuntimeEnvironment,
) -> Result<Value, EvalError> {
    match function {
        Function::Exists => {
            let input = eval(arg(args, 0)?, row, env)?;
            Ok(Value::Bool(!input.is_nothing()))
        }
        Function::IsArray => {
            let input = eval(arg(args, 0)?, row, env)?;
            Ok(Value::Bool(input.is_array()))
        }
        Function::IsObject => {
            let input = eval(arg(args, 0)?, row, env)?;
            Ok(Value::Bool(input.is_object()))
        }
        Function::FillEmpty => {
            let input = eval(arg(args, 0)?, row, env)?;
            if input.is_nothing() {
                eval(arg(args, 1)?, row, env)
            } else {
                Ok(input)
            }
        }
        Function::CollationKey => {
            let collation = match handle_slot(args, env)? {
                EnvValue::Collation(collation) => collation.clone(),
                _ => {
                    return Err(EvalError::type_mismatch(
                        "collation key requires a collation handle",
                    ));
                }
            };
            let input = eval(arg(args, 1)?, row, env)?;
            Ok(collation.comparison_key(&input))
        }
        Function::TextMatch => {
            let matcher = match handle_slot(args, env)? {
                EnvValue::TextMatcher(matcher) => matcher.clone(),
                _ => {
                    return Err(EvalError::type_mismatch(
                        "text match requires a matcher handle",
                    ));
                }
            };
            let document = eval(arg(args, 1)?, row, env)?;
            Ok(Value::Bool(matcher.matches(&document)))
        }
        Function::ShardFilter => {
            let oracle = match handle_slot(args, env)? {
                EnvValue::ShardOracle(oracle) => oracle.clone(),
                _ => {
                    return Err(EvalError::type_mismatch(
                        "shard filter requires an oracle handle",
                    ));
                }
            };
            let key = eval(arg(args, 1)?, row, env)?;
            Ok(Value::Bool(oracle.owns(&key)))
        }
        Function::ShardHash => {
            let input = eval(arg(args, 0)?, row, env)?;
            Ok(Value::Int(value_hash(&input) as i64))
        }
    }
}

fn arg(args: &[Expr], index: usize) -> Result<&Expr, EvalError> {
    args.get(index)
        .ok_or_else(|| EvalError::type_mismatch("missing builtin argument"))
}

/// First argument of an environment-backed builtin: must be a direct slot
/// read of a registered handle.
fn handle_slot<'a>(args: &[Expr], env: &'a RuntimeEnvironment) -> Result<&'a EnvValue, EvalError> {
    match arg(args, 0)? {
        Expr::Variable(slot) => env
            .value_for_slot(*slot)
            .ok_or_else(|| EvalError::type_mismatch("unregistered environment handle slot")),
        _ => Err(EvalError::type_mismatch(
            "environment-backed builtin requires a handle slot argument",
        )),
    }
}

/// Traversal contract: `Nothing` passes through without invoking the
/// inner expression; arrays fold per-element inner results (empty array
/// folds to `Nothing`); any other value binds itself and evaluates the
/// inner expression once.
fn eval_traverse(
    input: &Value,
    binding: SlotId,
    inner: &Expr,
    fold: TraverseFold,
    row: &SlotRow,
    env: &RuntimeEnvironment,
) -> Result<Value, EvalError> {
    let eval_bound = |element: &Value| -> Result<Value, EvalError> {
        let mut bound = row.clone();
        bound.set(binding, element.clone());
        eval(inner, &bound, env)
    };

    match input {
        Value::Nothing => Ok(Value::Nothing),
        Value::Array(items) => {
            let mut best: Option<Value> = None;
            for item in items {
                let candidate = eval_bound(item)?;
                best = Some(match best {
                    None => candidate,
                    Some(current) => fold_pick(fold, current, candidate),
                });
            }
            Ok(best.unwrap_or(Value::Nothing))
        }
        other => eval_bound(other),
    }
}

fn fold_pick(fold: TraverseFold, current: Value, candidate: Value) -> Value {
    let keep_candidate = match fold {
        TraverseFold::Min => canonical_cmp(&candidate, &current) == Ordering::Less,
        TraverseFold::Max => canonical_cmp(&candidate, &current) == Ordering::Greater,
    };
    if keep_candidate { candidate } else { current }
}

fn eval_sort_key(
    pattern: &SortPattern,
    document: &Value,
    env: &RuntimeEnvironment,
) -> Result<Value, EvalError> {
    let mut parts = Vec::with_capacity(pattern.parts.len());
    for part in &pattern.parts {
        let fold = match part.direction {
            SortDirection::Ascending => TraverseFold::Min,
            SortDirection::Descending => TraverseFold::Max,
        };
        parts.push(sort_key_part(document, &part.path, 0, fold, env));
    }
    Ok(Value::Array(parts))
}

/// Derive one sort-pattern part's key. A missing field at any level keys
/// as `Null`; an empty array at the leaf keys as `Undefined`; arrays fold
/// min/max per the sort direction. Mirrors the traversal expressions the
/// sort builder emits.
fn sort_key_part(
    document: &Value,
    path: &FieldPath,
    level: usize,
    fold: TraverseFold,
    env: &RuntimeEnvironment,
) -> Value {
    let field = document
        .get_field(path.segment(level))
        .cloned()
        .unwrap_or(Value::Nothing);

    if path.is_leaf(level) {
        return match field {
            Value::Nothing => Value::Null,
            Value::Array(items) if items.is_empty() => Value::Undefined,
            Value::Array(items) => fold_all(items.iter().map(|item| leaf_key(item, env)), fold),
            other => leaf_key(&other, env),
        };
    }

    match field {
        Value::Nothing => Value::Null,
        Value::Array(items) if items.is_empty() => Value::Null,
        Value::Array(items) => fold_all(
            items
                .iter()
                .map(|item| sort_key_part(item, path, level + 1, fold, env)),
            fold,
        ),
        other => sort_key_part(&other, path, level + 1, fold, env),
    }
}

fn leaf_key(value: &Value, env: &RuntimeEnvironment) -> Value {
    match env.collation() {
        Some(collation) => collation.comparison_key(value),
        None => value.clone(),
    }
}

fn fold_all(keys: impl Iterator<Item = Value>, fold: TraverseFold) -> Value {
    let mut best: Option<Value> = None;
    for key in keys {
        best = Some(match best {
            None => key,
            Some(current) => fold_pick(fold, current, key),
        });
    }
    best.unwrap_or(Value::Nothing)
}

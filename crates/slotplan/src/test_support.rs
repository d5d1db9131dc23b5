//! Shared fixtures for builder tests: json-to-value conversion and
//! minimal collaborator implementations.

use crate::{
    error::{BuildError, InternalError},
    expr::{BinaryOp, Expr},
    interface::{
        ExpressionLowering, ReadGate, ShardOwnershipOracle, TextMatcher, TextMatcherProvider,
    },
    logical::{CompareOp, KeyPattern, Predicate, Projection},
    slot::{SlotGenerator, SlotId},
    value::Value,
};
use std::sync::Arc;

pub(crate) fn to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => n
            .as_i64()
            .map_or_else(|| Value::Float(n.as_f64().unwrap_or(f64::NAN)), Value::Int),
        serde_json::Value::String(s) => Value::Text(s.clone()),
        serde_json::Value::Array(items) => Value::Array(items.iter().map(to_value).collect()),
        serde_json::Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(name, value)| (name.clone(), to_value(value)))
                .collect(),
        ),
    }
}

///
/// PassthroughLowering
///
/// Structural predicate lowering with no rewrites: comparisons become
/// dotted field reads against constants, inclusion projections become
/// object construction.
///

#[derive(Debug, Default)]
pub(crate) struct PassthroughLowering;

fn dotted_read(input: SlotId, path: &crate::path::FieldPath) -> Expr {
    let mut expr = Expr::variable(input);
    for segment in path.segments() {
        expr = Expr::field_read(expr, segment.clone());
    }
    expr
}

fn lower(predicate: &Predicate, input: SlotId) -> Expr {
    match predicate {
        Predicate::Compare { path, op, value } => {
            let op = match op {
                CompareOp::Eq => BinaryOp::Eq,
                CompareOp::Lt => BinaryOp::Lt,
                CompareOp::Lte => BinaryOp::Lte,
                CompareOp::Gt => BinaryOp::Gt,
                CompareOp::Gte => BinaryOp::Gte,
            };
            Expr::binary(op, dotted_read(input, path), Expr::constant(value.clone()))
        }
        Predicate::And(children) => fold_bool(BinaryOp::And, children, input, true),
        Predicate::Or(children) => fold_bool(BinaryOp::Or, children, input, false),
        Predicate::Not(inner) => Expr::not(lower(inner, input)),
        Predicate::Exists(path) => Expr::exists(dotted_read(input, path)),
    }
}

fn fold_bool(op: BinaryOp, children: &[Predicate], input: SlotId, empty: bool) -> Expr {
    let mut expr: Option<Expr> = None;
    for child in children {
        let lowered = lower(child, input);
        expr = Some(match expr {
            None => lowered,
            Some(acc) => Expr::binary(op, acc, lowered),
        });
    }
    expr.unwrap_or_else(|| Expr::constant(Value::Bool(empty)))
}

impl ExpressionLowering for PassthroughLowering {
    fn lower_predicate(
        &mut self,
        predicate: &Predicate,
        input: SlotId,
        _slots: &mut SlotGenerator,
    ) -> Result<Expr, BuildError> {
        Ok(lower(predicate, input))
    }

    fn lower_projection(
        &mut self,
        projection: &Projection,
        input: SlotId,
        _slots: &mut SlotGenerator,
    ) -> Result<Expr, BuildError> {
        match projection {
            Projection::Include(fields) => Ok(Expr::ObjectConstruct(
                fields
                    .iter()
                    .map(|field| {
                        (
                            field.clone(),
                            Expr::field_read(Expr::variable(input), field.clone()),
                        )
                    })
                    .collect(),
            )),
            Projection::Exclude(_) => Ok(Expr::variable(input)),
        }
    }
}

///
/// StaticShardOracle
///
/// Owns exactly the keys it was constructed with.
///

pub(crate) struct StaticShardOracle {
    pattern: KeyPattern,
    owned: Vec<Value>,
}

impl StaticShardOracle {
    pub(crate) fn new(pattern: KeyPattern, owned: Vec<Value>) -> Arc<Self> {
        Arc::new(Self { pattern, owned })
    }
}

impl ShardOwnershipOracle for StaticShardOracle {
    fn key_pattern(&self) -> &KeyPattern {
        &self.pattern
    }

    fn owns(&self, key: &Value) -> bool {
        self.owned.contains(key)
    }
}

///
/// SubstringMatcher
///
/// Matches documents containing the needle in any text value.
///

pub(crate) struct SubstringMatcher {
    needle: String,
}

fn contains_text(value: &Value, needle: &str) -> bool {
    match value {
        Value::Text(text) => text.contains(needle),
        Value::Array(items) => items.iter().any(|item| contains_text(item, needle)),
        Value::Object(fields) => fields.iter().any(|(_, field)| contains_text(field, needle)),
        _ => false,
    }
}

impl TextMatcher for SubstringMatcher {
    fn matches(&self, document: &Value) -> bool {
        contains_text(document, &self.needle)
    }
}

///
/// SubstringMatcherProvider
///

#[derive(Debug, Default)]
pub(crate) struct SubstringMatcherProvider;

impl TextMatcherProvider for SubstringMatcherProvider {
    fn matcher_for(
        &self,
        _index_name: &str,
        query: &str,
    ) -> Result<Arc<dyn TextMatcher>, BuildError> {
        Ok(Arc::new(SubstringMatcher {
            needle: query.to_string(),
        }))
    }
}

///
/// OpenGate
///

#[derive(Debug, Default)]
pub(crate) struct OpenGate;

impl ReadGate for OpenGate {
    fn check_can_read(&self) -> Result<(), InternalError> {
        Ok(())
    }
}

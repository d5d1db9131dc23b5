//! Scalar/record expression IR attached to physical operators.
//!
//! Expressions are plain data: no closures, no shared state. Anything
//! environment-backed (collations, text matchers, shard oracles) is
//! reached through a `Variable` read of the slot its handle was registered
//! under.

mod eval;


pub use eval::{SlotRow, eval};

use crate::{logical::SortPattern, slot::SlotId, value::Value};
use serde::{Deserialize, Serialize};

///
/// UnaryOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum UnaryOp {
    Not,
}

///
/// BinaryOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum BinaryOp {
    And,
    Or,
    Add,
    Eq,
    Lt,
    Lte,
    Gt,
    Gte,
    /// Three-way canonical comparison yielding -1, 0, or 1.
    Cmp3w,
}

///
/// Function
///
/// Named builtin calls. Argument arity and meaning are documented on the
/// reference interpreter.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Function {
    Exists,
    IsArray,
    IsObject,
    FillEmpty,
    CollationKey,
    TextMatch,
    ShardFilter,
    ShardHash,
}

///
/// TraverseFold
///
/// How array traversal folds per-element results into one key: keep the
/// minimum or the maximum under the canonical order.
///

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum TraverseFold {
    Min,
    Max,
}

///
/// Expr
///

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Constant(Value),

    /// Read a slot. Resolves against the current row first, then against
    /// environment marker entries.
    Variable(SlotId),

    /// Read a single field from the object produced by `input`.
    /// Non-objects and absent fields yield `Nothing`.
    FieldRead { input: Box<Expr>, field: String },

    /// Construct an object from ordered field pairs. Fields whose value
    /// evaluates to `Nothing` are omitted.
    ObjectConstruct(Vec<(String, Expr)>),

    If {
        condition: Box<Expr>,
        then_branch: Box<Expr>,
        else_branch: Box<Expr>,
    },

    Unary {
        op: UnaryOp,
        input: Box<Expr>,
    },

    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    Call {
        function: Function,
        args: Vec<Expr>,
    },

    /// Evaluate `input`; if it is an array, bind each element to `binding`
    /// in turn, evaluate `inner`, and fold the results per `fold`. An
    /// empty array folds to `Nothing`. Non-arrays bind the value itself
    /// and evaluate `inner` once.
    Traverse {
        input: Box<Expr>,
        binding: SlotId,
        inner: Box<Expr>,
        fold: TraverseFold,
    },

    /// Derive the composite sort key of the document produced by `input`,
    /// as an array with one entry per pattern part.
    SortKey {
        pattern: SortPattern,
        input: Box<Expr>,
    },

    /// Data-dependent runtime error.
    Fail { message: String },
}

impl Expr {
    #[must_use]
    pub const fn variable(slot: SlotId) -> Self {
        Self::Variable(slot)
    }

    #[must_use]
    pub const fn constant(value: Value) -> Self {
        Self::Constant(value)
    }

    #[must_use]
    pub fn field_read(input: Self, field: impl Into<String>) -> Self {
        Self::FieldRead {
            input: Box::new(input),
            field: field.into(),
        }
    }

    #[must_use]
    pub fn not(input: Self) -> Self {
        Self::Unary {
            op: UnaryOp::Not,
            input: Box::new(input),
        }
    }

    #[must_use]
    pub fn binary(op: BinaryOp, left: Self, right: Self) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    #[must_use]
    pub fn call(function: Function, args: Vec<Self>) -> Self {
        Self::Call { function, args }
    }

    #[must_use]
    pub fn exists(input: Self) -> Self {
        Self::call(Function::Exists, vec![input])
    }

    /// `input` if it is a value, `fallback` if it is `Nothing`.
    #[must_use]
    pub fn fill_empty(input: Self, fallback: Self) -> Self {
        Self::call(Function::FillEmpty, vec![input, fallback])
    }

    #[must_use]
    pub fn fill_empty_null(input: Self) -> Self {
        Self::fill_empty(input, Self::Constant(Value::Null))
    }

    #[must_use]
    pub fn fill_empty_undefined(input: Self) -> Self {
        Self::fill_empty(input, Self::Constant(Value::Undefined))
    }

    #[must_use]
    pub fn if_then_else(condition: Self, then_branch: Self, else_branch: Self) -> Self {
        Self::If {
            condition: Box::new(condition),
            then_branch: Box::new(then_branch),
            else_branch: Box::new(else_branch),
        }
    }

    #[must_use]
    pub fn fail(message: impl Into<String>) -> Self {
        Self::Fail {
            message: message.into(),
        }
    }
}

//! Collaborator contracts consumed by the plan compiler.
//!
//! All of these are owned by surrounding infrastructure and injected by the
//! caller; the compiler only specifies their interface. None of them may
//! allocate slots outside the generator they are handed.

use crate::{
    error::{BuildError, InternalError},
    expr::Expr,
    logical::{KeyPattern, Predicate, Projection},
    slot::{SlotGenerator, SlotId},
    value::Value,
};
use std::sync::Arc;

///
/// ExpressionLowering
///
/// Predicate/projection sub-compiler: lowers logical filter and projection
/// ASTs into scalar expressions over the slot holding the input document.
///

pub trait ExpressionLowering {
    /// Lower a filter predicate to a boolean expression over `input`.
    fn lower_predicate(
        &mut self,
        predicate: &Predicate,
        input: SlotId,
        slots: &mut SlotGenerator,
    ) -> Result<Expr, BuildError>;

    /// Lower a projection to a document expression over `input`.
    fn lower_projection(
        &mut self,
        projection: &Projection,
        input: SlotId,
        slots: &mut SlotGenerator,
    ) -> Result<Expr, BuildError>;
}

///
/// ShardOwnershipOracle
///
/// Shard-ownership authority: exposes the shard-key pattern and a pure
/// ownership predicate over a flat key object synthesized by the compiler.
///

pub trait ShardOwnershipOracle: Send + Sync {
    fn key_pattern(&self) -> &KeyPattern;

    /// Whether the given flat shard-key object belongs to this node.
    fn owns(&self, key: &Value) -> bool;
}

///
/// TextMatcher
///
/// Precompiled text-search matcher; a pure row predicate over the full
/// document.
///

pub trait TextMatcher: Send + Sync {
    fn matches(&self, document: &Value) -> bool;
}

///
/// TextMatcherProvider
///
/// Compiles a matcher for a query string against a named text index.
///

pub trait TextMatcherProvider {
    fn matcher_for(
        &self,
        index_name: &str,
        query: &str,
    ) -> Result<Arc<dyn TextMatcher>, BuildError>;
}

///
/// ReadGate
///
/// Storage read gating callback, invoked by the execution engine once per
/// physical row fetch (locking/read-concern checks). The compiler only
/// records the handle on scan stages via the runtime environment.
///

pub trait ReadGate: Send + Sync {
    fn check_can_read(&self) -> Result<(), InternalError>;
}

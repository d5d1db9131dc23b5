//! Slot-based physical plan compiler: translates an optimizer-produced
//! logical solution tree into an executable physical operator tree over a
//! columnar register file ("slots"), together with the scalar/record
//! expressions each operator needs.
//!
//! The compiler is single-use and single-threaded; all shared allocation
//! state (slot ids, the runtime environment) is threaded explicitly through
//! the recursion. Requirements flow down the tree, output registries flow
//! back up, and every declared output is bound on every execution path,
//! including the zero-row path.
#![warn(unreachable_pub)]

pub mod build;
pub mod env;
pub mod error;
pub mod expr;
pub mod interface;
pub mod logical;
pub mod path;
pub mod physical;
pub mod slot;
pub mod trace;
pub mod value;

// test
#[cfg(test)]
pub(crate) mod test_support;

///
/// CONSTANTS
///

/// Maximum number of components in a composite index key pattern.
///
/// This bounds the fixed-size component bitset carried by stage
/// requirements and keeps it `Copy`.
pub const MAX_KEY_COMPONENTS: usize = 32;

///
/// Prelude
///
/// Prelude contains only compiler-facing vocabulary.
/// No collaborator traits, errors, or internal helpers are re-exported here.
///

pub mod prelude {
    pub use crate::{
        build::{CompiledPlan, StageBuilder, StageOutputs, StageRequirements},
        logical::{LogicalNode, QueryContext, QuerySolution},
        physical::Stage,
        slot::SlotId,
        value::Value,
    };
}

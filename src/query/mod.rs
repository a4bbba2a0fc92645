//! Query compilation: filter compiler, path resolver, include planner, merge algebra and
//! composer, plus the resolver-facing entry points.

pub mod args;
pub mod compiler;
pub mod compose;
pub mod expression;
pub mod filter;
pub mod include;
pub mod merge;
pub mod path;
pub mod plan;
pub mod resolver;
pub mod selection;
pub mod subscription;

#[cfg(test)]
pub(crate) mod fixtures;

pub use args::QueryArgs;
pub use compiler::{compile, FilterCompiler};
pub use filter::{AttributePath, Connective, FilterNode, FilterValue, Operator};
pub use include::{IncludeNode, IncludePlanner};
pub use merge::merge;
pub use plan::{
    AggregateFn, Direction, OrderEntry, OrderTarget, PartialPlan, QueryPlan, SelectItem,
};
pub use resolver::{Mutation, QueryCompiler};
pub use selection::{ArgValue, ExecutionInfo, FieldSelection, FragmentDefinition, Selection};
pub use subscription::{deleted_ids, reduce_payloads, ModelEvent};

//! modelgraph: compiles GraphQL query arguments over relational model metadata into query
//! plans, renders them as PostgreSQL and executes them.

pub mod case;
pub mod config;
pub mod context;
pub mod error;
pub mod naming;
pub mod query;
pub mod service;
pub mod sql;
pub mod state;

pub use config::{load_from_path, load_from_str, resolve, FullConfig, ModelRegistry, PlannerOptions};
pub use context::SchemaContext;
pub use error::{AppError, ConfigError, PlanError};
pub use naming::{DefaultNameFormatter, NameFormatter};
pub use query::{
    ExecutionInfo, FieldSelection, FragmentDefinition, ModelEvent, Mutation, QueryCompiler,
    QueryPlan, Selection,
};
pub use service::{PgStorage, StorageEngine};
pub use state::AppState;

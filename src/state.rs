//! Shared state for a resolver layer: pool, schema context and the compiler over it.

use crate::context::SchemaContext;
use crate::query::QueryCompiler;
use crate::service::PgStorage;
use sqlx::PgPool;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub schema: Arc<SchemaContext>,
    pub compiler: QueryCompiler,
    pub storage: PgStorage,
}

impl AppState {
    pub fn new(pool: PgPool, schema: Arc<SchemaContext>) -> Self {
        AppState {
            compiler: QueryCompiler::new(schema.clone()),
            storage: PgStorage::new(pool.clone(), schema.clone()),
            pool,
            schema,
        }
    }
}

//! Shared test schema.

use crate::config::{load_from_str, Dialect};
use crate::context::SchemaContext;
use std::sync::Arc;

pub(crate) const SHOP: &str = include_str!("../../tests/fixtures/shop.json");

pub(crate) fn shop() -> Arc<SchemaContext> {
    let config = load_from_str(SHOP).unwrap();
    SchemaContext::build(&config).unwrap()
}

pub(crate) fn shop_with(dialect: Dialect, max_many_associations: usize) -> Arc<SchemaContext> {
    let mut config = load_from_str(SHOP).unwrap();
    config.options.dialect = dialect;
    config.options.max_many_associations = max_many_associations;
    SchemaContext::build(&config).unwrap()
}

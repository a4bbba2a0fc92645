//! Plan execution against a database.

mod storage;
pub use storage::{assemble, PgStorage, StorageEngine};

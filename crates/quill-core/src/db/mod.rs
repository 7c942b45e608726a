//! Database layer for Quill

mod change_log;
mod connection;
mod entity_store;
mod migrations;
mod values;

pub use change_log::LibSqlChangeLog;
pub use connection::{Database, SharedDatabase};
pub use entity_store::LibSqlEntityStore;

//! Persistence layer: libSQL-backed storage for article jobs.

pub mod libsql_backend;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlJobStore;
pub use traits::JobStore;

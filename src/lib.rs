//! Database gateway for the education admin platform.
//!
//! The gateway gives the application one stable query surface over three
//! interchangeable PostgreSQL-flavored backends: a conventional pooled
//! connection (`standard-sql`), the managed RDS Data API
//! (`data-api-relational`) and an auto-scaling serverless cluster behind a
//! burst-sized pool (`serverless-pooled-sql`). Which backend is active is
//! decided from configuration at startup and can be changed at runtime
//! without dropping the process's only connection.

pub mod config;
pub mod db;
pub mod error;
pub mod health;
pub mod http;
pub mod migrate;

pub use config::Config;
pub use db::{BackendKind, DatabaseManager, Db};
pub use error::{DbError, DbResult};

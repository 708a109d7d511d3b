//! Database backend abstraction.
//!
//! The gateway can run against one of three interchangeable backends; the
//! rest of the application talks to whichever one is active through the
//! uniform [`Db`] facade and never sees backend-specific types.

pub mod backend;
pub mod connector;
pub mod data_api;
pub mod manager;
pub mod params;
pub mod types;

#[cfg(test)]
pub mod mock;

pub use backend::{BackendKind, DataApiParams, Selection, select_backend, selection_for};
pub use connector::Connector;
pub use manager::{DatabaseManager, Db, global, init_global};
pub use params::{QueryOutput, SqlParam};

//! Postgres persistence for threadwatch: content items, labels, staff
//! response facts, per-staff aggregates and the job run log.

pub mod error;
mod rows;
pub mod store;

pub use error::{Result, StoreError};
pub use store::PgStore;

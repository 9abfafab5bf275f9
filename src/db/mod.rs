//! Database module for SiteLens.
//!
//! SQLite-backed site registry and durable probe log.

mod models;
mod store;

pub use models::*;
pub use store::*;

#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! SliceVM Shared Types
//!
//! Types and helpers used by both the API server and the billing crate:
//! VM status/operation enums and database pool construction.

pub mod db;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use types::{VmOperation, VmStatus};

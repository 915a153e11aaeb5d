// API crate clippy configuration
// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! SliceVM API Library
//!
//! HTTP surface of the dashboard: plan listing, quoting, subscription
//! lifecycle, and gated VM actions.

pub mod config;
pub mod error;
pub mod hypervisor;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use hypervisor::HypervisorClient;
pub use state::AppState;

// Billing crate clippy configuration
#![allow(clippy::result_large_err)] // BillingError carries contextual strings
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! SliceVM Billing Core
//!
//! The decision logic behind the dashboard:
//!
//! - **Plan catalog**: static plan/price-breakpoint data
//! - **Pricing**: quotes with linear interpolation between breakpoints;
//!   out-of-range quantities route to contact-sales instead of a guess
//! - **State**: classifies a subscription record into
//!   none/active/cancelling/expired, recomputed on every read
//! - **Gate**: maps state + VM status to the permitted lifecycle operations
//! - **Upgrade**: new-vs-upgrade routing with per-account serialization
//!   against the Stripe-backed billing provider

pub mod catalog;
pub mod error;
pub mod gate;
pub mod pricing;
pub mod provider;
pub mod state;
pub mod store;
pub mod upgrade;


// Catalog
pub use catalog::{Breakpoint, Plan, PlanCatalog, PlanSpecs};

// Error
pub use error::{BillingError, BillingResult};

// Gate
pub use gate::{DenialReason, OperationDecision, VmPermissions};

// Pricing
pub use pricing::{quote, Quote};

// Provider
pub use provider::{
    BillingProvider, CheckoutRedirect, ProviderSubscription, StripeBilling, StripeConfig,
};

// State
pub use state::{Subscription, SubscriptionState};

// Store
pub use store::{AccountBilling, SubscriptionRepo, SubscriptionStore, VmRecord};

// Upgrade
pub use upgrade::{decide, UpgradeDecision, UpgradeOrchestrator, UpgradeOutcome};

//! Pricing engine
//!
//! Computes quotes from the plan catalog. A quote is a pure function of
//! `(plan_id, quantity, catalog)`: identical inputs always produce identical
//! output, so the total a user previewed is the total they submit.
//!
//! Per-unit prices between two breakpoints are linearly interpolated, giving a
//! continuous, non-increasing piecewise-linear curve over the supported
//! quantity range. Quantities above the last breakpoint are not quotable and
//! must be routed to contact-sales; guessing a price there is worse than
//! refusing one.

use serde::Serialize;

use crate::catalog::PlanCatalog;
use crate::error::{BillingError, BillingResult};

/// A computed, not-yet-committed price for a plan+quantity selection.
/// Ephemeral; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Quote {
    pub plan_id: String,
    pub quantity: i64,
    pub per_unit_cents: i64,
    pub total_cents: i64,
}

/// Price a plan+quantity selection.
///
/// Interpolation runs in full `f64` precision; each output field is rounded
/// exactly once, at the end, to the nearest cent.
pub fn quote(catalog: &PlanCatalog, plan_id: &str, quantity: i64) -> BillingResult<Quote> {
    let plan = catalog
        .get(plan_id)
        .ok_or_else(|| BillingError::PlanNotFound(plan_id.to_string()))?;

    if quantity < 1 {
        return Err(BillingError::InvalidQuantity(quantity as f64));
    }
    if quantity > i64::from(plan.max_quantity()) {
        return Err(BillingError::NotQuotable {
            plan_id: plan_id.to_string(),
            quantity,
        });
    }

    let per_unit = per_unit_cents_exact(plan.breakpoints, quantity)?;
    let total = per_unit * quantity as f64;

    Ok(Quote {
        plan_id: plan_id.to_string(),
        quantity,
        per_unit_cents: per_unit.round() as i64,
        total_cents: total.round() as i64,
    })
}

/// Full-precision per-unit price at `quantity`, which must already be within
/// the plan's breakpoint range.
fn per_unit_cents_exact(breakpoints: &[crate::catalog::Breakpoint], quantity: i64) -> BillingResult<f64> {
    // Exact breakpoint match takes the catalog value untouched
    if let Some(bp) = breakpoints.iter().find(|bp| i64::from(bp.quantity) == quantity) {
        return Ok(bp.per_unit_cents as f64);
    }

    // Quantities below the first breakpoint were rejected by the caller;
    // find the surrounding pair and interpolate linearly on per-unit price.
    for pair in breakpoints.windows(2) {
        let (lo, hi) = (pair[0], pair[1]);
        if quantity > i64::from(lo.quantity) && quantity < i64::from(hi.quantity) {
            let span = (hi.quantity - lo.quantity) as f64;
            let offset = (quantity - i64::from(lo.quantity)) as f64;
            let slope = (hi.per_unit_cents - lo.per_unit_cents) as f64 / span;
            return Ok(lo.per_unit_cents as f64 + slope * offset);
        }
    }

    // Unreachable with a validated catalog and range-checked quantity
    Err(BillingError::InvalidQuantity(quantity as f64))
}

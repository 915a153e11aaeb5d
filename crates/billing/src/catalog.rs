//! Plan catalog
//!
//! Static plan and price-breakpoint data. Pure data, no I/O; the pricing
//! engine interpolates between the breakpoints defined here.
//!
//! Every breakpoint quantity from 1 to the plan maximum is quotable; anything
//! above the last breakpoint is a contact-sales conversation, not a price.

use serde::Serialize;

/// A defined `(quantity, per-unit price)` point on a plan's pricing curve.
///
/// Breakpoints are ordered by strictly increasing quantity, and per-unit
/// prices are non-increasing as quantity grows (volume discount).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Breakpoint {
    pub quantity: u32,
    pub per_unit_cents: i64,
}

/// Hardware specs a single VM of this plan is sliced from.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct PlanSpecs {
    pub cpu_cores: u32,
    pub memory_mb: u32,
    pub disk_gb: u32,
    /// Hours per day a rented slice is powered
    pub daily_hours: u32,
}

/// A named service tier with a specs descriptor and a price curve.
#[derive(Debug, Clone, Serialize)]
pub struct Plan {
    pub id: &'static str,
    pub display_name: &'static str,
    pub specs: PlanSpecs,
    pub features: &'static [&'static str],
    pub breakpoints: &'static [Breakpoint],
}

impl Plan {
    /// Largest quantity this plan defines a price for
    pub fn max_quantity(&self) -> u32 {
        self.breakpoints.last().map(|bp| bp.quantity).unwrap_or(0)
    }
}

const fn bp(quantity: u32, per_unit_cents: i64) -> Breakpoint {
    Breakpoint {
        quantity,
        per_unit_cents,
    }
}

// The 10-unit point is explicit catalog data rather than a value derived from
// the 20-unit tier at quote time. Adjusting the curve is a catalog edit.
const HOUR_BOOSTER_BREAKPOINTS: [Breakpoint; 5] = [
    bp(1, 1200),
    bp(2, 1000),
    bp(5, 900),
    bp(10, 800),
    bp(20, 700),
];

const STANDARD_BREAKPOINTS: [Breakpoint; 5] = [
    bp(1, 1800),
    bp(2, 1600),
    bp(5, 1450),
    bp(10, 1300),
    bp(20, 1100),
];

const PREMIUM_BREAKPOINTS: [Breakpoint; 5] = [
    bp(1, 2900),
    bp(2, 2600),
    bp(5, 2400),
    bp(10, 2200),
    bp(20, 1900),
];

const PLANS: [Plan; 3] = [
    Plan {
        id: "hour_booster",
        display_name: "Hour Booster",
        specs: PlanSpecs {
            cpu_cores: 2,
            memory_mb: 4096,
            disk_gb: 40,
            daily_hours: 6,
        },
        features: &["6h daily slice", "NVMe storage", "Snapshots"],
        breakpoints: &HOUR_BOOSTER_BREAKPOINTS,
    },
    Plan {
        id: "standard",
        display_name: "Standard",
        specs: PlanSpecs {
            cpu_cores: 4,
            memory_mb: 8192,
            disk_gb: 80,
            daily_hours: 12,
        },
        features: &["12h daily slice", "NVMe storage", "Snapshots", "Backups"],
        breakpoints: &STANDARD_BREAKPOINTS,
    },
    Plan {
        id: "premium",
        display_name: "Premium",
        specs: PlanSpecs {
            cpu_cores: 8,
            memory_mb: 16384,
            disk_gb: 160,
            daily_hours: 24,
        },
        features: &[
            "24h dedicated slice",
            "NVMe storage",
            "Snapshots",
            "Backups",
            "Priority support",
        ],
        breakpoints: &PREMIUM_BREAKPOINTS,
    },
];

/// Immutable catalog of every rentable plan.
#[derive(Debug, Clone, Default)]
pub struct PlanCatalog;

impl PlanCatalog {
    pub fn new() -> Self {
        PlanCatalog
    }

    /// Look up a plan by id
    pub fn get(&self, plan_id: &str) -> Option<&'static Plan> {
        PLANS.iter().find(|p| p.id == plan_id)
    }

    /// All plans, in display order
    pub fn plans(&self) -> &'static [Plan] {
        &PLANS
    }

    /// Check breakpoint ordering for every plan: strictly increasing
    /// quantities, non-increasing per-unit prices, nothing below quantity 1.
    pub fn validate(&self) -> Result<(), String> {
        for plan in self.plans() {
            if plan.breakpoints.is_empty() {
                return Err(format!("plan '{}' has no breakpoints", plan.id));
            }
            for pair in plan.breakpoints.windows(2) {
                if pair[1].quantity <= pair[0].quantity {
                    return Err(format!(
                        "plan '{}': breakpoint quantities not strictly increasing at {}",
                        plan.id, pair[1].quantity
                    ));
                }
                if pair[1].per_unit_cents > pair[0].per_unit_cents {
                    return Err(format!(
                        "plan '{}': per-unit price increases at quantity {}",
                        plan.id, pair[1].quantity
                    ));
                }
            }
            if plan.breakpoints[0].quantity < 1 {
                return Err(format!("plan '{}' defines a quantity below 1", plan.id));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_data_is_well_formed() {
        PlanCatalog::new().validate().unwrap();
    }

    #[test]
    fn known_plans_resolve() {
        let catalog = PlanCatalog::new();
        assert!(catalog.get("hour_booster").is_some());
        assert!(catalog.get("standard").is_some());
        assert!(catalog.get("premium").is_some());
        assert!(catalog.get("enterprise").is_none());
    }

    #[test]
    fn max_quantity_is_last_breakpoint() {
        let catalog = PlanCatalog::new();
        for plan in catalog.plans() {
            assert_eq!(plan.max_quantity(), 20, "plan {}", plan.id);
        }
    }
}

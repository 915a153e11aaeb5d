//! Route registration

pub mod subscription;
pub mod vms;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/plans", get(subscription::list_plans))
        .route("/api/quote", post(subscription::post_quote))
        .route(
            "/api/accounts/{account_id}/subscription",
            get(subscription::get_subscription_status)
                .post(subscription::post_subscribe_or_upgrade),
        )
        .route(
            "/api/accounts/{account_id}/subscription/cancel",
            post(subscription::post_cancel),
        )
        .route(
            "/api/accounts/{account_id}/subscription/reactivate",
            post(subscription::post_reactivate),
        )
        .route(
            "/api/accounts/{account_id}/vms/{vm_id}/permissions",
            get(vms::get_vm_permissions),
        )
        .route(
            "/api/accounts/{account_id}/vms/{vm_id}/actions",
            post(vms::post_vm_action),
        )
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

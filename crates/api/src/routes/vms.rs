//! VM permission and action endpoints
//!
//! Permissions are derived at read time from the live subscription record and
//! a fresh hypervisor status poll. The action endpoint re-runs the same gate
//! synchronously immediately before dispatch; a permission computed for a
//! render is never trusted for a click.

use std::collections::BTreeMap;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use slicevm_billing::{SubscriptionRepo, SubscriptionState, VmPermissions};
use slicevm_shared::{VmOperation, VmStatus};

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct VmPermissionsResponse {
    pub vm_id: Uuid,
    pub vm_status: VmStatus,
    pub subscription_state: SubscriptionState,
    pub start: bool,
    pub stop: bool,
    pub shutdown: bool,
    pub reboot: bool,
    /// Reason code per denied operation, only where the denial is
    /// subscription-driven
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub reason_if_denied: BTreeMap<&'static str, &'static str>,
}

#[derive(Debug, Deserialize)]
pub struct VmActionRequest {
    pub action: VmOperation,
}

#[derive(Debug, Serialize)]
pub struct VmActionResponse {
    pub vm_id: Uuid,
    pub action: VmOperation,
    pub dispatched: bool,
}

struct GateEvaluation {
    hypervisor_vmid: i64,
    vm_status: VmStatus,
    subscription_state: SubscriptionState,
    permissions: VmPermissions,
}

/// Load everything the gate needs and evaluate it at `now`
async fn evaluate_gate(
    state: &AppState,
    account_id: Uuid,
    vm_id: Uuid,
) -> ApiResult<GateEvaluation> {
    let account = state.store.account_billing(account_id).await?;
    let vm = state.store.vm_for_account(account_id, vm_id).await?;

    let vm_status = state.hypervisor.vm_status(vm.hypervisor_vmid).await;
    let subscription_state =
        SubscriptionState::classify(&account.subscription, OffsetDateTime::now_utc());
    let permissions = VmPermissions::evaluate(subscription_state, vm_status, account.is_admin);

    Ok(GateEvaluation {
        hypervisor_vmid: vm.hypervisor_vmid,
        vm_status,
        subscription_state,
        permissions,
    })
}

/// GET /api/accounts/{account_id}/vms/{vm_id}/permissions
pub async fn get_vm_permissions(
    State(state): State<AppState>,
    Path((account_id, vm_id)): Path<(Uuid, Uuid)>,
) -> ApiResult<Json<VmPermissionsResponse>> {
    let eval = evaluate_gate(&state, account_id, vm_id).await?;
    let perms = eval.permissions;

    let mut reason_if_denied = BTreeMap::new();
    for op in VmOperation::ALL {
        let decision = perms.decision(op);
        if let (false, Some(reason)) = (decision.allowed, decision.reason) {
            reason_if_denied.insert(op.as_str(), reason.code());
        }
    }

    Ok(Json(VmPermissionsResponse {
        vm_id,
        vm_status: eval.vm_status,
        subscription_state: eval.subscription_state,
        start: perms.start.allowed,
        stop: perms.stop.allowed,
        shutdown: perms.shutdown.allowed,
        reboot: perms.reboot.allowed,
        reason_if_denied,
    }))
}

/// POST /api/accounts/{account_id}/vms/{vm_id}/actions
pub async fn post_vm_action(
    State(state): State<AppState>,
    Path((account_id, vm_id)): Path<(Uuid, Uuid)>,
    Json(req): Json<VmActionRequest>,
) -> ApiResult<(StatusCode, Json<VmActionResponse>)> {
    // Gate check runs here, synchronously, against the current record;
    // never against anything computed at render time
    let eval = evaluate_gate(&state, account_id, vm_id).await?;

    let decision = eval.permissions.decision(req.action);
    if !decision.allowed {
        tracing::warn!(
            account_id = %account_id,
            vm_id = %vm_id,
            action = %req.action,
            state = %eval.subscription_state,
            vm_status = %eval.vm_status,
            "VM action denied"
        );
        return Err(ApiError::OperationNotPermitted {
            operation: req.action,
            reason: decision.reason,
        });
    }

    state
        .hypervisor
        .dispatch(eval.hypervisor_vmid, req.action)
        .await
        .map_err(|e| ApiError::Hypervisor(e.to_string()))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(VmActionResponse {
            vm_id,
            action: req.action,
            dispatched: true,
        }),
    ))
}

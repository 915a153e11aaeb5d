//! API error type and HTTP mapping
//!
//! Billing errors carry stable machine-readable codes; the mapping here only
//! decides the HTTP status. A denied VM operation is an expected gate output
//! and is reported with its reason code so the UI can render accurate
//! messaging rather than a generic refusal.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use slicevm_billing::{BillingError, DenialReason};
use slicevm_shared::VmOperation;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error("operation '{operation}' is not permitted")]
    OperationNotPermitted {
        operation: VmOperation,
        reason: Option<DenialReason>,
    },

    #[error("hypervisor unavailable: {0}")]
    Hypervisor(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Billing(err) => match err {
                BillingError::PlanNotFound(_)
                | BillingError::AccountNotFound(_)
                | BillingError::VmNotFound(_) => StatusCode::NOT_FOUND,
                BillingError::InvalidQuantity(_) | BillingError::NotQuotable { .. } => {
                    StatusCode::UNPROCESSABLE_ENTITY
                }
                BillingError::AlreadyInProgress | BillingError::NoProviderSubscription => {
                    StatusCode::CONFLICT
                }
                BillingError::ProviderUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
                BillingError::Provider(_) => StatusCode::BAD_GATEWAY,
                BillingError::Config(_) | BillingError::Database(_) => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
            },
            ApiError::OperationNotPermitted { .. } => StatusCode::FORBIDDEN,
            ApiError::Hypervisor(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Billing(err) => err.code(),
            ApiError::OperationNotPermitted { .. } => "operation_not_permitted",
            ApiError::Hypervisor(_) => "hypervisor_unavailable",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Internal detail stays in the logs, not the response body
        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let mut body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });

        if let ApiError::OperationNotPermitted { reason, .. } = &self {
            body["reason"] = match reason {
                Some(r) => serde_json::Value::String(r.code().to_string()),
                None => serde_json::Value::Null,
            };
        }

        if let ApiError::Billing(err) = &self {
            if err.is_retryable() {
                body["retryable"] = serde_json::Value::Bool(true);
            }
        }

        (status, Json(body)).into_response()
    }
}

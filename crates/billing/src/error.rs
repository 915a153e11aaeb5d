//! Billing error types

use uuid::Uuid;

pub type BillingResult<T> = Result<T, BillingError>;

/// Errors from the billing core.
///
/// `AlreadyInProgress` and `ProviderUnavailable` are safe for the caller to
/// retry a read after; mutating calls are never auto-retried here.
#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    #[error("unknown plan: {0}")]
    PlanNotFound(String),

    #[error("invalid quantity: {0}")]
    InvalidQuantity(f64),

    #[error("quantity {quantity} is above the quotable range for plan '{plan_id}'")]
    NotQuotable { plan_id: String, quantity: i64 },

    #[error("a billing operation is already in progress for this account")]
    AlreadyInProgress,

    #[error("account has no provider-backed subscription")]
    NoProviderSubscription,

    #[error("account not found: {0}")]
    AccountNotFound(Uuid),

    #[error("vm not found: {0}")]
    VmNotFound(Uuid),

    #[error("billing provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("billing provider rejected the request: {0}")]
    Provider(String),

    #[error("provider configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BillingError {
    /// Stable machine-readable code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            BillingError::PlanNotFound(_) => "plan_not_found",
            BillingError::InvalidQuantity(_) => "invalid_quantity",
            BillingError::NotQuotable { .. } => "not_quotable",
            BillingError::AlreadyInProgress => "already_in_progress",
            BillingError::NoProviderSubscription => "no_provider_subscription",
            BillingError::AccountNotFound(_) => "account_not_found",
            BillingError::VmNotFound(_) => "vm_not_found",
            BillingError::ProviderUnavailable(_) => "provider_unavailable",
            BillingError::Provider(_) => "provider_error",
            BillingError::Config(_) => "configuration_error",
            BillingError::Database(_) => "database_error",
        }
    }

    /// Whether the caller may safely retry after a fresh read
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            BillingError::AlreadyInProgress | BillingError::ProviderUnavailable(_)
        )
    }
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::Provider(err.to_string())
    }
}

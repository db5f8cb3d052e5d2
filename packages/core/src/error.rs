use thiserror::Error;

/// Domain error taxonomy. Variant names double as the HTTP `error` code
/// surfaced by `payhub-server` (see SPEC_FULL.md §6.1/§7).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PayhubError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden")]
    Forbidden,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("invalid address: {0}")]
    InvalidAddress(String),

    #[error("invalid network: {0}")]
    InvalidNetwork(String),

    #[error("invalid status: {0}")]
    InvalidStatus(String),

    #[error("pending payment already exists for this user")]
    PendingExists,

    #[error("payment cannot be cancelled from its current status")]
    CannotCancel,

    #[error("address {address} is on the OFAC SDN list ({sdn_name})")]
    OfacSanctioned { address: String, sdn_name: String },

    #[error("rate limited")]
    RateLimited,

    #[error("internal error: {0}")]
    Internal(String),
}

impl PayhubError {
    /// The stable code used on the HTTP boundary and in webhook `error` fields.
    pub fn code(&self) -> &'static str {
        match self {
            PayhubError::Validation(_) => "VALIDATION_ERROR",
            PayhubError::Unauthorized => "UNAUTHORIZED",
            PayhubError::Forbidden => "FORBIDDEN",
            PayhubError::NotFound(_) => "NOT_FOUND",
            PayhubError::InvalidPlan(_) => "INVALID_PLAN",
            PayhubError::InvalidAddress(_) => "INVALID_ADDRESS",
            PayhubError::InvalidNetwork(_) => "INVALID_NETWORK",
            PayhubError::InvalidStatus(_) => "INVALID_STATUS",
            PayhubError::PendingExists => "PENDING_EXISTS",
            PayhubError::CannotCancel => "CANNOT_CANCEL",
            PayhubError::OfacSanctioned { .. } => "OFAC_SANCTIONED",
            PayhubError::RateLimited => "RATE_LIMITED",
            PayhubError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, PayhubError>;

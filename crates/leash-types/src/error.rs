//! Error types for Leash
//!
//! Policy-evaluation denials are not errors: they surface as structured
//! [`crate::authorization::AuthorizationDecision`] values. `LeashError`
//! covers malformed input and the lifecycle/ledger conditions the
//! orchestrator maps into decisions.

use thiserror::Error;

use crate::money::Amount;

/// Result type for Leash operations
pub type Result<T> = std::result::Result<T, LeashError>;

/// Leash error types
#[derive(Debug, Clone, Error)]
pub enum LeashError {
    // ========================================================================
    // Amount Errors
    // ========================================================================

    /// Amount overflow during arithmetic
    #[error("Amount overflow during arithmetic operation")]
    AmountOverflow,

    /// Amount rejected at the wire boundary (negative or sub-cent precision)
    #[error("Invalid amount: {reason}")]
    InvalidAmount { reason: String },

    // ========================================================================
    // Policy Errors
    // ========================================================================

    /// Malformed issuance input; rejected before any credential exists
    #[error("Invalid policy: {reason}")]
    InvalidPolicy { reason: String },

    // ========================================================================
    // Credential Lifecycle Errors
    // ========================================================================

    /// No credential with this id was ever issued
    #[error("Credential {credential_id} not found")]
    CredentialNotFound { credential_id: String },

    /// A funding commit reached a credential that is no longer spendable
    #[error("Credential {credential_id} is locked against spending (state: {state})")]
    CredentialLocked {
        credential_id: String,
        state: String,
    },

    // ========================================================================
    // Funding Ledger Errors
    // ========================================================================

    /// Commit re-check lost a race against the current spend level
    #[error("Insufficient headroom on credential {credential_id}: requested {requested}, remaining {remaining}")]
    InsufficientHeadroom {
        credential_id: String,
        requested: Amount,
        remaining: Amount,
    },

    // ========================================================================
    // Intent Validation Errors
    // ========================================================================

    /// The injected intent classifier failed or could not be reached
    #[error("Intent validation unavailable: {reason}")]
    IntentUnavailable { reason: String },

    // ========================================================================
    // General Errors
    // ========================================================================

    /// Internal error
    #[error("Internal error: {message}")]
    Internal { message: String },

    /// Invalid input
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    /// Serialization error
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// Invalid signature
    #[error("Invalid signature: {reason}")]
    InvalidSignature { reason: String },
}

impl LeashError {
    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Create an invalid input error
    pub fn invalid_input(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid policy error
    pub fn invalid_policy(reason: impl Into<String>) -> Self {
        Self::InvalidPolicy {
            reason: reason.into(),
        }
    }

    /// Check if this is a retriable error
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Internal { .. } | Self::IntentUnavailable { .. }
        )
    }

    /// Get an error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::AmountOverflow => "AMOUNT_OVERFLOW",
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::InvalidPolicy { .. } => "INVALID_POLICY",
            Self::CredentialNotFound { .. } => "CREDENTIAL_NOT_FOUND",
            Self::CredentialLocked { .. } => "CREDENTIAL_LOCKED",
            Self::InsufficientHeadroom { .. } => "INSUFFICIENT_HEADROOM",
            Self::IntentUnavailable { .. } => "INTENT_UNAVAILABLE",
            Self::Internal { .. } => "INTERNAL_ERROR",
            Self::InvalidInput { .. } => "INVALID_INPUT",
            Self::Serialization { .. } => "SERIALIZATION_ERROR",
            Self::InvalidSignature { .. } => "INVALID_SIGNATURE",
        }
    }
}

impl From<serde_json::Error> for LeashError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization {
            message: err.to_string(),
        }
    }
}

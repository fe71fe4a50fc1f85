//! Authorization request and decision types
//!
//! An [`AuthorizationRequest`] is one transaction-authorization attempt as
//! presented by the payment-network caller. The engine answers with an
//! [`AuthorizationDecision`]: approved with a funded amount, or denied with
//! the first triggered [`DenialReason`]. Decisions are created once per
//! `(credential, transaction)` pair and replayed verbatim afterwards.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LeashError, Result};
use crate::identity::{CredentialId, TransactionId};
use crate::money::Amount;
use crate::policy::MerchantCategory;

/// A transaction-authorization attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Caller-supplied idempotency identifier, unique per credential
    pub transaction_id: TransactionId,
    pub credential_id: CredentialId,
    pub amount: Amount,
    pub merchant_category: MerchantCategory,
    /// Free-text merchant/purchase description; the intent rule is judged
    /// against this
    pub merchant_label: String,
}

impl AuthorizationRequest {
    /// Validate and construct a request. A blank transaction id or a zero
    /// amount is malformed input, rejected before any evaluation happens.
    pub fn new(
        transaction_id: TransactionId,
        credential_id: CredentialId,
        amount: Amount,
        merchant_category: MerchantCategory,
        merchant_label: impl Into<String>,
    ) -> Result<Self> {
        if transaction_id.is_empty() {
            return Err(LeashError::invalid_input(
                "transaction_id",
                "must not be empty",
            ));
        }
        if amount.is_zero() {
            return Err(LeashError::invalid_input("amount", "must be positive"));
        }
        Ok(Self {
            transaction_id,
            credential_id,
            amount,
            merchant_category,
            merchant_label: merchant_label.into(),
        })
    }
}

/// Outcome of an authorization decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Approved,
    Denied,
}

/// Why an authorization was denied.
///
/// Variant order mirrors the fixed verification order; a denial carries only
/// the first triggered reason so denial messages are reproducible.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DenialReason {
    /// The referenced credential was never issued here
    CredentialNotFound,
    /// The credential is exhausted, expired, or revoked
    CredentialNotActive,
    /// The amount would push cumulative spend past the hard limit
    OverLimit,
    /// The merchant category is outside the policy's merchant scope
    MerchantMismatch,
    /// The injected classifier judged the label against the instruction and
    /// said no
    IntentMismatch,
    /// The classifier timed out or failed; fail closed
    IntentValidationUnavailable,
}

impl DenialReason {
    /// Wire code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            Self::CredentialNotFound => "CREDENTIAL_NOT_FOUND",
            Self::CredentialNotActive => "CREDENTIAL_NOT_ACTIVE",
            Self::OverLimit => "OVER_LIMIT",
            Self::MerchantMismatch => "MERCHANT_MISMATCH",
            Self::IntentMismatch => "INTENT_MISMATCH",
            Self::IntentValidationUnavailable => "INTENT_VALIDATION_UNAVAILABLE",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The adjudication result for one `(credential, transaction)` pair.
///
/// Immutable after creation; at-least-once delivery of the same transaction
/// returns this stored value rather than re-evaluating. Compared by value,
/// so a replayed decision is equal to the one it replays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationDecision {
    pub transaction_id: TransactionId,
    pub credential_id: CredentialId,
    pub outcome: Outcome,
    /// Empty iff approved; otherwise holds the first triggered reason
    pub reasons: Vec<DenialReason>,
    /// Amount actually moved onto the credential; `None` on denial
    pub funded_amount: Option<Amount>,
    pub decided_at: DateTime<Utc>,
}

impl AuthorizationDecision {
    pub fn approved(
        transaction_id: TransactionId,
        credential_id: CredentialId,
        funded_amount: Amount,
    ) -> Self {
        Self {
            transaction_id,
            credential_id,
            outcome: Outcome::Approved,
            reasons: Vec::new(),
            funded_amount: Some(funded_amount),
            decided_at: Utc::now(),
        }
    }

    pub fn denied(
        transaction_id: TransactionId,
        credential_id: CredentialId,
        reason: DenialReason,
    ) -> Self {
        Self {
            transaction_id,
            credential_id,
            outcome: Outcome::Denied,
            reasons: vec![reason],
            funded_amount: None,
            decided_at: Utc::now(),
        }
    }

    pub fn is_approved(&self) -> bool {
        self.outcome == Outcome::Approved
    }

    /// The first (and only reported) denial reason, if denied
    pub fn primary_reason(&self) -> Option<DenialReason> {
        self.reasons.first().copied()
    }
}

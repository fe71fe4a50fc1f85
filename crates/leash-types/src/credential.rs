//! Credential lifecycle types
//!
//! A [`Credential`] is an ephemeral virtual payment identifier bound to
//! exactly one [`SpendPolicy`] for its entire lifetime. State moves through
//! `IssuedActive → {Exhausted, Expired, Revoked}`; the three terminal states
//! are absorbing. Credentials are retired, never deleted, so the audit trail
//! of spend and decisions survives them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LeashError, Result};
use crate::identity::CredentialId;
use crate::money::Amount;
use crate::policy::{PolicySpec, SpendPolicy};

/// Lifecycle state of a credential
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CredentialState {
    /// Live and spendable
    IssuedActive,
    /// Spent its full hard limit
    Exhausted { exhausted_at: DateTime<Utc> },
    /// Passed its expiry horizon
    Expired { expired_at: DateTime<Utc> },
    /// Explicitly revoked by an operator
    Revoked { revoked_at: DateTime<Utc> },
}

impl CredentialState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::IssuedActive)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::IssuedActive => "issued_active",
            Self::Exhausted { .. } => "exhausted",
            Self::Expired { .. } => "expired",
            Self::Revoked { .. } => "revoked",
        }
    }
}

impl fmt::Display for CredentialState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Card-shaped presentation of a credential.
///
/// These fields exist so the credential can be used where a card number is
/// expected; authorization keys off [`CredentialId`], never off the PAN.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardDetails {
    /// 16-digit Luhn-valid primary account number
    pub pan: String,
    /// 3-digit card verification value
    pub cvv: String,
    /// Expiry display in MM/YY form
    pub expiry: String,
}

impl CardDetails {
    /// PAN with the middle digits masked, for listings and logs
    pub fn masked_pan(&self) -> String {
        if self.pan.len() < 8 {
            return "****".to_string();
        }
        format!(
            "{} **** **** {}",
            &self.pan[..4],
            &self.pan[self.pan.len() - 4..]
        )
    }
}

/// A virtual payment credential bound to one policy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: CredentialId,
    /// Display name of the holder the card was issued for
    pub holder: String,
    pub card: CardDetails,
    /// Owned and immutable for the credential's lifetime
    pub policy: SpendPolicy,
    pub state: CredentialState,
    /// Monotonically non-decreasing; never exceeds `policy.hard_limit`
    pub spent_to_date: Amount,
    pub created_at: DateTime<Utc>,
    /// Expiry horizon; issuance metadata, not part of the policy value
    pub expires_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(
        holder: impl Into<String>,
        card: CardDetails,
        policy: SpendPolicy,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: CredentialId::new(),
            holder: holder.into(),
            card,
            policy,
            state: CredentialState::IssuedActive,
            spent_to_date: Amount::zero(),
            created_at,
            expires_at,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state.is_active()
    }

    /// Spending room left under the hard limit
    pub fn remaining(&self) -> Amount {
        self.policy.headroom(self.spent_to_date)
    }

    pub fn is_past_horizon(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Revoke the credential. Returns `true` if the state changed; terminal
    /// states are left untouched, so revoking twice is a no-op success.
    pub fn revoke(&mut self, at: DateTime<Utc>) -> bool {
        if self.state.is_active() {
            self.state = CredentialState::Revoked { revoked_at: at };
            true
        } else {
            false
        }
    }

    /// Expire the credential if `now` is past its horizon. Returns `true`
    /// if the state changed. Terminal states stay as they are: an exhausted
    /// credential keeps recording that it spent its full limit.
    pub fn expire_if_due(&mut self, now: DateTime<Utc>) -> bool {
        if self.state.is_active() && self.is_past_horizon(now) {
            self.state = CredentialState::Expired { expired_at: now };
            true
        } else {
            false
        }
    }

    /// Apply a committed funding amount: re-check headroom against the
    /// current spend level, increment `spent_to_date`, and transition to
    /// Exhausted when the hard limit is reached. Returns the new total.
    ///
    /// The funding ledger is the only production caller, and it must hold
    /// this credential's cell lock across the call; that lock is what makes
    /// check-then-increment atomic per credential.
    pub fn apply_funding(&mut self, amount: Amount, at: DateTime<Utc>) -> Result<Amount> {
        if !self.state.is_active() {
            return Err(LeashError::CredentialLocked {
                credential_id: self.id.to_string(),
                state: self.state.label().to_string(),
            });
        }
        let new_total = self
            .spent_to_date
            .checked_add(amount)
            .ok_or(LeashError::AmountOverflow)?;
        if new_total > self.policy.hard_limit {
            return Err(LeashError::InsufficientHeadroom {
                credential_id: self.id.to_string(),
                requested: amount,
                remaining: self.remaining(),
            });
        }
        self.spent_to_date = new_total;
        if new_total == self.policy.hard_limit {
            self.state = CredentialState::Exhausted { exhausted_at: at };
        }
        Ok(new_total)
    }
}

/// Issuance configuration: who the card is for and the policy that binds it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CardRequest {
    pub name: String,
    pub policy: PolicySpec,
    /// Validity window in days; the registry default applies when absent
    #[serde(default)]
    pub valid_for_days: Option<u32>,
}

/// Issuance result returned to the caller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssuedCard {
    pub credential_id: CredentialId,
    pub card: CardDetails,
    pub expires_at: DateTime<Utc>,
    pub policy: SpendPolicy,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::{IntentRule, MerchantCategory, MerchantScope};
    use chrono::Duration;

    fn test_card() -> CardDetails {
        CardDetails {
            pan: "4111222233338472".to_string(),
            cvv: "123".to_string(),
            expiry: "12/28".to_string(),
        }
    }

    fn test_credential(hard_limit: u64) -> Credential {
        let policy = SpendPolicy::new(
            Amount::new(hard_limit),
            MerchantScope::Only(MerchantCategory::Fashion),
            IntentRule::None,
        )
        .unwrap();
        let now = Utc::now();
        Credential::new("test-agent", test_card(), policy, now, now + Duration::days(30))
    }

    #[test]
    fn test_new_credential_is_active_and_unspent() {
        let credential = test_credential(30000);
        assert!(credential.is_active());
        assert_eq!(credential.spent_to_date, Amount::zero());
        assert_eq!(credential.remaining(), Amount::new(30000));
    }

    #[test]
    fn test_revoke_is_idempotent() {
        let mut credential = test_credential(30000);
        assert!(credential.revoke(Utc::now()));
        assert!(!credential.revoke(Utc::now()));
        assert_eq!(credential.state.label(), "revoked");
    }

    #[test]
    fn test_expire_only_past_horizon() {
        let mut credential = test_credential(30000);
        assert!(!credential.expire_if_due(Utc::now()));
        assert!(credential.is_active());

        let past_horizon = credential.expires_at + Duration::seconds(1);
        assert!(credential.expire_if_due(past_horizon));
        assert_eq!(credential.state.label(), "expired");
    }

    #[test]
    fn test_terminal_states_are_absorbing() {
        let mut credential = test_credential(100);
        credential.apply_funding(Amount::new(100), Utc::now()).unwrap();
        assert_eq!(credential.state.label(), "exhausted");

        // Neither revoke nor expiry moves an exhausted credential.
        assert!(!credential.revoke(Utc::now()));
        let past_horizon = credential.expires_at + Duration::days(1);
        assert!(!credential.expire_if_due(past_horizon));
        assert_eq!(credential.state.label(), "exhausted");
    }

    #[test]
    fn test_apply_funding_increments_and_exhausts() {
        let mut credential = test_credential(30000);
        let total = credential
            .apply_funding(Amount::new(24000), Utc::now())
            .unwrap();
        assert_eq!(total, Amount::new(24000));
        assert!(credential.is_active());

        let total = credential
            .apply_funding(Amount::new(6000), Utc::now())
            .unwrap();
        assert_eq!(total, Amount::new(30000));
        assert_eq!(credential.state.label(), "exhausted");
    }

    #[test]
    fn test_apply_funding_rejects_over_limit() {
        let mut credential = test_credential(30000);
        credential
            .apply_funding(Amount::new(24000), Utc::now())
            .unwrap();

        let err = credential
            .apply_funding(Amount::new(10000), Utc::now())
            .unwrap_err();
        assert_eq!(err.error_code(), "INSUFFICIENT_HEADROOM");
        // Spend level is untouched by the failed commit.
        assert_eq!(credential.spent_to_date, Amount::new(24000));
    }

    #[test]
    fn test_apply_funding_rejects_terminal_state() {
        let mut credential = test_credential(30000);
        credential.revoke(Utc::now());

        let err = credential
            .apply_funding(Amount::new(100), Utc::now())
            .unwrap_err();
        assert_eq!(err.error_code(), "CREDENTIAL_LOCKED");
    }

    #[test]
    fn test_masked_pan() {
        let card = test_card();
        assert_eq!(card.masked_pan(), "4111 **** **** 8472");
    }
}

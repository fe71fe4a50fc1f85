//! Leash Registry - Credential Issuance and Lifecycle
//!
//! This crate owns the population of virtual card credentials. Even as an
//! in-memory registry, it follows the real rules:
//!
//! 1. Every credential is born with an immutable spend policy
//! 2. Card numbers are Luhn-valid and unique per issuance
//! 3. Lifecycle moves one way: active credentials can only be exhausted,
//!    expired, or revoked, and terminal states are absorbing
//! 4. Expiry is enforced lazily on read and eagerly by sweeps
//!
//! # Usage
//!
//! The registry hands out snapshots for reads and a locked cell per
//! credential for writes. The funding ledger is the only component that
//! mutates spend totals, and it does so through [`CredentialRegistry::cell`].

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use leash_types::{
    CardDetails, CardRequest, Credential, CredentialId, CredentialState, IssuedCard, LeashError,
    Result, SpendPolicy,
};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

/// Issuing BIN for generated card numbers. Test range, never routable.
const CARD_BIN: &str = "4111";

/// Total digits in a generated PAN, including the check digit.
const PAN_LENGTH: usize = 16;

/// Configuration for the credential registry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Validity horizon applied when a card request does not specify one
    pub default_validity_days: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            default_validity_days: 30,
        }
    }
}

/// The Leash credential registry
///
/// Issues single-use virtual cards bound to spend policies and tracks
/// their lifecycle. Each credential lives in its own locked cell so that
/// funding commits serialize per credential without a global lock.
pub struct CredentialRegistry {
    config: RegistryConfig,
    credentials: DashMap<CredentialId, Arc<Mutex<Credential>>>,
}

impl CredentialRegistry {
    /// Create a new registry with the given configuration
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            credentials: DashMap::new(),
        }
    }

    /// Registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    // ── Issuance ──────────────────────────────────────────────────────

    /// Issue a new credential from a card request.
    ///
    /// Validates and freezes the spend policy, generates card details,
    /// and registers the credential as active. Returns the full card
    /// data; this is the only time the unmasked PAN leaves the registry.
    pub fn issue(&self, request: CardRequest) -> Result<IssuedCard> {
        if request.name.trim().is_empty() {
            return Err(LeashError::invalid_input("name", "must not be empty"));
        }

        let policy = SpendPolicy::try_from(request.policy)?;
        let validity_days = request
            .valid_for_days
            .unwrap_or(self.config.default_validity_days);
        if validity_days == 0 {
            return Err(LeashError::invalid_input(
                "valid_for_days",
                "must be at least 1",
            ));
        }

        let now = Utc::now();
        let expires_at = now + chrono::Duration::days(i64::from(validity_days));
        let card = CardDetails {
            pan: generate_pan(),
            cvv: generate_cvv(),
            expiry: format_card_expiry(expires_at),
        };

        let credential =
            Credential::new(request.name, card.clone(), policy.clone(), now, expires_at);
        let id = credential.id.clone();

        tracing::info!(
            credential_id = %id,
            holder = %credential.holder,
            hard_limit = %policy.hard_limit,
            merchant_scope = %policy.merchant_scope,
            "Issued credential"
        );

        self.credentials
            .insert(id.clone(), Arc::new(Mutex::new(credential)));

        Ok(IssuedCard {
            credential_id: id,
            card,
            expires_at,
            policy,
        })
    }

    // ── Reads ─────────────────────────────────────────────────────────

    /// Fetch a snapshot of a credential, applying lazy expiry first.
    ///
    /// A credential past its horizon transitions to expired here even if
    /// no sweep has run yet, so callers never observe a stale active state.
    pub async fn lookup(&self, id: &CredentialId) -> Result<Credential> {
        let cell = self.cell(id)?;
        let mut credential = cell.lock().await;
        if credential.expire_if_due(Utc::now()) {
            tracing::info!(credential_id = %id, "Credential expired on read");
        }
        Ok(credential.clone())
    }

    /// Snapshots of all credentials, lazily expiring each along the way
    pub async fn list(&self) -> Vec<Credential> {
        let cells: Vec<Arc<Mutex<Credential>>> =
            self.credentials.iter().map(|e| e.value().clone()).collect();

        let now = Utc::now();
        let mut snapshots = Vec::with_capacity(cells.len());
        for cell in cells {
            let mut credential = cell.lock().await;
            credential.expire_if_due(now);
            snapshots.push(credential.clone());
        }
        snapshots.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        snapshots
    }

    /// Number of credentials ever issued (all states)
    pub fn count(&self) -> usize {
        self.credentials.len()
    }

    /// The locked cell holding a credential's mutable state.
    ///
    /// Holding the cell lock serializes all state transitions for that
    /// credential. The funding ledger locks the cell for the whole
    /// re-check-and-commit step.
    pub fn cell(&self, id: &CredentialId) -> Result<Arc<Mutex<Credential>>> {
        self.credentials
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| LeashError::CredentialNotFound {
                credential_id: id.to_string(),
            })
    }

    // ── Lifecycle ─────────────────────────────────────────────────────

    /// Revoke a credential immediately.
    ///
    /// Idempotent: revoking an already-terminal credential leaves it
    /// unchanged and reports the state it is already in.
    pub async fn revoke(&self, id: &CredentialId) -> Result<CredentialState> {
        let cell = self.cell(id)?;
        let mut credential = cell.lock().await;
        if credential.revoke(Utc::now()) {
            tracing::info!(credential_id = %id, "Revoked credential");
        } else {
            tracing::debug!(
                credential_id = %id,
                state = %credential.state,
                "Revoke ignored, credential already terminal"
            );
        }
        Ok(credential.state.clone())
    }

    /// Expire every active credential past its horizon. Returns the
    /// number of credentials transitioned.
    pub async fn sweep_expired(&self) -> usize {
        let cells: Vec<(CredentialId, Arc<Mutex<Credential>>)> = self
            .credentials
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect();

        let now = Utc::now();
        let mut expired = 0;
        for (id, cell) in cells {
            let mut credential = cell.lock().await;
            if credential.expire_if_due(now) {
                tracing::info!(credential_id = %id, "Credential expired by sweep");
                expired += 1;
            }
        }
        expired
    }
}

impl Default for CredentialRegistry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

// ── Card generation ───────────────────────────────────────────────────

/// Generate a Luhn-valid PAN under the issuing BIN
fn generate_pan() -> String {
    let mut rng = rand::thread_rng();
    let mut digits: Vec<u32> = CARD_BIN
        .chars()
        .filter_map(|c| c.to_digit(10))
        .collect();
    while digits.len() < PAN_LENGTH - 1 {
        digits.push(rng.gen_range(0..10));
    }
    digits.push(luhn_check_digit(&digits));
    digits.into_iter().map(|d| d.to_string()).collect()
}

/// Check digit making the full number pass the Luhn test
fn luhn_check_digit(digits: &[u32]) -> u32 {
    // Walk right-to-left over the payload; the rightmost payload digit
    // is doubled because the check digit will sit to its right.
    let sum: u32 = digits
        .iter()
        .rev()
        .enumerate()
        .map(|(i, &d)| {
            if i % 2 == 0 {
                let doubled = d * 2;
                if doubled > 9 {
                    doubled - 9
                } else {
                    doubled
                }
            } else {
                d
            }
        })
        .sum();
    (10 - (sum % 10)) % 10
}

/// Three-digit card verification value
fn generate_cvv() -> String {
    let mut rng = rand::thread_rng();
    format!("{:03}", rng.gen_range(0..1000))
}

/// Card expiry in MM/YY form, derived from the credential horizon
fn format_card_expiry(expires_at: chrono::DateTime<Utc>) -> String {
    expires_at.format("%m/%y").to_string()
}

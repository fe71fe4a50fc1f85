//! Leash Engine - Authorization Orchestration
//!
//! Ties the registry, the verification engine, and the funding ledger
//! into one entry point: [`AuthorizationEngine::authorize`]. The engine
//! guarantees:
//!
//! 1. One decision per (credential, transaction); replayed deliveries get
//!    the stored decision back, never a fresh evaluation
//! 2. Approval and funding travel together: a request is only approved
//!    once its funds have actually committed
//! 3. A verification that approves on a stale snapshot but loses the
//!    funding race comes back as an ordinary over-limit denial
//! 4. Authorization never errors toward the caller; every failure mode
//!    folds into a denial with a reason
//!
//! The engine also fronts the card lifecycle operations so a service
//! binary needs exactly one handle.

use std::sync::Arc;

use dashmap::DashMap;
use leash_ledger::{CommitOutcome, FundingLedger};
use leash_policy::{Verdict, Verifier};
use leash_registry::CredentialRegistry;
use leash_types::{
    AuthorizationDecision, AuthorizationRequest, CardRequest, Credential, CredentialId,
    CredentialState, DenialReason, IssuedCard, LeashError, Result, TransactionId,
};

/// The Leash authorization engine
///
/// Cheap to share behind an `Arc`; all operations take `&self` and
/// concurrent authorizations only contend when they touch the same
/// credential.
pub struct AuthorizationEngine {
    registry: Arc<CredentialRegistry>,
    ledger: Arc<FundingLedger>,
    verifier: Verifier,
    decisions: DashMap<(CredentialId, TransactionId), AuthorizationDecision>,
}

impl AuthorizationEngine {
    pub fn new(
        registry: Arc<CredentialRegistry>,
        ledger: Arc<FundingLedger>,
        verifier: Verifier,
    ) -> Self {
        Self {
            registry,
            ledger,
            verifier,
            decisions: DashMap::new(),
        }
    }

    /// The credential registry this engine fronts
    pub fn registry(&self) -> &Arc<CredentialRegistry> {
        &self.registry
    }

    /// The funding ledger this engine commits through
    pub fn ledger(&self) -> &Arc<FundingLedger> {
        &self.ledger
    }

    // ── Authorization ─────────────────────────────────────────────────

    /// Decide one authorization request.
    ///
    /// Replays return the stored decision. Fresh requests verify against
    /// a snapshot, then fund through the ledger; only a committed funding
    /// yields an approval. This function never returns an error: unknown
    /// credentials, race losses, and ledger failures all become denials.
    pub async fn authorize(&self, request: AuthorizationRequest) -> AuthorizationDecision {
        let key = (request.credential_id.clone(), request.transaction_id.clone());

        if let Some(stored) = self.decisions.get(&key) {
            tracing::debug!(
                transaction_id = %request.transaction_id,
                credential_id = %request.credential_id,
                "Replayed request, returning stored decision"
            );
            return stored.clone();
        }

        let credential = match self.registry.lookup(&request.credential_id).await {
            Ok(credential) => credential,
            Err(_) => {
                // Unknown credentials get a denial but no stored record;
                // the store is keyed by credentials we actually issued.
                let decision = AuthorizationDecision::denied(
                    request.transaction_id.clone(),
                    request.credential_id.clone(),
                    DenialReason::CredentialNotFound,
                );
                self.log_decision(&decision);
                return decision;
            }
        };

        let decision = match self.verifier.evaluate(&credential, &request).await {
            Verdict::Denied(reason) => self.record_denial(key, &request, reason),
            Verdict::Approved => self.fund(key, &request).await,
        };
        self.log_decision(&decision);
        decision
    }

    /// Push an approved request through the ledger and record the result.
    async fn fund(
        &self,
        key: (CredentialId, TransactionId),
        request: &AuthorizationRequest,
    ) -> AuthorizationDecision {
        match self
            .ledger
            .commit(&request.credential_id, &request.transaction_id, request.amount)
            .await
        {
            Ok(CommitOutcome::Committed(receipt)) => {
                let decision = AuthorizationDecision::approved(
                    request.transaction_id.clone(),
                    request.credential_id.clone(),
                    receipt.amount,
                );
                // A concurrent duplicate may have stored a denial off a
                // stale snapshot; the funded outcome is the durable one.
                self.decisions.insert(key, decision.clone());
                decision
            }
            Ok(CommitOutcome::Replayed(receipt)) => {
                // Another delivery funded this transaction. Keep whatever
                // decision that delivery stored; fall back to the receipt
                // if its store write has not landed yet.
                let decision = AuthorizationDecision::approved(
                    request.transaction_id.clone(),
                    request.credential_id.clone(),
                    receipt.amount,
                );
                self.decisions.entry(key).or_insert(decision).clone()
            }
            Err(LeashError::InsufficientHeadroom { .. } | LeashError::AmountOverflow) => {
                // Lost the funding race to a concurrent commit, or the
                // running total cannot even represent the new amount;
                // either way the caller sees a plain over-limit denial.
                self.record_denial(key, request, DenialReason::OverLimit)
            }
            Err(err) => {
                tracing::warn!(
                    transaction_id = %request.transaction_id,
                    credential_id = %request.credential_id,
                    error = %err,
                    "Funding commit failed, denying"
                );
                self.record_denial(key, request, DenialReason::CredentialNotActive)
            }
        }
    }

    fn record_denial(
        &self,
        key: (CredentialId, TransactionId),
        request: &AuthorizationRequest,
        reason: DenialReason,
    ) -> AuthorizationDecision {
        let decision = AuthorizationDecision::denied(
            request.transaction_id.clone(),
            request.credential_id.clone(),
            reason,
        );
        // First writer wins; if an approval landed concurrently, return
        // that instead so callers never see contradictory outcomes.
        self.decisions.entry(key).or_insert(decision).clone()
    }

    fn log_decision(&self, decision: &AuthorizationDecision) {
        match decision.primary_reason() {
            None => tracing::info!(
                transaction_id = %decision.transaction_id,
                credential_id = %decision.credential_id,
                outcome = "approved",
                "Authorization decided"
            ),
            Some(reason) => tracing::info!(
                transaction_id = %decision.transaction_id,
                credential_id = %decision.credential_id,
                outcome = "denied",
                reason = %reason,
                "Authorization decided"
            ),
        }
    }

    /// The stored decision for a (credential, transaction) pair, if any
    pub fn decision_for(
        &self,
        credential_id: &CredentialId,
        transaction_id: &TransactionId,
    ) -> Option<AuthorizationDecision> {
        self.decisions
            .get(&(credential_id.clone(), transaction_id.clone()))
            .map(|d| d.clone())
    }

    // ── Card lifecycle ────────────────────────────────────────────────

    /// Issue a new virtual card bound to a spend policy
    pub fn issue_card(&self, request: CardRequest) -> Result<IssuedCard> {
        self.registry.issue(request)
    }

    /// Revoke a card immediately (idempotent)
    pub async fn revoke_card(&self, id: &CredentialId) -> Result<CredentialState> {
        self.registry.revoke(id).await
    }

    /// Current snapshot of one card
    pub async fn card_status(&self, id: &CredentialId) -> Result<Credential> {
        self.registry.lookup(id).await
    }

    /// Snapshots of every card ever issued
    pub async fn list_cards(&self) -> Vec<Credential> {
        self.registry.list().await
    }

    /// Expire all cards past their horizon; returns how many transitioned
    pub async fn sweep_expired(&self) -> usize {
        self.registry.sweep_expired().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use leash_types::{Amount, IntentRule, MerchantCategory, PolicySpec};
    use rust_decimal::Decimal;

    fn test_engine() -> AuthorizationEngine {
        let registry = Arc::new(CredentialRegistry::default());
        let ledger = Arc::new(FundingLedger::new(registry.clone()));
        let verifier = Verifier::with_keyword_matcher(Duration::from_millis(100));
        AuthorizationEngine::new(registry, ledger, verifier)
    }

    fn issue(engine: &AuthorizationEngine, limit_dollars: i64, merchant: &str) -> CredentialId {
        engine
            .issue_card(CardRequest {
                name: "Engine test card".to_string(),
                policy: PolicySpec {
                    hard_limit: Decimal::new(limit_dollars, 0),
                    merchant_type: merchant.to_string(),
                    intent_validation: IntentRule::None,
                },
                valid_for_days: None,
            })
            .unwrap()
            .credential_id
    }

    fn request(
        txn: &str,
        credential_id: &CredentialId,
        amount: u64,
        category: MerchantCategory,
    ) -> AuthorizationRequest {
        AuthorizationRequest {
            transaction_id: TransactionId::from(txn),
            credential_id: credential_id.clone(),
            amount: Amount::new(amount),
            merchant_category: category,
            merchant_label: "Test merchant".to_string(),
        }
    }

    #[tokio::test]
    async fn test_approve_then_replay() {
        let engine = test_engine();
        let id = issue(&engine, 300, "*");

        let first = engine
            .authorize(request("txn_1", &id, 24000, MerchantCategory::Fashion))
            .await;
        assert!(first.is_approved());
        assert_eq!(first.funded_amount, Some(Amount::new(24000)));

        // Replay with a different amount returns the original decision.
        let replay = engine
            .authorize(request("txn_1", &id, 99999, MerchantCategory::Fashion))
            .await;
        assert_eq!(replay, first);

        let status = engine.card_status(&id).await.unwrap();
        assert_eq!(status.spent_to_date, Amount::new(24000));
    }

    #[tokio::test]
    async fn test_denial_is_stored_and_replayed() {
        let engine = test_engine();
        let id = issue(&engine, 100, "fashion");

        let denied = engine
            .authorize(request("txn_1", &id, 5000, MerchantCategory::Groceries))
            .await;
        assert!(!denied.is_approved());
        assert_eq!(denied.primary_reason(), Some(DenialReason::MerchantMismatch));

        let replay = engine
            .authorize(request("txn_1", &id, 5000, MerchantCategory::Groceries))
            .await;
        assert_eq!(replay, denied);
        assert!(engine.decision_for(&id, &TransactionId::from("txn_1")).is_some());
    }

    #[tokio::test]
    async fn test_unknown_credential_denied_not_stored() {
        let engine = test_engine();
        let ghost = CredentialId::new();

        let decision = engine
            .authorize(request("txn_1", &ghost, 100, MerchantCategory::Fashion))
            .await;
        assert_eq!(decision.primary_reason(), Some(DenialReason::CredentialNotFound));
        assert!(engine.decision_for(&ghost, &TransactionId::from("txn_1")).is_none());
    }

    #[tokio::test]
    async fn test_exhaustion_then_denial() {
        let engine = test_engine();
        let id = issue(&engine, 300, "*");

        let fill = engine
            .authorize(request("txn_1", &id, 30000, MerchantCategory::Fashion))
            .await;
        assert!(fill.is_approved());

        let status = engine.card_status(&id).await.unwrap();
        assert!(matches!(status.state, CredentialState::Exhausted { .. }));

        // The card is spent; even $0.01 now fails the state check.
        let after = engine
            .authorize(request("txn_2", &id, 1, MerchantCategory::Fashion))
            .await;
        assert_eq!(after.primary_reason(), Some(DenialReason::CredentialNotActive));
    }

    #[tokio::test]
    async fn test_revoked_card_denies() {
        let engine = test_engine();
        let id = issue(&engine, 300, "*");
        engine.revoke_card(&id).await.unwrap();

        let decision = engine
            .authorize(request("txn_1", &id, 100, MerchantCategory::Fashion))
            .await;
        assert_eq!(decision.primary_reason(), Some(DenialReason::CredentialNotActive));
    }

    #[tokio::test]
    async fn test_overflowing_commit_denies_over_limit() {
        let engine = test_engine();
        let id = engine
            .issue_card(CardRequest {
                name: "Huge limit card".to_string(),
                policy: PolicySpec {
                    hard_limit: Decimal::from_i128_with_scale(u64::MAX as i128, 2),
                    merchant_type: "*".to_string(),
                    intent_validation: IntentRule::None,
                },
                valid_for_days: None,
            })
            .unwrap()
            .credential_id;

        // Seed one cent of spend so the commit-time total cannot fit a u64,
        // the shape a racing commit produces between verify and fund.
        {
            let cell = engine.registry().cell(&id).unwrap();
            cell.lock().await.spent_to_date = Amount::new(1);
        }

        let overflow = request("txn_overflow", &id, u64::MAX, MerchantCategory::Fashion);
        let key = (overflow.credential_id.clone(), overflow.transaction_id.clone());
        let decision = engine.fund(key, &overflow).await;

        // The card is active; the failure reads as over-limit, not lifecycle.
        assert_eq!(decision.primary_reason(), Some(DenialReason::OverLimit));
        let status = engine.card_status(&id).await.unwrap();
        assert_eq!(status.spent_to_date, Amount::new(1));
        assert!(status.is_active());
    }
}

//! Leash Policy - Verification Engine
//!
//! Checks an authorization request against the credential it names. The
//! checks run in a fixed order and the first failure decides the denial
//! reason:
//!
//! 1. Credential state must be active
//! 2. Spent-to-date plus the requested amount must fit the hard limit
//! 3. The merchant category must fall inside the policy's scope
//! 4. If the policy carries an intent rule, the injected matcher must
//!    accept the request
//!
//! Checks 1-3 are pure functions of a credential snapshot and run
//! lock-free. Check 4 may call out to a slow or non-deterministic
//! classifier, so the [`Verifier`] bounds it with a timeout and treats
//! both timeout and error as a denial. Verification never mutates spend;
//! the funding ledger re-checks headroom under the credential lock before
//! any money moves.

use std::sync::Arc;
use std::time::Duration;

use leash_types::{
    Amount, AuthorizationRequest, Credential, CredentialState, DenialReason, Result, SpendPolicy,
};

/// Outcome of verifying one authorization request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// All checks passed; the request may proceed to funding
    Approved,
    /// A check failed; carries the first failure encountered
    Denied(DenialReason),
}

impl Verdict {
    pub fn is_approved(&self) -> bool {
        matches!(self, Verdict::Approved)
    }
}

/// Synchronous policy screen: checks 1 through 3 against a snapshot.
///
/// Returns the first failing check's denial reason, or `None` when the
/// snapshot clears all three. The intent rule is not evaluated here.
pub fn screen(
    policy: &SpendPolicy,
    state: &CredentialState,
    spent_to_date: Amount,
    request: &AuthorizationRequest,
) -> Option<DenialReason> {
    if !state.is_active() {
        return Some(DenialReason::CredentialNotActive);
    }
    if !policy.covers(spent_to_date, request.amount) {
        return Some(DenialReason::OverLimit);
    }
    if !policy.merchant_scope.allows(request.merchant_category) {
        return Some(DenialReason::MerchantMismatch);
    }
    None
}

/// Pluggable check-4 capability: does the purchase match the stated intent?
///
/// Implementations may be backed by an LLM, a rules service, or anything
/// else. They are allowed to be slow and to fail; the [`Verifier`] owns
/// the timeout and the fail-closed handling, so implementations should
/// simply report their answer or their error.
#[async_trait::async_trait]
pub trait IntentMatcher: Send + Sync {
    /// Decide whether the request satisfies the policy's intent instruction
    async fn matches(&self, instruction: &str, request: &AuthorizationRequest) -> Result<bool>;
}

/// Deterministic default matcher: case-insensitive keyword containment.
///
/// Accepts a request when every word of the intent instruction appears in
/// the merchant label. Deliberately conservative; deployments wanting
/// semantic matching inject their own [`IntentMatcher`].
#[derive(Debug, Clone, Default)]
pub struct KeywordMatcher;

impl KeywordMatcher {
    fn tokens(text: &str) -> Vec<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(|t| t.to_lowercase())
            .collect()
    }
}

#[async_trait::async_trait]
impl IntentMatcher for KeywordMatcher {
    async fn matches(&self, instruction: &str, request: &AuthorizationRequest) -> Result<bool> {
        let wanted = Self::tokens(instruction);
        if wanted.is_empty() {
            return Ok(false);
        }
        let label = Self::tokens(&request.merchant_label);
        Ok(wanted.iter().all(|w| label.contains(w)))
    }
}

/// The verification engine.
///
/// Stateless apart from its injected matcher and timeout; one instance
/// serves any number of concurrent verifications.
pub struct Verifier {
    matcher: Arc<dyn IntentMatcher>,
    intent_timeout: Duration,
}

impl Verifier {
    pub fn new(matcher: Arc<dyn IntentMatcher>, intent_timeout: Duration) -> Self {
        Self {
            matcher,
            intent_timeout,
        }
    }

    /// A verifier backed by the deterministic keyword matcher
    pub fn with_keyword_matcher(intent_timeout: Duration) -> Self {
        Self::new(Arc::new(KeywordMatcher), intent_timeout)
    }

    /// Run all checks for one request against a credential snapshot.
    ///
    /// The intent matcher only runs when checks 1-3 pass and the policy
    /// actually carries an instruction. Timeout or matcher error denies
    /// with [`DenialReason::IntentValidationUnavailable`].
    pub async fn evaluate(
        &self,
        credential: &Credential,
        request: &AuthorizationRequest,
    ) -> Verdict {
        if let Some(reason) = screen(
            &credential.policy,
            &credential.state,
            credential.spent_to_date,
            request,
        ) {
            return Verdict::Denied(reason);
        }

        let Some(instruction) = credential.policy.intent_rule.instruction() else {
            return Verdict::Approved;
        };

        match tokio::time::timeout(
            self.intent_timeout,
            self.matcher.matches(instruction, request),
        )
        .await
        {
            Ok(Ok(true)) => Verdict::Approved,
            Ok(Ok(false)) => Verdict::Denied(DenialReason::IntentMismatch),
            Ok(Err(err)) => {
                tracing::warn!(
                    transaction_id = %request.transaction_id,
                    credential_id = %request.credential_id,
                    error = %err,
                    "Intent matcher failed, denying fail-closed"
                );
                Verdict::Denied(DenialReason::IntentValidationUnavailable)
            }
            Err(_elapsed) => {
                tracing::warn!(
                    transaction_id = %request.transaction_id,
                    credential_id = %request.credential_id,
                    timeout_ms = self.intent_timeout.as_millis() as u64,
                    "Intent matcher timed out, denying fail-closed"
                );
                Verdict::Denied(DenialReason::IntentValidationUnavailable)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use leash_types::{
        CardDetails, IntentRule, LeashError, MerchantCategory, MerchantScope, TransactionId,
    };

    fn test_policy(limit: u64, scope: MerchantScope, intent_rule: IntentRule) -> SpendPolicy {
        SpendPolicy {
            hard_limit: Amount::new(limit),
            merchant_scope: scope,
            intent_rule,
        }
    }

    fn test_credential(policy: SpendPolicy) -> Credential {
        let now = Utc::now();
        Credential::new(
            "Test Card",
            CardDetails {
                pan: "4111111111111111".to_string(),
                cvv: "123".to_string(),
                expiry: "12/30".to_string(),
            },
            policy,
            now,
            now + chrono::Duration::days(30),
        )
    }

    fn test_request(amount: u64, category: MerchantCategory, label: &str) -> AuthorizationRequest {
        AuthorizationRequest {
            transaction_id: TransactionId::from("txn_test_1"),
            credential_id: leash_types::CredentialId::new(),
            amount: Amount::new(amount),
            merchant_category: category,
            merchant_label: label.to_string(),
        }
    }

    struct SlowMatcher;

    #[async_trait::async_trait]
    impl IntentMatcher for SlowMatcher {
        async fn matches(&self, _instruction: &str, _request: &AuthorizationRequest) -> Result<bool> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(true)
        }
    }

    struct FailingMatcher;

    #[async_trait::async_trait]
    impl IntentMatcher for FailingMatcher {
        async fn matches(&self, _instruction: &str, _request: &AuthorizationRequest) -> Result<bool> {
            Err(LeashError::IntentUnavailable {
                reason: "classifier offline".to_string(),
            })
        }
    }

    #[test]
    fn test_screen_inactive_wins_over_limit() {
        let policy = test_policy(100, MerchantScope::Any, IntentRule::None);
        let state = CredentialState::Revoked {
            revoked_at: Utc::now(),
        };
        // Both inactive and over limit; the state check fires first.
        let request = test_request(500, MerchantCategory::Fashion, "anything");
        assert_eq!(
            screen(&policy, &state, Amount::zero(), &request),
            Some(DenialReason::CredentialNotActive)
        );
    }

    #[test]
    fn test_screen_limit_wins_over_merchant() {
        let policy = test_policy(
            100,
            MerchantScope::Only(MerchantCategory::Fashion),
            IntentRule::None,
        );
        // Over limit and wrong category; limit check fires first.
        let request = test_request(500, MerchantCategory::Groceries, "anything");
        assert_eq!(
            screen(&policy, &CredentialState::IssuedActive, Amount::zero(), &request),
            Some(DenialReason::OverLimit)
        );
    }

    #[test]
    fn test_screen_exact_limit_passes() {
        let policy = test_policy(30000, MerchantScope::Any, IntentRule::None);
        let request = test_request(10000, MerchantCategory::Fashion, "label");
        assert_eq!(
            screen(
                &policy,
                &CredentialState::IssuedActive,
                Amount::new(20000),
                &request
            ),
            None
        );
    }

    #[test]
    fn test_screen_merchant_mismatch() {
        let policy = test_policy(
            30000,
            MerchantScope::Only(MerchantCategory::Fashion),
            IntentRule::None,
        );
        let request = test_request(100, MerchantCategory::Electronics, "label");
        assert_eq!(
            screen(&policy, &CredentialState::IssuedActive, Amount::zero(), &request),
            Some(DenialReason::MerchantMismatch)
        );
    }

    #[tokio::test]
    async fn test_keyword_matcher_containment() {
        let matcher = KeywordMatcher;
        let request = test_request(
            100,
            MerchantCategory::Fashion,
            "Nordstrom - wedding guest outfit, navy suit",
        );
        assert!(matcher
            .matches("Wedding Guest Outfit", &request)
            .await
            .unwrap());

        let off_intent = test_request(100, MerchantCategory::Fashion, "Weekly groceries run");
        assert!(!matcher
            .matches("Wedding Guest Outfit", &off_intent)
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_keyword_matcher_empty_instruction_rejects() {
        let matcher = KeywordMatcher;
        let request = test_request(100, MerchantCategory::Fashion, "anything at all");
        assert!(!matcher.matches("  ", &request).await.unwrap());
    }

    #[tokio::test]
    async fn test_evaluate_approves_without_intent_rule() {
        let verifier = Verifier::new(Arc::new(FailingMatcher), Duration::from_millis(100));
        let credential = test_credential(test_policy(30000, MerchantScope::Any, IntentRule::None));
        let request = test_request(100, MerchantCategory::Fashion, "label");
        // FailingMatcher would deny if consulted; a policy without an
        // intent rule must never reach it.
        assert_eq!(verifier.evaluate(&credential, &request).await, Verdict::Approved);
    }

    #[tokio::test]
    async fn test_evaluate_intent_mismatch() {
        let verifier = Verifier::with_keyword_matcher(Duration::from_millis(100));
        let credential = test_credential(test_policy(
            30000,
            MerchantScope::Any,
            IntentRule::PromptMatch {
                instruction: "Wedding Guest Outfit".to_string(),
            },
        ));
        let request = test_request(100, MerchantCategory::Fashion, "Weekly groceries");
        assert_eq!(
            verifier.evaluate(&credential, &request).await,
            Verdict::Denied(DenialReason::IntentMismatch)
        );
    }

    #[tokio::test]
    async fn test_evaluate_timeout_fails_closed() {
        let verifier = Verifier::new(Arc::new(SlowMatcher), Duration::from_millis(20));
        let credential = test_credential(test_policy(
            30000,
            MerchantScope::Any,
            IntentRule::PromptMatch {
                instruction: "anything".to_string(),
            },
        ));
        let request = test_request(100, MerchantCategory::Fashion, "anything");
        assert_eq!(
            verifier.evaluate(&credential, &request).await,
            Verdict::Denied(DenialReason::IntentValidationUnavailable)
        );
    }

    #[tokio::test]
    async fn test_evaluate_matcher_error_fails_closed() {
        let verifier = Verifier::new(Arc::new(FailingMatcher), Duration::from_millis(100));
        let credential = test_credential(test_policy(
            30000,
            MerchantScope::Any,
            IntentRule::PromptMatch {
                instruction: "anything".to_string(),
            },
        ));
        let request = test_request(100, MerchantCategory::Fashion, "anything");
        assert_eq!(
            verifier.evaluate(&credential, &request).await,
            Verdict::Denied(DenialReason::IntentValidationUnavailable)
        );
    }
}

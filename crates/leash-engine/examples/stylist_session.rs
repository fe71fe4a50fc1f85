//! Demonstrates Leash's policy-constrained authorization flow
//!
//! This example shows that:
//! 1. A card is born with a hard limit, a merchant scope, and an intent rule
//! 2. On-policy purchases are approved and funded just-in-time
//! 3. Over-limit, off-category, and off-intent purchases are denied
//! 4. Revocation kills the card immediately and irreversibly
//!
//! Run with: cargo run --example stylist_session

use std::sync::Arc;
use std::time::Duration;

use leash_engine::AuthorizationEngine;
use leash_ledger::FundingLedger;
use leash_policy::Verifier;
use leash_registry::CredentialRegistry;
use leash_types::{
    Amount, AuthorizationRequest, CardRequest, IntentRule, MerchantCategory, PolicySpec,
    TransactionId,
};
use rust_decimal::Decimal;

#[tokio::main]
async fn main() {
    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║            Leash Policy-Constrained Card Demo                ║");
    println!("║                                                              ║");
    println!("║  Invariant: spend never exceeds the policy. Fail closed.     ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    let registry = Arc::new(CredentialRegistry::default());
    let ledger = Arc::new(FundingLedger::new(registry.clone()));
    let verifier = Verifier::with_keyword_matcher(Duration::from_millis(500));
    let engine = AuthorizationEngine::new(registry, ledger, verifier);

    // Issue a $300 card for a personal stylist agent, locked to fashion
    // merchants and gated on the shopper's stated goal.
    let issued = engine
        .issue_card(CardRequest {
            name: "Stylist session".to_string(),
            policy: PolicySpec {
                hard_limit: Decimal::new(300, 0),
                merchant_type: "fashion".to_string(),
                intent_validation: IntentRule::PromptMatch {
                    instruction: "Wedding Guest Outfit".to_string(),
                },
            },
            valid_for_days: Some(7),
        })
        .unwrap();
    let card_id = issued.credential_id.clone();

    println!("📊 Card issued:");
    println!("   Number: {} (exp {})", issued.card.masked_pan(), issued.card.expiry);
    println!("   Limit: {}", issued.policy.hard_limit);
    println!("   Scope: {}", issued.policy.merchant_scope);
    println!("   Intent: Wedding Guest Outfit");
    println!();

    // =========================================================================
    // Test 1: On-policy purchase
    // =========================================================================
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Test 1: $240 dress, fashion merchant, on intent");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let decision = engine
        .authorize(AuthorizationRequest {
            transaction_id: TransactionId::from("txn_dress"),
            credential_id: card_id.clone(),
            amount: Amount::new(24000),
            merchant_category: MerchantCategory::Fashion,
            merchant_label: "Nordstrom wedding guest outfit, midnight blue dress".to_string(),
        })
        .await;

    match decision.funded_amount {
        Some(amount) => println!("✓ Approved and funded: {}", amount),
        None => println!("⚠ UNEXPECTED: denied as {:?}", decision.primary_reason()),
    }
    println!();

    // =========================================================================
    // Test 2: Over the remaining budget
    // =========================================================================
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Test 2: $100 shoes with only $60 of headroom left");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let decision = engine
        .authorize(AuthorizationRequest {
            transaction_id: TransactionId::from("txn_shoes"),
            credential_id: card_id.clone(),
            amount: Amount::new(10000),
            merchant_category: MerchantCategory::Fashion,
            merchant_label: "Wedding guest outfit heels".to_string(),
        })
        .await;

    match decision.primary_reason() {
        Some(reason) => println!("✓ Correctly denied: {}", reason),
        None => println!("⚠ UNEXPECTED: purchase approved"),
    }
    println!();

    // =========================================================================
    // Test 3: Wrong merchant category
    // =========================================================================
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Test 3: $30 dinner on a fashion-only card");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let decision = engine
        .authorize(AuthorizationRequest {
            transaction_id: TransactionId::from("txn_dinner"),
            credential_id: card_id.clone(),
            amount: Amount::new(3000),
            merchant_category: MerchantCategory::Dining,
            merchant_label: "Celebration dinner".to_string(),
        })
        .await;

    match decision.primary_reason() {
        Some(reason) => println!("✓ Correctly denied: {}", reason),
        None => println!("⚠ UNEXPECTED: purchase approved"),
    }
    println!();

    // =========================================================================
    // Test 4: Off-intent purchase
    // =========================================================================
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Test 4: $40 everyday jeans, in scope but off intent");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let decision = engine
        .authorize(AuthorizationRequest {
            transaction_id: TransactionId::from("txn_jeans"),
            credential_id: card_id.clone(),
            amount: Amount::new(4000),
            merchant_category: MerchantCategory::Fashion,
            merchant_label: "Everyday jeans".to_string(),
        })
        .await;

    match decision.primary_reason() {
        Some(reason) => println!("✓ Correctly denied: {}", reason),
        None => println!("⚠ UNEXPECTED: purchase approved"),
    }
    println!();

    // =========================================================================
    // Test 5: Revocation
    // =========================================================================
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Test 5: Revoke the card, then retry an on-policy purchase");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let state = engine.revoke_card(&card_id).await.unwrap();
    println!("✓ Card revoked, state: {}", state);

    let decision = engine
        .authorize(AuthorizationRequest {
            transaction_id: TransactionId::from("txn_after_revoke"),
            credential_id: card_id.clone(),
            amount: Amount::new(1000),
            merchant_category: MerchantCategory::Fashion,
            merchant_label: "Wedding guest outfit accessories".to_string(),
        })
        .await;

    match decision.primary_reason() {
        Some(reason) => println!("✓ Correctly denied: {}", reason),
        None => println!("⚠ UNEXPECTED: purchase approved"),
    }
    println!();

    let status = engine.card_status(&card_id).await.unwrap();
    println!("📊 Final card state:");
    println!("   State: {}", status.state);
    println!("   Spent: {} of {}", status.spent_to_date, status.policy.hard_limit);
    println!("   Journal entries: {}", engine.ledger().journal_len().await);
    println!();
    println!("One purchase moved money. Everything else bounced off the policy.");
}

//! Spend policy model
//!
//! A [`SpendPolicy`] is the machine-checkable contract attached to a
//! credential at issuance: a hard spending limit, a merchant scope, and an
//! intent rule. Policies are immutable once attached and are compared only
//! by value. All variants are closed; unknown kinds are rejected at
//! construction, never coerced.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{LeashError, Result};
use crate::money::Amount;

/// Closed set of merchant categories recognized by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MerchantCategory {
    Fashion,
    Electronics,
    Travel,
    Dining,
    Groceries,
    Software,
    Entertainment,
    Services,
}

impl MerchantCategory {
    /// All recognized categories, for input validation messages
    pub const ALL: [MerchantCategory; 8] = [
        Self::Fashion,
        Self::Electronics,
        Self::Travel,
        Self::Dining,
        Self::Groceries,
        Self::Software,
        Self::Entertainment,
        Self::Services,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fashion => "Fashion",
            Self::Electronics => "Electronics",
            Self::Travel => "Travel",
            Self::Dining => "Dining",
            Self::Groceries => "Groceries",
            Self::Software => "Software",
            Self::Entertainment => "Entertainment",
            Self::Services => "Services",
        }
    }

    /// Parse a category name, case-insensitively. Unknown names are rejected.
    pub fn parse(s: &str) -> Result<Self> {
        let needle = s.trim();
        Self::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(needle))
            .ok_or_else(|| {
                LeashError::invalid_input(
                    "merchant_category",
                    format!("unknown category '{}'", s),
                )
            })
    }
}

impl fmt::Display for MerchantCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Merchant constraint attached to a policy: one category, or the wildcard
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MerchantScope {
    /// Wildcard: any merchant category is acceptable
    Any,
    /// Only the named category is acceptable
    Only(MerchantCategory),
}

impl MerchantScope {
    pub fn allows(&self, category: MerchantCategory) -> bool {
        match self {
            Self::Any => true,
            Self::Only(allowed) => *allowed == category,
        }
    }

    /// Parse the wire form: `"*"` for the wildcard, otherwise a category name
    pub fn parse(s: &str) -> Result<Self> {
        if s.trim() == "*" {
            Ok(Self::Any)
        } else {
            Ok(Self::Only(MerchantCategory::parse(s)?))
        }
    }
}

impl fmt::Display for MerchantScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "*"),
            Self::Only(category) => write!(f, "{}", category),
        }
    }
}

/// Intent rule attached to a policy
///
/// `PromptMatch` gates every authorization on the injected intent classifier
/// judging the transaction's merchant label against the instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum IntentRule {
    None,
    PromptMatch { instruction: String },
}

impl IntentRule {
    pub fn requires_match(&self) -> bool {
        matches!(self, Self::PromptMatch { .. })
    }

    /// The instruction text to match against, when the rule has one
    pub fn instruction(&self) -> Option<&str> {
        match self {
            Self::None => None,
            Self::PromptMatch { instruction } => Some(instruction),
        }
    }
}

impl Default for IntentRule {
    fn default() -> Self {
        Self::None
    }
}

/// Immutable spend constraints bound to a credential at issuance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendPolicy {
    /// Cumulative spending ceiling; `spent_to_date` can never exceed it
    pub hard_limit: Amount,
    /// Merchant categories this credential may be used at
    pub merchant_scope: MerchantScope,
    /// Intent rule evaluated on every authorization
    pub intent_rule: IntentRule,
}

impl SpendPolicy {
    /// Validate and construct a policy.
    ///
    /// Fails with [`LeashError::InvalidPolicy`] when the hard limit is zero
    /// or a prompt-match rule carries a blank instruction.
    pub fn new(
        hard_limit: Amount,
        merchant_scope: MerchantScope,
        intent_rule: IntentRule,
    ) -> Result<Self> {
        if hard_limit.is_zero() {
            return Err(LeashError::invalid_policy("hard_limit must be positive"));
        }
        if let IntentRule::PromptMatch { instruction } = &intent_rule {
            if instruction.trim().is_empty() {
                return Err(LeashError::invalid_policy(
                    "prompt-match intent rule requires a non-empty instruction",
                ));
            }
        }
        Ok(Self {
            hard_limit,
            merchant_scope,
            intent_rule,
        })
    }

    /// Spending room left at a given spend level
    pub fn headroom(&self, spent_to_date: Amount) -> Amount {
        self.hard_limit.saturating_sub(spent_to_date)
    }

    /// Whether `spent_to_date + amount` stays within the hard limit
    pub fn covers(&self, spent_to_date: Amount, amount: Amount) -> bool {
        match spent_to_date.checked_add(amount) {
            Some(total) => total <= self.hard_limit,
            None => false,
        }
    }
}

/// Wire-format policy specification accepted by the issuance interface.
///
/// Produced upstream (e.g. by a natural-language policy extractor) and
/// treated here as structured input that still needs validation:
/// `hard_limit` is decimal major units, `merchant_type` is a category name
/// or `"*"`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicySpec {
    pub hard_limit: Decimal,
    pub merchant_type: String,
    #[serde(default)]
    pub intent_validation: IntentRule,
}

impl TryFrom<PolicySpec> for SpendPolicy {
    type Error = LeashError;

    fn try_from(spec: PolicySpec) -> Result<Self> {
        let hard_limit = Amount::from_decimal(spec.hard_limit)
            .map_err(|e| LeashError::invalid_policy(format!("hard_limit: {}", e)))?;
        let merchant_scope = MerchantScope::parse(&spec.merchant_type)
            .map_err(|e| LeashError::invalid_policy(format!("merchant_type: {}", e)))?;
        SpendPolicy::new(hard_limit, merchant_scope, spec.intent_validation)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_rule(instruction: &str) -> IntentRule {
        IntentRule::PromptMatch {
            instruction: instruction.to_string(),
        }
    }

    #[test]
    fn test_valid_policy() {
        let policy = SpendPolicy::new(
            Amount::new(30000),
            MerchantScope::Only(MerchantCategory::Fashion),
            prompt_rule("Wedding Guest Outfit"),
        )
        .unwrap();
        assert_eq!(policy.hard_limit, Amount::new(30000));
        assert!(policy.intent_rule.requires_match());
    }

    #[test]
    fn test_zero_limit_rejected() {
        let err = SpendPolicy::new(Amount::zero(), MerchantScope::Any, IntentRule::None)
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_POLICY");
    }

    #[test]
    fn test_blank_instruction_rejected() {
        let err = SpendPolicy::new(Amount::new(100), MerchantScope::Any, prompt_rule("  "))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_POLICY");
    }

    #[test]
    fn test_category_parse() {
        assert_eq!(
            MerchantCategory::parse("fashion").unwrap(),
            MerchantCategory::Fashion
        );
        assert_eq!(
            MerchantCategory::parse(" Travel ").unwrap(),
            MerchantCategory::Travel
        );
        assert!(MerchantCategory::parse("Weapons").is_err());
    }

    #[test]
    fn test_scope_parse_and_allows() {
        let any = MerchantScope::parse("*").unwrap();
        assert!(any.allows(MerchantCategory::Dining));

        let only = MerchantScope::parse("Fashion").unwrap();
        assert!(only.allows(MerchantCategory::Fashion));
        assert!(!only.allows(MerchantCategory::Electronics));
    }

    #[test]
    fn test_covers_boundary() {
        let policy = SpendPolicy::new(Amount::new(300), MerchantScope::Any, IntentRule::None)
            .unwrap();
        assert!(policy.covers(Amount::new(240), Amount::new(60)));
        assert!(!policy.covers(Amount::new(240), Amount::new(61)));
        assert!(!policy.covers(Amount::new(0), Amount::new(u64::MAX)));
        assert_eq!(policy.headroom(Amount::new(240)), Amount::new(60));
    }

    #[test]
    fn test_policy_spec_wire_format() {
        let json = r#"{
            "hard_limit": 300,
            "merchant_type": "Fashion",
            "intent_validation": { "type": "prompt-match", "instruction": "Wedding Guest Outfit" }
        }"#;
        let spec: PolicySpec = serde_json::from_str(json).unwrap();
        let policy = SpendPolicy::try_from(spec).unwrap();
        assert_eq!(policy.hard_limit, Amount::new(30000));
        assert_eq!(
            policy.merchant_scope,
            MerchantScope::Only(MerchantCategory::Fashion)
        );
        assert_eq!(
            policy.intent_rule,
            IntentRule::PromptMatch {
                instruction: "Wedding Guest Outfit".to_string()
            }
        );
    }

    #[test]
    fn test_policy_spec_defaults_to_no_intent_rule() {
        let json = r#"{ "hard_limit": "49.99", "merchant_type": "*" }"#;
        let spec: PolicySpec = serde_json::from_str(json).unwrap();
        let policy = SpendPolicy::try_from(spec).unwrap();
        assert_eq!(policy.hard_limit, Amount::new(4999));
        assert_eq!(policy.merchant_scope, MerchantScope::Any);
        assert_eq!(policy.intent_rule, IntentRule::None);
    }

    #[test]
    fn test_policy_spec_rejects_unknown_category() {
        let json = r#"{ "hard_limit": 50, "merchant_type": "Contraband" }"#;
        let spec: PolicySpec = serde_json::from_str(json).unwrap();
        let err = SpendPolicy::try_from(spec).unwrap_err();
        assert_eq!(err.error_code(), "INVALID_POLICY");
    }
}

//! Leash Types - Canonical domain types for policy-bounded payment credentials
//!
//! This crate contains all foundational types for Leash with zero dependencies
//! on other leash crates. It defines the type system for:
//!
//! - Identity types (CredentialId, TransactionId, ReceiptId, EntryId)
//! - Minor-unit money with exact decimal wire conversion
//! - Spend policies (hard limit, merchant scope, intent rule)
//! - Credential lifecycle (IssuedActive → Exhausted | Expired | Revoked)
//! - Authorization requests and decisions
//!
//! # Architectural Invariants
//!
//! These types support the core Leash guarantees:
//!
//! 1. A credential's policy is immutable from issuance to retirement
//! 2. `spent_to_date` never decreases and never exceeds the hard limit
//! 3. Terminal credential states are absorbing
//! 4. Denial is structured data, never an exception

pub mod authorization;
pub mod credential;
pub mod error;
pub mod identity;
pub mod money;
pub mod policy;

pub use authorization::*;
pub use credential::*;
pub use error::*;
pub use identity::*;
pub use money::*;
pub use policy::*;

/// Version of the Leash types schema
pub const TYPES_VERSION: &str = "0.1.0";

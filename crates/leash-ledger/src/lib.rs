//! Leash Ledger - Exactly-Once JIT Funding
//!
//! The ledger is the single authority over money movement. Every approved
//! authorization funds the credential just-in-time through [`FundingLedger::commit`],
//! which follows the real rules:
//!
//! 1. Commits are keyed by (credential, transaction); a transaction funds
//!    at most once, and a replay returns the original receipt untouched
//! 2. Headroom is re-checked under the credential's lock at commit time,
//!    so a stale verification can never push spend past the hard limit
//! 3. Reaching the limit exactly exhausts the credential in the same
//!    atomic step
//! 4. Every commit appends to an immutable journal and produces an
//!    Ed25519-signed receipt that anyone can verify offline
//!
//! Commits on distinct credentials proceed in parallel; only commits on
//! the same credential serialize.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use leash_registry::CredentialRegistry;
use leash_types::{Amount, CredentialId, EntryId, ReceiptId, Result, TransactionId};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

pub mod crypto;

use crypto::{hash_object, Keypair};

/// One immutable line in the funding journal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingEntry {
    /// Unique entry ID
    pub id: EntryId,
    /// Credential that was funded
    pub credential_id: CredentialId,
    /// Transaction that triggered the funding
    pub transaction_id: TransactionId,
    /// Amount moved by this entry
    pub amount: Amount,
    /// Credential's cumulative spend after this entry
    pub total_after: Amount,
    /// When the entry was recorded
    pub recorded_at: DateTime<Utc>,
}

/// Proof that a transaction was funded exactly once
///
/// Receipts are:
/// - Verifiable offline against the signer's public key
/// - Shareable
/// - Stable (schema won't change incompatibly)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingReceipt {
    /// Unique receipt ID
    pub receipt_id: ReceiptId,
    /// Credential that was funded
    pub credential_id: CredentialId,
    /// Transaction this receipt settles
    pub transaction_id: TransactionId,
    /// Amount funded
    pub amount: Amount,
    /// Cumulative spend after this funding
    pub total_after: Amount,
    /// Hash of the spend policy in force at commit time
    pub policy_snapshot_hash: String,
    /// When the funding committed
    pub issued_at: DateTime<Utc>,
    /// Signature over the signable portion
    pub signature: String,
    /// Public key that signed this receipt
    pub signer_public_key: String,
}

impl FundingReceipt {
    /// Get the canonical bytes for signing/verification
    pub fn signing_bytes(&self) -> Result<Vec<u8>> {
        let signable = SignableFunding {
            receipt_id: self.receipt_id.clone(),
            credential_id: self.credential_id.clone(),
            transaction_id: self.transaction_id.clone(),
            amount: self.amount,
            total_after: self.total_after,
            policy_snapshot_hash: self.policy_snapshot_hash.clone(),
            issued_at: self.issued_at,
        };
        Ok(serde_json::to_vec(&signable)?)
    }

    /// Verify the receipt signature
    pub fn verify(&self) -> Result<()> {
        let bytes = self.signing_bytes()?;
        crypto::verify_signature(&self.signer_public_key, &bytes, &self.signature)
    }
}

/// Internal type for creating the signable portion of a receipt
#[derive(Serialize)]
struct SignableFunding {
    receipt_id: ReceiptId,
    credential_id: CredentialId,
    transaction_id: TransactionId,
    amount: Amount,
    total_after: Amount,
    policy_snapshot_hash: String,
    issued_at: DateTime<Utc>,
}

/// How a commit resolved: fresh funding, or an idempotent replay
#[derive(Debug, Clone)]
pub enum CommitOutcome {
    /// The transaction funded now; spend moved
    Committed(FundingReceipt),
    /// The transaction had already funded; the original receipt, no spend moved
    Replayed(FundingReceipt),
}

impl CommitOutcome {
    pub fn receipt(&self) -> &FundingReceipt {
        match self {
            Self::Committed(receipt) | Self::Replayed(receipt) => receipt,
        }
    }

    pub fn into_receipt(self) -> FundingReceipt {
        match self {
            Self::Committed(receipt) | Self::Replayed(receipt) => receipt,
        }
    }

    pub fn is_replay(&self) -> bool {
        matches!(self, Self::Replayed(_))
    }
}

/// The Leash funding ledger
///
/// Owns the commit path, the receipt store, and the append-only journal.
/// Spend totals live on the credentials themselves; the ledger is their
/// only writer, always under the credential's cell lock.
pub struct FundingLedger {
    registry: Arc<CredentialRegistry>,
    receipts: DashMap<(CredentialId, TransactionId), FundingReceipt>,
    journal: RwLock<Vec<FundingEntry>>,
    keypair: Keypair,
}

impl FundingLedger {
    /// Create a ledger over the given credential registry
    pub fn new(registry: Arc<CredentialRegistry>) -> Self {
        Self::with_keypair(registry, Keypair::generate())
    }

    /// Create with a specific keypair (for testing or persistence)
    pub fn with_keypair(registry: Arc<CredentialRegistry>, keypair: Keypair) -> Self {
        Self {
            registry,
            receipts: DashMap::new(),
            journal: RwLock::new(Vec::new()),
            keypair,
        }
    }

    /// Public key receipts from this ledger are signed with
    pub fn public_key(&self) -> String {
        self.keypair.public_key_hex()
    }

    /// Fund a transaction against a credential, exactly once.
    ///
    /// Re-submitting a (credential, transaction) pair that already funded
    /// returns [`CommitOutcome::Replayed`] with the original receipt; the
    /// submitted amount is ignored and no spend moves. A fresh commit
    /// re-checks state and headroom under the credential lock, applies the
    /// spend, exhausts the credential if the limit is reached exactly,
    /// journals the movement, and returns a signed receipt.
    ///
    /// Failed commits record nothing; a later retry with the same
    /// transaction ID starts from scratch.
    pub async fn commit(
        &self,
        credential_id: &CredentialId,
        transaction_id: &TransactionId,
        amount: Amount,
    ) -> Result<CommitOutcome> {
        let key = (credential_id.clone(), transaction_id.clone());

        if let Some(existing) = self.receipts.get(&key) {
            return Ok(CommitOutcome::Replayed(existing.clone()));
        }

        let cell = self.registry.cell(credential_id)?;
        let mut credential = cell.lock().await;

        // Re-check under the lock: a concurrent duplicate may have won
        // the race between the fast check above and lock acquisition.
        if let Some(existing) = self.receipts.get(&key) {
            return Ok(CommitOutcome::Replayed(existing.clone()));
        }

        let now = Utc::now();
        let policy_snapshot_hash = hash_object(&credential.policy)?;
        let total_after = credential.apply_funding(amount, now)?;

        let receipt_id = ReceiptId::new();
        let signable = SignableFunding {
            receipt_id: receipt_id.clone(),
            credential_id: credential_id.clone(),
            transaction_id: transaction_id.clone(),
            amount,
            total_after,
            policy_snapshot_hash: policy_snapshot_hash.clone(),
            issued_at: now,
        };
        let signature = self.keypair.sign(&serde_json::to_vec(&signable)?);

        let receipt = FundingReceipt {
            receipt_id,
            credential_id: credential_id.clone(),
            transaction_id: transaction_id.clone(),
            amount,
            total_after,
            policy_snapshot_hash,
            issued_at: now,
            signature,
            signer_public_key: self.keypair.public_key_hex(),
        };

        let entry = FundingEntry {
            id: EntryId::new(),
            credential_id: credential_id.clone(),
            transaction_id: transaction_id.clone(),
            amount,
            total_after,
            recorded_at: now,
        };
        self.journal.write().await.push(entry);
        self.receipts.insert(key, receipt.clone());

        tracing::info!(
            credential_id = %credential_id,
            transaction_id = %transaction_id,
            amount = %amount,
            total_after = %total_after,
            exhausted = !credential.is_active(),
            "Funding committed"
        );

        Ok(CommitOutcome::Committed(receipt))
    }

    /// The stored receipt for a (credential, transaction) pair, if it funded
    pub fn receipt_for(
        &self,
        credential_id: &CredentialId,
        transaction_id: &TransactionId,
    ) -> Option<FundingReceipt> {
        self.receipts
            .get(&(credential_id.clone(), transaction_id.clone()))
            .map(|r| r.clone())
    }

    /// All journal entries for one credential, in commit order
    pub async fn entries_for(&self, credential_id: &CredentialId) -> Vec<FundingEntry> {
        self.journal
            .read()
            .await
            .iter()
            .filter(|e| &e.credential_id == credential_id)
            .cloned()
            .collect()
    }

    /// Total number of journal entries across all credentials
    pub async fn journal_len(&self) -> usize {
        self.journal.read().await.len()
    }
}

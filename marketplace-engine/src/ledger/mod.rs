pub mod mock;
pub mod rpc;

use crate::delegate::DelegateCredential;
use crate::errors::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Finality confidence tier requested when confirming a transaction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl fmt::Display for Commitment {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observed transfer inside a ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransferInstruction {
    pub source: String,
    pub destination: String,
    pub amount: u64, // Smallest currency units
}

/// A finalized or pending transaction observed on the ledger, read-only
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub reference: String,
    pub instructions: Vec<TransferInstruction>,
}

/// Outgoing instruction, batched into a single transaction on submit
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Instruction {
    /// Create the (token, owner)-scoped account, rent funded by `funder`
    CreateOwnerAccount {
        account: String,
        owner: String,
        token_id: String,
        funder: String,
    },
    /// Move token units between owner-scoped accounts
    TransferToken {
        token_id: String,
        source: String,
        destination: String,
        amount: u64,
        authority: String,
    },
}

/// Unsigned transaction body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub fee_payer: String,
    pub finality_marker: String, // Recent marker proving liveness of the submission
    pub instructions: Vec<Instruction>,
}

impl Transaction {
    /// Serialize and sign with the delegate, producing the submit payload.
    pub fn signed_by(self, delegate: &DelegateCredential) -> Result<SignedTransaction> {
        let message = serde_json::to_vec(&self)
            .map_err(|e| crate::errors::MarketplaceError::Internal(e.to_string()))?;
        let signature = delegate.sign(&message);

        Ok(SignedTransaction {
            transaction: self,
            signatures: vec![signature],
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub transaction: Transaction,
    pub signatures: Vec<String>,
}

/// Thin adapter over the external settlement network. All calls are network
/// I/O and may fail transiently; `None` from a lookup on a very recent
/// reference means "not yet observable", never a permanent failure.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn get_transaction(&self, reference: &str) -> Result<Option<TransactionRecord>>;

    /// `None` means the account does not exist on the network yet.
    async fn get_balance(&self, address: &str) -> Result<Option<u64>>;

    async fn latest_finality_marker(&self) -> Result<String>;

    /// Submit a signed transaction, returning its reference.
    async fn submit(&self, tx: &SignedTransaction) -> Result<String>;

    /// `false` means the transaction has not reached the requested
    /// commitment yet; callers bound their own retries.
    async fn confirm(&self, reference: &str, commitment: Commitment) -> Result<bool>;

    /// Faucet request, available on test networks only.
    async fn request_funds(&self, address: &str, amount: u64) -> Result<()>;
}

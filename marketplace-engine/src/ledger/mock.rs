use super::{Commitment, LedgerClient, SignedTransaction, TransactionRecord};
use crate::errors::{MarketplaceError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

/// In-memory ledger for tests and local runs. Transactions and balances are
/// seeded by the caller; lookups are counted so tests can assert the
/// verifier's attempt budget.
pub struct MockLedgerClient {
    transactions: Arc<RwLock<HashMap<String, TransactionRecord>>>,
    balances: Arc<RwLock<HashMap<String, u64>>>,
    submitted: Arc<RwLock<Vec<SignedTransaction>>>,
    lookups: Arc<RwLock<HashMap<String, u32>>>,
    confirm_result: AtomicBool,
    fail_submissions: AtomicBool,
    submit_count: AtomicU64,
}

impl MockLedgerClient {
    pub fn new() -> Self {
        Self {
            transactions: Arc::new(RwLock::new(HashMap::new())),
            balances: Arc::new(RwLock::new(HashMap::new())),
            submitted: Arc::new(RwLock::new(Vec::new())),
            lookups: Arc::new(RwLock::new(HashMap::new())),
            confirm_result: AtomicBool::new(true),
            fail_submissions: AtomicBool::new(false),
            submit_count: AtomicU64::new(0),
        }
    }

    /// Seed an observable payment transaction.
    pub async fn insert_transaction(&self, record: TransactionRecord) {
        self.transactions
            .write()
            .await
            .insert(record.reference.clone(), record);
    }

    /// Seed an account balance (creating the account).
    pub async fn credit(&self, address: &str, amount: u64) {
        *self.balances.write().await.entry(address.to_string()).or_insert(0) += amount;
    }

    /// Whether confirm() reports the requested commitment as reached.
    pub fn set_confirm_result(&self, confirmed: bool) {
        self.confirm_result.store(confirmed, Ordering::SeqCst);
    }

    /// Make submit() fail with a simulated network error.
    pub fn set_fail_submissions(&self, fail: bool) {
        self.fail_submissions.store(fail, Ordering::SeqCst);
    }

    /// How many times a reference has been looked up.
    pub async fn lookup_count(&self, reference: &str) -> u32 {
        self.lookups
            .read()
            .await
            .get(reference)
            .copied()
            .unwrap_or(0)
    }

    pub async fn submitted_transactions(&self) -> Vec<SignedTransaction> {
        self.submitted.read().await.clone()
    }
}

impl Default for MockLedgerClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LedgerClient for MockLedgerClient {
    async fn get_transaction(&self, reference: &str) -> Result<Option<TransactionRecord>> {
        *self
            .lookups
            .write()
            .await
            .entry(reference.to_string())
            .or_insert(0) += 1;

        Ok(self.transactions.read().await.get(reference).cloned())
    }

    async fn get_balance(&self, address: &str) -> Result<Option<u64>> {
        Ok(self.balances.read().await.get(address).copied())
    }

    async fn latest_finality_marker(&self) -> Result<String> {
        Ok(format!("MARKER-{}", Uuid::new_v4()))
    }

    async fn submit(&self, tx: &SignedTransaction) -> Result<String> {
        if self.fail_submissions.load(Ordering::SeqCst) {
            return Err(MarketplaceError::Ledger(
                "simulated submission failure".to_string(),
            ));
        }

        self.submitted.write().await.push(tx.clone());
        let n = self.submit_count.fetch_add(1, Ordering::SeqCst);

        // Transferred-to accounts now exist on the network
        let mut balances = self.balances.write().await;
        for instruction in &tx.transaction.instructions {
            if let super::Instruction::CreateOwnerAccount { account, .. } = instruction {
                balances.entry(account.clone()).or_insert(0);
            }
        }

        let reference = format!("MOCK-TRANSFER-{}", n);
        info!("Mock ledger: accepted transaction {}", reference);
        Ok(reference)
    }

    async fn confirm(&self, _reference: &str, _commitment: Commitment) -> Result<bool> {
        Ok(self.confirm_result.load(Ordering::SeqCst))
    }

    async fn request_funds(&self, address: &str, amount: u64) -> Result<()> {
        self.credit(address, amount).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TransferInstruction;

    #[tokio::test]
    async fn test_lookup_counting() {
        let client = MockLedgerClient::new();
        assert!(client.get_transaction("missing").await.unwrap().is_none());
        assert!(client.get_transaction("missing").await.unwrap().is_none());
        assert_eq!(client.lookup_count("missing").await, 2);
    }

    #[tokio::test]
    async fn test_seeded_transaction_is_observable() {
        let client = MockLedgerClient::new();
        client
            .insert_transaction(TransactionRecord {
                reference: "ref-1".to_string(),
                instructions: vec![TransferInstruction {
                    source: "buyer".to_string(),
                    destination: "seller".to_string(),
                    amount: 42,
                }],
            })
            .await;

        let record = client.get_transaction("ref-1").await.unwrap().unwrap();
        assert_eq!(record.instructions[0].amount, 42);
    }
}

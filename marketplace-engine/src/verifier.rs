use crate::config::VerifierConfig;
use crate::errors::{MarketplaceError, Result};
use crate::ledger::{LedgerClient, TransactionRecord};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum VerificationOutcome {
    /// A qualifying transfer was found; `amount` is what actually moved
    Verified { amount: u64 },
    /// The transaction never became observable within the attempt budget
    Pending,
    /// The transaction was observed but no instruction qualifies
    Rejected { reason: String },
}

/// Convert a native-currency price to smallest units, rounding half up.
/// The same conversion builds the expected minimum on the verify side, so
/// amount comparisons stay in integer arithmetic end to end.
pub fn price_to_smallest_units(price: Decimal, units_per_native: u64) -> Result<u64> {
    let scaled = price * Decimal::from(units_per_native);
    scaled
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_u64()
        .ok_or_else(|| {
            MarketplaceError::Validation(format!("price {} is out of range", price))
        })
}

/// Polls the ledger for a claimed payment and validates it against the
/// listing's expectations. The ledger may not expose a transaction for
/// parsed lookup immediately after submission, so absence within the
/// attempt budget is Pending (retry-later), never a hard failure.
pub struct PaymentVerifier {
    client: Arc<dyn LedgerClient>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl PaymentVerifier {
    pub fn new(client: Arc<dyn LedgerClient>, config: &VerifierConfig) -> Self {
        Self {
            client,
            max_attempts: config.max_attempts,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub async fn verify_payment(
        &self,
        reference: &str,
        expected_source: &str,
        expected_destination: &str,
        expected_min_units: u64,
    ) -> Result<VerificationOutcome> {
        for attempt in 1..=self.max_attempts {
            match self.client.get_transaction(reference).await {
                Ok(Some(record)) => {
                    return Ok(Self::evaluate(
                        &record,
                        expected_source,
                        expected_destination,
                        expected_min_units,
                    ));
                }
                Ok(None) => {
                    debug!(
                        "Payment {} not yet observable (attempt {}/{})",
                        reference, attempt, self.max_attempts
                    );
                }
                // Node lag and transient faults consume an attempt rather
                // than aborting the budget
                Err(e) => {
                    warn!(
                        "Payment lookup {} failed on attempt {}/{}: {}",
                        reference, attempt, self.max_attempts, e
                    );
                }
            }

            if attempt < self.max_attempts && !self.retry_delay.is_zero() {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        Ok(VerificationOutcome::Pending)
    }

    fn evaluate(
        record: &TransactionRecord,
        expected_source: &str,
        expected_destination: &str,
        expected_min_units: u64,
    ) -> VerificationOutcome {
        let qualifying = record.instructions.iter().find(|instruction| {
            instruction.source == expected_source
                && instruction.destination == expected_destination
                && instruction.amount >= expected_min_units
        });

        match qualifying {
            Some(instruction) => VerificationOutcome::Verified {
                amount: instruction.amount,
            },
            None => VerificationOutcome::Rejected {
                reason: format!(
                    "no transfer of at least {} units from {} to {} in transaction {}",
                    expected_min_units, expected_source, expected_destination, record.reference
                ),
            },
        }
    }
}

use crate::config::ReconcilerConfig;
use crate::fulfillment::FulfillmentExecutor;
use crate::metrics;
use crate::models::SaleStatus;
use crate::store::{ListingStore, PendingSale};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// Background worker resolving the dual-write hazard: sales whose inventory
/// was consumed but whose token transfer was never confirmed. Sales with a
/// transfer reference are re-confirmed; sales without one are re-submitted.
pub struct Reconciler {
    store: Arc<dyn ListingStore>,
    executor: Arc<FulfillmentExecutor>,
    config: ReconcilerConfig,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn ListingStore>,
        executor: Arc<FulfillmentExecutor>,
        config: ReconcilerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            config,
        }
    }

    /// Spawn the periodic sweep loop.
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_secs(self.config.interval_secs);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if let Err(e) = self.sweep_once().await {
                    error!("Reconciliation sweep failed: {}", e);
                }
            }
        })
    }

    /// One bounded sweep; returns how many sales were promoted to fulfilled.
    pub async fn sweep_once(&self) -> crate::errors::Result<usize> {
        let pending = self
            .store
            .sales_needing_fulfillment(self.config.batch_size, self.config.min_age_secs)
            .await?;

        if pending.is_empty() {
            return Ok(0);
        }

        info!("Reconciling {} unfulfilled sales", pending.len());

        let mut resolved = 0;
        for entry in pending {
            match self.resolve(&entry).await {
                Ok(true) => resolved += 1,
                Ok(false) => {}
                Err(e) => warn!(
                    "Reconciliation of sale {} (listing {}) failed: {}",
                    entry.sale.id, entry.sale.listing_id, e
                ),
            }
        }

        if resolved > 0 {
            metrics::SALES_RECONCILED.inc_by(resolved as u64);
            info!("Reconciled {} sales to fulfilled", resolved);
        }

        Ok(resolved)
    }

    async fn resolve(&self, entry: &PendingSale) -> crate::errors::Result<bool> {
        let sale = &entry.sale;

        // A submitted transfer may have landed after the inline
        // confirmation window closed
        if let Some(transfer_ref) = &sale.transfer_ref {
            if self.executor.await_confirmation(transfer_ref).await {
                self.store
                    .mark_sale(
                        sale.listing_id,
                        &sale.payment_ref,
                        SaleStatus::Fulfilled,
                        None,
                    )
                    .await?;
                return Ok(true);
            }
            return Ok(false);
        }

        // Never submitted: re-drive the transfer from the sale record
        let outcome = self
            .executor
            .transfer_one_unit(&sale.token_id, &entry.seller_address, &sale.buyer_address)
            .await?;

        let status = if outcome.confirmed {
            SaleStatus::Fulfilled
        } else {
            SaleStatus::ConsumedPendingTransfer
        };

        self.store
            .mark_sale(
                sale.listing_id,
                &sale.payment_ref,
                status,
                Some(&outcome.reference),
            )
            .await?;

        Ok(outcome.confirmed)
    }
}

use crate::errors::{MarketplaceError, Result};
use crate::fulfillment::FulfillmentExecutor;
use crate::metrics;
use crate::models::{
    ActiveListings, CreateListingRequest, Listing, PurchaseOutcome, PurchaseRequest, SaleRecord,
    SaleStatus,
};
use crate::store::{ConsumeOutcome, ListingStore, NewListing, SongCatalog};
use crate::verifier::{price_to_smallest_units, PaymentVerifier, VerificationOutcome};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Service facade over the listing and purchase flows. Purchase sequences
/// verifier -> inventory consumption -> fulfillment, owning the end-to-end
/// error and retry contract; concurrent requests coordinate only through
/// the store's atomic consume.
pub struct MarketplaceService {
    store: Arc<dyn ListingStore>,
    songs: Arc<dyn SongCatalog>,
    verifier: PaymentVerifier,
    executor: Arc<FulfillmentExecutor>,
    units_per_native: u64,
}

impl MarketplaceService {
    pub fn new(
        store: Arc<dyn ListingStore>,
        songs: Arc<dyn SongCatalog>,
        verifier: PaymentVerifier,
        executor: Arc<FulfillmentExecutor>,
        units_per_native: u64,
    ) -> Self {
        Self {
            store,
            songs,
            verifier,
            executor,
            units_per_native,
        }
    }

    pub async fn create_listing(&self, request: CreateListingRequest) -> Result<Listing> {
        validator::Validate::validate(&request)
            .map_err(|e| MarketplaceError::Validation(e.to_string()))?;

        if request.price <= Decimal::ZERO {
            return Err(MarketplaceError::Validation(
                "price must be positive".to_string(),
            ));
        }

        if request.supply < 1 {
            return Err(MarketplaceError::Validation(
                "supply must be at least 1".to_string(),
            ));
        }

        if request.inventory.len() != request.supply as usize {
            return Err(MarketplaceError::Validation(format!(
                "inventory holds {} token ids for a supply of {}",
                request.inventory.len(),
                request.supply
            )));
        }

        let unique: std::collections::HashSet<&String> = request.inventory.iter().collect();
        if unique.len() != request.inventory.len() {
            return Err(MarketplaceError::Validation(
                "inventory token ids must be unique".to_string(),
            ));
        }

        // The price must survive smallest-unit conversion before any buyer
        // relies on it
        price_to_smallest_units(request.price, self.units_per_native)?;

        let owner = self
            .songs
            .owner_of(request.song_id)
            .await?
            .ok_or(MarketplaceError::SongNotFound(request.song_id))?;

        if owner != request.seller_user_id {
            warn!(
                "User {} attempted to list song {} owned by {}",
                request.seller_user_id, request.song_id, owner
            );
            return Err(MarketplaceError::Forbidden);
        }

        let listing = self
            .store
            .create_listing(NewListing {
                song_id: request.song_id,
                title: request.title,
                artist: request.artist,
                price: request.price,
                supply: request.supply,
                seller_address: request.seller_address,
                seller_user_id: request.seller_user_id,
                metadata_uri: request.metadata_uri,
                inventory: request.inventory,
            })
            .await?;

        metrics::LISTINGS_CREATED.inc();
        info!(
            "Created listing {} for song {} (supply {})",
            listing.id, listing.song_id, listing.supply
        );

        Ok(listing)
    }

    pub async fn list_listings(&self) -> Result<ActiveListings> {
        self.store.list_active().await
    }

    pub async fn set_listing_active(
        &self,
        listing_id: Uuid,
        seller_user_id: Uuid,
        active: bool,
    ) -> Result<Listing> {
        self.store.set_active(listing_id, seller_user_id, active).await
    }

    /// The core purchase state machine:
    /// Received -> Verifying -> {Rejected, PendingRetry, Verified}
    ///          -> Consuming -> {OutOfStock, Consumed}
    ///          -> Fulfilling -> {Fulfilled, FulfillmentUncertain}
    pub async fn purchase(
        &self,
        listing_id: Uuid,
        request: PurchaseRequest,
    ) -> Result<PurchaseOutcome> {
        // Received: missing fields are a client error, never retried
        let payment_ref = request.transaction_ref.trim();
        if payment_ref.is_empty() {
            return Err(MarketplaceError::Validation(
                "transaction reference is required".to_string(),
            ));
        }

        let buyer_address = request.buyer_address.trim();
        if buyer_address.is_empty() {
            return Err(MarketplaceError::Validation(
                "buyer address is required".to_string(),
            ));
        }

        let listing = self
            .store
            .get_listing(listing_id)
            .await?
            .ok_or(MarketplaceError::ListingNotFound(listing_id))?;

        // Idempotent re-entry: a reference that already consumed a unit
        // replays its outcome instead of consuming again
        if let Some(sale) = self.store.find_sale(listing_id, payment_ref).await? {
            info!(
                "Purchase replay for listing {} ref {}: sale already {}",
                listing_id,
                payment_ref,
                sale.status.as_str()
            );
            return Ok(Self::replay_outcome(&listing, &sale));
        }

        // Verifying
        let expected_min = price_to_smallest_units(listing.price, self.units_per_native)?;
        let verification = self
            .verifier
            .verify_payment(
                payment_ref,
                buyer_address,
                &listing.seller_address,
                expected_min,
            )
            .await?;

        match verification {
            VerificationOutcome::Pending => {
                metrics::PURCHASES_TOTAL.with_label_values(&["pending_retry"]).inc();
                return Ok(PurchaseOutcome::PendingRetry {
                    attempts: self.verifier.max_attempts(),
                });
            }
            VerificationOutcome::Rejected { reason } => {
                metrics::PURCHASES_TOTAL.with_label_values(&["rejected"]).inc();
                info!(
                    "Payment {} rejected for listing {}: {}",
                    payment_ref, listing_id, reason
                );
                return Ok(PurchaseOutcome::Rejected { reason });
            }
            VerificationOutcome::Verified { amount } => {
                info!(
                    "Payment {} verified for listing {} ({} units)",
                    payment_ref, listing_id, amount
                );
            }
        }

        // Consuming: sold-out between verification and consumption is an
        // expected race, not a bug
        let consumed = match self
            .store
            .consume_unit(listing_id, buyer_address, payment_ref)
            .await?
        {
            ConsumeOutcome::NotFound => {
                return Err(MarketplaceError::ListingNotFound(listing_id))
            }
            ConsumeOutcome::OutOfStock => {
                metrics::PURCHASES_TOTAL.with_label_values(&["out_of_stock"]).inc();
                return Ok(PurchaseOutcome::OutOfStock);
            }
            ConsumeOutcome::Consumed(unit) => unit,
        };

        if consumed.already_consumed {
            // Lost a race against an identical retry; the winner owns
            // fulfillment
            let sale = self.store.find_sale(listing_id, payment_ref).await?;
            return Ok(match sale {
                Some(sale) => Self::replay_outcome(&listing, &sale),
                None => PurchaseOutcome::FulfillmentUncertain {
                    token_id: consumed.token_id,
                    sold_count: consumed.sold_count,
                    still_active: consumed.still_active,
                    detail: "sale record not yet visible".to_string(),
                },
            });
        }

        info!(
            "Consumed token {} from listing {} (sold {}, active {})",
            consumed.token_id, listing_id, consumed.sold_count, consumed.still_active
        );

        // Fulfilling: inventory is never rolled back past this point; an
        // unconfirmed transfer is uncertain, not failed
        match self
            .executor
            .transfer_one_unit(&consumed.token_id, &listing.seller_address, buyer_address)
            .await
        {
            Ok(outcome) if outcome.confirmed => {
                self.store
                    .mark_sale(
                        listing_id,
                        payment_ref,
                        SaleStatus::Fulfilled,
                        Some(&outcome.reference),
                    )
                    .await?;
                metrics::PURCHASES_TOTAL.with_label_values(&["fulfilled"]).inc();

                Ok(PurchaseOutcome::Fulfilled {
                    token_id: consumed.token_id,
                    sold_count: consumed.sold_count,
                    still_active: consumed.still_active,
                    transfer_ref: Some(outcome.reference),
                })
            }
            Ok(outcome) => {
                self.store
                    .mark_sale(
                        listing_id,
                        payment_ref,
                        SaleStatus::ConsumedPendingTransfer,
                        Some(&outcome.reference),
                    )
                    .await?;
                metrics::PURCHASES_TOTAL.with_label_values(&["uncertain"]).inc();
                warn!(
                    "Transfer {} for listing {} unconfirmed, left to reconciler",
                    outcome.reference, listing_id
                );

                Ok(PurchaseOutcome::FulfillmentUncertain {
                    token_id: consumed.token_id,
                    sold_count: consumed.sold_count,
                    still_active: consumed.still_active,
                    detail: "transfer submitted but not yet confirmed".to_string(),
                })
            }
            Err(e) => {
                self.store
                    .mark_sale(
                        listing_id,
                        payment_ref,
                        SaleStatus::NeedsReconciliation,
                        None,
                    )
                    .await?;
                metrics::PURCHASES_TOTAL.with_label_values(&["uncertain"]).inc();
                error!(
                    "Transfer submission failed for listing {} token {}: {}",
                    listing_id, consumed.token_id, e
                );

                Ok(PurchaseOutcome::FulfillmentUncertain {
                    token_id: consumed.token_id,
                    sold_count: consumed.sold_count,
                    still_active: consumed.still_active,
                    detail: format!("transfer submission failed: {}", e),
                })
            }
        }
    }

    fn replay_outcome(listing: &Listing, sale: &SaleRecord) -> PurchaseOutcome {
        match sale.status {
            SaleStatus::Fulfilled => PurchaseOutcome::Fulfilled {
                token_id: sale.token_id.clone(),
                sold_count: listing.sold_count(),
                still_active: listing.active,
                transfer_ref: sale.transfer_ref.clone(),
            },
            SaleStatus::ConsumedPendingTransfer | SaleStatus::NeedsReconciliation => {
                PurchaseOutcome::FulfillmentUncertain {
                    token_id: sale.token_id.clone(),
                    sold_count: listing.sold_count(),
                    still_active: listing.active,
                    detail: "token transfer pending reconciliation".to_string(),
                }
            }
        }
    }
}

use super::{ConsumeOutcome, ConsumedUnit, ListingStore, NewListing, PendingSale, SongCatalog};
use crate::errors::{MarketplaceError, Result};
use crate::models::{ActiveListings, Listing, ListingSummary, SaleRecord, SaleStatus};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-memory listing store for tests and local runs. The write lock is the
/// atomic-update primitive: a consume holds it for the whole
/// check-pop-record sequence, giving the same strict consumption ordering
/// the relational store gets from its single-statement update.
pub struct MemoryListingStore {
    listings: Arc<RwLock<HashMap<Uuid, ListingState>>>,
}

struct ListingState {
    listing: Listing,
    sales: Vec<SaleRecord>,
}

impl MemoryListingStore {
    pub fn new() -> Self {
        Self {
            listings: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for MemoryListingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ListingStore for MemoryListingStore {
    async fn create_listing(&self, new: NewListing) -> Result<Listing> {
        let now = Utc::now();
        let listing = Listing {
            id: Uuid::new_v4(),
            song_id: new.song_id,
            title: new.title,
            artist: new.artist,
            price: new.price,
            supply: new.supply,
            seller_address: new.seller_address,
            seller_user_id: new.seller_user_id,
            metadata_uri: new.metadata_uri,
            active: true,
            inventory: new.inventory,
            created_at: now,
            updated_at: now,
        };

        self.listings.write().await.insert(
            listing.id,
            ListingState {
                listing: listing.clone(),
                sales: Vec::new(),
            },
        );

        Ok(listing)
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>> {
        Ok(self
            .listings
            .read()
            .await
            .get(&id)
            .map(|state| state.listing.clone()))
    }

    async fn list_active(&self) -> Result<ActiveListings> {
        let listings = self.listings.read().await;
        let mut summaries: Vec<ListingSummary> = listings
            .values()
            .filter(|state| state.listing.active)
            .map(|state| {
                let l = &state.listing;
                ListingSummary {
                    id: l.id,
                    song_id: l.song_id,
                    title: l.title.clone(),
                    artist: l.artist.clone(),
                    price: l.price,
                    supply: l.supply,
                    sold_count: l.sold_count(),
                    available: l.inventory.len() as i64,
                    seller_address: l.seller_address.clone(),
                    metadata_uri: l.metadata_uri.clone(),
                    created_at: l.created_at,
                }
            })
            .collect();

        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        Ok(ActiveListings {
            listings: summaries,
            warning: None,
        })
    }

    async fn set_active(&self, id: Uuid, seller_user_id: Uuid, active: bool) -> Result<Listing> {
        let mut listings = self.listings.write().await;
        let state = listings
            .get_mut(&id)
            .ok_or(MarketplaceError::ListingNotFound(id))?;

        if state.listing.seller_user_id != seller_user_id {
            return Err(MarketplaceError::Forbidden);
        }

        state.listing.active = active && !state.listing.inventory.is_empty();
        state.listing.updated_at = Utc::now();

        Ok(state.listing.clone())
    }

    async fn consume_unit(
        &self,
        id: Uuid,
        buyer_address: &str,
        payment_ref: &str,
    ) -> Result<ConsumeOutcome> {
        let mut listings = self.listings.write().await;
        let state = match listings.get_mut(&id) {
            Some(state) => state,
            None => return Ok(ConsumeOutcome::NotFound),
        };

        // Idempotent re-entry by payment reference
        if let Some(sale) = state.sales.iter().find(|s| s.payment_ref == payment_ref) {
            return Ok(ConsumeOutcome::Consumed(ConsumedUnit {
                token_id: sale.token_id.clone(),
                sold_count: state.listing.sold_count(),
                still_active: state.listing.active,
                already_consumed: true,
            }));
        }

        if !state.listing.active || state.listing.inventory.is_empty() {
            return Ok(ConsumeOutcome::OutOfStock);
        }

        let token_id = state.listing.inventory.remove(0);
        if state.listing.inventory.is_empty() {
            state.listing.active = false;
        }
        let now = Utc::now();
        state.listing.updated_at = now;

        state.sales.push(SaleRecord {
            id: Uuid::new_v4(),
            listing_id: id,
            token_id: token_id.clone(),
            buyer_address: buyer_address.to_string(),
            payment_ref: payment_ref.to_string(),
            status: SaleStatus::ConsumedPendingTransfer,
            transfer_ref: None,
            created_at: now,
            updated_at: now,
        });

        Ok(ConsumeOutcome::Consumed(ConsumedUnit {
            token_id,
            sold_count: state.listing.sold_count(),
            still_active: state.listing.active,
            already_consumed: false,
        }))
    }

    async fn find_sale(&self, listing_id: Uuid, payment_ref: &str) -> Result<Option<SaleRecord>> {
        Ok(self.listings.read().await.get(&listing_id).and_then(|state| {
            state
                .sales
                .iter()
                .find(|s| s.payment_ref == payment_ref)
                .cloned()
        }))
    }

    async fn mark_sale(
        &self,
        listing_id: Uuid,
        payment_ref: &str,
        status: SaleStatus,
        transfer_ref: Option<&str>,
    ) -> Result<()> {
        let mut listings = self.listings.write().await;
        if let Some(state) = listings.get_mut(&listing_id) {
            if let Some(sale) = state
                .sales
                .iter_mut()
                .find(|s| s.payment_ref == payment_ref)
            {
                sale.status = status;
                if let Some(reference) = transfer_ref {
                    sale.transfer_ref = Some(reference.to_string());
                }
                sale.updated_at = Utc::now();
            }
        }
        Ok(())
    }

    async fn sales_needing_fulfillment(
        &self,
        limit: i64,
        min_age_secs: i64,
    ) -> Result<Vec<PendingSale>> {
        let cutoff = Utc::now() - Duration::seconds(min_age_secs);
        let listings = self.listings.read().await;

        let mut pending: Vec<PendingSale> = listings
            .values()
            .flat_map(|state| {
                state
                    .sales
                    .iter()
                    .filter(|s| s.status != SaleStatus::Fulfilled && s.updated_at < cutoff)
                    .map(|s| PendingSale {
                        sale: s.clone(),
                        seller_address: state.listing.seller_address.clone(),
                    })
                    .collect::<Vec<_>>()
            })
            .collect();

        pending.sort_by(|a, b| a.sale.updated_at.cmp(&b.sale.updated_at));
        pending.truncate(limit as usize);

        Ok(pending)
    }
}

/// In-memory song ownership record.
pub struct MemorySongCatalog {
    owners: Arc<RwLock<HashMap<Uuid, Uuid>>>,
}

impl MemorySongCatalog {
    pub fn new() -> Self {
        Self {
            owners: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn add_song(&self, song_id: Uuid, owner_user_id: Uuid) {
        self.owners.write().await.insert(song_id, owner_user_id);
    }
}

impl Default for MemorySongCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SongCatalog for MemorySongCatalog {
    async fn owner_of(&self, song_id: Uuid) -> Result<Option<Uuid>> {
        Ok(self.owners.read().await.get(&song_id).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn new_listing(supply: i32) -> NewListing {
        NewListing {
            song_id: Uuid::new_v4(),
            title: "Midnight Run".to_string(),
            artist: "The Latecomers".to_string(),
            price: Decimal::new(5, 1),
            supply,
            seller_address: "seller-addr".to_string(),
            seller_user_id: Uuid::new_v4(),
            metadata_uri: None,
            inventory: (0..supply).map(|i| format!("token-{}", i)).collect(),
        }
    }

    #[tokio::test]
    async fn test_consumes_in_inventory_order() {
        let store = MemoryListingStore::new();
        let listing = store.create_listing(new_listing(3)).await.unwrap();

        for i in 0..3 {
            let outcome = store
                .consume_unit(listing.id, "buyer", &format!("ref-{}", i))
                .await
                .unwrap();
            match outcome {
                ConsumeOutcome::Consumed(unit) => {
                    assert_eq!(unit.token_id, format!("token-{}", i));
                    assert_eq!(unit.sold_count, i as i64 + 1);
                }
                other => panic!("expected consumption, got {:?}", other),
            }
        }
    }

    #[tokio::test]
    async fn test_deactivates_on_exhaustion_then_out_of_stock() {
        let store = MemoryListingStore::new();
        let listing = store.create_listing(new_listing(1)).await.unwrap();

        let outcome = store.consume_unit(listing.id, "buyer", "ref-0").await.unwrap();
        match outcome {
            ConsumeOutcome::Consumed(unit) => assert!(!unit.still_active),
            other => panic!("expected consumption, got {:?}", other),
        }

        let outcome = store.consume_unit(listing.id, "buyer", "ref-1").await.unwrap();
        assert_eq!(outcome, ConsumeOutcome::OutOfStock);
    }

    #[tokio::test]
    async fn test_duplicate_payment_ref_does_not_consume_twice() {
        let store = MemoryListingStore::new();
        let listing = store.create_listing(new_listing(2)).await.unwrap();

        let first = store.consume_unit(listing.id, "buyer", "ref-dup").await.unwrap();
        let second = store.consume_unit(listing.id, "buyer", "ref-dup").await.unwrap();

        let (first, second) = match (first, second) {
            (ConsumeOutcome::Consumed(a), ConsumeOutcome::Consumed(b)) => (a, b),
            other => panic!("expected two consumed outcomes, got {:?}", other),
        };

        assert!(!first.already_consumed);
        assert!(second.already_consumed);
        assert_eq!(first.token_id, second.token_id);
        assert_eq!(second.sold_count, 1);
    }

    #[tokio::test]
    async fn test_set_active_requires_seller() {
        let store = MemoryListingStore::new();
        let listing = store.create_listing(new_listing(2)).await.unwrap();

        let err = store
            .set_active(listing.id, Uuid::new_v4(), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MarketplaceError::Forbidden));

        let updated = store
            .set_active(listing.id, listing.seller_user_id, false)
            .await
            .unwrap();
        assert!(!updated.active);
    }
}

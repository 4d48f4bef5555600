pub mod memory;
pub mod postgres;

use crate::errors::Result;
use crate::models::{ActiveListings, Listing, SaleRecord, SaleStatus};
use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

/// Listing creation input, validated upstream by the service layer
#[derive(Debug, Clone)]
pub struct NewListing {
    pub song_id: Uuid,
    pub title: String,
    pub artist: String,
    pub price: Decimal,
    pub supply: i32,
    pub seller_address: String,
    pub seller_user_id: Uuid,
    pub metadata_uri: Option<String>,
    pub inventory: Vec<String>,
}

/// Result of the atomic consume-one-unit operation
#[derive(Debug, Clone, PartialEq)]
pub enum ConsumeOutcome {
    Consumed(ConsumedUnit),
    OutOfStock,
    NotFound,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsumedUnit {
    pub token_id: String,
    pub sold_count: i64,
    pub still_active: bool,
    /// True when this payment reference had already consumed a unit and the
    /// existing sale was returned instead of a second consumption.
    pub already_consumed: bool,
}

/// A sale awaiting fulfillment, joined with the listing context the
/// reconciler needs to re-drive the transfer.
#[derive(Debug, Clone)]
pub struct PendingSale {
    pub sale: SaleRecord,
    pub seller_address: String,
}

/// Authoritative relational record of listings, inventory, and sales.
///
/// `consume_unit` is the only cross-request synchronization point in the
/// system: it must be atomic with respect to concurrent buyers, must never
/// hand out the same token twice, and must never allow more than `supply`
/// consumptions.
#[async_trait]
pub trait ListingStore: Send + Sync {
    async fn create_listing(&self, new: NewListing) -> Result<Listing>;

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>>;

    /// Active listings newest-first with derived counters. Degrades to an
    /// empty result with a warning on schema absence or access denial.
    async fn list_active(&self) -> Result<ActiveListings>;

    /// Only the recorded seller may toggle; errors with Forbidden otherwise.
    async fn set_active(&self, id: Uuid, seller_user_id: Uuid, active: bool) -> Result<Listing>;

    /// Atomically pop the head of the inventory pool, record the sale under
    /// `payment_ref`, and deactivate the listing when the pool empties.
    /// First-in-first-assigned; buyers never select a specific unit.
    async fn consume_unit(
        &self,
        id: Uuid,
        buyer_address: &str,
        payment_ref: &str,
    ) -> Result<ConsumeOutcome>;

    async fn find_sale(&self, listing_id: Uuid, payment_ref: &str) -> Result<Option<SaleRecord>>;

    async fn mark_sale(
        &self,
        listing_id: Uuid,
        payment_ref: &str,
        status: SaleStatus,
        transfer_ref: Option<&str>,
    ) -> Result<()>;

    /// Sales stuck before `fulfilled`, oldest first, for the reconciler.
    async fn sales_needing_fulfillment(
        &self,
        limit: i64,
        min_age_secs: i64,
    ) -> Result<Vec<PendingSale>>;
}

/// External song ownership record, consumed at listing-creation time.
#[async_trait]
pub trait SongCatalog: Send + Sync {
    async fn owner_of(&self, song_id: Uuid) -> Result<Option<Uuid>>;
}

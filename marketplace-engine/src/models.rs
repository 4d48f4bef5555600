use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Fulfillment status of one consumed inventory unit
#[derive(Debug, Clone, Copy, Serialize, Deserialize, sqlx::Type, PartialEq, Eq)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    ConsumedPendingTransfer, // Unit consumed, token transfer not yet confirmed
    Fulfilled,               // Token delivered and confirmed on the ledger
    NeedsReconciliation,     // Transfer submission failed, reconciler owns it
}

impl SaleStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SaleStatus::ConsumedPendingTransfer => "consumed_pending_transfer",
            SaleStatus::Fulfilled => "fulfilled",
            SaleStatus::NeedsReconciliation => "needs_reconciliation",
        }
    }
}

/// A sellable, fixed-supply offer of a song-backed collectible
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Listing {
    pub id: Uuid,
    pub song_id: Uuid,
    pub title: String,
    pub artist: String,
    pub price: Decimal,                // Native currency units
    pub supply: i32,
    pub seller_address: String,        // Ledger address receiving payments
    pub seller_user_id: Uuid,
    pub metadata_uri: Option<String>,
    pub active: bool,
    pub inventory: Vec<String>,        // Ordered, un-consumed token ids
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Listing {
    pub fn sold_count(&self) -> i64 {
        self.supply as i64 - self.inventory.len() as i64
    }
}

/// One consumed inventory unit, keyed by payment reference for idempotency
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SaleRecord {
    pub id: Uuid,
    pub listing_id: Uuid,
    pub token_id: String,
    pub buyer_address: String,
    pub payment_ref: String,           // Ledger transaction reference that paid for this unit
    pub status: SaleStatus,
    pub transfer_ref: Option<String>,  // Our outbound token-transfer reference, once submitted
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Create listing request
#[derive(Debug, Deserialize, Serialize, validator::Validate)]
pub struct CreateListingRequest {
    pub song_id: Uuid,
    #[validate(length(min = 1))]
    pub title: String,
    #[validate(length(min = 1))]
    pub artist: String,
    pub price: Decimal,
    pub supply: i32,
    #[validate(length(min = 1))]
    pub seller_address: String,
    pub seller_user_id: Uuid,
    pub metadata_uri: Option<String>,
    pub inventory: Vec<String>,
}

/// Toggle listing active state
#[derive(Debug, Deserialize, Serialize)]
pub struct SetActiveRequest {
    pub seller_user_id: Uuid,
    pub active: bool,
}

/// Purchase request: one unit against a payment already submitted to the ledger
#[derive(Debug, Deserialize, Serialize)]
pub struct PurchaseRequest {
    pub transaction_ref: String,
    pub buyer_address: String,
}

/// Discriminated purchase outcome, serialized with a machine-readable status tag
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PurchaseOutcome {
    /// Payment not yet observable on the ledger; re-poll with the same reference
    PendingRetry { attempts: u32 },
    /// Payment observed but does not qualify; terminal
    Rejected { reason: String },
    /// Inventory exhausted or listing inactive; terminal
    OutOfStock,
    /// Unit consumed and token transfer confirmed
    Fulfilled {
        token_id: String,
        sold_count: i64,
        still_active: bool,
        transfer_ref: Option<String>,
    },
    /// Unit consumed but transfer unconfirmed; reconciler will resolve
    FulfillmentUncertain {
        token_id: String,
        sold_count: i64,
        still_active: bool,
        detail: String,
    },
}

/// Active-listing summary with derived sale counters
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ListingSummary {
    pub id: Uuid,
    pub song_id: Uuid,
    pub title: String,
    pub artist: String,
    pub price: Decimal,
    pub supply: i32,
    pub sold_count: i64,
    pub available: i64,
    pub seller_address: String,
    pub metadata_uri: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Active-listings response; `warning` set when the read path is degraded
#[derive(Debug, Serialize, Deserialize)]
pub struct ActiveListings {
    pub listings: Vec<ListingSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

use super::{ConsumeOutcome, ConsumedUnit, ListingStore, NewListing, PendingSale, SongCatalog};
use crate::errors::{MarketplaceError, Result};
use crate::models::{ActiveListings, Listing, ListingSummary, SaleRecord, SaleStatus};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Row;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Versioned schema-capabilities descriptor, probed once at startup instead
/// of per request. The listings read path degrades when capabilities are
/// absent; write paths fail normally.
#[derive(Debug, Clone, Copy)]
pub struct SchemaCapabilities {
    pub listings: bool,
    pub sales: bool,
}

pub struct PgListingStore {
    pool: PgPool,
    capabilities: SchemaCapabilities,
}

impl PgListingStore {
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await?;

        let capabilities = Self::probe_capabilities(&pool).await;
        info!(
            "Listing store connected (listings schema: {}, sales schema: {})",
            capabilities.listings, capabilities.sales
        );

        Ok(PgListingStore { pool, capabilities })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn capabilities(&self) -> SchemaCapabilities {
        self.capabilities
    }

    async fn probe_capabilities(pool: &PgPool) -> SchemaCapabilities {
        let probe = sqlx::query(
            r#"
            SELECT
                EXISTS (
                    SELECT 1 FROM information_schema.columns
                    WHERE table_name = 'listings' AND column_name = 'inventory'
                ) AS listings,
                EXISTS (
                    SELECT 1 FROM information_schema.tables
                    WHERE table_name = 'listing_sales'
                ) AS sales
            "#,
        )
        .fetch_one(pool)
        .await;

        match probe {
            Ok(row) => SchemaCapabilities {
                listings: row.get("listings"),
                sales: row.get("sales"),
            },
            Err(e) => {
                warn!("Schema capability probe failed, assuming no listing schema: {}", e);
                SchemaCapabilities {
                    listings: false,
                    sales: false,
                }
            }
        }
    }
}

#[async_trait]
impl ListingStore for PgListingStore {
    async fn create_listing(&self, new: NewListing) -> Result<Listing> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        let listing = sqlx::query_as::<_, Listing>(
            r#"
            INSERT INTO listings (
                id, song_id, title, artist, price, supply,
                seller_address, seller_user_id, metadata_uri,
                active, inventory, created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(new.song_id)
        .bind(&new.title)
        .bind(&new.artist)
        .bind(new.price)
        .bind(new.supply)
        .bind(&new.seller_address)
        .bind(new.seller_user_id)
        .bind(&new.metadata_uri)
        .bind(true)
        .bind(&new.inventory)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        Ok(listing)
    }

    async fn get_listing(&self, id: Uuid) -> Result<Option<Listing>> {
        let listing = sqlx::query_as::<_, Listing>(
            r#"
            SELECT * FROM listings WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(listing)
    }

    async fn list_active(&self) -> Result<ActiveListings> {
        if !self.capabilities.listings {
            return Ok(ActiveListings {
                listings: Vec::new(),
                warning: Some("listings schema not provisioned; returning empty result".to_string()),
            });
        }

        let result = sqlx::query_as::<_, ListingSummary>(
            r#"
            SELECT l.id, l.song_id, l.title, l.artist, l.price, l.supply,
                   l.supply::bigint - cardinality(l.inventory) AS sold_count,
                   cardinality(l.inventory)::bigint AS available,
                   l.seller_address, l.metadata_uri, l.created_at
            FROM listings l
            WHERE l.active = true
            ORDER BY l.created_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await;

        // Listings are a non-critical read path: access denial degrades to
        // an empty result instead of failing the caller.
        match result {
            Ok(listings) => Ok(ActiveListings {
                listings,
                warning: None,
            }),
            Err(e) => {
                warn!("Active listings query degraded to empty result: {}", e);
                Ok(ActiveListings {
                    listings: Vec::new(),
                    warning: Some(format!("listings unavailable: {}", e)),
                })
            }
        }
    }

    async fn set_active(&self, id: Uuid, seller_user_id: Uuid, active: bool) -> Result<Listing> {
        let listing = self
            .get_listing(id)
            .await?
            .ok_or(MarketplaceError::ListingNotFound(id))?;

        if listing.seller_user_id != seller_user_id {
            return Err(MarketplaceError::Forbidden);
        }

        let updated = sqlx::query_as::<_, Listing>(
            r#"
            UPDATE listings
            SET active = ($2 AND cardinality(inventory) > 0),
                updated_at = NOW()
            WHERE id = $1
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(active)
        .fetch_one(&self.pool)
        .await?;

        Ok(updated)
    }

    async fn consume_unit(
        &self,
        id: Uuid,
        buyer_address: &str,
        payment_ref: &str,
    ) -> Result<ConsumeOutcome> {
        // Single atomic statement: lock the row, pop the head of the pool,
        // deactivate on exhaustion, and record the sale. The unique index on
        // (listing_id, payment_ref) aborts the whole statement on a duplicate
        // reference, so a raced retry can never consume a second unit.
        let result = sqlx::query(
            r#"
            WITH target AS (
                SELECT id, inventory[1] AS token_id
                FROM listings
                WHERE id = $1 AND active = true AND cardinality(inventory) > 0
                FOR UPDATE
            ),
            popped AS (
                UPDATE listings l
                SET inventory = l.inventory[2:],
                    active = cardinality(l.inventory) > 1,
                    updated_at = NOW()
                FROM target t
                WHERE l.id = t.id
                RETURNING t.token_id,
                          l.active AS still_active,
                          l.supply::bigint - cardinality(l.inventory) AS sold_count
            ),
            sale AS (
                INSERT INTO listing_sales (
                    id, listing_id, token_id, buyer_address, payment_ref,
                    status, transfer_ref, created_at, updated_at
                )
                SELECT $4, $1, p.token_id, $2, $3,
                       'consumed_pending_transfer', NULL, NOW(), NOW()
                FROM popped p
                RETURNING id
            )
            SELECT p.token_id, p.still_active, p.sold_count FROM popped p
            "#,
        )
        .bind(id)
        .bind(buyer_address)
        .bind(payment_ref)
        .bind(Uuid::new_v4())
        .fetch_optional(&self.pool)
        .await;

        let row = match result {
            Ok(row) => row,
            Err(sqlx::Error::Database(db_err)) if db_err.code().as_deref() == Some("23505") => {
                // Duplicate payment reference: resolve to the existing sale
                let sale = self
                    .find_sale(id, payment_ref)
                    .await?
                    .ok_or_else(|| MarketplaceError::Internal(
                        "duplicate payment reference without a sale record".to_string(),
                    ))?;
                let listing = self
                    .get_listing(id)
                    .await?
                    .ok_or(MarketplaceError::ListingNotFound(id))?;

                return Ok(ConsumeOutcome::Consumed(ConsumedUnit {
                    token_id: sale.token_id,
                    sold_count: listing.sold_count(),
                    still_active: listing.active,
                    already_consumed: true,
                }));
            }
            Err(e) => return Err(e.into()),
        };

        match row {
            Some(row) => Ok(ConsumeOutcome::Consumed(ConsumedUnit {
                token_id: row.get("token_id"),
                sold_count: row.get("sold_count"),
                still_active: row.get("still_active"),
                already_consumed: false,
            })),
            None => {
                // Distinguish a missing listing from an exhausted one
                match self.get_listing(id).await? {
                    Some(_) => Ok(ConsumeOutcome::OutOfStock),
                    None => Ok(ConsumeOutcome::NotFound),
                }
            }
        }
    }

    async fn find_sale(&self, listing_id: Uuid, payment_ref: &str) -> Result<Option<SaleRecord>> {
        let sale = sqlx::query_as::<_, SaleRecord>(
            r#"
            SELECT * FROM listing_sales
            WHERE listing_id = $1 AND payment_ref = $2
            "#,
        )
        .bind(listing_id)
        .bind(payment_ref)
        .fetch_optional(&self.pool)
        .await?;

        Ok(sale)
    }

    async fn mark_sale(
        &self,
        listing_id: Uuid,
        payment_ref: &str,
        status: SaleStatus,
        transfer_ref: Option<&str>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE listing_sales
            SET status = $3,
                transfer_ref = COALESCE($4, transfer_ref),
                updated_at = NOW()
            WHERE listing_id = $1 AND payment_ref = $2
            "#,
        )
        .bind(listing_id)
        .bind(payment_ref)
        .bind(status.as_str())
        .bind(transfer_ref)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn sales_needing_fulfillment(
        &self,
        limit: i64,
        min_age_secs: i64,
    ) -> Result<Vec<PendingSale>> {
        let rows = sqlx::query(
            r#"
            SELECT s.id, s.listing_id, s.token_id, s.buyer_address, s.payment_ref,
                   s.status, s.transfer_ref, s.created_at, s.updated_at,
                   l.seller_address
            FROM listing_sales s
            JOIN listings l ON l.id = s.listing_id
            WHERE s.status IN ('consumed_pending_transfer', 'needs_reconciliation')
              AND s.updated_at < NOW() - make_interval(secs => $2::double precision)
            ORDER BY s.updated_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .bind(min_age_secs)
        .fetch_all(&self.pool)
        .await?;

        let pending = rows
            .into_iter()
            .map(|row| PendingSale {
                sale: SaleRecord {
                    id: row.get("id"),
                    listing_id: row.get("listing_id"),
                    token_id: row.get("token_id"),
                    buyer_address: row.get("buyer_address"),
                    payment_ref: row.get("payment_ref"),
                    status: row.get("status"),
                    transfer_ref: row.get("transfer_ref"),
                    created_at: row.get("created_at"),
                    updated_at: row.get("updated_at"),
                },
                seller_address: row.get("seller_address"),
            })
            .collect();

        Ok(pending)
    }
}

pub struct PgSongCatalog {
    pool: PgPool,
}

impl PgSongCatalog {
    pub fn new(pool: PgPool) -> Self {
        PgSongCatalog { pool }
    }
}

#[async_trait]
impl SongCatalog for PgSongCatalog {
    async fn owner_of(&self, song_id: Uuid) -> Result<Option<Uuid>> {
        let owner = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT owner_user_id FROM songs WHERE id = $1
            "#,
        )
        .bind(song_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(owner)
    }
}

use crate::errors::MarketplaceError;
use crate::metrics;
use crate::models::{CreateListingRequest, PurchaseOutcome, PurchaseRequest, SetActiveRequest};
use crate::services::MarketplaceService;
use actix_web::{web, HttpResponse};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "marketplace-engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Create a listing (seller-facing)
pub async fn create_listing(
    service: web::Data<Arc<MarketplaceService>>,
    request: web::Json<CreateListingRequest>,
) -> Result<HttpResponse, MarketplaceError> {
    let listing = service.create_listing(request.into_inner()).await?;
    Ok(HttpResponse::Created().json(listing))
}

/// Active listings, newest first (browsing)
pub async fn list_listings(
    service: web::Data<Arc<MarketplaceService>>,
) -> Result<HttpResponse, MarketplaceError> {
    let listings = service.list_listings().await?;
    Ok(HttpResponse::Ok().json(listings))
}

/// Toggle a listing's active flag (seller-facing)
pub async fn set_listing_active(
    service: web::Data<Arc<MarketplaceService>>,
    listing_id: web::Path<Uuid>,
    request: web::Json<SetActiveRequest>,
) -> Result<HttpResponse, MarketplaceError> {
    let listing = service
        .set_listing_active(*listing_id, request.seller_user_id, request.active)
        .await?;
    Ok(HttpResponse::Ok().json(listing))
}

/// Purchase one unit against a payment already on the ledger. A
/// pending-retry outcome is 202 so clients re-poll with the same reference
/// instead of resubmitting payment; every other outcome is a 200 with a
/// discriminating status tag.
pub async fn purchase(
    service: web::Data<Arc<MarketplaceService>>,
    listing_id: web::Path<Uuid>,
    request: web::Json<PurchaseRequest>,
) -> Result<HttpResponse, MarketplaceError> {
    let outcome = service.purchase(*listing_id, request.into_inner()).await?;

    let response = if matches!(outcome, PurchaseOutcome::PendingRetry { .. }) {
        HttpResponse::Accepted().json(outcome)
    } else {
        HttpResponse::Ok().json(outcome)
    };

    Ok(response)
}

/// Configure routes
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1/listings")
            .route("/health", web::get().to(health_check))
            .route("", web::post().to(create_listing))
            .route("", web::get().to(list_listings))
            .route("/{id}/active", web::patch().to(set_listing_active))
            .route("/{id}/purchase", web::post().to(purchase)),
    )
    .route("/metrics", web::get().to(metrics::metrics_handler));
}

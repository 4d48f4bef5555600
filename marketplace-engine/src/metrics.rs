use actix_web::HttpResponse;
use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    pub static ref LISTINGS_CREATED: IntCounter = register_int_counter!(
        "marketplace_listings_created_total",
        "Listings created"
    )
    .unwrap();

    pub static ref PURCHASES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "marketplace_purchases_total",
        "Purchase requests by outcome",
        &["outcome"]
    )
    .unwrap();

    pub static ref SALES_RECONCILED: IntCounter = register_int_counter!(
        "marketplace_sales_reconciled_total",
        "Sales promoted to fulfilled by the reconciler"
    )
    .unwrap();
}

pub async fn metrics_handler() -> HttpResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        return HttpResponse::InternalServerError().body(format!("metrics encoding failed: {}", e));
    }

    HttpResponse::Ok()
        .content_type(encoder.format_type())
        .body(buffer)
}

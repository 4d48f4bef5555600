use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpServer};
use dotenv::dotenv;
use marketplace_engine::{
    config::Config,
    delegate::DelegateCredential,
    fulfillment::FulfillmentExecutor,
    handlers,
    ledger::rpc::RpcLedgerClient,
    ledger::LedgerClient,
    reconciler::Reconciler,
    services::MarketplaceService,
    store::postgres::{PgListingStore, PgSongCatalog},
    store::{ListingStore, SongCatalog},
    verifier::PaymentVerifier,
};
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize tracing
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .with_file(true)
        .with_line_number(true)
        .with_target(false)
        .init();

    info!("Starting Marketplace Engine...");

    // Load configuration
    let config = Config::from_env().expect("Failed to load configuration");
    config.validate().expect("Invalid configuration");

    info!("Configuration loaded successfully");

    // Delegate credential: loaded once, immutable, shared across fulfillments
    let delegate = Arc::new(
        DelegateCredential::from_hex_seed(&config.delegate.secret_seed)
            .expect("Invalid delegate credential"),
    );

    info!("Delegate credential loaded (address {})", delegate.address());

    // Initialize listing store
    let store = Arc::new(
        PgListingStore::connect(&config.database.url, config.database.max_connections)
            .await
            .expect("Failed to connect to database"),
    );

    info!("Database connected successfully");

    let songs: Arc<dyn SongCatalog> = Arc::new(PgSongCatalog::new(store.pool().clone()));

    // Ledger client adapter
    let ledger: Arc<dyn LedgerClient> = Arc::new(
        RpcLedgerClient::new(
            config.ledger.rpc_url.clone(),
            config.ledger.request_timeout_secs,
        )
        .expect("Failed to build ledger RPC client"),
    );

    info!("Ledger RPC client initialized ({})", config.ledger.rpc_url);

    let verifier = PaymentVerifier::new(ledger.clone(), &config.verifier);
    let executor = Arc::new(FulfillmentExecutor::new(
        ledger.clone(),
        delegate,
        config.fulfillment.clone(),
    ));

    let listing_store: Arc<dyn ListingStore> = store.clone();

    // Background reconciliation of consumed-but-unconfirmed sales
    if config.reconciler.enabled {
        let reconciler = Reconciler::new(
            listing_store.clone(),
            executor.clone(),
            config.reconciler.clone(),
        );
        reconciler.spawn();
        info!(
            "Reconciler started (every {}s)",
            config.reconciler.interval_secs
        );
    }

    // Initialize service
    let service = Arc::new(MarketplaceService::new(
        listing_store,
        songs,
        verifier,
        executor,
        config.ledger.units_per_native,
    ));

    info!("Marketplace service initialized successfully");

    // Start HTTP server
    let server_config = config.server.clone();
    let service_data = web::Data::new(service);

    info!(
        "Starting HTTP server on {}:{}",
        server_config.host, server_config.port
    );

    HttpServer::new(move || {
        App::new()
            .app_data(service_data.clone())
            .wrap(
                Cors::default()
                    .allow_any_origin()
                    .allow_any_method()
                    .allow_any_header()
                    .max_age(3600),
            )
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(handlers::configure_routes)
    })
    .workers(server_config.workers)
    .bind((server_config.host, server_config.port))?
    .run()
    .await
}

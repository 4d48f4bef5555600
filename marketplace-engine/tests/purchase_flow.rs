//! End-to-end purchase flow against the in-memory store and mock ledger.

use marketplace_engine::config::{FulfillmentConfig, VerifierConfig};
use marketplace_engine::delegate::DelegateCredential;
use marketplace_engine::errors::MarketplaceError;
use marketplace_engine::fulfillment::FulfillmentExecutor;
use marketplace_engine::ledger::mock::MockLedgerClient;
use marketplace_engine::ledger::{TransactionRecord, TransferInstruction};
use marketplace_engine::models::{
    CreateListingRequest, Listing, PurchaseOutcome, PurchaseRequest,
};
use marketplace_engine::reconciler::Reconciler;
use marketplace_engine::services::MarketplaceService;
use marketplace_engine::store::memory::{MemoryListingStore, MemorySongCatalog};
use marketplace_engine::store::ListingStore;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use uuid::Uuid;

const SEED: &str = "c5aa8df43f9f837bedb7442f31dcb7b166d38535076f094b85ce3a2e0b4458f7";
const UNITS_PER_NATIVE: u64 = 1_000_000_000;
const SELLER_ADDRESS: &str = "seller-payment-addr";

struct Harness {
    service: Arc<MarketplaceService>,
    ledger: Arc<MockLedgerClient>,
    store: Arc<MemoryListingStore>,
    songs: Arc<MemorySongCatalog>,
    executor: Arc<FulfillmentExecutor>,
}

fn harness() -> Harness {
    let ledger = Arc::new(MockLedgerClient::new());
    let store = Arc::new(MemoryListingStore::new());
    let songs = Arc::new(MemorySongCatalog::new());
    let delegate = Arc::new(DelegateCredential::from_hex_seed(SEED).unwrap());

    let verifier = marketplace_engine::verifier::PaymentVerifier::new(
        ledger.clone(),
        &VerifierConfig {
            max_attempts: 3,
            retry_delay_ms: 0,
        },
    );

    let executor = Arc::new(FulfillmentExecutor::new(
        ledger.clone(),
        delegate,
        FulfillmentConfig {
            confirm_timeout_secs: 0,
            confirm_poll_ms: 0,
            fee_reserve: 0,
            airdrop_enabled: false,
            airdrop_amount: 0,
            airdrop_poll_timeout_secs: 0,
        },
    ));

    let service = Arc::new(MarketplaceService::new(
        store.clone(),
        songs.clone(),
        verifier,
        executor.clone(),
        UNITS_PER_NATIVE,
    ));

    Harness {
        service,
        ledger,
        store,
        songs,
        executor,
    }
}

async fn seeded_listing(h: &Harness, price: Decimal, supply: i32) -> Listing {
    let song_id = Uuid::new_v4();
    let seller_user_id = Uuid::new_v4();
    h.songs.add_song(song_id, seller_user_id).await;

    h.service
        .create_listing(CreateListingRequest {
            song_id,
            title: "Harbour Lights".to_string(),
            artist: "Glass Metronome".to_string(),
            price,
            supply,
            seller_address: SELLER_ADDRESS.to_string(),
            seller_user_id,
            metadata_uri: Some("ipfs://metadata".to_string()),
            inventory: (0..supply).map(|i| format!("token-{}", i)).collect(),
        })
        .await
        .unwrap()
}

async fn seed_payment(h: &Harness, reference: &str, buyer: &str, amount_native: Decimal) {
    let amount = (amount_native * Decimal::from(UNITS_PER_NATIVE))
        .to_u64()
        .unwrap();
    h.ledger
        .insert_transaction(TransactionRecord {
            reference: reference.to_string(),
            instructions: vec![TransferInstruction {
                source: buyer.to_string(),
                destination: SELLER_ADDRESS.to_string(),
                amount,
            }],
        })
        .await;
}

fn purchase_request(reference: &str, buyer: &str) -> PurchaseRequest {
    PurchaseRequest {
        transaction_ref: reference.to_string(),
        buyer_address: buyer.to_string(),
    }
}

#[tokio::test]
async fn test_scenario_a_valid_payment_fulfills_and_sells_out() {
    let h = harness();
    let listing = seeded_listing(&h, dec!(0.5), 1).await;
    seed_payment(&h, "pay-a", "buyer-1", dec!(0.5)).await;

    let outcome = h
        .service
        .purchase(listing.id, purchase_request("pay-a", "buyer-1"))
        .await
        .unwrap();

    match outcome {
        PurchaseOutcome::Fulfilled {
            token_id,
            sold_count,
            still_active,
            transfer_ref,
        } => {
            assert_eq!(token_id, "token-0");
            assert_eq!(sold_count, 1);
            assert!(!still_active);
            assert!(transfer_ref.is_some());
        }
        other => panic!("expected Fulfilled, got {:?}", other),
    }

    // The sold-out listing leaves the browse view
    let active = h.service.list_listings().await.unwrap();
    assert!(active.listings.is_empty());
}

#[tokio::test]
async fn test_scenario_b_second_purchase_is_out_of_stock() {
    let h = harness();
    let listing = seeded_listing(&h, dec!(0.5), 1).await;
    seed_payment(&h, "pay-a", "buyer-1", dec!(0.5)).await;
    seed_payment(&h, "pay-b", "buyer-2", dec!(0.5)).await;

    let first = h
        .service
        .purchase(listing.id, purchase_request("pay-a", "buyer-1"))
        .await
        .unwrap();
    assert!(matches!(first, PurchaseOutcome::Fulfilled { .. }));

    let second = h
        .service
        .purchase(listing.id, purchase_request("pay-b", "buyer-2"))
        .await
        .unwrap();
    assert_eq!(second, PurchaseOutcome::OutOfStock);
}

#[tokio::test]
async fn test_scenario_c_underpayment_is_rejected() {
    let h = harness();
    let listing = seeded_listing(&h, dec!(0.5), 1).await;
    seed_payment(&h, "pay-short", "buyer-1", dec!(0.4)).await;

    let outcome = h
        .service
        .purchase(listing.id, purchase_request("pay-short", "buyer-1"))
        .await
        .unwrap();

    assert!(matches!(outcome, PurchaseOutcome::Rejected { .. }));

    // Nothing was consumed
    let listing = h.store.get_listing(listing.id).await.unwrap().unwrap();
    assert_eq!(listing.sold_count(), 0);
    assert!(listing.active);
}

#[tokio::test]
async fn test_unobservable_payment_is_pending_retry() {
    let h = harness();
    let listing = seeded_listing(&h, dec!(0.5), 1).await;

    let outcome = h
        .service
        .purchase(listing.id, purchase_request("never-lands", "buyer-1"))
        .await
        .unwrap();

    assert_eq!(outcome, PurchaseOutcome::PendingRetry { attempts: 3 });
    // Exactly the attempt budget, no more lookups
    assert_eq!(h.ledger.lookup_count("never-lands").await, 3);
    // No unit was consumed for a pending payment
    let listing = h.store.get_listing(listing.id).await.unwrap().unwrap();
    assert_eq!(listing.sold_count(), 0);
}

#[tokio::test]
async fn test_race_only_supply_many_purchases_succeed() {
    let h = harness();
    let supply = 3;
    let buyers = 8;
    let listing = seeded_listing(&h, dec!(0.5), supply).await;

    for i in 0..buyers {
        seed_payment(&h, &format!("pay-race-{}", i), &format!("buyer-{}", i), dec!(0.5)).await;
    }

    let mut handles = Vec::new();
    for i in 0..buyers {
        let service = h.service.clone();
        let listing_id = listing.id;
        handles.push(tokio::spawn(async move {
            service
                .purchase(
                    listing_id,
                    purchase_request(&format!("pay-race-{}", i), &format!("buyer-{}", i)),
                )
                .await
                .unwrap()
        }));
    }

    let mut fulfilled_tokens = Vec::new();
    let mut out_of_stock = 0;
    for handle in handles {
        match handle.await.unwrap() {
            PurchaseOutcome::Fulfilled { token_id, .. } => fulfilled_tokens.push(token_id),
            PurchaseOutcome::OutOfStock => out_of_stock += 1,
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    assert_eq!(fulfilled_tokens.len(), supply as usize);
    assert_eq!(out_of_stock, buyers - supply as usize);

    // No token was ever issued twice
    fulfilled_tokens.sort();
    fulfilled_tokens.dedup();
    assert_eq!(fulfilled_tokens.len(), supply as usize);
}

#[tokio::test]
async fn test_replayed_payment_ref_does_not_consume_twice() {
    let h = harness();
    let listing = seeded_listing(&h, dec!(0.5), 2).await;
    seed_payment(&h, "pay-once", "buyer-1", dec!(0.5)).await;

    let first = h
        .service
        .purchase(listing.id, purchase_request("pay-once", "buyer-1"))
        .await
        .unwrap();
    let second = h
        .service
        .purchase(listing.id, purchase_request("pay-once", "buyer-1"))
        .await
        .unwrap();

    let (first_token, second_token) = match (&first, &second) {
        (
            PurchaseOutcome::Fulfilled { token_id: a, .. },
            PurchaseOutcome::Fulfilled {
                token_id: b,
                sold_count,
                ..
            },
        ) => {
            assert_eq!(*sold_count, 1);
            (a.clone(), b.clone())
        }
        other => panic!("expected two fulfilled outcomes, got {:?}", other),
    };
    assert_eq!(first_token, second_token);

    let listing = h.store.get_listing(listing.id).await.unwrap().unwrap();
    assert_eq!(listing.sold_count(), 1);
}

#[tokio::test]
async fn test_missing_fields_are_client_errors() {
    let h = harness();
    let listing = seeded_listing(&h, dec!(0.5), 1).await;

    let err = h
        .service
        .purchase(listing.id, purchase_request("", "buyer-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation(_)));

    let err = h
        .service
        .purchase(listing.id, purchase_request("pay-a", "  "))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketplaceError::Validation(_)));

    // No lookups were spent on malformed requests
    assert_eq!(h.ledger.lookup_count("pay-a").await, 0);
}

#[tokio::test]
async fn test_purchase_of_unknown_listing_is_not_found() {
    let h = harness();
    seed_payment(&h, "pay-a", "buyer-1", dec!(0.5)).await;

    let err = h
        .service
        .purchase(Uuid::new_v4(), purchase_request("pay-a", "buyer-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, MarketplaceError::ListingNotFound(_)));
}

#[tokio::test]
async fn test_listing_foreign_song_is_forbidden() {
    let h = harness();
    let song_id = Uuid::new_v4();
    h.songs.add_song(song_id, Uuid::new_v4()).await;

    let err = h
        .service
        .create_listing(CreateListingRequest {
            song_id,
            title: "Not Mine".to_string(),
            artist: "Impostor".to_string(),
            price: dec!(1),
            supply: 1,
            seller_address: SELLER_ADDRESS.to_string(),
            seller_user_id: Uuid::new_v4(),
            metadata_uri: None,
            inventory: vec!["token-0".to_string()],
        })
        .await
        .unwrap_err();

    assert!(matches!(err, MarketplaceError::Forbidden));

    // No listing row was created
    let active = h.service.list_listings().await.unwrap();
    assert!(active.listings.is_empty());
}

#[tokio::test]
async fn test_unconfirmed_transfer_is_uncertain_then_reconciled() {
    let h = harness();
    let listing = seeded_listing(&h, dec!(0.5), 1).await;
    seed_payment(&h, "pay-a", "buyer-1", dec!(0.5)).await;

    // Confirmation never arrives within the inline window
    h.ledger.set_confirm_result(false);

    let outcome = h
        .service
        .purchase(listing.id, purchase_request("pay-a", "buyer-1"))
        .await
        .unwrap();
    assert!(matches!(outcome, PurchaseOutcome::FulfillmentUncertain { .. }));

    // Inventory was consumed and stays consumed
    let after = h.store.get_listing(listing.id).await.unwrap().unwrap();
    assert_eq!(after.sold_count(), 1);

    // The transaction lands later; the reconciler promotes the sale
    h.ledger.set_confirm_result(true);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let reconciler = Reconciler::new(
        h.store.clone(),
        h.executor.clone(),
        marketplace_engine::config::ReconcilerConfig {
            enabled: true,
            interval_secs: 60,
            batch_size: 10,
            min_age_secs: 0,
        },
    );
    let resolved = reconciler.sweep_once().await.unwrap();
    assert_eq!(resolved, 1);

    // A replay of the same reference now reports fulfilled
    let replay = h
        .service
        .purchase(listing.id, purchase_request("pay-a", "buyer-1"))
        .await
        .unwrap();
    assert!(matches!(replay, PurchaseOutcome::Fulfilled { .. }));
}

#[tokio::test]
async fn test_failed_submission_marks_needs_reconciliation() {
    let h = harness();
    let listing = seeded_listing(&h, dec!(0.5), 1).await;
    seed_payment(&h, "pay-a", "buyer-1", dec!(0.5)).await;

    h.ledger.set_fail_submissions(true);

    let outcome = h
        .service
        .purchase(listing.id, purchase_request("pay-a", "buyer-1"))
        .await
        .unwrap();
    assert!(matches!(outcome, PurchaseOutcome::FulfillmentUncertain { .. }));

    // The network recovers; the reconciler re-submits from the sale record
    h.ledger.set_fail_submissions(false);
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let reconciler = Reconciler::new(
        h.store.clone(),
        h.executor.clone(),
        marketplace_engine::config::ReconcilerConfig {
            enabled: true,
            interval_secs: 60,
            batch_size: 10,
            min_age_secs: 0,
        },
    );
    assert_eq!(reconciler.sweep_once().await.unwrap(), 1);

    let sale = h.store.find_sale(listing.id, "pay-a").await.unwrap().unwrap();
    assert_eq!(sale.status, marketplace_engine::models::SaleStatus::Fulfilled);
    assert!(sale.transfer_ref.is_some());
}

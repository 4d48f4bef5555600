//! Property-based tests for inventory ledger invariants
//!
//! These tests use proptest to verify critical invariants:
//! - Supply bound: consumed count never exceeds total supply
//! - No double-issue: a token id is never handed out twice
//! - Exhaustion: a listing deactivates exactly when its pool empties

use marketplace_engine::store::memory::MemoryListingStore;
use marketplace_engine::store::{ConsumeOutcome, ListingStore, NewListing};
use proptest::prelude::*;
use rust_decimal::Decimal;
use uuid::Uuid;

fn new_listing(supply: usize) -> NewListing {
    NewListing {
        song_id: Uuid::new_v4(),
        title: "Property".to_string(),
        artist: "Checker".to_string(),
        price: Decimal::new(5, 1),
        supply: supply as i32,
        seller_address: "seller".to_string(),
        seller_user_id: Uuid::new_v4(),
        metadata_uri: None,
        inventory: (0..supply).map(|i| format!("token-{}", i)).collect(),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn consumption_respects_supply_and_never_double_issues(
        supply in 1usize..12,
        extra in 0usize..8,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let store = MemoryListingStore::new();
            let listing = store.create_listing(new_listing(supply)).await.unwrap();

            let mut issued = Vec::new();
            let mut out_of_stock = 0usize;

            for i in 0..supply + extra {
                match store
                    .consume_unit(listing.id, "buyer", &format!("ref-{}", i))
                    .await
                    .unwrap()
                {
                    ConsumeOutcome::Consumed(unit) => {
                        prop_assert!(!unit.already_consumed);
                        prop_assert!(unit.sold_count as usize <= supply);
                        issued.push(unit.token_id);
                    }
                    ConsumeOutcome::OutOfStock => out_of_stock += 1,
                    ConsumeOutcome::NotFound => prop_assert!(false, "listing vanished"),
                }
            }

            // Exactly supply consumptions succeed, everything else rejects
            prop_assert_eq!(issued.len(), supply);
            prop_assert_eq!(out_of_stock, extra);

            // No duplicates among issued token ids
            let mut deduped = issued.clone();
            deduped.sort();
            deduped.dedup();
            prop_assert_eq!(deduped.len(), issued.len());

            // Deactivated exactly on exhaustion, counts reconcile
            let final_listing = store.get_listing(listing.id).await.unwrap().unwrap();
            prop_assert!(!final_listing.active);
            prop_assert_eq!(final_listing.sold_count() as usize, supply);
            prop_assert_eq!(final_listing.inventory.len(), 0);

            Ok(())
        })?;
    }

    #[test]
    fn partial_consumption_preserves_supply_identity(
        supply in 2usize..12,
        take_ratio in 0.0f64..1.0,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        rt.block_on(async {
            let store = MemoryListingStore::new();
            let listing = store.create_listing(new_listing(supply)).await.unwrap();
            let take = ((supply as f64) * take_ratio) as usize;

            for i in 0..take {
                let outcome = store
                    .consume_unit(listing.id, "buyer", &format!("ref-{}", i))
                    .await
                    .unwrap();
                prop_assert!(matches!(outcome, ConsumeOutcome::Consumed(_)));
            }

            // |consumed| + |inventory remaining| == total supply
            let current = store.get_listing(listing.id).await.unwrap().unwrap();
            prop_assert_eq!(
                current.sold_count() as usize + current.inventory.len(),
                supply
            );
            prop_assert_eq!(current.active, take < supply);

            Ok(())
        })?;
    }
}

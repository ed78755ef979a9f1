//! End-to-end runs against the mock marketplace.

use std::sync::Arc;

use rust_decimal_macros::dec;

use autovest::config::SubmissionConfig;
use autovest::engine::runner::{RunCoordinator, RunVariant};
use autovest::types::InvestError;

use crate::mock_gateway::{make_listing, make_offer, MockGateway, RecordingSink};

fn submission() -> SubmissionConfig {
    SubmissionConfig {
        batch_size: 100,
        batch_delay_secs: 0,
        run_deadline_secs: None,
    }
}

fn write_run_config(json: &str) -> String {
    let mut path = std::env::temp_dir();
    path.push(format!("autovest_scenario_{}.json", uuid::Uuid::new_v4()));
    std::fs::write(&path, json).unwrap();
    path.to_string_lossy().to_string()
}

#[tokio::test]
async fn test_secondary_cycle_buys_and_lists() {
    // One undervalued listing on the market (target 8, asking 1 → gain 7)
    // and one held part that is not listed yet.
    let gateway = Arc::new(
        MockGateway::new()
            .with_market_listings(vec![make_listing("m1", "alice", dec!(120), dec!(1))])
            .with_holdings(vec![make_offer("p1", "carol", dec!(40))]),
    );
    let sink = Arc::new(RecordingSink::new());

    let path = write_run_config("{}");
    let coordinator = RunCoordinator::new(gateway.clone(), sink.clone(), submission());
    let report = coordinator
        .execute(RunVariant::Secondary, &path)
        .await
        .unwrap();

    assert_eq!(
        *gateway.submitted_buys.lock().unwrap(),
        vec!["listing-m1".to_string()]
    );

    let sells = gateway.submitted_sells.lock().unwrap().clone();
    assert_eq!(sells.len(), 1);
    assert_eq!(sells[0].loan_part_id, "p1");
    assert_eq!(sells[0].rate, 6); // max(1, floor(40/10)) + 2

    assert_eq!(report.actions_submitted, 2);
    assert_eq!(
        sink.subjects(),
        vec![
            "Buying from secondary".to_string(),
            "Selling from secondary".to_string(),
        ]
    );

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn test_primary_caps_respected_end_to_end() {
    let mut nearly_full = make_offer("a1", "alice", dec!(120));
    nearly_full.amount_invested = dec!(45); // headroom 5
    let mut full = make_offer("a2", "bob", dec!(120));
    full.amount_invested = dec!(50); // no headroom
    let fresh = make_offer("a3", "dan", dec!(120)); // headroom 50, capped by max_bid

    let gateway = Arc::new(MockGateway::new().with_auctions(vec![nearly_full, full, fresh]));
    let sink = Arc::new(RecordingSink::new());

    let path = write_run_config("{}");
    let coordinator = RunCoordinator::new(gateway.clone(), sink.clone(), submission());
    let report = coordinator
        .execute(RunVariant::Primary, &path)
        .await
        .unwrap();

    let bids = gateway.submitted_bids.lock().unwrap().clone();
    assert_eq!(bids.len(), 2);
    for bid in &bids {
        match bid.auction_id.as_str() {
            "a1" => assert_eq!(bid.amount, dec!(5)),
            "a3" => assert_eq!(bid.amount, dec!(20)),
            other => panic!("unexpected bid on {other}"),
        }
    }
    assert_eq!(report.candidates_rejected, 1);

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn test_liquidation_is_idempotent_across_runs() {
    // p1 listed at the wrong rate, p2 not listed at all.
    let p1 = make_offer("p1", "alice", dec!(120)); // target 8
    let p2 = make_offer("p2", "bob", dec!(40)); // target 6
    let mislisted = make_listing("p1", "alice", dec!(120), dec!(2));

    let gateway = Arc::new(
        MockGateway::new()
            .with_holdings(vec![p1, p2])
            .with_my_listings(vec![mislisted]),
    );
    let sink = Arc::new(RecordingSink::new());

    let path = write_run_config(r#"{"total_discount": 1.0}"#);
    let coordinator = RunCoordinator::new(gateway.clone(), sink.clone(), submission());

    // First run reshapes the listings: cancel the stale one, list both
    // parts at their policy rates.
    coordinator
        .execute(RunVariant::Liquidation, &path)
        .await
        .unwrap();

    assert_eq!(
        *gateway.submitted_cancels.lock().unwrap(),
        vec!["listing-p1".to_string()]
    );
    let sells_after_first = gateway.total_sells_submitted();
    assert_eq!(sells_after_first, 2);

    let mut rates = gateway.my_listing_rates();
    rates.sort();
    assert_eq!(
        rates,
        vec![
            ("p1".to_string(), dec!(8)),
            ("p2".to_string(), dec!(6)),
        ]
    );

    // Second run against the reshaped marketplace must do nothing.
    let report = coordinator
        .execute(RunVariant::Liquidation, &path)
        .await
        .unwrap();

    assert_eq!(gateway.total_sells_submitted(), sells_after_first);
    assert_eq!(gateway.submitted_cancels.lock().unwrap().len(), 1);
    assert_eq!(report.actions_submitted, 0);

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_fetch_error_fails_the_run_after_retries() {
    let gateway = Arc::new(MockGateway::new());
    gateway.set_error("marketplace down");
    let sink = Arc::new(RecordingSink::new());

    let path = write_run_config("{}");
    let coordinator = RunCoordinator::new(gateway.clone(), sink.clone(), submission());
    let err = coordinator
        .execute(RunVariant::Primary, &path)
        .await
        .unwrap_err();

    match err {
        InvestError::Fetch { endpoint, message } => {
            assert_eq!(endpoint, "primary auctions");
            assert_eq!(message, "marketplace down");
        }
        other => panic!("expected fetch error, got {other}"),
    }
    assert!(sink.subjects().is_empty());

    // A recovered gateway lets the next run through.
    gateway.clear_error();
    assert!(coordinator
        .execute(RunVariant::Primary, &path)
        .await
        .is_ok());

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn test_empty_marketplace_is_quiet_on_all_variants() {
    let gateway = Arc::new(MockGateway::new());
    let sink = Arc::new(RecordingSink::new());

    let path = write_run_config("{}");
    let coordinator = RunCoordinator::new(gateway.clone(), sink.clone(), submission());

    for variant in [
        RunVariant::Primary,
        RunVariant::Secondary,
        RunVariant::Liquidation,
    ] {
        let report = coordinator.execute(variant, &path).await.unwrap();
        assert_eq!(report.actions_submitted, 0);
        assert!(report.failed_batches.is_empty());
    }

    assert!(gateway.submitted_bids.lock().unwrap().is_empty());
    assert!(gateway.submitted_buys.lock().unwrap().is_empty());
    assert!(gateway.submitted_sells.lock().unwrap().is_empty());
    assert!(sink.subjects().is_empty());

    std::fs::remove_file(&path).unwrap();
}

#[tokio::test]
async fn test_buy_rejected_when_mid_schedule() {
    let mut listing = make_listing("m1", "alice", dec!(120), dec!(1));
    listing.offer.next_payment_nr = 3;

    let gateway = Arc::new(MockGateway::new().with_market_listings(vec![listing]));
    let sink = Arc::new(RecordingSink::new());

    let path = write_run_config("{}");
    let coordinator = RunCoordinator::new(gateway.clone(), sink.clone(), submission());
    let report = coordinator
        .execute(RunVariant::Secondary, &path)
        .await
        .unwrap();

    assert!(gateway.submitted_buys.lock().unwrap().is_empty());
    assert_eq!(report.candidates_rejected, 1);

    std::fs::remove_file(&path).unwrap();
}

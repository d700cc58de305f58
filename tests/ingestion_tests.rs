mod common;

use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

use spot_survival::models::price::{PricePoint, SeriesKey};
use spot_survival::services::ingestion::{
    FetchState, IngestionConfig, IngestionError, IngestionScheduler,
};
use spot_survival::services::memory_store::InMemoryPriceHistoryStore;
use spot_survival::services::price_store::PriceHistoryStore;
use spot_survival::services::retry::RetryPolicy;

use crate::common::{at, page, FlakyStore, ScriptedSource};

const REGION: &str = "us-west-2";
const ZONE: &str = "us-west-2a";

fn config(instance_types: &[&str], max_rounds: u32) -> IngestionConfig {
    IngestionConfig {
        instance_types: instance_types.iter().map(|s| s.to_string()).collect(),
        product_descriptions: vec![],
        worker_pool_size: 2,
        zone_retry: RetryPolicy::new(max_rounds, Duration::from_millis(1)),
        task_timeout: Duration::from_secs(5),
        max_pages_per_task: 10,
        zone_pause: Duration::ZERO,
    }
}

fn key(instance_type: &str) -> SeriesKey {
    SeriesKey::new(REGION, ZONE, instance_type)
}

/// A succeeds, B fails once: both end up completed and B ran twice
#[tokio::test]
async fn test_failed_instance_type_is_retried_until_complete() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_pages("A", vec![page(&[(0, dec!(0.1)), (60, dec!(0.2))])])
            .with_pages("B", vec![page(&[(0, dec!(0.3))])])
            .failing("B", 1),
    );
    let store = Arc::new(InMemoryPriceHistoryStore::new());
    let scheduler = IngestionScheduler::new(source.clone(), store.clone(), config(&["A", "B"], 5));

    let report = scheduler.run_zone(REGION, ZONE).await.unwrap();

    assert!(report.is_complete());
    assert_eq!(report.state("A"), Some(FetchState::Completed));
    assert_eq!(report.state("B"), Some(FetchState::Completed));
    assert_eq!(report.attempts("A"), 1);
    assert!(report.attempts("B") > 1);
    assert_eq!(report.rounds, 2);
    assert_eq!(source.attempts("A"), 1);
    assert_eq!(source.attempts("B"), 2);
    assert_eq!(store.price_count(), 3);
}

#[tokio::test]
async fn test_pages_are_stored_oldest_first() {
    // Newest page first, each page newest first
    let source = Arc::new(ScriptedSource::new().with_pages(
        "m4.large",
        vec![
            page(&[(300, dec!(0.5)), (240, dec!(0.4))]),
            page(&[(180, dec!(0.3)), (120, dec!(0.2))]),
            page(&[(60, dec!(0.1))]),
        ],
    ));
    let store = Arc::new(InMemoryPriceHistoryStore::new());
    let scheduler = IngestionScheduler::new(source.clone(), store.clone(), config(&["m4.large"], 1));

    let report = scheduler.run_zone(REGION, ZONE).await.unwrap();
    assert_eq!(report.inserted(), 5);

    let tokens: Vec<Option<String>> = source.requests().into_iter().map(|r| r.next_token).collect();
    assert_eq!(
        tokens,
        vec![None, Some("page-1".to_string()), Some("page-2".to_string())]
    );

    let stored = store.read_price_series(&key("m4.large"), None).await.unwrap();
    let times: Vec<_> = stored.iter().map(|p| p.timestamp).collect();
    assert_eq!(times, vec![at(60), at(120), at(180), at(240), at(300)]);
}

#[tokio::test]
async fn test_incremental_fetch_starts_after_latest_point() {
    let source = Arc::new(
        ScriptedSource::new().with_pages("m4.large", vec![page(&[(120, dec!(0.2)), (60, dec!(0.1))])]),
    );
    let store = Arc::new(InMemoryPriceHistoryStore::new());
    store
        .append_price_points(&[PricePoint::new(&key("m4.large"), at(60), dec!(0.1))])
        .await
        .unwrap();

    let scheduler = IngestionScheduler::new(source.clone(), store.clone(), config(&["m4.large"], 1));
    let report = scheduler.run_zone(REGION, ZONE).await.unwrap();

    let requests = source.requests();
    assert_eq!(requests[0].start_time, Some(at(61)));
    assert_eq!(requests[0].zone, ZONE);

    // The overlapping point is a duplicate, not a failure
    assert_eq!(report.inserted(), 1);
    assert_eq!(report.duplicates(), 1);
}

#[tokio::test]
async fn test_full_history_without_prior_records() {
    let source = Arc::new(ScriptedSource::new().with_pages("m4.large", vec![page(&[(0, dec!(0.1))])]));
    let store = Arc::new(InMemoryPriceHistoryStore::new());

    let mut cfg = config(&["m4.large"], 1);
    cfg.product_descriptions = vec!["Linux/UNIX".to_string()];
    let scheduler = IngestionScheduler::new(source.clone(), store, cfg);
    scheduler.run_zone(REGION, ZONE).await.unwrap();

    let requests = source.requests();
    assert_eq!(requests[0].start_time, None);
    assert_eq!(requests[0].product_descriptions, vec!["Linux/UNIX".to_string()]);
}

#[tokio::test]
async fn test_zone_run_is_bounded() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_pages("A", vec![page(&[(0, dec!(0.1))])])
            .failing("B", u32::MAX),
    );
    let store = Arc::new(InMemoryPriceHistoryStore::new());
    let scheduler = IngestionScheduler::new(source.clone(), store, config(&["A", "B"], 3));

    match scheduler.run_zone(REGION, ZONE).await {
        Err(IngestionError::ZoneIncomplete {
            rounds,
            pending,
            report,
            ..
        }) => {
            assert_eq!(rounds, 3);
            assert_eq!(pending, vec!["B".to_string()]);
            assert_eq!(report.state("A"), Some(FetchState::Completed));
            assert_eq!(report.state("B"), Some(FetchState::Failed));
            assert_eq!(report.attempts("A"), 1);
            assert_eq!(report.attempts("B"), 3);
            assert!(report.instances["B"].last_error.is_some());
        }
        other => panic!("expected incomplete zone, got {:?}", other.map(|r| r.rounds)),
    }

    // Only the incomplete subset is resubmitted
    assert_eq!(source.attempts("A"), 1);
    assert_eq!(source.attempts("B"), 3);
}

#[tokio::test]
async fn test_store_failure_is_retried() {
    let source = Arc::new(ScriptedSource::new().with_pages("m4.large", vec![page(&[(0, dec!(0.1))])]));
    let store = Arc::new(FlakyStore::new(1));
    let scheduler = IngestionScheduler::new(source.clone(), store.clone(), config(&["m4.large"], 3));

    let report = scheduler.run_zone(REGION, ZONE).await.unwrap();

    assert_eq!(report.attempts("m4.large"), 2);
    assert_eq!(store.inner.price_count(), 1);
}

#[tokio::test]
async fn test_hung_fetch_times_out() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_pages("A", vec![page(&[(0, dec!(0.1))])])
            .hanging("B"),
    );
    let store = Arc::new(InMemoryPriceHistoryStore::new());

    let mut cfg = config(&["A", "B"], 2);
    cfg.task_timeout = Duration::from_millis(50);
    let scheduler = IngestionScheduler::new(source, store, cfg);

    match scheduler.run_zone(REGION, ZONE).await {
        Err(IngestionError::ZoneIncomplete { pending, report, .. }) => {
            assert_eq!(pending, vec!["B".to_string()]);
            let error = report.instances["B"].last_error.clone().unwrap_or_default();
            assert!(error.contains("did not finish"), "unexpected error: {}", error);
        }
        other => panic!("expected incomplete zone, got {:?}", other.map(|r| r.rounds)),
    }
}

#[tokio::test]
async fn test_pagination_is_bounded() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_pages("m4.large", vec![page(&[(0, dec!(0.1))])])
            .endless("m4.large"),
    );
    let store = Arc::new(InMemoryPriceHistoryStore::new());
    let scheduler = IngestionScheduler::new(source.clone(), store.clone(), config(&["m4.large"], 1));

    let err = scheduler.run_zone(REGION, ZONE).await.unwrap_err();
    assert!(err.to_string().contains("incomplete after 1 rounds"));
    assert_eq!(source.requests().len(), 10);
    assert_eq!(store.price_count(), 0);
}

#[tokio::test]
async fn test_region_walk_covers_every_zone() {
    let source = Arc::new(
        ScriptedSource::new()
            .with_zones(REGION, &["us-west-2a", "us-west-2b"])
            .with_pages("m4.large", vec![page(&[(0, dec!(0.1)), (60, dec!(0.2))])]),
    );
    let store = Arc::new(InMemoryPriceHistoryStore::new());
    let scheduler = IngestionScheduler::new(source, store.clone(), config(&["m4.large"], 2));

    let summary = scheduler
        .run(&[REGION.to_string(), "eu-nowhere-1".to_string()])
        .await;

    assert_eq!(summary.zones_completed, 2);
    assert!(summary.zones_incomplete.is_empty());
    assert_eq!(summary.regions_failed, vec!["eu-nowhere-1".to_string()]);
    assert_eq!(summary.inserted, 4);

    let series = store.list_series().await.unwrap();
    assert_eq!(
        series,
        vec![
            SeriesKey::new(REGION, "us-west-2a", "m4.large"),
            SeriesKey::new(REGION, "us-west-2b", "m4.large"),
        ]
    );
}

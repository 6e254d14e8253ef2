// Product monitor integration tests

use super::*;
use pricewatch::core::{CycleOutcome, PriceStatus, ProductMonitor, SkipReason};
use tokio_util::sync::CancellationToken;

fn monitor_with(harness: &Harness, fetcher: Arc<dyn PriceFetcher>, id: &str) -> ProductMonitor {
    let ctx = harness.context(fetcher, ConcurrencyGate::new(1), Duration::from_millis(10));
    ProductMonitor::new(product(id), ctx)
}

#[tokio::test]
async fn test_first_check_records_price() -> anyhow::Result<()> {
    let harness = Harness::new(None).await;
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Price("$12.50")]));
    let monitor = monitor_with(&harness, fetcher, "p1");

    let outcome = monitor.run_cycle().await?;

    match outcome {
        CycleOutcome::Checked { price, check } => {
            assert_eq!(price, 12.5);
            assert_eq!(check.status, PriceStatus::FirstCheck);
            assert_eq!(check.previous, None);
        }
        other => panic!("unexpected outcome: {:?}", other),
    }

    let prices = harness.ledger.snapshot().await?;
    assert_eq!(prices.get("p1"), Some(&12.5));

    let log = harness.alert_log();
    assert!(log.contains("[CHECK] current price: 12.5 (p1)"));
    assert!(log.contains("p1 FIRST price recorded"));
    assert!(harness.notifications.pending().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_price_drop_queues_email() -> anyhow::Result<()> {
    let harness = Harness::new(None).await;
    harness.seed_ledger(r#"{"p1": 100.0}"#);
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Price("80.00")]));
    let monitor = monitor_with(&harness, fetcher, "p1");

    let outcome = monitor.run_cycle().await?;
    let CycleOutcome::Checked { check, .. } = outcome else {
        panic!("expected a checked outcome");
    };
    assert_eq!(check.status, PriceStatus::PriceDropped);
    assert_eq!(check.previous, Some(100.0));

    assert_eq!(harness.ledger.snapshot().await?.get("p1"), Some(&80.0));

    let pending = harness.notifications.pending().await;
    assert_eq!(pending.len(), 1);
    assert!(pending[0].contains("p1 PRICE DROPPED from 100.0 -> 80.0"));
    assert!(pending[0].contains("https://shop.example.com/p1"));

    Ok(())
}

#[tokio::test]
async fn test_price_increase_queues_email() -> anyhow::Result<()> {
    let harness = Harness::new(None).await;
    harness.seed_ledger(r#"{"p1": 100.0}"#);
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Price("Now only 1,200.00 kr")]));
    let monitor = monitor_with(&harness, fetcher, "p1");

    monitor.run_cycle().await?;

    let pending = harness.notifications.pending().await;
    assert_eq!(pending.len(), 1);
    assert!(pending[0].contains("p1 PRICE INCREASED from 100.0 -> 1200.0"));

    Ok(())
}

#[tokio::test]
async fn test_unchanged_price_only_logs_check() -> anyhow::Result<()> {
    let harness = Harness::new(None).await;
    harness.seed_ledger(r#"{"p1": 42.0}"#);
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Price("42")]));
    let monitor = monitor_with(&harness, fetcher, "p1");

    let outcome = monitor.run_cycle().await?;
    let CycleOutcome::Checked { check, .. } = outcome else {
        panic!("expected a checked outcome");
    };
    assert_eq!(check.status, PriceStatus::NoChange);

    let log = harness.alert_log();
    assert!(log.contains("[CHECK] current price: 42.0 (p1)"));
    assert!(!log.contains("PRICE"));
    assert!(harness.notifications.pending().await.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_missing_price_is_skipped() -> anyhow::Result<()> {
    let harness = Harness::new(None).await;
    harness.seed_ledger(r#"{"p1": 100.0}"#);
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::NotFound]));
    let monitor = monitor_with(&harness, fetcher, "p1");

    let outcome = monitor.run_cycle().await?;
    assert_eq!(outcome, CycleOutcome::Skipped(SkipReason::PriceNotFound));
    assert_eq!(harness.ledger.snapshot().await?.get("p1"), Some(&100.0));
    assert!(harness.alert_log().is_empty());

    Ok(())
}

#[tokio::test]
async fn test_unparseable_price_is_skipped() -> anyhow::Result<()> {
    let harness = Harness::new(None).await;
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Price("Sold out")]));
    let monitor = monitor_with(&harness, fetcher, "p1");

    let outcome = monitor.run_cycle().await?;
    assert_eq!(
        outcome,
        CycleOutcome::Skipped(SkipReason::Unparseable("Sold out".to_string()))
    );
    assert!(harness.ledger.snapshot().await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_fetch_error_is_returned_from_cycle() {
    let harness = Harness::new(None).await;
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Fail("navigation failed")]));
    let monitor = monitor_with(&harness, fetcher, "p1");

    let err = monitor.run_cycle().await.unwrap_err();
    assert!(err.to_string().contains("navigation failed"));
}

#[tokio::test]
async fn test_monitor_survives_errors_and_panics() {
    let harness = Harness::new(None).await;
    let fetcher = Arc::new(ScriptedFetcher::with_fallback(
        vec![Step::Fail("timeout"), Step::Panic],
        Step::Price("$5.00"),
    ));
    let monitor = monitor_with(&harness, fetcher.clone(), "p1");

    let cancel = CancellationToken::new();
    let task = tokio::spawn(monitor.run(cancel.clone()));

    let ledger = Arc::clone(&harness.ledger);
    let recorded = wait_for_condition(
        || {
            let ledger = Arc::clone(&ledger);
            async move { ledger.snapshot().await.unwrap().contains_key("p1") }
        },
        5,
    )
    .await;
    assert!(recorded, "monitor never recovered after failures");

    cancel.cancel();
    let stats = task.await.expect("monitor task");

    assert!(fetcher.calls() >= 3);
    assert!(stats.failed >= 2);
    assert!(stats.checked >= 1);
    assert!(stats.last_error.is_some());
}

#[tokio::test]
async fn test_cancellation_logs_stopped() {
    let harness = Harness::new(None).await;
    let fetcher = Arc::new(ScriptedFetcher::with_fallback(vec![], Step::Price("$1.00")));
    let ctx = harness.context(fetcher, ConcurrencyGate::new(1), Duration::from_secs(3600));
    let monitor = ProductMonitor::new(product("p1"), ctx);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(monitor.run(cancel.clone()));

    let notifications = Arc::clone(&harness.notifications);
    let ledger = Arc::clone(&harness.ledger);
    assert!(
        wait_for_condition(
            || {
                let ledger = Arc::clone(&ledger);
                async move { ledger.snapshot().await.unwrap().contains_key("p1") }
            },
            5
        )
        .await
    );

    // The monitor is now in its hour-long sleep.
    cancel.cancel();
    let stats = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("monitor did not stop promptly")
        .expect("monitor task");

    assert_eq!(stats.checked, 1);
    assert!(harness.alert_log().contains("Monitoring for p1 stopped."));
    assert!(notifications.pending().await.is_empty());
}

#[tokio::test]
async fn test_cancellation_while_waiting_for_gate() {
    let harness = Harness::new(None).await;
    let fetcher = Arc::new(ScriptedFetcher::new(vec![]));
    // No permits at all: the cycle blocks on the gate forever.
    let ctx = harness.context(fetcher.clone(), ConcurrencyGate::new(0), Duration::from_millis(10));
    let monitor = ProductMonitor::new(product("p1"), ctx);

    let cancel = CancellationToken::new();
    let task = tokio::spawn(monitor.run(cancel.clone()));
    tokio::time::sleep(Duration::from_millis(50)).await;
    cancel.cancel();

    let stats = tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("monitor did not stop promptly")
        .expect("monitor task");

    assert_eq!(fetcher.calls(), 0);
    assert_eq!(stats.cycles, 0);
    assert!(harness.alert_log().contains("Monitoring for p1 stopped."));
}

#[tokio::test]
async fn test_corrupted_ledger_recovers() -> anyhow::Result<()> {
    let harness = Harness::new(None).await;
    harness.seed_ledger("{ not json");
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Price("$9.99")]));
    let monitor = monitor_with(&harness, fetcher, "p1");

    let outcome = monitor.run_cycle().await?;
    let CycleOutcome::Checked { check, .. } = outcome else {
        panic!("expected a checked outcome");
    };
    assert_eq!(check.status, PriceStatus::FirstCheck);

    let aside = harness.dir.path().join("prices.corrupted.json");
    assert_eq!(std::fs::read_to_string(aside)?, "{ not json");
    assert_eq!(harness.ledger.snapshot().await?.get("p1"), Some(&9.99));

    Ok(())
}

#[tokio::test]
async fn test_unreadable_ledger_fails_cycle() {
    let harness = Harness::new(None).await;
    let path = harness.dir.path().join("prices.json");
    std::fs::create_dir(&path).expect("ledger dir");
    let fetcher = Arc::new(ScriptedFetcher::new(vec![Step::Price("$20.00")]));
    let monitor = monitor_with(&harness, fetcher, "p1");

    let err = monitor.run_cycle().await.unwrap_err();
    assert!(matches!(err, AppError::Io(_)));

    // Nothing announced and nothing written over the unreadable ledger.
    assert!(path.is_dir());
    assert!(!harness.alert_log().contains("[CHECK]"));
    assert!(harness.notifications.pending().await.is_empty());
}

// Integration tests for pricewatch
// These tests drive monitors, the ledger and the email queue together with
// in-memory fetchers and mailers.

pub mod monitor_tests;

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

use pricewatch::core::{
    AlertLog, ConcurrencyGate, MonitorContext, NotificationQueue, NotificationSettings, PriceLedger,
    RateLimitMarker,
};
use pricewatch::models::Product;
use pricewatch::plugins::{DispatchError, Mailer, PriceFetcher, PriceParser};
use pricewatch::{AppError, Result};

/// One scripted fetch result.
#[derive(Debug, Clone)]
pub enum Step {
    Price(&'static str),
    NotFound,
    Fail(&'static str),
    Panic,
}

/// Replays `steps` in order, then repeats `fallback` forever.
pub struct ScriptedFetcher {
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
}

impl ScriptedFetcher {
    pub fn new(steps: Vec<Step>) -> Self {
        Self::with_fallback(steps, Step::NotFound)
    }

    pub fn with_fallback(steps: Vec<Step>, fallback: Step) -> Self {
        Self {
            steps: Mutex::new(steps.into()),
            fallback,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceFetcher for ScriptedFetcher {
    async fn fetch_price(&self, _url: &str, _selector: &str) -> Result<Option<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let step = self
            .steps
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Price(text) => Ok(Some(text.to_string())),
            Step::NotFound => Ok(None),
            Step::Fail(message) => Err(AppError::Scraping(message.to_string())),
            Step::Panic => panic!("fetcher exploded"),
        }
    }
}

/// Slow fetcher that records the highest number of overlapping calls.
#[derive(Default)]
pub struct ConcurrencyProbe {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

impl ConcurrencyProbe {
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PriceFetcher for ConcurrencyProbe {
    async fn fetch_price(&self, _url: &str, _selector: &str) -> Result<Option<String>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(30)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(Some("$10.00".to_string()))
    }
}

/// Mailer that records every batch and can be told to fail.
#[derive(Default)]
pub struct RecordingMailer {
    pub sent: Mutex<Vec<(String, String)>>,
    failures: Mutex<VecDeque<DispatchError>>,
}

impl RecordingMailer {
    pub fn failing_with(errors: Vec<DispatchError>) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failures: Mutex::new(errors.into()),
        }
    }

    pub fn bodies(&self) -> Vec<String> {
        self.sent.lock().unwrap().iter().map(|(_, body)| body.clone()).collect()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, subject: &str, body: &str) -> std::result::Result<(), DispatchError> {
        self.sent
            .lock()
            .unwrap()
            .push((subject.to_string(), body.to_string()));
        match self.failures.lock().unwrap().pop_front() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Temp directory plus the file-backed components that live in it.
pub struct Harness {
    pub dir: TempDir,
    pub ledger: Arc<PriceLedger>,
    pub notifications: Arc<NotificationQueue>,
}

impl Harness {
    pub async fn new(mailer: Option<Arc<dyn Mailer>>) -> Self {
        let dir = TempDir::new().expect("temp dir");
        let ledger = Arc::new(PriceLedger::new(dir.path().join("prices.json")));
        let settings = NotificationSettings {
            capacity: 100,
            max_failures: 5,
            send_interval: Duration::from_secs(3600),
            flush_interval: Duration::from_millis(20),
        };
        let notifications = Arc::new(
            NotificationQueue::new(
                settings,
                AlertLog::new(dir.path().join("alerts.log")),
                RateLimitMarker::new(dir.path().join("last_email.txt")),
                mailer,
            )
            .await,
        );

        Self {
            dir,
            ledger,
            notifications,
        }
    }

    pub fn seed_ledger(&self, json: &str) {
        std::fs::write(self.dir.path().join("prices.json"), json).expect("seed ledger");
    }

    pub fn context(
        &self,
        fetcher: Arc<dyn PriceFetcher>,
        gate: ConcurrencyGate,
        check_interval: Duration,
    ) -> MonitorContext {
        MonitorContext {
            fetcher,
            parser: Arc::new(PriceParser::new().expect("price parser")),
            ledger: Arc::clone(&self.ledger),
            notifications: Arc::clone(&self.notifications),
            gate,
            check_interval,
        }
    }

    pub fn alert_log(&self) -> String {
        std::fs::read_to_string(self.dir.path().join("alerts.log")).unwrap_or_default()
    }
}

pub fn product(id: &str) -> Product {
    Product::new(id, format!("https://shop.example.com/{}", id), "span.price")
}

/// Helper to wait for async operations
pub async fn wait_for_condition<F, Fut>(mut condition: F, timeout_seconds: u64) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = Duration::from_secs(timeout_seconds);

    while start.elapsed() < timeout {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    false
}

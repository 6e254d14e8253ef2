use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::core::gate::ConcurrencyGate;
use crate::core::ledger::{PriceCheck, PriceLedger, PriceStatus};
use crate::core::notifier::NotificationQueue;
use crate::models::Product;
use crate::plugins::traits::PriceFetcher;
use crate::plugins::trackers::PriceParser;
use crate::{AppError, Result};

/// Why a cycle ended without classifying a price.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    PriceNotFound,
    Unparseable(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    Checked { price: f64, check: PriceCheck },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Default)]
pub struct MonitorStats {
    pub product_id: String,
    pub cycles: u64,
    pub checked: u64,
    pub changes: u64,
    pub skipped: u64,
    pub failed: u64,
    pub last_error: Option<String>,
    pub last_checked_at: Option<DateTime<Utc>>,
}

impl MonitorStats {
    fn new(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            ..Self::default()
        }
    }

    fn record(&mut self, result: &Result<CycleOutcome>) {
        self.cycles += 1;
        match result {
            Ok(CycleOutcome::Checked { check, .. }) => {
                self.checked += 1;
                self.last_checked_at = Some(Utc::now());
                if check.status.is_change() {
                    self.changes += 1;
                }
            }
            Ok(CycleOutcome::Skipped(_)) => self.skipped += 1,
            Err(e) => {
                self.failed += 1;
                self.last_error = Some(e.to_string());
            }
        }
    }
}

/// Everything a monitor shares with its siblings.
#[derive(Clone)]
pub struct MonitorContext {
    pub fetcher: Arc<dyn PriceFetcher>,
    pub parser: Arc<PriceParser>,
    pub ledger: Arc<PriceLedger>,
    pub notifications: Arc<NotificationQueue>,
    pub gate: ConcurrencyGate,
    pub check_interval: Duration,
}

/// Polls one product forever: fetch, parse, classify, notify, sleep.
pub struct ProductMonitor {
    product: Product,
    ctx: MonitorContext,
    stats: MonitorStats,
}

impl ProductMonitor {
    pub fn new(product: Product, ctx: MonitorContext) -> Self {
        let stats = MonitorStats::new(&product.id);
        Self { product, ctx, stats }
    }

    pub fn product(&self) -> &Product {
        &self.product
    }

    /// Runs cycles until `cancel` fires. A failing or panicking cycle is
    /// logged and followed by the normal sleep; only cancellation ends the loop.
    pub async fn run(mut self, cancel: CancellationToken) -> MonitorStats {
        tracing::info!(
            product_id = %self.product.id,
            url = %self.product.url,
            "Monitoring started"
        );

        loop {
            let cycle = AssertUnwindSafe(self.run_cycle()).catch_unwind();
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                caught = cycle => caught.unwrap_or_else(|panic| {
                    Err(AppError::Internal(panic_message(&*panic)))
                }),
            };

            if let Err(e) = &result {
                tracing::error!(product_id = %self.product.id, "Check failed: {}", e);
            }
            self.stats.record(&result);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.ctx.check_interval) => {}
            }
        }

        self.ctx
            .notifications
            .notify(&format!("Monitoring for {} stopped.", self.product.id), false)
            .await;

        self.stats
    }

    /// One pass through the pipeline.
    pub async fn run_cycle(&self) -> Result<CycleOutcome> {
        let product = &self.product;

        let raw = {
            let _permit = self.ctx.gate.acquire().await?;
            self.ctx
                .fetcher
                .fetch_price(&product.url, &product.price_selector)
                .await?
        };

        let Some(raw) = raw else {
            tracing::warn!(product_id = %product.id, "Price not found, skipping");
            return Ok(CycleOutcome::Skipped(SkipReason::PriceNotFound));
        };

        let Some(price) = self.ctx.parser.parse(&raw) else {
            tracing::warn!(
                product_id = %product.id,
                text = %raw,
                "Price could not be parsed, skipping"
            );
            return Ok(CycleOutcome::Skipped(SkipReason::Unparseable(raw)));
        };

        let check = self.ctx.ledger.classify(&product.id, price).await?;
        self.announce(price, &check).await;

        Ok(CycleOutcome::Checked { price, check })
    }

    async fn announce(&self, price: f64, check: &PriceCheck) {
        let product = &self.product;
        let notifications = &self.ctx.notifications;

        notifications
            .notify(
                &format!("[CHECK] current price: {} ({})", format_price(price), product.id),
                false,
            )
            .await;

        match (check.status, check.previous) {
            (PriceStatus::PriceDropped, Some(previous)) => {
                notifications
                    .notify(
                        &format!(
                            "📉 {} PRICE DROPPED from {} -> {}\n{}",
                            product.id,
                            format_price(previous),
                            format_price(price),
                            product.url
                        ),
                        true,
                    )
                    .await;
            }
            (PriceStatus::PriceIncreased, Some(previous)) => {
                notifications
                    .notify(
                        &format!(
                            "📈 {} PRICE INCREASED from {} -> {}\n{}",
                            product.id,
                            format_price(previous),
                            format_price(price),
                            product.url
                        ),
                        true,
                    )
                    .await;
            }
            (PriceStatus::FirstCheck, _) => {
                notifications
                    .notify(&format!("{} FIRST price recorded", product.id), false)
                    .await;
            }
            _ => {}
        }
    }
}

/// Whole amounts keep one decimal place: `100.0`, `12.5`, `8299.0`.
pub fn format_price(price: f64) -> String {
    if price.is_finite() && price.fract() == 0.0 {
        format!("{:.1}", price)
    } else {
        format!("{}", price)
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        format!("panic: {}", message)
    } else if let Some(message) = panic.downcast_ref::<String>() {
        format!("panic: {}", message)
    } else {
        "panic: <non-string payload>".to_string()
    }
}

use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::monitor::{MonitorContext, MonitorStats, ProductMonitor};
use crate::models::Product;

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub stopped_at: DateTime<Utc>,
    pub monitors: Vec<MonitorStats>,
    /// Tasks that panicked or were aborted instead of stopping cleanly.
    pub task_errors: Vec<String>,
}

impl RunSummary {
    pub fn uptime_seconds(&self) -> u64 {
        self.stopped_at
            .signed_duration_since(self.started_at)
            .num_seconds()
            .max(0) as u64
    }
}

/// Runs one monitor task per product plus the email flush task, and stops
/// them all together.
pub struct Orchestrator {
    products: Vec<Product>,
    ctx: MonitorContext,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(products: Vec<Product>, ctx: MonitorContext) -> Self {
        Self {
            products,
            ctx,
            cancel: CancellationToken::new(),
        }
    }

    /// Token that stops every task when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Spawns all tasks, waits for `shutdown` (or for an external cancel),
    /// then cancels and awaits every task. Task failures are collected into the
    /// summary, never propagated.
    pub async fn run<F>(self, shutdown: F) -> RunSummary
    where
        F: Future<Output = ()>,
    {
        let started_at = Utc::now();

        let mut monitors: Vec<(String, JoinHandle<MonitorStats>)> =
            Vec::with_capacity(self.products.len());
        for product in &self.products {
            let monitor = ProductMonitor::new(product.clone(), self.ctx.clone());
            let handle = tokio::spawn(monitor.run(self.cancel.child_token()));
            monitors.push((product.id.clone(), handle));
        }

        let notifications = Arc::clone(&self.ctx.notifications);
        let flush = tokio::spawn(notifications.run(self.cancel.child_token()));

        tracing::info!(
            products = monitors.len(),
            max_concurrent_fetches = self.ctx.gate.capacity(),
            interval_secs = self.ctx.check_interval.as_secs(),
            "All monitors started"
        );

        tokio::select! {
            _ = shutdown => tracing::info!("Shutdown requested, stopping monitors"),
            _ = self.cancel.cancelled() => tracing::info!("Monitoring cancelled"),
        }
        self.cancel.cancel();

        let mut summary = RunSummary {
            started_at,
            stopped_at: started_at,
            monitors: Vec::with_capacity(monitors.len()),
            task_errors: Vec::new(),
        };

        let (ids, handles): (Vec<_>, Vec<_>) = monitors.into_iter().unzip();
        let results = futures::future::join_all(handles).await;
        for (product_id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(stats) => summary.monitors.push(stats),
                Err(e) => {
                    tracing::error!(%product_id, "Monitor task ended abnormally: {}", e);
                    summary.task_errors.push(format!("{}: {}", product_id, e));
                }
            }
        }

        if let Err(e) = flush.await {
            tracing::error!("Email flush task ended abnormally: {}", e);
            summary.task_errors.push(format!("email flush: {}", e));
        }

        summary.stopped_at = Utc::now();
        tracing::info!(
            uptime_seconds = summary.uptime_seconds(),
            errors = summary.task_errors.len(),
            "All monitoring tasks stopped"
        );
        summary
    }
}

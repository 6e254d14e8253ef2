use chrono::{DateTime, Local, Utc};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::Result;
use crate::config::EmailConfig;
use crate::plugins::traits::{DispatchError, Mailer};

/// Append-only, human readable record of every notification.
#[derive(Debug, Clone)]
pub struct AlertLog {
    path: PathBuf,
}

impl AlertLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, message: &str) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(format_alert_line(Local::now(), message).as_bytes())
            .await?;
        file.flush().await?;
        Ok(())
    }
}

pub fn format_alert_line(at: DateTime<Local>, message: &str) -> String {
    format!("[{}] {}\n", at.format("%Y-%m-%d %H:%M:%S"), message)
}

/// Plain-text file holding the Unix timestamp of the last successful send,
/// so the rate limit survives restarts.
#[derive(Debug, Clone)]
pub struct RateLimitMarker {
    path: PathBuf,
}

impl RateLimitMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Missing or unreadable markers mean "never sent".
    pub async fn load(&self) -> Option<DateTime<Utc>> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), "Failed to read email marker: {}", e);
                return None;
            }
        };

        let parsed = raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64));

        if parsed.is_none() {
            tracing::warn!(
                path = %self.path.display(),
                "Email marker is corrupted, allowing an immediate send"
            );
        }
        parsed
    }

    pub async fn store(&self, at: DateTime<Utc>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let secs = at.timestamp_millis() as f64 / 1000.0;
        tokio::fs::write(&self.path, format!("{}", secs)).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct NotificationSettings {
    pub capacity: usize,
    pub max_failures: u32,
    pub send_interval: Duration,
    pub flush_interval: Duration,
}

impl NotificationSettings {
    pub fn from_config(config: &EmailConfig) -> Self {
        Self {
            capacity: config.queue_capacity,
            max_failures: config.max_failures,
            send_interval: config.send_interval(),
            flush_interval: config.flush_interval(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    Empty,
    /// Email is switched off; queued alerts were discarded.
    Disabled { dropped: usize },
    /// Too many consecutive failures; queued alerts were discarded.
    CircuitOpen { dropped: usize },
    RateLimited { pending: usize },
    Sent { count: usize },
    PermanentFailure { dropped: usize },
    TransientFailure { pending: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchSnapshot {
    pub pending: usize,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub consecutive_failures: u32,
}

#[derive(Debug, Default)]
struct DispatchState {
    pending: VecDeque<String>,
    last_sent_at: Option<DateTime<Utc>>,
    consecutive_failures: u32,
    breaker_reported: bool,
}

/// Console + alert-log notifications with a bounded, rate limited email batch.
///
/// Monitors call [`notify`](Self::notify); a single flush task calls
/// [`flush_once`](Self::flush_once) on a fixed interval and is the only
/// consumer of the pending queue.
pub struct NotificationQueue {
    alert_log: AlertLog,
    marker: RateLimitMarker,
    mailer: Option<Arc<dyn Mailer>>,
    settings: NotificationSettings,
    state: Mutex<DispatchState>,
}

impl NotificationQueue {
    /// `mailer` is `None` when email is disabled.
    pub async fn new(
        settings: NotificationSettings,
        alert_log: AlertLog,
        marker: RateLimitMarker,
        mailer: Option<Arc<dyn Mailer>>,
    ) -> Self {
        let last_sent_at = marker.load().await;
        Self {
            alert_log,
            marker,
            mailer,
            settings,
            state: Mutex::new(DispatchState {
                last_sent_at,
                ..DispatchState::default()
            }),
        }
    }

    pub fn settings(&self) -> &NotificationSettings {
        &self.settings
    }

    /// Logs `message` everywhere and, when `wants_email`, queues it for the
    /// next batch. A full queue drops its oldest entry.
    pub async fn notify(&self, message: &str, wants_email: bool) {
        tracing::info!(target: "alerts", "{}", message);

        if let Err(e) = self.alert_log.append(message).await {
            tracing::error!(
                path = %self.alert_log.path().display(),
                "Failed to write alert log: {}",
                e
            );
        }

        if wants_email {
            let mut state = self.state.lock().await;
            if state.pending.len() >= self.settings.capacity {
                state.pending.pop_front();
                tracing::warn!(
                    capacity = self.settings.capacity,
                    "Email queue full, dropped oldest alert"
                );
            }
            state.pending.push_back(message.to_string());
        }
    }

    pub async fn flush_once(&self) -> FlushOutcome {
        self.flush_at(Utc::now()).await
    }

    /// One flush cycle evaluated as if the current time were `now`.
    pub async fn flush_at(&self, now: DateTime<Utc>) -> FlushOutcome {
        let (batch, mailer) = {
            let mut state = self.state.lock().await;

            if state.pending.is_empty() {
                return FlushOutcome::Empty;
            }

            let Some(mailer) = self.mailer.clone() else {
                let dropped = state.pending.len();
                state.pending.clear();
                tracing::debug!(dropped, "Email disabled, discarding queued alerts");
                return FlushOutcome::Disabled { dropped };
            };

            if state.consecutive_failures >= self.settings.max_failures {
                let dropped = state.pending.len();
                state.pending.clear();
                if !state.breaker_reported {
                    state.breaker_reported = true;
                    tracing::error!(
                        failures = state.consecutive_failures,
                        "Email disabled after repeated failures, alerts will only be logged"
                    );
                }
                return FlushOutcome::CircuitOpen { dropped };
            }

            if let Some(last) = state.last_sent_at {
                if self.within_send_interval(last, now) {
                    return FlushOutcome::RateLimited {
                        pending: state.pending.len(),
                    };
                }
            }

            (state.pending.drain(..).collect::<Vec<_>>(), mailer)
        };

        let subject = format!("Price alert: {} update(s)", batch.len());
        let body = batch.join("\n\n");
        let result = mailer.send(&subject, &body).await;

        let mut state = self.state.lock().await;
        match result {
            Ok(()) => {
                state.consecutive_failures = 0;
                state.last_sent_at = Some(now);
                drop(state);

                tracing::info!(count = batch.len(), "Batch email sent");
                if let Err(e) = self.marker.store(now).await {
                    tracing::error!("Failed to record email timestamp: {}", e);
                }
                FlushOutcome::Sent { count: batch.len() }
            }
            Err(DispatchError::Permanent(reason)) => {
                state.consecutive_failures += 1;
                tracing::error!(
                    failures = state.consecutive_failures,
                    dropped = batch.len(),
                    "Email rejected, check SMTP credentials and addresses: {}",
                    reason
                );
                FlushOutcome::PermanentFailure { dropped: batch.len() }
            }
            Err(DispatchError::Transient(reason)) => {
                state.consecutive_failures += 1;
                // The batch is older than anything queued during the send.
                for message in batch.into_iter().rev() {
                    state.pending.push_front(message);
                }
                while state.pending.len() > self.settings.capacity {
                    state.pending.pop_front();
                }
                tracing::warn!(
                    failures = state.consecutive_failures,
                    pending = state.pending.len(),
                    "Email send failed, will retry next cycle: {}",
                    reason
                );
                FlushOutcome::TransientFailure {
                    pending: state.pending.len(),
                }
            }
        }
    }

    fn within_send_interval(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        // A timestamp from the future is treated like a corrupted marker.
        match now.signed_duration_since(last).to_std() {
            Ok(elapsed) => elapsed < self.settings.send_interval,
            Err(_) => false,
        }
    }

    pub async fn pending(&self) -> Vec<String> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    pub async fn dispatch_state(&self) -> DispatchSnapshot {
        let state = self.state.lock().await;
        DispatchSnapshot {
            pending: state.pending.len(),
            last_sent_at: state.last_sent_at,
            consecutive_failures: state.consecutive_failures,
        }
    }

    /// Flush loop; runs until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.settings.flush_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; nothing is queued yet.
        ticker.tick().await;

        tracing::info!(
            interval_secs = self.settings.flush_interval.as_secs(),
            "Email flush task started"
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = async {
                    ticker.tick().await;
                    self.flush_once().await
                } => {
                    tracing::debug!(?outcome, "Flush cycle finished");
                }
            }
        }

        tracing::info!("Email flush task stopped");
    }
}

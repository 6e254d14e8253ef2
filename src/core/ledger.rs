use serde::Serialize;
use serde_json::ser::PrettyFormatter;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::Result;

/// How a new reading relates to the last recorded one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceStatus {
    FirstCheck,
    PriceDropped,
    PriceIncreased,
    NoChange,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PriceCheck {
    /// Absent only for `FirstCheck`.
    pub previous: Option<f64>,
    pub status: PriceStatus,
}

impl PriceStatus {
    pub fn between(previous: f64, current: f64) -> Self {
        if current < previous {
            PriceStatus::PriceDropped
        } else if current > previous {
            PriceStatus::PriceIncreased
        } else {
            PriceStatus::NoChange
        }
    }

    pub fn is_change(&self) -> bool {
        matches!(self, PriceStatus::PriceDropped | PriceStatus::PriceIncreased)
    }
}

/// File-backed map of product id to last seen price.
///
/// Every call loads and rewrites the whole file, so all access goes through
/// one lock even though callers work on different keys.
pub struct PriceLedger {
    path: PathBuf,
    lock: Mutex<()>,
}

impl PriceLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records `current` for `product_id` and reports how it compares to the
    /// previous reading.
    ///
    /// A ledger that cannot be read is an error and nothing is written, so
    /// other products' records survive. Write failures are logged and do not
    /// affect the result.
    pub async fn classify(&self, product_id: &str, current: f64) -> Result<PriceCheck> {
        let _guard = self.lock.lock().await;

        let mut prices = self.load().await?;
        let previous = prices.insert(product_id.to_string(), current);

        let check = match previous {
            None => PriceCheck {
                previous: None,
                status: PriceStatus::FirstCheck,
            },
            Some(previous) => PriceCheck {
                previous: Some(previous),
                status: PriceStatus::between(previous, current),
            },
        };

        if let Err(e) = self.save(&prices).await {
            tracing::error!(
                product_id,
                path = %self.path.display(),
                "Failed to persist price ledger: {}",
                e
            );
        }

        Ok(check)
    }

    /// Current persisted contents.
    pub async fn snapshot(&self) -> Result<BTreeMap<String, f64>> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    async fn load(&self) -> Result<BTreeMap<String, f64>> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                tracing::error!(path = %self.path.display(), "Failed to read price ledger: {}", e);
                return Err(e.into());
            }
        };

        match serde_json::from_slice(&raw) {
            Ok(prices) => Ok(prices),
            Err(e) => {
                let aside = corrupted_path(&self.path);
                tracing::warn!(
                    path = %self.path.display(),
                    backup = %aside.display(),
                    "Price ledger is corrupted, starting fresh: {}",
                    e
                );
                if let Err(e) = tokio::fs::rename(&self.path, &aside).await {
                    tracing::error!("Failed to move corrupted ledger aside: {}", e);
                }
                Ok(BTreeMap::new())
            }
        }
    }

    async fn save(&self, prices: &BTreeMap<String, f64>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }

        let mut buf = Vec::new();
        let formatter = PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        prices.serialize(&mut ser)?;

        // Write-then-rename keeps the previous file intact if we are interrupted.
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &buf).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

/// `data/prices.json` -> `data/prices.corrupted.json`
fn corrupted_path(path: &Path) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "prices".to_string());
    let name = match path.extension() {
        Some(ext) => format!("{}.corrupted.{}", stem, ext.to_string_lossy()),
        None => format!("{}.corrupted", stem),
    };
    path.with_file_name(name)
}

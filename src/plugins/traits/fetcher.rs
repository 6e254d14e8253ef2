use async_trait::async_trait;

use crate::Result;

/// Source of raw price text for a product page.
///
/// Implementations must release any per-call resource (browser tab, HTTP
/// connection) on every exit path.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Returns `Ok(None)` when the page or the price element could not be
    /// located within the fetcher's own timeouts, and `Err` for transport or
    /// navigation failures.
    async fn fetch_price(&self, url: &str, selector: &str) -> Result<Option<String>>;
}

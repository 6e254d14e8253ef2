use anyhow::{Context, anyhow};
use async_trait::async_trait;
use headless_chrome::{Browser, LaunchOptions, Tab};
use scraper::{Html, Selector};
use std::ffi::OsStr;
use std::sync::Arc;

use crate::config::ScraperConfig;
use crate::plugins::traits::PriceFetcher;

/// Headless Chrome backed fetcher. One browser process is shared by every
/// monitor; each fetch opens and closes its own tab.
#[derive(Clone)]
pub struct WebScraper {
    browser: Arc<Browser>,
    config: ScraperConfig,
}

/// Closes the tab when dropped, so every exit path of a fetch releases it.
struct TabGuard(Arc<Tab>);

impl Drop for TabGuard {
    fn drop(&mut self) {
        if let Err(e) = self.0.close(true) {
            tracing::warn!("Failed to close browser tab: {}", e);
        }
    }
}

impl WebScraper {
    pub fn new(config: ScraperConfig) -> anyhow::Result<Self> {
        let mut launch_options = LaunchOptions::default_builder()
            .headless(config.headless)
            .sandbox(false) // Often needed in containerized environments
            .args(vec![
                OsStr::new("--disable-dev-shm-usage"),
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-extensions"),
                OsStr::new("--disable-background-timer-throttling"),
                OsStr::new("--disable-renderer-backgrounding"),
            ])
            .build()
            .map_err(|e| anyhow!("Failed to create launch options: {}", e))?;

        if let Some(chrome_path) = &config.chrome_path {
            launch_options.path = Some(std::path::PathBuf::from(chrome_path));
        }

        let browser = Browser::new(launch_options).context("Failed to launch browser")?;

        Ok(Self {
            browser: Arc::new(browser),
            config,
        })
    }

    pub fn browser_version(&self) -> anyhow::Result<String> {
        let version = self.browser.get_version().context("Failed to query browser version")?;
        Ok(version.product)
    }

    fn fetch_blocking(
        browser: &Browser,
        config: &ScraperConfig,
        url: &str,
        selector: &str,
    ) -> anyhow::Result<Option<String>> {
        let tab = TabGuard(browser.new_tab().context("Failed to create tab")?);

        tab.0.set_default_timeout(config.page_timeout());
        tab.0
            .set_user_agent(&config.user_agent, None, None)
            .context("Failed to set user agent")?;

        tab.0
            .navigate_to(url)
            .with_context(|| format!("Navigation to {} failed", url))?;

        // Load timeouts point at the site or the network, not at us.
        if let Err(e) = tab.0.wait_until_navigated() {
            tracing::warn!(%url, "Timed out loading page: {}", e);
            return Ok(None);
        }

        if let Err(e) = tab
            .0
            .wait_for_element_with_custom_timeout(selector, config.selector_timeout())
        {
            tracing::error!(
                %url,
                %selector,
                "Price selector not found (likely wrong selector): {}",
                e
            );
            return Ok(None);
        }

        let html = tab.0.get_content().context("Failed to get page content")?;
        extract_first_text(&html, selector)
    }
}

/// Trimmed text of the first element matching `selector`, `None` when nothing
/// matches or the element is empty.
pub fn extract_first_text(html: &str, selector: &str) -> anyhow::Result<Option<String>> {
    let document = Html::parse_document(html);
    let css_selector = Selector::parse(selector)
        .map_err(|e| anyhow!("Invalid CSS selector '{}': {:?}", selector, e))?;

    let text = document.select(&css_selector).next().map(|element| {
        element
            .text()
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    });

    Ok(text.filter(|t| !t.is_empty()))
}

#[async_trait]
impl PriceFetcher for WebScraper {
    async fn fetch_price(&self, url: &str, selector: &str) -> crate::Result<Option<String>> {
        let browser = Arc::clone(&self.browser);
        let config = self.config.clone();
        let url = url.to_string();
        let selector = selector.to_string();

        // headless_chrome is synchronous. If the awaiting monitor is cancelled
        // the blocking job still runs to completion and its TabGuard closes the tab.
        let result = tokio::task::spawn_blocking(move || {
            Self::fetch_blocking(&browser, &config, &url, &selector)
        })
        .await
        .map_err(|e| crate::AppError::Internal(format!("fetch task failed: {}", e)))?;

        Ok(result?)
    }
}

impl std::fmt::Debug for WebScraper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebScraper")
            .field("headless", &self.config.headless)
            .field("page_timeout", &self.config.page_timeout())
            .finish()
    }
}

use std::collections::HashSet;

use scraper::Selector;
use serde::{Deserialize, Serialize};
use url::Url;
use validator::Validate;

use crate::{AppError, Result};

/// A single page to watch. Identity is `id`; the rest is immutable after load.
#[derive(Debug, Clone, Serialize, Deserialize, Validate, PartialEq, Eq)]
pub struct Product {
    #[validate(length(min = 1, message = "product id must not be empty"))]
    pub id: String,

    #[validate(url(message = "product url must be an absolute URL"))]
    pub url: String,

    #[validate(length(min = 1, message = "price selector must not be empty"))]
    pub price_selector: String,
}

impl Product {
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        price_selector: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            price_selector: price_selector.into(),
        }
    }

    /// Field rules plus the checks `validator` can't express: http(s) scheme
    /// and a selector the scraper will accept.
    pub fn check(&self) -> Result<()> {
        self.validate()?;

        let url = Url::parse(&self.url)
            .map_err(|e| AppError::Validation(format!("{}: invalid url: {}", self.id, e)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(AppError::Validation(format!(
                "{}: unsupported url scheme '{}'",
                self.id,
                url.scheme()
            )));
        }

        Selector::parse(&self.price_selector).map_err(|e| {
            AppError::Validation(format!(
                "{}: invalid CSS selector '{}': {:?}",
                self.id, self.price_selector, e
            ))
        })?;

        Ok(())
    }
}

/// Validates every product and rejects duplicate ids. Order is preserved.
pub fn validate_catalog(products: &[Product]) -> Result<()> {
    if products.is_empty() {
        return Err(AppError::Validation("no products configured".to_string()));
    }

    let mut seen = HashSet::new();
    for (index, product) in products.iter().enumerate() {
        product
            .check()
            .map_err(|e| AppError::Validation(format!("products[{}]: {}", index, e)))?;

        if !seen.insert(product.id.as_str()) {
            return Err(AppError::Validation(format!(
                "duplicate product id '{}'",
                product.id
            )));
        }
    }

    Ok(())
}

use regex::Regex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use std::str::FromStr;

use crate::{AppError, Result};

const PRICE_PATTERN: &str = r"\d+(?:\.\d+)?";

/// Turns scraped price text such as `₹8,299`, `$12.5` or `€ 13` into a number.
///
/// Commas are treated as thousands separators and dropped; the first
/// integer-or-decimal numeral wins, so a leading currency symbol or label is
/// ignored.
pub struct PriceParser {
    price_regex: Regex,
}

impl PriceParser {
    pub fn new() -> Result<Self> {
        let price_regex = Regex::new(PRICE_PATTERN).map_err(|e| AppError::Parse {
            message: format!("invalid price pattern: {}", e),
        })?;
        Ok(Self { price_regex })
    }

    pub fn parse(&self, text: &str) -> Option<f64> {
        let cleaned = text.replace(',', "");
        let numeral = self.price_regex.find(&cleaned)?.as_str();
        Decimal::from_str(numeral).ok()?.normalize().to_f64()
    }
}

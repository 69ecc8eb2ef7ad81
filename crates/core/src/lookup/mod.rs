//! Collaborators that resolve the inputs of a scoring request.

pub mod http_forecast;

use crate::domain::market::{Forecast, PricePoint};
use anyhow::Result;
use chrono::NaiveDate;
use rust_decimal::Decimal;

#[async_trait::async_trait]
pub trait PriceLookup: Send + Sync {
    /// Most recent observed price for the item in the city.
    async fn latest_price(&self, item_name: &str, city: &str) -> Result<Option<PricePoint>>;

    /// Observed prices since `since` (inclusive), oldest first.
    async fn price_history(
        &self,
        item_name: &str,
        city: &str,
        since: NaiveDate,
    ) -> Result<Vec<Decimal>>;
}

#[async_trait::async_trait]
pub trait ForecastLookup: Send + Sync {
    fn provider_name(&self) -> &'static str;

    async fn forecast(
        &self,
        item_name: &str,
        city: &str,
        prediction_date: NaiveDate,
    ) -> Result<Option<Forecast>>;
}

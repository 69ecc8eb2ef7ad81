use crate::domain::market::Forecast;
use anyhow::ensure;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Wire shape returned by an external forecast provider for one item/city.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderForecastResponse {
    pub item_name: String,
    pub city: String,
    pub forecasts: Vec<ProviderForecastItem>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderForecastItem {
    pub prediction_date: NaiveDate,
    pub predicted_price: Decimal,
    pub confidence: f64,
    pub lower_bound: Option<Decimal>,
    pub upper_bound: Option<Decimal>,
    pub model_used: Option<String>,
}

impl ProviderForecastResponse {
    /// Validates the whole payload and returns the forecast for `target_date`, if present.
    pub fn validate_and_into_forecast(
        self,
        expected_item: &str,
        expected_city: &str,
        target_date: NaiveDate,
    ) -> anyhow::Result<Option<Forecast>> {
        ensure!(
            self.item_name.trim() == expected_item,
            "provider item mismatch: expected {expected_item}, got {}",
            self.item_name
        );
        ensure!(
            self.city.trim() == expected_city,
            "provider city mismatch: expected {expected_city}, got {}",
            self.city
        );

        let mut seen_dates = BTreeSet::<NaiveDate>::new();
        let mut found = None;
        for item in self.forecasts {
            let forecast = item.validate_and_into_forecast(&mut seen_dates)?;
            if forecast.prediction_date == target_date {
                found = Some(forecast);
            }
        }

        Ok(found)
    }
}

impl ProviderForecastItem {
    fn validate_and_into_forecast(
        self,
        seen_dates: &mut BTreeSet<NaiveDate>,
    ) -> anyhow::Result<Forecast> {
        ensure!(
            seen_dates.insert(self.prediction_date),
            "duplicate prediction_date: {}",
            self.prediction_date
        );
        ensure!(
            self.predicted_price >= Decimal::ZERO,
            "predicted_price must be non-negative (got {})",
            self.predicted_price
        );
        ensure!(
            self.confidence.is_finite() && (0.0..=1.0).contains(&self.confidence),
            "confidence must be between 0 and 1 (got {})",
            self.confidence
        );

        if let (Some(lower), Some(upper)) = (self.lower_bound, self.upper_bound) {
            ensure!(
                lower <= upper,
                "lower_bound {lower} exceeds upper_bound {upper} for {}",
                self.prediction_date
            );
        }

        let model_used = self
            .model_used
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        Ok(Forecast {
            prediction_date: self.prediction_date,
            predicted_price: self.predicted_price,
            confidence: self.confidence,
            lower_bound: self.lower_bound,
            upper_bound: self.upper_bound,
            model_used,
        })
    }
}

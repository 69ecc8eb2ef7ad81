//! Resolves scoring requests from the price and forecast collaborators.

use crate::domain::recommendation::{ItemRecommendation, ScoringRequest};
use crate::lookup::{ForecastLookup, PriceLookup};
use crate::scoring::RecommendationEngine;
use crate::time::calendar;
use crate::trend::normalized_trend;
use anyhow::Result;
use chrono::NaiveDate;

#[derive(Debug, Clone, Copy)]
pub struct ResolveOptions {
    pub target_date: NaiveDate,
    pub trend_window_days: i64,
    pub market_utc_offset_minutes: i32,
}

/// Scores one item in one city.
///
/// Returns `Ok(None)` when either the current price or the forecast for the
/// target date is missing.
pub async fn recommend_for(
    engine: &RecommendationEngine,
    prices: &dyn PriceLookup,
    forecasts: &dyn ForecastLookup,
    item_name: &str,
    city: &str,
    opts: ResolveOptions,
) -> Result<Option<ItemRecommendation>> {
    let Some(current) = prices.latest_price(item_name, city).await? else {
        tracing::debug!(item = item_name, city, "no current price");
        return Ok(None);
    };

    let Some(forecast) = forecasts
        .forecast(item_name, city, opts.target_date)
        .await?
    else {
        tracing::debug!(
            item = item_name,
            city,
            target_date = %opts.target_date,
            provider = forecasts.provider_name(),
            "no forecast for target date"
        );
        return Ok(None);
    };

    let observed_on = calendar::market_date(current.observed_at, opts.market_utc_offset_minutes)?;
    let since = calendar::trend_window_start(observed_on, opts.trend_window_days);
    let history = prices.price_history(item_name, city, since).await?;
    let trend = normalized_trend(&history);

    let request = ScoringRequest {
        current_price: current.price_per_kg,
        predicted_price: forecast.predicted_price,
        trend,
        confidence: forecast.confidence,
        item_name: item_name.to_string(),
        month: calendar::month_of(opts.target_date),
    };

    let recommendation = engine.generate_recommendation(&request);

    Ok(Some(ItemRecommendation {
        item_name: item_name.to_string(),
        city: city.to_string(),
        target_date: opts.target_date,
        current_price: current.price_per_kg,
        predicted_price: forecast.predicted_price,
        lower_bound: forecast.lower_bound,
        upper_bound: forecast.upper_bound,
        trend,
        recommendation,
    }))
}

#[derive(Debug, Clone, Default)]
pub struct BatchOutcome {
    pub items: Vec<ItemRecommendation>,
    pub skipped: usize,
    pub failed: usize,
}

/// Scores every (item, city) pair. A failing pair is logged and counted; it
/// never aborts the others.
pub async fn recommend_batch(
    engine: &RecommendationEngine,
    prices: &dyn PriceLookup,
    forecasts: &dyn ForecastLookup,
    combinations: &[(String, String)],
    opts: ResolveOptions,
) -> BatchOutcome {
    let mut out = BatchOutcome::default();

    for (item_name, city) in combinations {
        match recommend_for(engine, prices, forecasts, item_name, city, opts).await {
            Ok(Some(rec)) => out.items.push(rec),
            Ok(None) => out.skipped += 1,
            Err(err) => {
                tracing::error!(item = %item_name, %city, error = %err, "recommendation failed; continuing");
                out.failed += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::{Forecast, PricePoint};
    use crate::domain::recommendation::Action;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeMarket {
        history: HashMap<(String, String), Vec<Decimal>>,
        forecasts: HashMap<(String, String), Forecast>,
        broken_city: Option<String>,
        history_since: Mutex<Vec<NaiveDate>>,
    }

    fn key(item: &str, city: &str) -> (String, String) {
        (item.to_string(), city.to_string())
    }

    #[async_trait::async_trait]
    impl PriceLookup for FakeMarket {
        async fn latest_price(&self, item_name: &str, city: &str) -> Result<Option<PricePoint>> {
            if self.broken_city.as_deref() == Some(city) {
                anyhow::bail!("connection reset");
            }
            Ok(self
                .history
                .get(&key(item_name, city))
                .and_then(|h| h.last().copied())
                .map(|price_per_kg| PricePoint {
                    item_name: item_name.to_string(),
                    city: city.to_string(),
                    price_per_kg,
                    source: "local_market".to_string(),
                    // 2026-07-01 01:30 IST
                    observed_at: Utc.with_ymd_and_hms(2026, 6, 30, 20, 0, 0).unwrap(),
                }))
        }

        async fn price_history(
            &self,
            item_name: &str,
            city: &str,
            since: NaiveDate,
        ) -> Result<Vec<Decimal>> {
            self.history_since.lock().unwrap().push(since);
            Ok(self
                .history
                .get(&key(item_name, city))
                .cloned()
                .unwrap_or_default())
        }
    }

    #[async_trait::async_trait]
    impl ForecastLookup for FakeMarket {
        fn provider_name(&self) -> &'static str {
            "fake"
        }

        async fn forecast(
            &self,
            item_name: &str,
            city: &str,
            prediction_date: NaiveDate,
        ) -> Result<Option<Forecast>> {
            Ok(self
                .forecasts
                .get(&key(item_name, city))
                .filter(|f| f.prediction_date == prediction_date)
                .cloned())
        }
    }

    fn target() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 1).unwrap()
    }

    fn opts() -> ResolveOptions {
        ResolveOptions {
            target_date: target(),
            trend_window_days: 30,
            market_utc_offset_minutes: 330,
        }
    }

    fn forecast(predicted: Decimal, confidence: f64) -> Forecast {
        Forecast {
            prediction_date: target(),
            predicted_price: predicted,
            confidence,
            lower_bound: None,
            upper_bound: None,
            model_used: Some("prophet".to_string()),
        }
    }

    fn market() -> FakeMarket {
        let mut m = FakeMarket::default();
        // Falling tomato prices in Pune: 80,80 -> 50,50 gives trend -0.375.
        m.history.insert(
            key("Tomato", "Pune"),
            [80, 80, 50, 50].into_iter().map(Decimal::from).collect(),
        );
        m.forecasts
            .insert(key("Tomato", "Pune"), forecast(Decimal::from(40), 0.8));
        m.history.insert(
            key("Onion", "Pune"),
            [30, 30].into_iter().map(Decimal::from).collect(),
        );
        m
    }

    #[tokio::test]
    async fn resolves_request_from_collaborators() {
        let m = market();
        let engine = RecommendationEngine::default();
        let rec = recommend_for(&engine, &m, &m, "Tomato", "Pune", opts())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(rec.current_price, Decimal::from(50));
        assert_eq!(rec.predicted_price, Decimal::from(40));
        assert!((rec.trend - -0.375).abs() < 1e-12);
        // price_change -0.2, trend -0.375, July tomato +0.2, boost 1.3 => about -0.187
        assert_eq!(rec.recommendation.action, Action::BuyNow);
        assert!(rec.recommendation.score.unwrap() < -0.15);
    }

    #[tokio::test]
    async fn trend_window_follows_market_calendar() {
        let m = market();
        let engine = RecommendationEngine::default();
        recommend_for(&engine, &m, &m, "Tomato", "Pune", opts())
            .await
            .unwrap()
            .unwrap();

        // Observed 2026-07-01 in IST even though the UTC date is 2026-06-30.
        assert_eq!(
            *m.history_since.lock().unwrap(),
            vec![NaiveDate::from_ymd_opt(2026, 6, 1).unwrap()]
        );
    }

    #[tokio::test]
    async fn missing_forecast_is_skipped() {
        let m = market();
        let engine = RecommendationEngine::default();
        let rec = recommend_for(&engine, &m, &m, "Onion", "Pune", opts())
            .await
            .unwrap();
        assert!(rec.is_none());

        let rec = recommend_for(&engine, &m, &m, "Okra", "Pune", opts())
            .await
            .unwrap();
        assert!(rec.is_none());
    }

    #[tokio::test]
    async fn batch_isolates_failures() {
        let mut m = market();
        m.broken_city = Some("Delhi".to_string());
        let engine = RecommendationEngine::default();

        let combos = vec![
            key("Tomato", "Delhi"),
            key("Tomato", "Pune"),
            key("Onion", "Pune"),
        ];
        let out = recommend_batch(&engine, &m, &m, &combos, opts()).await;

        assert_eq!(out.items.len(), 1);
        assert_eq!(out.items[0].city, "Pune");
        assert_eq!(out.skipped, 1);
        assert_eq!(out.failed, 1);
    }
}

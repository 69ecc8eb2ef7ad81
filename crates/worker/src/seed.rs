use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use sabzi_core::domain::market::{Forecast, PricePoint};

const STUB_ITEMS: [&str; 4] = ["Tomato", "Onion", "Potato", "Cauliflower"];
const STUB_CITIES: [&str; 3] = ["Delhi", "Mumbai", "Pune"];
const HISTORY_DAYS: i64 = 30;
const FORECAST_DAYS: i64 = 30;

/// Deterministic demo prices and forecasts for every stub item/city.
pub fn stub_market(
    as_of_date: NaiveDate,
) -> anyhow::Result<Vec<(String, String, Vec<PricePoint>, Vec<Forecast>)>> {
    let mut out = Vec::with_capacity(STUB_ITEMS.len() * STUB_CITIES.len());

    for (city_idx, city) in STUB_CITIES.iter().enumerate() {
        for (item_idx, item) in STUB_ITEMS.iter().enumerate() {
            let base = if item_idx < 3 {
                Decimal::new(5000, 2)
            } else {
                Decimal::new(8000, 2)
            };
            let drift = Decimal::from((city_idx as i64) - 1);

            let mut prices = Vec::with_capacity(HISTORY_DAYS as usize);
            for day in (1..=HISTORY_DAYS).rev() {
                let date = as_of_date - Duration::days(day);
                let observed_at = Utc.from_utc_datetime(
                    &date
                        .and_hms_opt(6, 0, 0)
                        .ok_or_else(|| anyhow::anyhow!("invalid stub timestamp for {date}"))?,
                );
                let wiggle = Decimal::from(((day + item_idx as i64) % 5) - 2);
                let slope = drift * Decimal::from(HISTORY_DAYS - day) / Decimal::from(10);
                prices.push(PricePoint {
                    item_name: item.to_string(),
                    city: city.to_string(),
                    price_per_kg: base + wiggle + slope,
                    source: "local_market".to_string(),
                    observed_at,
                });
            }

            let mut forecasts = Vec::with_capacity(FORECAST_DAYS as usize);
            for days_ahead in 1..=FORECAST_DAYS {
                let variation = Decimal::from((days_ahead % 3) - 1) * Decimal::from(5);
                let predicted_price = base + variation;
                let confidence = (1.0 - (days_ahead as f64 / 30.0) * 0.4).max(0.5);
                forecasts.push(Forecast {
                    prediction_date: as_of_date + Duration::days(days_ahead),
                    predicted_price,
                    confidence,
                    lower_bound: Some((predicted_price * Decimal::new(9, 1)).round_dp(2)),
                    upper_bound: Some((predicted_price * Decimal::new(11, 1)).round_dp(2)),
                    model_used: Some(
                        match days_ahead {
                            1..=7 => "prophet",
                            8..=14 => "arima",
                            _ => "ensemble",
                        }
                        .to_string(),
                    ),
                });
            }

            out.push((item.to_string(), city.to_string(), prices, forecasts));
        }
    }

    Ok(out)
}

pub async fn seed_stub_market(pool: &sqlx::PgPool, as_of_date: NaiveDate) -> anyhow::Result<u64> {
    let mut affected: u64 = 0;
    for (item, city, prices, forecasts) in stub_market(as_of_date)? {
        affected += sabzi_core::storage::prices::insert_market_data(
            pool, &item, &city, &prices, &forecasts,
        )
        .await?;
    }
    Ok(affected)
}

use chrono::{DateTime, Duration, NaiveDate, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub item_name: String,
    pub city: String,
    pub price_per_kg: Decimal,
    pub source: String,
    pub observed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Forecast {
    pub prediction_date: NaiveDate,
    pub predicted_price: Decimal,
    pub confidence: f64,
    pub lower_bound: Option<Decimal>,
    pub upper_bound: Option<Decimal>,
    pub model_used: Option<String>,
}

/// Latest observation of one item in a city.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CurrentPrice {
    pub item_name: String,
    pub city: String,
    pub price_per_kg: Decimal,
    pub source: String,
    pub observed_at: DateTime<Utc>,
    /// Percent move from the previous observation; 0 without one.
    pub price_change_pct: f64,
    pub quality_rating: i16,
}

/// Percent change from `previous` to `current`. 0 when there is no previous
/// price or it is zero.
pub fn percent_change(current: Decimal, previous: Option<Decimal>) -> f64 {
    previous
        .filter(|p| !p.is_zero())
        .and_then(|p| {
            current
                .checked_sub(p)
                .and_then(|d| d.checked_div(p))
                .and_then(|r| r.checked_mul(Decimal::ONE_HUNDRED))
        })
        .and_then(|pct| pct.to_f64())
        .unwrap_or(0.0)
}

/// One observed price of an item, as listed when comparing sources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonEntry {
    pub date: NaiveDate,
    pub source: String,
    pub price_per_kg: Decimal,
    pub city: String,
    pub location: String,
    pub quality_rating: i16,
    pub observed_at: DateTime<Utc>,
}

/// Listing order for a price comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PriceSort {
    /// Grouped by source, newest first.
    #[default]
    Source,
    PriceAsc,
    PriceDesc,
}

impl std::str::FromStr for PriceSort {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "source" => Ok(PriceSort::Source),
            "price_asc" => Ok(PriceSort::PriceAsc),
            "price_desc" => Ok(PriceSort::PriceDesc),
            other => anyhow::bail!("unknown sort {other:?} (expected price_asc or price_desc)"),
        }
    }
}

/// Reorders entries already grouped by source. Ties keep their order.
pub fn sort_comparison(entries: &mut [ComparisonEntry], sort: PriceSort) {
    match sort {
        PriceSort::Source => {}
        PriceSort::PriceAsc => entries.sort_by(|a, b| a.price_per_kg.cmp(&b.price_per_kg)),
        PriceSort::PriceDesc => entries.sort_by(|a, b| b.price_per_kg.cmp(&a.price_per_kg)),
    }
}

pub const DEFAULT_COMPARISON_DAYS: i64 = 7;

/// Inclusive market-date window for a comparison. Without either bound it is
/// the last week up to `today`.
pub fn comparison_window(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    today: NaiveDate,
) -> anyhow::Result<(Option<NaiveDate>, Option<NaiveDate>)> {
    match (start, end) {
        (None, None) => Ok((
            Some(today - Duration::days(DEFAULT_COMPARISON_DAYS)),
            Some(today),
        )),
        (Some(s), Some(e)) => {
            anyhow::ensure!(s <= e, "start date {s} is after end date {e}");
            Ok((Some(s), Some(e)))
        }
        bounds => Ok(bounds),
    }
}

pub const DEFAULT_SUBMISSION_SOURCE: &str = "local";
pub const DEFAULT_QUALITY_RATING: i16 = 3;
const MAX_CLOCK_SKEW_MINUTES: i64 = 5;

/// A manually reported price, as received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSubmission {
    pub item_name: String,
    pub city: String,
    #[serde(default)]
    pub state: Option<String>,
    pub price_per_kg: Decimal,
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub quality_rating: Option<i16>,
    #[serde(default)]
    pub observed_at: Option<DateTime<Utc>>,
}

/// A validated price ready to store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPriceEntry {
    pub item_name: String,
    pub city: String,
    pub state: Option<String>,
    pub price_per_kg: Decimal,
    pub source: String,
    pub location: String,
    pub quality_rating: i16,
    pub observed_at: DateTime<Utc>,
}

impl PriceSubmission {
    pub fn into_entry(self, now: DateTime<Utc>) -> anyhow::Result<NewPriceEntry> {
        let item_name = self.item_name.trim().to_string();
        let city = self.city.trim().to_string();
        anyhow::ensure!(!item_name.is_empty(), "item_name must be non-empty");
        anyhow::ensure!(!city.is_empty(), "city must be non-empty");

        // NUMERIC(8, 2)
        let price_per_kg = self.price_per_kg.round_dp(2);
        anyhow::ensure!(
            price_per_kg >= Decimal::ZERO,
            "price_per_kg must be >= 0 (got {price_per_kg})"
        );
        anyhow::ensure!(
            price_per_kg < Decimal::from(1_000_000),
            "price_per_kg too large (got {price_per_kg})"
        );

        let quality_rating = self.quality_rating.unwrap_or(DEFAULT_QUALITY_RATING);
        anyhow::ensure!(
            (1..=5).contains(&quality_rating),
            "quality_rating must be 1..=5 (got {quality_rating})"
        );

        let observed_at = self.observed_at.unwrap_or(now);
        anyhow::ensure!(
            observed_at <= now + Duration::minutes(MAX_CLOCK_SKEW_MINUTES),
            "observed_at {observed_at} is in the future"
        );

        let source = self
            .source
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SUBMISSION_SOURCE.to_string());

        Ok(NewPriceEntry {
            item_name,
            city,
            state: self
                .state
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty()),
            price_per_kg,
            source,
            location: self.location.map(|s| s.trim().to_string()).unwrap_or_default(),
            quality_rating,
            observed_at,
        })
    }
}

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    BuyNow,
    Wait,
}

impl Action {
    pub fn as_str(self) -> &'static str {
        match self {
            Action::BuyNow => "BuyNow",
            Action::Wait => "Wait",
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Action {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BuyNow" => Ok(Action::BuyNow),
            "Wait" => Ok(Action::Wait),
            other => anyhow::bail!("unknown action: {other}"),
        }
    }
}

/// Everything the scoring engine needs for one item in one market.
///
/// Built per call from a price lookup and a forecast lookup; never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringRequest {
    pub current_price: Decimal,
    pub predicted_price: Decimal,
    /// Historical direction in [-1, 1]; -1 is strongly falling.
    pub trend: f64,
    /// Forecast model certainty in [0, 1].
    pub confidence: f64,
    /// Case-sensitive key into the seasonality table.
    pub item_name: String,
    /// Calendar month, 1..=12.
    pub month: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub action: Action,
    pub reason: String,
    /// Composite score; only the score-based path produces one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f64>,
    pub potential_savings: Decimal,
    pub confidence: f64,
}

/// A recommendation resolved for a concrete item/city/date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecommendation {
    pub item_name: String,
    pub city: String,
    pub target_date: NaiveDate,
    pub current_price: Decimal,
    pub predicted_price: Decimal,
    pub lower_bound: Option<Decimal>,
    pub upper_bound: Option<Decimal>,
    pub trend: f64,
    pub recommendation: Recommendation,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecommendationSnapshot {
    pub as_of_date: NaiveDate,
    pub generated_at: DateTime<Utc>,
    pub evaluator: String,
    pub items: Vec<ItemRecommendation>,
}

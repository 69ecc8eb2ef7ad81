//! Weighted composite scoring, the primary evaluator.

use crate::domain::recommendation::{Action, Recommendation, ScoringRequest};
use crate::scoring::error::ScoringError;
use crate::scoring::seasonality::SeasonalityTable;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

pub const WAIT_THRESHOLD: f64 = 0.15;
pub const BUY_THRESHOLD: f64 = -0.15;

pub const REASON_RISING: &str = "price expected to rise or remain stable";
pub const REASON_STABLE: &str = "price relatively stable, no strong trend";

/// Additive weights of the composite score.
///
/// They sum to 0.8; confidence enters multiplicatively through
/// [`confidence_boost`] rather than as a fourth term.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    pub price_change: f64,
    pub trend: f64,
    pub seasonality: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            price_change: 0.4,
            trend: 0.25,
            seasonality: 0.15,
        }
    }
}

/// Per-component breakdown of a score, kept for logging and tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreBreakdown {
    pub price_change: f64,
    pub trend: f64,
    pub seasonality: f64,
    pub confidence_boost: f64,
    pub final_score: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ScoreBand {
    Wait,
    Rising,
    Stable,
}

/// Thresholds are strict: a score of exactly +/-0.15 is "stable".
pub(crate) fn band_for_score(score: f64) -> ScoreBand {
    if score > WAIT_THRESHOLD {
        ScoreBand::Wait
    } else if score < BUY_THRESHOLD {
        ScoreBand::Rising
    } else {
        ScoreBand::Stable
    }
}

/// Relative move from current to predicted price, unclamped. Zero when the
/// current price is not positive.
pub fn price_change_score(
    current_price: Decimal,
    predicted_price: Decimal,
) -> Result<f64, ScoringError> {
    if current_price <= Decimal::ZERO {
        return Ok(0.0);
    }

    predicted_price
        .checked_sub(current_price)
        .and_then(|delta| delta.checked_div(current_price))
        .and_then(|ratio| ratio.to_f64())
        .ok_or(ScoringError::Overflow("price change"))
}

/// Low-confidence forecasts get half weight; from 0.5 up the weight grows
/// linearly to 1.5 at full confidence.
pub fn confidence_boost(confidence: f64) -> f64 {
    if confidence < 0.5 {
        0.5
    } else {
        1.0 + (confidence - 0.5)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreEngine {
    weights: ScoreWeights,
    seasonality: SeasonalityTable,
}

impl Default for ScoreEngine {
    fn default() -> Self {
        Self::new(SeasonalityTable::default())
    }
}

impl ScoreEngine {
    pub fn new(seasonality: SeasonalityTable) -> Self {
        Self {
            weights: ScoreWeights::default(),
            seasonality,
        }
    }

    pub fn with_weights(mut self, weights: ScoreWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn seasonality(&self) -> &SeasonalityTable {
        &self.seasonality
    }

    pub fn breakdown(&self, request: &ScoringRequest) -> Result<ScoreBreakdown, ScoringError> {
        validate(request)?;

        let price_change = price_change_score(request.current_price, request.predicted_price)?;
        let trend = request.trend;
        let seasonality = self
            .seasonality
            .seasonal_factor(&request.item_name, request.month);
        let boost = confidence_boost(request.confidence);

        let final_score = (price_change * self.weights.price_change
            + trend * self.weights.trend
            + seasonality * self.weights.seasonality)
            * boost;

        if !final_score.is_finite() {
            return Err(ScoringError::NonFinite {
                field: "score",
                value: final_score,
            });
        }

        Ok(ScoreBreakdown {
            price_change,
            trend,
            seasonality,
            confidence_boost: boost,
            final_score,
        })
    }

    pub fn score_and_recommend(
        &self,
        request: &ScoringRequest,
    ) -> Result<Recommendation, ScoringError> {
        let breakdown = self.breakdown(request)?;

        tracing::debug!(
            item = %request.item_name,
            month = request.month,
            price_change = breakdown.price_change,
            trend = breakdown.trend,
            seasonality = breakdown.seasonality,
            confidence_boost = breakdown.confidence_boost,
            score = breakdown.final_score,
            "computed recommendation score"
        );

        let (action, reason, potential_savings) = match band_for_score(breakdown.final_score) {
            ScoreBand::Wait => {
                let savings = request
                    .current_price
                    .checked_sub(request.predicted_price)
                    .ok_or(ScoringError::Overflow("potential savings"))?
                    .abs();
                (
                    Action::Wait,
                    format!(
                        "predicted to drop by {:.1}%",
                        breakdown.price_change.abs() * 100.0
                    ),
                    savings,
                )
            }
            ScoreBand::Rising => (Action::BuyNow, REASON_RISING.to_string(), Decimal::ZERO),
            ScoreBand::Stable => (Action::BuyNow, REASON_STABLE.to_string(), Decimal::ZERO),
        };

        Ok(Recommendation {
            action,
            reason,
            score: Some(breakdown.final_score),
            potential_savings,
            confidence: request.confidence,
        })
    }
}

fn validate(request: &ScoringRequest) -> Result<(), ScoringError> {
    if !request.trend.is_finite() {
        return Err(ScoringError::NonFinite {
            field: "trend",
            value: request.trend,
        });
    }
    if !request.confidence.is_finite() {
        return Err(ScoringError::NonFinite {
            field: "confidence",
            value: request.confidence,
        });
    }
    if !(0.0..=1.0).contains(&request.confidence) {
        return Err(ScoringError::ConfidenceOutOfRange(request.confidence));
    }
    if request.predicted_price < Decimal::ZERO {
        return Err(ScoringError::NegativePredictedPrice(request.predicted_price));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(current: Decimal, predicted: Decimal, trend: f64, confidence: f64) -> ScoringRequest {
        ScoringRequest {
            current_price: current,
            predicted_price: predicted,
            trend,
            confidence,
            item_name: "Tomato".to_string(),
            month: 7,
        }
    }

    #[test]
    fn worked_example_buys_now() {
        let engine = ScoreEngine::default();
        let req = request(Decimal::new(5000, 2), Decimal::new(4000, 2), -0.4, 0.8);

        let breakdown = engine.breakdown(&req).unwrap();
        assert!((breakdown.price_change - -0.2).abs() < 1e-12);
        assert_eq!(breakdown.seasonality, 0.2);
        assert!((breakdown.confidence_boost - 1.3).abs() < 1e-12);
        assert!((breakdown.final_score - -0.195).abs() < 1e-9);

        let rec = engine.score_and_recommend(&req).unwrap();
        assert_eq!(rec.action, Action::BuyNow);
        assert_eq!(rec.reason, REASON_RISING);
        assert_eq!(rec.potential_savings, Decimal::ZERO);
        assert_eq!(rec.confidence, 0.8);
        assert_eq!(rec.score, Some(breakdown.final_score));
    }

    #[test]
    fn high_score_waits_and_reports_savings() {
        // +40% predicted move, rising trend, confident forecast.
        let engine = ScoreEngine::default();
        let req = request(Decimal::new(50, 0), Decimal::new(70, 0), 0.5, 0.9);
        let rec = engine.score_and_recommend(&req).unwrap();

        assert_eq!(rec.action, Action::Wait);
        assert_eq!(rec.reason, "predicted to drop by 40.0%");
        assert_eq!(rec.potential_savings, Decimal::new(20, 0));
        assert!(rec.score.unwrap() > WAIT_THRESHOLD);
    }

    #[test]
    fn near_zero_score_is_stable() {
        let engine = ScoreEngine::default();
        let mut req = request(Decimal::new(50, 0), Decimal::new(50, 0), 0.0, 0.6);
        req.item_name = "Okra".to_string();
        let rec = engine.score_and_recommend(&req).unwrap();
        assert_eq!(rec.action, Action::BuyNow);
        assert_eq!(rec.reason, REASON_STABLE);
        assert_eq!(rec.score, Some(0.0));
    }

    #[test]
    fn thresholds_are_strict() {
        assert_eq!(band_for_score(0.15), ScoreBand::Stable);
        assert_eq!(band_for_score(-0.15), ScoreBand::Stable);
        assert_eq!(band_for_score(0.150_000_1), ScoreBand::Wait);
        assert_eq!(band_for_score(-0.150_000_1), ScoreBand::Rising);
    }

    #[test]
    fn confidence_boost_shape() {
        assert_eq!(confidence_boost(0.0), 0.5);
        assert_eq!(confidence_boost(0.49), 0.5);
        assert_eq!(confidence_boost(0.5), 1.0);
        assert_eq!(confidence_boost(1.0), 1.5);
    }

    #[test]
    fn higher_confidence_never_shrinks_the_score() {
        let engine = ScoreEngine::default();
        for (current, predicted, trend) in [(50, 40, -0.4), (50, 65, 0.3), (20, 21, 0.9), (80, 30, -1.0)] {
            let low = engine
                .breakdown(&request(Decimal::from(current), Decimal::from(predicted), trend, 0.3))
                .unwrap();
            let high = engine
                .breakdown(&request(Decimal::from(current), Decimal::from(predicted), trend, 0.9))
                .unwrap();
            assert!(high.final_score.abs() >= low.final_score.abs());
        }
    }

    #[test]
    fn price_change_is_unclamped_and_guarded() {
        assert!((price_change_score(Decimal::from(10), Decimal::from(40)).unwrap() - 3.0).abs() < 1e-12);
        assert_eq!(price_change_score(Decimal::ZERO, Decimal::from(40)).unwrap(), 0.0);
        assert_eq!(price_change_score(Decimal::from(-5), Decimal::from(40)).unwrap(), 0.0);
    }

    #[test]
    fn invalid_inputs_are_errors() {
        let engine = ScoreEngine::default();
        let base = request(Decimal::from(50), Decimal::from(45), 0.0, 0.7);

        let nan_trend = ScoringRequest { trend: f64::NAN, ..base.clone() };
        assert!(matches!(
            engine.score_and_recommend(&nan_trend),
            Err(ScoringError::NonFinite { field: "trend", .. })
        ));

        let bad_conf = ScoringRequest { confidence: 1.5, ..base.clone() };
        assert_eq!(
            engine.score_and_recommend(&bad_conf),
            Err(ScoringError::ConfidenceOutOfRange(1.5))
        );

        let negative = ScoringRequest { predicted_price: Decimal::from(-1), ..base };
        assert!(matches!(
            engine.score_and_recommend(&negative),
            Err(ScoringError::NegativePredictedPrice(_))
        ));
    }

    #[test]
    fn decimal_overflow_is_an_error() {
        let engine = ScoreEngine::default();
        let req = request(Decimal::new(1, 28), Decimal::MAX, 0.0, 0.7);
        assert_eq!(
            engine.score_and_recommend(&req),
            Err(ScoringError::Overflow("price change"))
        );
    }
}

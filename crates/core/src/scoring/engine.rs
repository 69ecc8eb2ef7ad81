use crate::config::Settings;
use crate::domain::recommendation::{Action, Recommendation, ScoringRequest};
use crate::scoring::rules::RuleEngine;
use crate::scoring::score::ScoreEngine;
use crate::scoring::seasonality::SeasonalityTable;
use rust_decimal::Decimal;

pub const DEFAULT_CONFIDENCE: f64 = 0.5;
pub const REASON_DEFAULT_WAIT: &str = "expected price reduction";
pub const REASON_DEFAULT_BUY: &str = "price likely to increase or stay same";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvaluatorKind {
    #[default]
    Score,
    Rule,
    Disabled,
}

impl EvaluatorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EvaluatorKind::Score => "score",
            EvaluatorKind::Rule => "rule",
            EvaluatorKind::Disabled => "none",
        }
    }
}

impl std::str::FromStr for EvaluatorKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "score" | "score_based" => Ok(EvaluatorKind::Score),
            "rule" | "rule_based" => Ok(EvaluatorKind::Rule),
            "none" | "default" => Ok(EvaluatorKind::Disabled),
            other => anyhow::bail!("unknown evaluator {other:?} (expected score, rule or none)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Evaluator {
    ScoreBased(ScoreEngine),
    RuleBased(RuleEngine),
}

/// Turns scoring requests into recommendations; never fails.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendationEngine {
    evaluator: Option<Evaluator>,
}

impl Default for RecommendationEngine {
    fn default() -> Self {
        Self::new(Some(Evaluator::ScoreBased(ScoreEngine::default())))
    }
}

impl RecommendationEngine {
    pub fn new(evaluator: Option<Evaluator>) -> Self {
        Self { evaluator }
    }

    pub fn from_kind(kind: EvaluatorKind, seasonality: SeasonalityTable) -> Self {
        let evaluator = match kind {
            EvaluatorKind::Score => Some(Evaluator::ScoreBased(ScoreEngine::new(seasonality))),
            EvaluatorKind::Rule => Some(Evaluator::RuleBased(RuleEngine::default())),
            EvaluatorKind::Disabled => None,
        };
        Self::new(evaluator)
    }

    pub fn from_settings(settings: &Settings) -> anyhow::Result<Self> {
        Self::from_settings_with_kind(settings, settings.evaluator)
    }

    /// Like [`Self::from_settings`], with the configured evaluator overridden.
    pub fn from_settings_with_kind(
        settings: &Settings,
        kind: EvaluatorKind,
    ) -> anyhow::Result<Self> {
        let seasonality = match settings.seasonality_table_path.as_deref() {
            Some(path) => SeasonalityTable::load_with_overrides(path)?,
            None => SeasonalityTable::default(),
        };
        Ok(Self::from_kind(kind, seasonality))
    }

    pub fn kind(&self) -> EvaluatorKind {
        match &self.evaluator {
            Some(Evaluator::ScoreBased(_)) => EvaluatorKind::Score,
            Some(Evaluator::RuleBased(_)) => EvaluatorKind::Rule,
            None => EvaluatorKind::Disabled,
        }
    }

    pub fn generate_recommendation(&self, request: &ScoringRequest) -> Recommendation {
        match &self.evaluator {
            Some(Evaluator::ScoreBased(engine)) => match engine.score_and_recommend(request) {
                Ok(rec) => rec,
                Err(err) => {
                    tracing::error!(
                        item = %request.item_name,
                        error = %err,
                        "score-based evaluation failed; using default recommendation"
                    );
                    default_recommendation(request.current_price, request.predicted_price)
                }
            },
            Some(Evaluator::RuleBased(engine)) => engine.recommend(request),
            None => {
                tracing::warn!(item = %request.item_name, "no scoring engine configured");
                default_recommendation(request.current_price, request.predicted_price)
            }
        }
    }
}

/// Fixed-threshold recommendation used when no evaluator produced a result.
pub fn default_recommendation(current_price: Decimal, predicted_price: Decimal) -> Recommendation {
    let wait_below = current_price.checked_mul(Decimal::new(95, 2));
    let expects_drop = wait_below.is_some_and(|limit| predicted_price < limit);

    let (action, reason, potential_savings) = if expects_drop {
        let savings = current_price
            .checked_sub(predicted_price)
            .unwrap_or(Decimal::ZERO)
            .max(Decimal::ZERO);
        (Action::Wait, REASON_DEFAULT_WAIT, savings)
    } else {
        (Action::BuyNow, REASON_DEFAULT_BUY, Decimal::ZERO)
    };

    Recommendation {
        action,
        reason: reason.to_string(),
        score: None,
        potential_savings,
        confidence: DEFAULT_CONFIDENCE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scoring::score::REASON_RISING;

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
    fn score_based_is_the_default_path() {
        let engine = RecommendationEngine::default();
        assert_eq!(engine.kind(), EvaluatorKind::Score);

        let rec = engine.generate_recommendation(&request(
            Decimal::new(5000, 2),
            Decimal::new(4000, 2),
            -0.4,
            0.8,
        ));
        assert_eq!(rec.action, Action::BuyNow);
        assert_eq!(rec.reason, REASON_RISING);
        assert!(rec.score.is_some());
    }

    #[test]
    fn scoring_failure_falls_back_to_default() {
        let engine = RecommendationEngine::default();
        // A NaN trend makes the score path fail.
        let rec = engine.generate_recommendation(&request(
            Decimal::from(50),
            Decimal::from(45),
            f64::NAN,
            0.9,
        ));

        assert_eq!(rec.action, Action::Wait);
        assert_eq!(rec.reason, REASON_DEFAULT_WAIT);
        assert_eq!(rec.potential_savings, Decimal::new(500, 2));
        assert_eq!(rec.confidence, 0.5);
        assert_eq!(rec.score, None);
    }

    #[test]
    fn missing_engine_falls_back_to_default() {
        let engine = RecommendationEngine::new(None);
        let rec = engine.generate_recommendation(&request(
            Decimal::from(50),
            Decimal::from(48),
            0.0,
            0.9,
        ));
        assert_eq!(rec.action, Action::BuyNow);
        assert_eq!(rec.reason, REASON_DEFAULT_BUY);
        assert_eq!(rec.potential_savings, Decimal::ZERO);
        assert_eq!(rec.confidence, 0.5);
    }

    #[test]
    fn default_threshold_is_strict() {
        // 47.5 is exactly 95% of 50.
        let rec = default_recommendation(Decimal::from(50), Decimal::new(475, 1));
        assert_eq!(rec.action, Action::BuyNow);
    }

    #[test]
    fn default_savings_never_negative() {
        let rec = default_recommendation(Decimal::from(-10), Decimal::new(-98, 1));
        assert!(rec.potential_savings >= Decimal::ZERO);
    }

    #[test]
    fn rule_based_engine_is_selectable() {
        let engine = RecommendationEngine::from_kind(EvaluatorKind::Rule, SeasonalityTable::default());
        assert_eq!(engine.kind(), EvaluatorKind::Rule);
        let rec = engine.generate_recommendation(&request(
            Decimal::from(100),
            Decimal::from(80),
            0.0,
            0.7,
        ));
        assert_eq!(rec.action, Action::Wait);
        assert_eq!(rec.reason, "significant price drop expected");
        assert_eq!(rec.potential_savings, Decimal::from(20));
        assert_eq!(rec.confidence, 0.7);
        assert_eq!(rec.score, None);
    }

    #[test]
    fn settings_kind_can_be_overridden() {
        let settings = Settings::default();
        assert_eq!(
            RecommendationEngine::from_settings(&settings).unwrap().kind(),
            EvaluatorKind::Score
        );
        let engine =
            RecommendationEngine::from_settings_with_kind(&settings, EvaluatorKind::Rule).unwrap();
        assert_eq!(engine.kind(), EvaluatorKind::Rule);

        let missing = Settings {
            seasonality_table_path: Some("/nonexistent/seasonality.json".to_string()),
            ..Settings::default()
        };
        assert!(
            RecommendationEngine::from_settings_with_kind(&missing, EvaluatorKind::Disabled)
                .is_err()
        );
    }

    #[test]
    fn evaluator_kind_parses() {
        assert_eq!("score".parse::<EvaluatorKind>().unwrap(), EvaluatorKind::Score);
        assert_eq!(" Rule ".parse::<EvaluatorKind>().unwrap(), EvaluatorKind::Rule);
        assert_eq!("none".parse::<EvaluatorKind>().unwrap(), EvaluatorKind::Disabled);
        assert!("llm".parse::<EvaluatorKind>().is_err());
    }

    #[test]
    fn repeated_calls_are_identical() {
        let engine = RecommendationEngine::default();
        let req = request(Decimal::new(3275, 2), Decimal::new(2990, 2), 0.12, 0.66);
        let first = engine.generate_recommendation(&req);
        for _ in 0..100 {
            let again = engine.generate_recommendation(&req);
            assert_eq!(again, first);
            assert_eq!(
                again.score.map(f64::to_bits),
                first.score.map(f64::to_bits)
            );
        }
    }

    #[test]
    fn outputs_stay_bounded_across_inputs() {
        let engines = [
            RecommendationEngine::default(),
            RecommendationEngine::from_kind(EvaluatorKind::Rule, SeasonalityTable::default()),
            RecommendationEngine::new(None),
        ];
        let prices = [0, 1, 10, 47, 50, 53, 100, 250];
        let trends = [-1.0, -0.5, -0.3, 0.0, 0.3, 0.5, 1.0];
        let confidences = [0.0, 0.3, 0.5, 0.8, 1.0];
        let items = ["Tomato", "Onion", "Potato", "Okra"];

        for engine in &engines {
            for &current in &prices {
                for &predicted in &prices {
                    for &trend in &trends {
                        for &confidence in &confidences {
                            for (i, item) in items.iter().enumerate() {
                                let req = ScoringRequest {
                                    current_price: Decimal::from(current),
                                    predicted_price: Decimal::from(predicted),
                                    trend,
                                    confidence,
                                    item_name: item.to_string(),
                                    month: (i as u32 * 3) % 12 + 1,
                                };
                                let rec = engine.generate_recommendation(&req);
                                assert!(rec.potential_savings >= Decimal::ZERO);
                                assert!((0.0..=1.0).contains(&rec.confidence));
                                assert!(matches!(rec.action, Action::BuyNow | Action::Wait));
                            }
                        }
                    }
                }
            }
        }
    }
}

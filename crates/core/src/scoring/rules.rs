use crate::domain::recommendation::{Action, Recommendation, ScoringRequest};
use rust_decimal::Decimal;

pub const NO_RULE_MATCHED: &str = "no rule matched";

/// A rule predicate expressed as data.
///
/// Price thresholds are fractions of the current price and are compared in
/// exact decimal arithmetic.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Condition {
    /// `current - predicted > current * fraction`. Never matches at a zero current price.
    PriceDropAbove(Decimal),
    /// `predicted > current * ratio`.
    PredictedAbove(Decimal),
    /// `trend < threshold`.
    TrendBelow(f64),
    /// `trend > threshold`.
    TrendAbove(f64),
}

impl Condition {
    pub fn matches(&self, current_price: Decimal, predicted_price: Decimal, trend: f64) -> bool {
        match *self {
            Condition::PriceDropAbove(fraction) => {
                if current_price.is_zero() {
                    return false;
                }
                match (
                    current_price.checked_sub(predicted_price),
                    current_price.checked_mul(fraction),
                ) {
                    (Some(drop), Some(limit)) => drop > limit,
                    _ => false,
                }
            }
            Condition::PredictedAbove(ratio) => current_price
                .checked_mul(ratio)
                .is_some_and(|limit| predicted_price > limit),
            Condition::TrendBelow(threshold) => trend < threshold,
            Condition::TrendAbove(threshold) => trend > threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub condition: Condition,
    pub action: Action,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub action: Action,
    pub reason: String,
}

/// Ordered rule list; the first matching rule decides.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleEngine {
    rules: Vec<Rule>,
}

impl Default for RuleEngine {
    fn default() -> Self {
        let mut engine = Self::empty();
        engine.add_rule(
            Condition::PriceDropAbove(Decimal::new(15, 2)),
            Action::Wait,
            "significant price drop expected",
        );
        engine.add_rule(
            Condition::PredictedAbove(Decimal::new(110, 2)),
            Action::BuyNow,
            "price increase expected",
        );
        engine.add_rule(
            Condition::TrendBelow(-0.30),
            Action::Wait,
            "strong downward trend detected",
        );
        engine.add_rule(
            Condition::TrendAbove(0.30),
            Action::BuyNow,
            "strong upward trend detected",
        );
        engine
    }
}

impl RuleEngine {
    pub fn empty() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, condition: Condition, action: Action, reason: impl Into<String>) {
        self.rules.push(Rule {
            condition,
            action,
            reason: reason.into(),
        });
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn evaluate(
        &self,
        current_price: Decimal,
        predicted_price: Decimal,
        trend: f64,
    ) -> RuleOutcome {
        self.rules
            .iter()
            .find(|rule| rule.condition.matches(current_price, predicted_price, trend))
            .map(|rule| RuleOutcome {
                action: rule.action,
                reason: rule.reason.clone(),
            })
            .unwrap_or_else(|| RuleOutcome {
                action: Action::BuyNow,
                reason: NO_RULE_MATCHED.to_string(),
            })
    }

    /// Evaluates the rules and shapes the outcome into a full recommendation.
    pub fn recommend(&self, request: &ScoringRequest) -> Recommendation {
        let outcome = self.evaluate(
            request.current_price,
            request.predicted_price,
            request.trend,
        );

        let potential_savings = match outcome.action {
            Action::Wait => request
                .current_price
                .checked_sub(request.predicted_price)
                .unwrap_or(Decimal::ZERO)
                .max(Decimal::ZERO),
            Action::BuyNow => Decimal::ZERO,
        };

        let confidence = if request.confidence.is_finite() {
            request.confidence.clamp(0.0, 1.0)
        } else {
            0.5
        };

        Recommendation {
            action: outcome.action,
            reason: outcome.reason,
            score: None,
            potential_savings,
            confidence,
        }
    }
}

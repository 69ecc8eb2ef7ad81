use thiserror::Error;

/// Failures of the weighted-score path. The orchestrator absorbs all of them.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ScoringError {
    #[error("{field} must be finite (got {value})")]
    NonFinite { field: &'static str, value: f64 },
    #[error("confidence must be between 0 and 1 (got {0})")]
    ConfidenceOutOfRange(f64),
    #[error("predicted_price must be non-negative (got {0})")]
    NegativePredictedPrice(rust_decimal::Decimal),
    #[error("decimal overflow while computing {0}")]
    Overflow(&'static str),
}

pub mod engine;
pub mod error;
pub mod rules;
pub mod score;
pub mod seasonality;

pub use engine::{Evaluator, EvaluatorKind, RecommendationEngine};
pub use error::ScoringError;

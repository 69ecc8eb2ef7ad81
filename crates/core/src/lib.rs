pub mod domain;
pub mod lookup;
pub mod scoring;
pub mod service;
pub mod storage;
pub mod time;
pub mod trend;

pub mod config {
    use anyhow::Context;

    use crate::scoring::engine::EvaluatorKind;

    const DEFAULT_TREND_WINDOW_DAYS: i64 = 30;
    // IST (UTC+05:30); the tracked markets are Indian city mandis.
    const DEFAULT_MARKET_UTC_OFFSET_MINUTES: i32 = 330;

    #[derive(Debug, Clone)]
    pub struct Settings {
        pub database_url: Option<String>,
        pub sentry_dsn: Option<String>,
        pub forecast_provider_base_url: Option<String>,
        pub forecast_provider_api_key: Option<String>,
        pub evaluator: EvaluatorKind,
        pub seasonality_table_path: Option<String>,
        pub trend_window_days: i64,
        pub market_utc_offset_minutes: i32,
    }

    impl Settings {
        pub fn from_env() -> anyhow::Result<Self> {
            let evaluator = match std::env::var("RECOMMENDATION_EVALUATOR") {
                Ok(s) if !s.trim().is_empty() => s
                    .parse::<EvaluatorKind>()
                    .context("invalid RECOMMENDATION_EVALUATOR")?,
                _ => EvaluatorKind::default(),
            };

            let trend_window_days = std::env::var("TREND_WINDOW_DAYS")
                .ok()
                .and_then(|s| s.parse::<i64>().ok())
                .unwrap_or(DEFAULT_TREND_WINDOW_DAYS);
            anyhow::ensure!(
                trend_window_days >= 2,
                "TREND_WINDOW_DAYS must be >= 2 (got {trend_window_days})"
            );

            let market_utc_offset_minutes = std::env::var("MARKET_UTC_OFFSET_MINUTES")
                .ok()
                .and_then(|s| s.parse::<i32>().ok())
                .unwrap_or(DEFAULT_MARKET_UTC_OFFSET_MINUTES);

            Ok(Self {
                database_url: std::env::var("DATABASE_URL").ok(),
                sentry_dsn: std::env::var("SENTRY_DSN").ok(),
                forecast_provider_base_url: std::env::var("FORECAST_PROVIDER_BASE_URL")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                forecast_provider_api_key: std::env::var("FORECAST_PROVIDER_API_KEY").ok(),
                evaluator,
                seasonality_table_path: std::env::var("SEASONALITY_TABLE_PATH")
                    .ok()
                    .filter(|s| !s.trim().is_empty()),
                trend_window_days,
                market_utc_offset_minutes,
            })
        }

        pub fn require_database_url(&self) -> anyhow::Result<&str> {
            self.database_url
                .as_deref()
                .context("DATABASE_URL is required")
        }

        pub fn require_forecast_provider_base_url(&self) -> anyhow::Result<&str> {
            self.forecast_provider_base_url
                .as_deref()
                .context("FORECAST_PROVIDER_BASE_URL is required")
        }
    }

    impl Default for Settings {
        fn default() -> Self {
            Self {
                database_url: None,
                sentry_dsn: None,
                forecast_provider_base_url: None,
                forecast_provider_api_key: None,
                evaluator: EvaluatorKind::default(),
                seasonality_table_path: None,
                trend_window_days: DEFAULT_TREND_WINDOW_DAYS,
                market_utc_offset_minutes: DEFAULT_MARKET_UTC_OFFSET_MINUTES,
            }
        }
    }
}

use crate::config::Settings;
use crate::domain::contract::ProviderForecastResponse;
use crate::domain::market::Forecast;
use crate::lookup::ForecastLookup;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest::StatusCode;
use serde_json::Value;
use std::time::Duration;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PATH: &str = "/v1/forecasts";
const DEFAULT_RETRIES: u32 = 3;
const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Whether a failed fetch may succeed if repeated.
#[derive(Debug)]
enum FetchFailure {
    Transient(anyhow::Error),
    Permanent(anyhow::Error),
}

impl FetchFailure {
    fn into_inner(self) -> anyhow::Error {
        match self {
            FetchFailure::Transient(e) | FetchFailure::Permanent(e) => e,
        }
    }
}

fn is_retryable_status(status: StatusCode) -> bool {
    status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS
}

/// Forecast collaborator reached over HTTP with a JSON body.
#[derive(Debug, Clone)]
pub struct HttpForecastProvider {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    path: String,
    retries: u32,
    backoff: Duration,
}

impl HttpForecastProvider {
    pub fn from_settings(settings: &Settings) -> Result<Self> {
        let base_url = settings.require_forecast_provider_base_url()?.to_string();
        let api_key = settings.forecast_provider_api_key.clone();

        let timeout_secs = std::env::var("FORECAST_PROVIDER_TIMEOUT_SECS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        let retries = std::env::var("FORECAST_PROVIDER_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .unwrap_or(DEFAULT_RETRIES)
            .max(1);

        let path = std::env::var("FORECAST_PROVIDER_PATH")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_PATH.to_string());

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .context("failed to build forecast provider http client")?;

        Ok(Self {
            http,
            base_url,
            api_key,
            path,
            retries,
            backoff: DEFAULT_BACKOFF,
        })
    }

    fn url(&self) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };

        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    fn headers(&self) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(api_key) = &self.api_key {
            headers.insert("x-api-key", HeaderValue::from_str(api_key)?);
        }
        Ok(headers)
    }

    async fn fetch_once(
        &self,
        item_name: &str,
        city: &str,
        prediction_date: NaiveDate,
    ) -> std::result::Result<Option<ProviderForecastResponse>, FetchFailure> {
        let headers = self.headers().map_err(FetchFailure::Permanent)?;
        let res = self
            .http
            .get(self.url())
            .headers(headers)
            .query(&[
                ("item", item_name.to_string()),
                ("city", city.to_string()),
                ("date", prediction_date.to_string()),
            ])
            .send()
            .await
            .context("forecast provider request failed")
            .map_err(FetchFailure::Transient)?;

        let status = res.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let text = res
            .text()
            .await
            .context("failed to read forecast provider response")
            .map_err(FetchFailure::Transient)?;

        if !status.is_success() {
            let err = anyhow::anyhow!("forecast provider HTTP {status}: {text}");
            return Err(if is_retryable_status(status) {
                FetchFailure::Transient(err)
            } else {
                FetchFailure::Permanent(err)
            });
        }

        let raw_json = serde_json::from_str::<Value>(&text)
            .with_context(|| format!("forecast provider response is not valid JSON: {text}"))
            .map_err(FetchFailure::Permanent)?;

        parse_response(raw_json)
            .map(Some)
            .map_err(FetchFailure::Permanent)
    }
}

fn parse_response(raw_json: Value) -> Result<ProviderForecastResponse> {
    serde_json::from_value::<ProviderForecastResponse>(raw_json)
        .context("failed to parse forecast provider response")
}

#[async_trait::async_trait]
impl ForecastLookup for HttpForecastProvider {
    fn provider_name(&self) -> &'static str {
        "external_http_json"
    }

    async fn forecast(
        &self,
        item_name: &str,
        city: &str,
        prediction_date: NaiveDate,
    ) -> Result<Option<Forecast>> {
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            match self.fetch_once(item_name, city, prediction_date).await {
                Ok(Some(resp)) => {
                    return resp.validate_and_into_forecast(item_name, city, prediction_date);
                }
                Ok(None) => return Ok(None),
                Err(FetchFailure::Permanent(err)) => return Err(err),
                Err(failure) => {
                    let err = failure.into_inner();
                    if attempt >= self.retries {
                        return Err(err);
                    }
                    let backoff = self.backoff * 2u32.pow((attempt - 1).min(16));
                    tracing::warn!(
                        attempt,
                        ?backoff,
                        item = item_name,
                        city,
                        error = %err,
                        "forecast provider fetch failed; retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn provider(base_url: &str, path: &str) -> HttpForecastProvider {
        HttpForecastProvider {
            http: reqwest::Client::new(),
            base_url: base_url.to_string(),
            api_key: Some("secret".to_string()),
            path: path.to_string(),
            retries: 1,
            backoff: Duration::from_millis(1),
        }
    }

    /// Serves `status` with `body` to every connection; returns the base URL
    /// and a request counter.
    async fn canned_server(status: u16, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                while !buf.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut chunk).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => buf.extend_from_slice(&chunk[..n]),
                    }
                }
                let response = format!(
                    "HTTP/1.1 {status} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{addr}"), hits)
    }

    fn july_2() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 7, 2).unwrap()
    }

    #[test]
    fn only_server_errors_and_throttling_are_retryable() {
        assert!(is_retryable_status(StatusCode::INTERNAL_SERVER_ERROR));
        assert!(is_retryable_status(StatusCode::SERVICE_UNAVAILABLE));
        assert!(is_retryable_status(StatusCode::TOO_MANY_REQUESTS));
        assert!(!is_retryable_status(StatusCode::BAD_REQUEST));
        assert!(!is_retryable_status(StatusCode::UNAUTHORIZED));
        assert!(!is_retryable_status(StatusCode::FORBIDDEN));
    }

    #[tokio::test]
    async fn client_errors_are_not_retried() {
        let (base_url, hits) = canned_server(401, r#"{"error":"bad key"}"#).await;
        let mut p = provider(&base_url, DEFAULT_PATH);
        p.retries = 3;

        let err = p.forecast("Onion", "Nashik", july_2()).await.unwrap_err();
        assert!(format!("{err:#}").contains("401"));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn malformed_body_is_not_retried() {
        let (base_url, hits) = canned_server(200, "not json").await;
        let mut p = provider(&base_url, DEFAULT_PATH);
        p.retries = 3;

        assert!(p.forecast("Onion", "Nashik", july_2()).await.is_err());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn server_errors_are_retried_until_exhausted() {
        let (base_url, hits) = canned_server(503, "<html>down</html>").await;
        let mut p = provider(&base_url, DEFAULT_PATH);
        p.retries = 3;

        let err = p.forecast("Onion", "Nashik", july_2()).await.unwrap_err();
        assert!(format!("{err:#}").contains("503"));
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn not_found_means_no_forecast() {
        let (base_url, hits) = canned_server(404, "{}").await;
        let mut p = provider(&base_url, DEFAULT_PATH);
        p.retries = 3;

        assert!(p.forecast("Onion", "Nashik", july_2()).await.unwrap().is_none());
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn url_joins_base_and_path() {
        assert_eq!(
            provider("https://forecast.example/", "v1/forecasts").url(),
            "https://forecast.example/v1/forecasts"
        );
        assert_eq!(
            provider("https://forecast.example", "/v2/f").url(),
            "https://forecast.example/v2/f"
        );
    }

    #[test]
    fn sends_api_key_header() {
        let headers = provider("https://forecast.example", DEFAULT_PATH)
            .headers()
            .unwrap();
        assert_eq!(headers.get("x-api-key").unwrap(), "secret");
    }

    #[test]
    fn parses_expected_shape() {
        let date = NaiveDate::from_ymd_opt(2026, 7, 2).unwrap();
        let v = json!({
            "item_name": "Onion",
            "city": "Nashik",
            "forecasts": [
                {"prediction_date": date, "predicted_price": 31.5, "confidence": 0.8,
                 "lower_bound": 28.0, "upper_bound": 35.0, "model_used": "arima"}
            ]
        });

        let forecast = parse_response(v)
            .unwrap()
            .validate_and_into_forecast("Onion", "Nashik", date)
            .unwrap()
            .unwrap();
        assert_eq!(forecast.predicted_price, Decimal::new(315, 1));
        assert_eq!(forecast.lower_bound, Some(Decimal::from(28)));
    }

    #[test]
    fn rejects_non_numeric_confidence() {
        let v = json!({
            "item_name": "Onion",
            "city": "Nashik",
            "forecasts": [
                {"prediction_date": "2026-07-02", "predicted_price": "31.50", "confidence": "high"}
            ]
        });
        assert!(parse_response(v).is_err());
    }
}

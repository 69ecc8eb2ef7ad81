use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use sabzi_core::domain::market::{
    self, ComparisonEntry, CurrentPrice, Forecast, NewPriceEntry, PriceSort, PriceSubmission,
};
use sabzi_core::domain::recommendation::{
    Action, ItemRecommendation, Recommendation, RecommendationSnapshot, ScoringRequest,
};
use sabzi_core::lookup::http_forecast::HttpForecastProvider;
use sabzi_core::lookup::ForecastLookup;
use sabzi_core::scoring::RecommendationEngine;
use sabzi_core::service::{self, ResolveOptions};
use sabzi_core::storage::prices::{self, ComparisonFilter, PgMarketStore};
use sabzi_core::time::calendar;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = sabzi_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let engine = RecommendationEngine::from_settings(&settings)?;
    tracing::info!(evaluator = engine.kind().as_str(), "recommendation engine ready");

    let pool: Option<PgPool> = match settings.require_database_url() {
        Ok(db_url) => match sqlx::postgres::PgPoolOptions::new()
            .max_connections(5)
            .connect(db_url)
            .await
        {
            Ok(pool) => match sabzi_core::storage::migrate(&pool).await {
                Ok(()) => Some(pool),
                Err(e) => {
                    sentry_anyhow::capture_anyhow(&e);
                    tracing::error!(error = %e, "db migrations failed; starting API in degraded mode");
                    None
                }
            },
            Err(e) => {
                let err = anyhow::Error::new(e);
                sentry_anyhow::capture_anyhow(&err);
                tracing::error!(error = %err, "db connect failed; starting API in degraded mode");
                None
            }
        },
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "DATABASE_URL missing; starting API in degraded mode");
            None
        }
    };

    let forecasts: Option<Arc<dyn ForecastLookup>> =
        if settings.forecast_provider_base_url.is_some() {
            Some(Arc::new(HttpForecastProvider::from_settings(&settings)?))
        } else {
            pool.clone()
                .map(|p| Arc::new(PgMarketStore::new(p)) as Arc<dyn ForecastLookup>)
        };

    let state = AppState {
        pool,
        engine: Arc::new(engine),
        forecasts,
        trend_window_days: settings.trend_window_days,
        market_utc_offset_minutes: settings.market_utc_offset_minutes,
    };

    let app = router(state);

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/score", post(score))
        .route("/recommendation", get(get_recommendation))
        .route("/recommendations", get(get_city_recommendations))
        .route("/prices", get(get_current_prices).post(submit_price))
        .route("/comparison", get(get_comparison))
        .route("/predictions", get(get_predictions))
        .route("/snapshots/latest", get(get_latest_snapshot))
        .route("/snapshots/:as_of_date", get(get_snapshot_by_date))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    pool: Option<PgPool>,
    engine: Arc<RecommendationEngine>,
    forecasts: Option<Arc<dyn ForecastLookup>>,
    trend_window_days: i64,
    market_utc_offset_minutes: i32,
}

impl AppState {
    fn market_today(&self) -> Result<NaiveDate, StatusCode> {
        calendar::resolve_as_of_date(None, Utc::now(), self.market_utc_offset_minutes)
            .map_err(internal_error)
    }

    fn resolve_options(&self, days: Option<u32>) -> Result<ResolveOptions, StatusCode> {
        let target_date = calendar::target_date(self.market_today()?, days.unwrap_or(1))
            .map_err(|_| StatusCode::BAD_REQUEST)?;
        Ok(ResolveOptions {
            target_date,
            trend_window_days: self.trend_window_days,
            market_utc_offset_minutes: self.market_utc_offset_minutes,
        })
    }

    fn pool(&self) -> Result<&PgPool, StatusCode> {
        self.pool.as_ref().ok_or(StatusCode::SERVICE_UNAVAILABLE)
    }

    fn lookups(&self) -> Result<(PgMarketStore, Arc<dyn ForecastLookup>), StatusCode> {
        let (Some(pool), Some(forecasts)) = (&self.pool, &self.forecasts) else {
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        };
        Ok((PgMarketStore::new(pool.clone()), forecasts.clone()))
    }
}

fn bad_request(e: anyhow::Error) -> StatusCode {
    tracing::debug!(error = %e, "rejected request");
    StatusCode::BAD_REQUEST
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    tracing::error!(error = %e, "request failed");
    StatusCode::INTERNAL_SERVER_ERROR
}

async fn score(
    State(state): State<AppState>,
    Json(request): Json<ScoringRequest>,
) -> Json<Recommendation> {
    Json(state.engine.generate_recommendation(&request))
}

#[derive(Debug, Deserialize)]
struct RecommendationQuery {
    city: Option<String>,
    item: Option<String>,
    days: Option<u32>,
}

fn required(param: Option<&str>) -> Result<&str, StatusCode> {
    param
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(StatusCode::BAD_REQUEST)
}

async fn get_recommendation(
    State(state): State<AppState>,
    Query(query): Query<RecommendationQuery>,
) -> Result<Json<ItemRecommendation>, StatusCode> {
    let city = required(query.city.as_deref())?;
    let item = required(query.item.as_deref())?;
    let opts = state.resolve_options(query.days)?;
    let (store, forecasts) = state.lookups()?;

    let rec = service::recommend_for(&state.engine, &store, forecasts.as_ref(), item, city, opts)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(rec))
}

#[derive(Debug, Serialize)]
struct CityRecommendations {
    city: String,
    target_date: NaiveDate,
    items: Vec<ItemRecommendation>,
    skipped: usize,
    failed: usize,
}

async fn get_city_recommendations(
    State(state): State<AppState>,
    Query(query): Query<RecommendationQuery>,
) -> Result<Json<CityRecommendations>, StatusCode> {
    let city = required(query.city.as_deref())?.to_string();
    let opts = state.resolve_options(query.days)?;
    let (store, forecasts) = state.lookups()?;

    let items = prices::list_items(store.pool())
        .await
        .map_err(internal_error)?;
    let combinations: Vec<(String, String)> =
        items.into_iter().map(|item| (item, city.clone())).collect();

    let outcome = service::recommend_batch(
        &state.engine,
        &store,
        forecasts.as_ref(),
        &combinations,
        opts,
    )
    .await;

    Ok(Json(CityRecommendations {
        city,
        target_date: opts.target_date,
        items: outcome.items,
        skipped: outcome.skipped,
        failed: outcome.failed,
    }))
}

#[derive(Debug, Deserialize)]
struct SnapshotQuery {
    city: Option<String>,
}

#[derive(Debug, Serialize)]
struct ApiSnapshot {
    snapshot_id: Uuid,
    snapshot: RecommendationSnapshot,
}

async fn get_latest_snapshot(
    State(state): State<AppState>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<ApiSnapshot>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let (snapshot_id, snapshot) = fetch_snapshot(pool, None, query.city.as_deref())
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ApiSnapshot {
        snapshot_id,
        snapshot,
    }))
}

async fn get_snapshot_by_date(
    State(state): State<AppState>,
    Path(as_of_date): Path<String>,
    Query(query): Query<SnapshotQuery>,
) -> Result<Json<ApiSnapshot>, StatusCode> {
    let Some(pool) = &state.pool else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let as_of_date =
        NaiveDate::parse_from_str(&as_of_date, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)?;

    let (snapshot_id, snapshot) = fetch_snapshot(pool, Some(as_of_date), query.city.as_deref())
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(ApiSnapshot {
        snapshot_id,
        snapshot,
    }))
}

async fn fetch_snapshot(
    pool: &PgPool,
    as_of_date: Option<NaiveDate>,
    city: Option<&str>,
) -> anyhow::Result<Option<(Uuid, RecommendationSnapshot)>> {
    let row = match as_of_date {
        Some(d) => {
            sqlx::query_as::<_, (Uuid, NaiveDate, DateTime<Utc>, String)>(
                "SELECT id, as_of_date, generated_at, evaluator \
                 FROM recommendation_snapshots \
                 WHERE status = 'success' AND as_of_date = $1 \
                 ORDER BY generated_at DESC \
                 LIMIT 1",
            )
            .bind(d)
            .fetch_optional(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, (Uuid, NaiveDate, DateTime<Utc>, String)>(
                "SELECT id, as_of_date, generated_at, evaluator \
                 FROM recommendation_snapshots \
                 WHERE status = 'success' \
                 ORDER BY as_of_date DESC, generated_at DESC \
                 LIMIT 1",
            )
            .fetch_optional(pool)
            .await?
        }
    };

    let Some((id, as_of_date, generated_at, evaluator)) = row else {
        return Ok(None);
    };

    let items = fetch_items(pool, id, city).await?;

    Ok(Some((
        id,
        RecommendationSnapshot {
            as_of_date,
            generated_at,
            evaluator,
            items,
        },
    )))
}

type ItemRow = (
    String,
    String,
    NaiveDate,
    Decimal,
    Decimal,
    Option<Decimal>,
    Option<Decimal>,
    f64,
    String,
    String,
    Option<f64>,
    Decimal,
    f64,
);

async fn fetch_items(
    pool: &PgPool,
    snapshot_id: Uuid,
    city: Option<&str>,
) -> anyhow::Result<Vec<ItemRecommendation>> {
    let rows = sqlx::query_as::<_, ItemRow>(
        "SELECT item_name, city, target_date, current_price, predicted_price, lower_bound, upper_bound, \
                trend, action, reason, score, potential_savings, confidence \
         FROM recommendation_items \
         WHERE snapshot_id = $1 AND ($2::text IS NULL OR city = $2) \
         ORDER BY city ASC, item_name ASC",
    )
    .bind(snapshot_id)
    .bind(city)
    .fetch_all(pool)
    .await?;

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        out.push(item_from_row(row)?);
    }
    Ok(out)
}

fn item_from_row(row: ItemRow) -> anyhow::Result<ItemRecommendation> {
    let (
        item_name,
        city,
        target_date,
        current_price,
        predicted_price,
        lower_bound,
        upper_bound,
        trend,
        action,
        reason,
        score,
        potential_savings,
        confidence,
    ) = row;

    let action: Action = action.parse().map_err(|e: anyhow::Error| {
        e.context(format!("invalid action in DB for item={item_name}, city={city}"))
    })?;

    Ok(ItemRecommendation {
        item_name,
        city,
        target_date,
        current_price,
        predicted_price,
        lower_bound,
        upper_bound,
        trend,
        recommendation: Recommendation {
            action,
            reason,
            score,
            potential_savings,
            confidence,
        },
    })
}

#[derive(Debug, Deserialize)]
struct PricesQuery {
    city: Option<String>,
}

async fn get_current_prices(
    State(state): State<AppState>,
    Query(query): Query<PricesQuery>,
) -> Result<Json<Vec<CurrentPrice>>, StatusCode> {
    let city = required(query.city.as_deref())?;
    let pool = state.pool()?;

    let latest = prices::current_prices(pool, city)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(latest))
}

#[derive(Debug, Serialize)]
struct SubmittedPrice {
    id: i64,
    #[serde(flatten)]
    entry: NewPriceEntry,
}

async fn submit_price(
    State(state): State<AppState>,
    Json(submission): Json<PriceSubmission>,
) -> Result<(StatusCode, Json<SubmittedPrice>), StatusCode> {
    let entry = submission.into_entry(Utc::now()).map_err(bad_request)?;
    let pool = state.pool()?;

    let id = prices::insert_price_entry(pool, &entry)
        .await
        .map_err(internal_error)?;
    tracing::info!(
        id,
        item = %entry.item_name,
        city = %entry.city,
        source = %entry.source,
        "stored submitted price"
    );

    Ok((StatusCode::CREATED, Json(SubmittedPrice { id, entry })))
}

#[derive(Debug, Default, Deserialize)]
struct ComparisonQuery {
    item: Option<String>,
    city: Option<String>,
    state: Option<String>,
    start_date: Option<String>,
    end_date: Option<String>,
    sort: Option<String>,
}

fn non_empty(param: Option<&str>) -> Option<String> {
    param
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn optional_date(param: Option<&str>) -> Result<Option<NaiveDate>, StatusCode> {
    non_empty(param)
        .map(|s| NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST))
        .transpose()
}

async fn get_comparison(
    State(state): State<AppState>,
    Query(query): Query<ComparisonQuery>,
) -> Result<Json<Vec<ComparisonEntry>>, StatusCode> {
    let item = required(query.item.as_deref())?;
    let city = non_empty(query.city.as_deref());
    let region = non_empty(query.state.as_deref());
    if city.is_none() && region.is_none() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let sort: PriceSort = query
        .sort
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(bad_request)?;
    let start = optional_date(query.start_date.as_deref())?;
    let end = optional_date(query.end_date.as_deref())?;
    let (start, end) =
        market::comparison_window(start, end, state.market_today()?).map_err(bad_request)?;

    let pool = state.pool()?;
    let filter = ComparisonFilter {
        city,
        state: region,
        start,
        end,
        utc_offset_minutes: state.market_utc_offset_minutes,
    };

    let mut entries = prices::price_comparison(pool, item, &filter)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;
    market::sort_comparison(&mut entries, sort);

    Ok(Json(entries))
}

const DEFAULT_PREDICTION_DAYS: u32 = 7;

#[derive(Debug, Deserialize)]
struct PredictionsQuery {
    city: Option<String>,
    item: Option<String>,
    days: Option<u32>,
}

async fn get_predictions(
    State(state): State<AppState>,
    Query(query): Query<PredictionsQuery>,
) -> Result<Json<Vec<Forecast>>, StatusCode> {
    let city = required(query.city.as_deref())?;
    let item = required(query.item.as_deref())?;

    let today = state.market_today()?;
    let until = calendar::target_date(today, query.days.unwrap_or(DEFAULT_PREDICTION_DAYS))
        .map_err(|_| StatusCode::BAD_REQUEST)?;
    let pool = state.pool()?;

    let forecasts = prices::forecasts_between(pool, item, city, today, until)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(forecasts))
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &sabzi_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sabzi_core::domain::recommendation::RecommendationSnapshot;
use sabzi_core::lookup::http_forecast::HttpForecastProvider;
use sabzi_core::lookup::ForecastLookup;
use sabzi_core::scoring::{EvaluatorKind, RecommendationEngine};
use sabzi_core::service::{self, ResolveOptions};
use sabzi_core::storage::prices::{self, PgMarketStore};
use sabzi_core::time::calendar;

mod combinations;
mod seed;

#[derive(Debug, Parser)]
#[command(name = "sabzi_worker")]
struct Args {
    /// Market as-of date (YYYY-MM-DD). Defaults to today in the market's UTC offset.
    #[arg(long)]
    as_of_date: Option<String>,

    /// Days ahead of the as-of date to score (1..=30).
    #[arg(long, default_value_t = 1)]
    horizon_days: u32,

    /// Overrides RECOMMENDATION_EVALUATOR (score, rule or none).
    #[arg(long)]
    evaluator: Option<EvaluatorKind>,

    /// Score and print the snapshot without writing to the database: no
    /// migrations, seeding, locking or persisting.
    #[arg(long)]
    dry_run: bool,

    /// Insert deterministic demo prices and forecasts before scoring.
    #[arg(long)]
    seed_stub: bool,
}

/// Database writes a run is allowed to make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WritePlan {
    migrate: bool,
    seed: bool,
    lock: bool,
    persist: bool,
}

impl WritePlan {
    fn for_args(args: &Args) -> Self {
        let writes = !args.dry_run;
        Self {
            migrate: writes,
            seed: writes && args.seed_stub,
            lock: writes,
            persist: writes,
        }
    }
}

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

    let args = Args::parse();

    if let Err(err) = run(&settings, &args).await {
        sentry_anyhow::capture_anyhow(&err);
        tracing::error!(error = %err, "worker run failed");
        return Err(err);
    }
    Ok(())
}

async fn run(settings: &sabzi_core::config::Settings, args: &Args) -> anyhow::Result<()> {
    let as_of_date = calendar::resolve_as_of_date(
        args.as_of_date.as_deref(),
        chrono::Utc::now(),
        settings.market_utc_offset_minutes,
    )?;
    let target_date = calendar::target_date(as_of_date, args.horizon_days)?;

    let kind = args.evaluator.unwrap_or(settings.evaluator);
    let engine = RecommendationEngine::from_settings_with_kind(settings, kind)?;

    tracing::info!(
        %as_of_date,
        %target_date,
        evaluator = kind.as_str(),
        dry_run = args.dry_run,
        "starting recommendation run"
    );

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .context("connect DATABASE_URL failed")?;

    let plan = WritePlan::for_args(args);

    if plan.migrate {
        sabzi_core::storage::migrate(&pool).await?;
    }

    if plan.seed {
        let affected = seed::seed_stub_market(&pool, as_of_date).await?;
        tracing::info!(%as_of_date, affected, "seeded stub market data");
    } else if args.seed_stub {
        tracing::info!("dry-run: skipping stub seed");
    }

    if plan.lock {
        let acquired =
            sabzi_core::storage::lock::try_acquire_as_of_date_lock(&pool, as_of_date).await?;
        if !acquired {
            tracing::warn!(%as_of_date, "as_of_date lock not acquired; another run in progress");
            return Ok(());
        }
    }

    let result = score_and_persist(settings, plan, &pool, &engine, as_of_date, target_date).await;

    if plan.lock {
        if let Err(e) =
            sabzi_core::storage::lock::release_as_of_date_lock(&pool, as_of_date).await
        {
            tracing::warn!(%as_of_date, error = %e, "failed to release as_of_date lock");
        }
    }

    result
}

async fn score_and_persist(
    settings: &sabzi_core::config::Settings,
    plan: WritePlan,
    pool: &sqlx::PgPool,
    engine: &RecommendationEngine,
    as_of_date: chrono::NaiveDate,
    target_date: chrono::NaiveDate,
) -> anyhow::Result<()> {
    let evaluator = engine.kind().as_str();
    let generated_at = chrono::Utc::now();

    let combos = match resolve_combinations(pool).await {
        Ok(c) => c,
        Err(err) => {
            return record_failure(pool, plan, as_of_date, evaluator, err).await;
        }
    };

    let market = PgMarketStore::new(pool.clone());
    let http_forecasts;
    let forecasts: &dyn ForecastLookup = if settings.forecast_provider_base_url.is_some() {
        http_forecasts = HttpForecastProvider::from_settings(settings)?;
        &http_forecasts
    } else {
        &market
    };

    let opts = ResolveOptions {
        target_date,
        trend_window_days: settings.trend_window_days,
        market_utc_offset_minutes: settings.market_utc_offset_minutes,
    };
    let outcome = service::recommend_batch(engine, &market, forecasts, &combos, opts).await;

    tracing::info!(
        %as_of_date,
        combinations = combos.len(),
        scored = outcome.items.len(),
        skipped = outcome.skipped,
        failed = outcome.failed,
        provider = forecasts.provider_name(),
        "scoring finished"
    );

    if outcome.items.is_empty() {
        let err = anyhow::anyhow!(
            "no recommendations produced (combinations={}, skipped={}, failed={})",
            combos.len(),
            outcome.skipped,
            outcome.failed
        );
        return record_failure(pool, plan, as_of_date, evaluator, err).await;
    }

    let snapshot = RecommendationSnapshot {
        as_of_date,
        generated_at,
        evaluator: evaluator.to_string(),
        items: outcome.items,
    };

    if !plan.persist {
        let json = serde_json::to_string_pretty(&snapshot).context("serialize snapshot failed")?;
        println!("{json}");
        return Ok(());
    }

    let snapshot_id = sabzi_core::storage::recommendations::persist_success(
        pool,
        &snapshot,
        outcome.skipped,
        outcome.failed,
    )
    .await?;

    tracing::info!(%as_of_date, %snapshot_id, items = snapshot.items.len(), "persisted recommendation snapshot");
    Ok(())
}

async fn resolve_combinations(pool: &sqlx::PgPool) -> anyhow::Result<Vec<(String, String)>> {
    let items = prices::list_items(pool).await?;
    let cities = prices::list_cities(pool).await?;
    combinations::build_combinations(items, cities, &combinations::CombinationOptions::from_env())
}

async fn record_failure(
    pool: &sqlx::PgPool,
    plan: WritePlan,
    as_of_date: chrono::NaiveDate,
    evaluator: &str,
    err: anyhow::Error,
) -> anyhow::Result<()> {
    sentry_anyhow::capture_anyhow(&err);

    if !plan.persist {
        tracing::error!(%as_of_date, error = %err, "recommendation run failed (dry-run)");
        return Ok(());
    }

    let snapshot_id = sabzi_core::storage::recommendations::persist_failure(
        pool,
        as_of_date,
        chrono::Utc::now(),
        evaluator,
        &format!("{:#}", err),
    )
    .await?;

    tracing::error!(%as_of_date, %snapshot_id, error = %err, "recommendation run failed");
    Ok(())
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

use crate::domain::market::{
    percent_change, ComparisonEntry, CurrentPrice, Forecast, NewPriceEntry, PricePoint,
};
use crate::lookup::{ForecastLookup, PriceLookup};
use crate::time::calendar;
use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

/// Postgres-backed price and forecast lookups.
#[derive(Debug, Clone)]
pub struct PgMarketStore {
    pool: sqlx::PgPool,
}

impl PgMarketStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl PriceLookup for PgMarketStore {
    async fn latest_price(&self, item_name: &str, city: &str) -> Result<Option<PricePoint>> {
        let row = sqlx::query_as::<_, (Decimal, String, DateTime<Utc>)>(
            "SELECT p.price_per_kg, p.source, p.observed_at \
             FROM price_entries p \
             JOIN items i ON i.id = p.item_id \
             JOIN cities c ON c.id = p.city_id \
             WHERE i.name = $1 AND c.name = $2 \
             ORDER BY p.observed_at DESC \
             LIMIT 1",
        )
        .persistent(false)
        .bind(item_name)
        .bind(city)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("latest price query failed for {item_name} in {city}"))?;

        Ok(row.map(|(price_per_kg, source, observed_at)| PricePoint {
            item_name: item_name.to_string(),
            city: city.to_string(),
            price_per_kg,
            source,
            observed_at,
        }))
    }

    async fn price_history(
        &self,
        item_name: &str,
        city: &str,
        since: NaiveDate,
    ) -> Result<Vec<Decimal>> {
        let rows = sqlx::query_scalar::<_, Decimal>(
            "SELECT p.price_per_kg \
             FROM price_entries p \
             JOIN items i ON i.id = p.item_id \
             JOIN cities c ON c.id = p.city_id \
             WHERE i.name = $1 AND c.name = $2 AND p.observed_at >= $3::date \
             ORDER BY p.observed_at ASC",
        )
        .persistent(false)
        .bind(item_name)
        .bind(city)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .with_context(|| format!("price history query failed for {item_name} in {city}"))?;

        Ok(rows)
    }
}

#[async_trait::async_trait]
impl ForecastLookup for PgMarketStore {
    fn provider_name(&self) -> &'static str {
        "postgres"
    }

    async fn forecast(
        &self,
        item_name: &str,
        city: &str,
        prediction_date: NaiveDate,
    ) -> Result<Option<Forecast>> {
        let row = sqlx::query_as::<
            _,
            (
                Decimal,
                f64,
                Option<Decimal>,
                Option<Decimal>,
                Option<String>,
            ),
        >(
            "SELECT f.predicted_price, f.confidence, f.lower_bound, f.upper_bound, f.model_used \
             FROM predictions f \
             JOIN items i ON i.id = f.item_id \
             JOIN cities c ON c.id = f.city_id \
             WHERE i.name = $1 AND c.name = $2 AND f.prediction_date = $3 \
             LIMIT 1",
        )
        .persistent(false)
        .bind(item_name)
        .bind(city)
        .bind(prediction_date)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("forecast query failed for {item_name} in {city}"))?;

        Ok(row.map(
            |(predicted_price, confidence, lower_bound, upper_bound, model_used)| Forecast {
                prediction_date,
                predicted_price,
                confidence,
                lower_bound,
                upper_bound,
                model_used,
            },
        ))
    }
}

pub async fn list_items(pool: &sqlx::PgPool) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>("SELECT name FROM items ORDER BY name ASC")
        .persistent(false)
        .fetch_all(pool)
        .await
        .context("list items failed")
}

pub async fn list_cities(pool: &sqlx::PgPool) -> Result<Vec<String>> {
    sqlx::query_scalar::<_, String>("SELECT name FROM cities ORDER BY name ASC")
        .persistent(false)
        .fetch_all(pool)
        .await
        .context("list cities failed")
}

async fn ensure_item(tx: &mut sqlx::Transaction<'_, sqlx::Postgres>, name: &str) -> Result<i64> {
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO items (name) VALUES ($1) \
         ON CONFLICT (name) DO UPDATE SET name = EXCLUDED.name \
         RETURNING id",
    )
    .bind(name)
    .fetch_one(&mut **tx)
    .await
    .with_context(|| format!("upsert item {name} failed"))
}

async fn ensure_city(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    name: &str,
    state: Option<&str>,
) -> Result<i64> {
    // A known state is never blanked by a later write without one.
    sqlx::query_scalar::<_, i64>(
        "INSERT INTO cities (name, state) VALUES ($1, COALESCE($2, '')) \
         ON CONFLICT (name) DO UPDATE \
           SET state = CASE WHEN EXCLUDED.state <> '' THEN EXCLUDED.state ELSE cities.state END \
         RETURNING id",
    )
    .bind(name)
    .bind(state)
    .fetch_one(&mut **tx)
    .await
    .with_context(|| format!("upsert city {name} failed"))
}

async fn item_id(pool: &sqlx::PgPool, name: &str) -> Result<Option<i64>> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM items WHERE name = $1")
        .persistent(false)
        .bind(name)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("lookup item {name} failed"))
}

async fn city_id(pool: &sqlx::PgPool, name: &str) -> Result<Option<i64>> {
    sqlx::query_scalar::<_, i64>("SELECT id FROM cities WHERE name = $1")
        .persistent(false)
        .bind(name)
        .fetch_optional(pool)
        .await
        .with_context(|| format!("lookup city {name} failed"))
}

/// Writes observed prices and forecasts for one item/city in a single transaction.
///
/// Idempotent: a price is keyed by (item, city, source, observed_at) and a
/// forecast by (item, city, prediction_date). Returns the rows inserted or
/// changed.
pub async fn insert_market_data(
    pool: &sqlx::PgPool,
    item_name: &str,
    city: &str,
    prices: &[PricePoint],
    forecasts: &[Forecast],
) -> Result<u64> {
    anyhow::ensure!(!item_name.trim().is_empty(), "item name must be non-empty");
    anyhow::ensure!(!city.trim().is_empty(), "city must be non-empty");

    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let item_id = ensure_item(&mut tx, item_name.trim()).await?;
    let city_id = ensure_city(&mut tx, city.trim(), None).await?;

    let mut affected: u64 = 0;
    for price in prices {
        let res = sqlx::query(
            "INSERT INTO price_entries (item_id, city_id, price_per_kg, source, observed_at) \
             VALUES ($1, $2, $3, $4, $5) \
             ON CONFLICT (item_id, city_id, source, observed_at) DO UPDATE \
               SET price_per_kg = EXCLUDED.price_per_kg \
               WHERE price_entries.price_per_kg IS DISTINCT FROM EXCLUDED.price_per_kg",
        )
        .bind(item_id)
        .bind(city_id)
        .bind(price.price_per_kg)
        .bind(&price.source)
        .bind(price.observed_at)
        .execute(&mut *tx)
        .await
        .context("upsert price_entries failed")?;
        affected += res.rows_affected();
    }

    for forecast in forecasts {
        let res = sqlx::query(
            "INSERT INTO predictions \
             (item_id, city_id, prediction_date, predicted_price, confidence, lower_bound, upper_bound, model_used) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (item_id, city_id, prediction_date) DO UPDATE \
               SET predicted_price = EXCLUDED.predicted_price, confidence = EXCLUDED.confidence, \
                   lower_bound = EXCLUDED.lower_bound, upper_bound = EXCLUDED.upper_bound, \
                   model_used = EXCLUDED.model_used",
        )
        .bind(item_id)
        .bind(city_id)
        .bind(forecast.prediction_date)
        .bind(forecast.predicted_price)
        .bind(forecast.confidence)
        .bind(forecast.lower_bound)
        .bind(forecast.upper_bound)
        .bind(&forecast.model_used)
        .execute(&mut *tx)
        .await
        .context("upsert predictions failed")?;
        affected += res.rows_affected();
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(affected)
}

/// Latest price of every item observed in `city`, with the change from the
/// observation before it. `None` when the city is unknown.
pub async fn current_prices(pool: &sqlx::PgPool, city: &str) -> Result<Option<Vec<CurrentPrice>>> {
    let Some(city_id) = city_id(pool, city).await? else {
        return Ok(None);
    };

    let rows = sqlx::query_as::<_, (String, Decimal, String, DateTime<Utc>, i16, Option<Decimal>)>(
        "SELECT i.name, p.price_per_kg, p.source, p.observed_at, p.quality_rating, prev.price_per_kg \
         FROM items i \
         JOIN LATERAL ( \
           SELECT price_per_kg, source, observed_at, quality_rating FROM price_entries \
           WHERE item_id = i.id AND city_id = $1 \
           ORDER BY observed_at DESC, id DESC LIMIT 1 \
         ) p ON true \
         LEFT JOIN LATERAL ( \
           SELECT price_per_kg FROM price_entries \
           WHERE item_id = i.id AND city_id = $1 AND observed_at < p.observed_at \
           ORDER BY observed_at DESC, id DESC LIMIT 1 \
         ) prev ON true \
         ORDER BY i.name ASC",
    )
    .persistent(false)
    .bind(city_id)
    .fetch_all(pool)
    .await
    .with_context(|| format!("current prices query failed for {city}"))?;

    Ok(Some(
        rows.into_iter()
            .map(
                |(item_name, price_per_kg, source, observed_at, quality_rating, previous)| {
                    CurrentPrice {
                        item_name,
                        city: city.to_string(),
                        price_change_pct: percent_change(price_per_kg, previous),
                        price_per_kg,
                        source,
                        observed_at,
                        quality_rating,
                    }
                },
            )
            .collect(),
    ))
}

/// Which observations a price comparison covers.
#[derive(Debug, Clone, Default)]
pub struct ComparisonFilter {
    /// Takes precedence over `state`.
    pub city: Option<String>,
    pub state: Option<String>,
    /// Inclusive market dates.
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub utc_offset_minutes: i32,
}

/// Every observation of `item_name` matching `filter`, grouped by source with
/// the newest first. `None` when the item is unknown.
pub async fn price_comparison(
    pool: &sqlx::PgPool,
    item_name: &str,
    filter: &ComparisonFilter,
) -> Result<Option<Vec<ComparisonEntry>>> {
    let Some(item_id) = item_id(pool, item_name).await? else {
        return Ok(None);
    };

    let from = filter
        .start
        .map(|d| calendar::market_day_start(d, filter.utc_offset_minutes))
        .transpose()?;
    let until = filter
        .end
        .and_then(|d| d.succ_opt())
        .map(|d| calendar::market_day_start(d, filter.utc_offset_minutes))
        .transpose()?;
    let state = if filter.city.is_some() {
        None
    } else {
        filter.state.as_deref()
    };

    let rows = sqlx::query_as::<_, (String, Decimal, String, String, i16, DateTime<Utc>)>(
        "SELECT c.name, p.price_per_kg, p.source, p.location, p.quality_rating, p.observed_at \
         FROM price_entries p \
         JOIN cities c ON c.id = p.city_id \
         WHERE p.item_id = $1 \
           AND ($2::text IS NULL OR c.name = $2) \
           AND ($3::text IS NULL OR c.state = $3) \
           AND ($4::timestamptz IS NULL OR p.observed_at >= $4) \
           AND ($5::timestamptz IS NULL OR p.observed_at < $5) \
         ORDER BY p.source ASC, p.observed_at DESC",
    )
    .persistent(false)
    .bind(item_id)
    .bind(filter.city.as_deref())
    .bind(state)
    .bind(from)
    .bind(until)
    .fetch_all(pool)
    .await
    .with_context(|| format!("price comparison query failed for {item_name}"))?;

    let mut out = Vec::with_capacity(rows.len());
    for (city, price_per_kg, source, location, quality_rating, observed_at) in rows {
        out.push(ComparisonEntry {
            date: calendar::market_date(observed_at, filter.utc_offset_minutes)?,
            source,
            price_per_kg,
            city,
            location,
            quality_rating,
            observed_at,
        });
    }
    Ok(Some(out))
}

/// Stored forecasts for `from..=to`, oldest first. `None` when the item or
/// city is unknown.
pub async fn forecasts_between(
    pool: &sqlx::PgPool,
    item_name: &str,
    city: &str,
    from: NaiveDate,
    to: NaiveDate,
) -> Result<Option<Vec<Forecast>>> {
    let (Some(item_id), Some(city_id)) = (item_id(pool, item_name).await?, city_id(pool, city).await?)
    else {
        return Ok(None);
    };

    let rows = sqlx::query_as::<
        _,
        (
            NaiveDate,
            Decimal,
            f64,
            Option<Decimal>,
            Option<Decimal>,
            Option<String>,
        ),
    >(
        "SELECT prediction_date, predicted_price, confidence, lower_bound, upper_bound, model_used \
         FROM predictions \
         WHERE item_id = $1 AND city_id = $2 AND prediction_date BETWEEN $3 AND $4 \
         ORDER BY prediction_date ASC",
    )
    .persistent(false)
    .bind(item_id)
    .bind(city_id)
    .bind(from)
    .bind(to)
    .fetch_all(pool)
    .await
    .with_context(|| format!("forecast range query failed for {item_name} in {city}"))?;

    Ok(Some(
        rows.into_iter()
            .map(
                |(prediction_date, predicted_price, confidence, lower_bound, upper_bound, model_used)| {
                    Forecast {
                        prediction_date,
                        predicted_price,
                        confidence,
                        lower_bound,
                        upper_bound,
                        model_used,
                    }
                },
            )
            .collect(),
    ))
}

/// Stores one reported price, creating the item and city when missing.
/// Returns the row id; a repeat of the same observation updates it in place.
pub async fn insert_price_entry(pool: &sqlx::PgPool, entry: &NewPriceEntry) -> Result<i64> {
    let mut tx = pool.begin().await.context("begin transaction failed")?;
    let item_id = ensure_item(&mut tx, &entry.item_name).await?;
    let city_id = ensure_city(&mut tx, &entry.city, entry.state.as_deref()).await?;

    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO price_entries \
         (item_id, city_id, price_per_kg, source, location, quality_rating, observed_at) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (item_id, city_id, source, observed_at) DO UPDATE \
           SET price_per_kg = EXCLUDED.price_per_kg, location = EXCLUDED.location, \
               quality_rating = EXCLUDED.quality_rating \
         RETURNING id",
    )
    .bind(item_id)
    .bind(city_id)
    .bind(entry.price_per_kg)
    .bind(&entry.source)
    .bind(&entry.location)
    .bind(entry.quality_rating)
    .bind(entry.observed_at)
    .fetch_one(&mut *tx)
    .await
    .with_context(|| {
        format!(
            "insert price_entries failed for {} in {}",
            entry.item_name, entry.city
        )
    })?;

    tx.commit().await.context("commit transaction failed")?;
    Ok(id)
}

use crate::domain::recommendation::{ItemRecommendation, RecommendationSnapshot};
use anyhow::Context;

pub async fn persist_success(
    pool: &sqlx::PgPool,
    snapshot: &RecommendationSnapshot,
    skipped: usize,
    failed: usize,
) -> anyhow::Result<uuid::Uuid> {
    anyhow::ensure!(
        !snapshot.items.is_empty(),
        "snapshot must have at least one item"
    );

    let mut tx = pool.begin().await.context("begin transaction failed")?;

    let snapshot_id = uuid::Uuid::new_v4();
    sqlx::query(
        "INSERT INTO recommendation_snapshots (id, as_of_date, generated_at, evaluator, status, error, skipped, failed) \
         VALUES ($1, $2, $3, $4, 'success', NULL, $5, $6)",
    )
    .bind(snapshot_id)
    .bind(snapshot.as_of_date)
    .bind(snapshot.generated_at)
    .bind(&snapshot.evaluator)
    .bind(i32::try_from(skipped).unwrap_or(i32::MAX))
    .bind(i32::try_from(failed).unwrap_or(i32::MAX))
    .execute(&mut *tx)
    .await
    .context("insert recommendation_snapshots failed")?;

    for item in &snapshot.items {
        insert_item(&mut tx, snapshot_id, item).await?;
    }

    tx.commit().await.context("commit transaction failed")?;
    Ok(snapshot_id)
}

pub async fn persist_failure(
    pool: &sqlx::PgPool,
    as_of_date: chrono::NaiveDate,
    generated_at: chrono::DateTime<chrono::Utc>,
    evaluator: &str,
    error: &str,
) -> anyhow::Result<uuid::Uuid> {
    let snapshot_id = uuid::Uuid::new_v4();
    sqlx::query(
        "INSERT INTO recommendation_snapshots (id, as_of_date, generated_at, evaluator, status, error) \
         VALUES ($1, $2, $3, $4, 'error', $5)",
    )
    .bind(snapshot_id)
    .bind(as_of_date)
    .bind(generated_at)
    .bind(evaluator)
    .bind(error)
    .execute(pool)
    .await
    .context("insert error recommendation_snapshots failed")?;

    Ok(snapshot_id)
}

async fn insert_item(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    snapshot_id: uuid::Uuid,
    item: &ItemRecommendation,
) -> anyhow::Result<()> {
    let rec = &item.recommendation;

    sqlx::query(
        "INSERT INTO recommendation_items \
         (snapshot_id, item_name, city, target_date, current_price, predicted_price, lower_bound, upper_bound, \
          trend, action, reason, score, potential_savings, confidence) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
    )
    .bind(snapshot_id)
    .bind(&item.item_name)
    .bind(&item.city)
    .bind(item.target_date)
    .bind(item.current_price)
    .bind(item.predicted_price)
    .bind(item.lower_bound)
    .bind(item.upper_bound)
    .bind(item.trend)
    .bind(rec.action.as_str())
    .bind(&rec.reason)
    .bind(rec.score)
    .bind(rec.potential_savings)
    .bind(rec.confidence)
    .execute(&mut **tx)
    .await
    .with_context(|| {
        format!(
            "insert recommendation_items failed for {} in {}",
            item.item_name, item.city
        )
    })?;

    Ok(())
}

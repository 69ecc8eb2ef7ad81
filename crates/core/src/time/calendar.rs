use anyhow::Context;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, TimeZone, Utc};

pub fn resolve_as_of_date(
    as_of_date_arg: Option<&str>,
    now_utc: DateTime<Utc>,
    utc_offset_minutes: i32,
) -> anyhow::Result<NaiveDate> {
    if let Some(s) = as_of_date_arg {
        return NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
            .with_context(|| format!("invalid as-of date {s:?} (expected YYYY-MM-DD)"));
    }

    market_date(now_utc, utc_offset_minutes)
}

fn market_offset(utc_offset_minutes: i32) -> anyhow::Result<FixedOffset> {
    FixedOffset::east_opt(utc_offset_minutes * 60)
        .with_context(|| format!("invalid market UTC offset: {utc_offset_minutes} minutes"))
}

/// Calendar date of `at` in the market's local time.
pub fn market_date(at: DateTime<Utc>, utc_offset_minutes: i32) -> anyhow::Result<NaiveDate> {
    Ok(at.with_timezone(&market_offset(utc_offset_minutes)?).date_naive())
}

/// The UTC instant at which `date` begins in the market's local time.
pub fn market_day_start(date: NaiveDate, utc_offset_minutes: i32) -> anyhow::Result<DateTime<Utc>> {
    let offset = market_offset(utc_offset_minutes)?;
    date.and_hms_opt(0, 0, 0)
        .and_then(|midnight| offset.from_local_datetime(&midnight).single())
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("no market midnight for {date}"))
}

/// The forecast date a recommendation targets, `horizon_days` after `as_of_date`.
pub fn target_date(as_of_date: NaiveDate, horizon_days: u32) -> anyhow::Result<NaiveDate> {
    anyhow::ensure!(
        (1..=30).contains(&horizon_days),
        "horizon must be 1..=30 days (got {horizon_days})"
    );
    as_of_date
        .checked_add_signed(Duration::days(i64::from(horizon_days)))
        .with_context(|| format!("target date overflow from {as_of_date}"))
}

/// First day of the trend window ending at `as_of_date`.
pub fn trend_window_start(as_of_date: NaiveDate, window_days: i64) -> NaiveDate {
    as_of_date
        .checked_sub_signed(Duration::days(window_days))
        .unwrap_or(NaiveDate::MIN)
}

pub fn month_of(date: NaiveDate) -> u32 {
    date.month()
}

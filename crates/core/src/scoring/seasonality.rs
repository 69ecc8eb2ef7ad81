use anyhow::Context;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};

/// Month-indexed factors, January first.
pub type MonthlyFactors = [f64; 12];

const TOMATO: MonthlyFactors = [
    -0.2, -0.15, -0.1, 0.0, 0.1, 0.15, 0.2, 0.15, 0.1, 0.0, -0.1, -0.15,
];
const ONION: MonthlyFactors = [
    0.1, 0.2, 0.15, 0.05, 0.0, -0.1, -0.15, -0.1, 0.0, 0.1, 0.15, 0.2,
];
const POTATO: MonthlyFactors = [
    0.05, 0.1, 0.05, 0.0, -0.1, -0.2, -0.25, -0.2, -0.1, 0.0, 0.1, 0.15,
];

/// Expected seasonal price pressure per item and month.
///
/// Lookups are total: an unknown item or a month outside 1..=12 yields the
/// neutral factor 0.0.
#[derive(Debug, Clone, PartialEq)]
pub struct SeasonalityTable {
    factors: HashMap<String, MonthlyFactors>,
}

impl Default for SeasonalityTable {
    fn default() -> Self {
        let mut factors = HashMap::new();
        factors.insert("Tomato".to_string(), TOMATO);
        factors.insert("Onion".to_string(), ONION);
        factors.insert("Potato".to_string(), POTATO);
        Self { factors }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum FactorsJson {
    List(Vec<f64>),
    ByMonth(BTreeMap<String, f64>),
}

impl SeasonalityTable {
    pub fn empty() -> Self {
        Self {
            factors: HashMap::new(),
        }
    }

    pub fn seasonal_factor(&self, item_name: &str, month: u32) -> f64 {
        if !(1..=12).contains(&month) {
            return 0.0;
        }
        self.factors
            .get(item_name)
            .map(|months| months[(month - 1) as usize])
            .unwrap_or(0.0)
    }

    pub fn insert(&mut self, item_name: impl Into<String>, factors: MonthlyFactors) {
        self.factors.insert(item_name.into(), factors);
    }

    pub fn contains(&self, item_name: &str) -> bool {
        self.factors.contains_key(item_name)
    }

    /// Merges entries from a JSON object over this table.
    ///
    /// Each item maps either to a 12-element array or to an object keyed by
    /// month number ("1".."12"); months missing from the object are 0.
    pub fn merge_json(&mut self, json: &str) -> anyhow::Result<usize> {
        let parsed: BTreeMap<String, FactorsJson> =
            serde_json::from_str(json).context("seasonality table is not valid JSON")?;

        let mut merged = 0;
        for (item, raw) in parsed {
            let item = item.trim().to_string();
            anyhow::ensure!(!item.is_empty(), "seasonality item name must be non-empty");

            let mut months: MonthlyFactors = [0.0; 12];
            match raw {
                FactorsJson::List(list) => {
                    anyhow::ensure!(
                        list.len() == 12,
                        "seasonality for {item} must have 12 entries (got {})",
                        list.len()
                    );
                    months.copy_from_slice(&list);
                }
                FactorsJson::ByMonth(map) => {
                    for (key, factor) in map {
                        let month: u32 = key
                            .trim()
                            .parse()
                            .with_context(|| format!("invalid month key {key:?} for {item}"))?;
                        anyhow::ensure!(
                            (1..=12).contains(&month),
                            "month out of range for {item}: {month}"
                        );
                        months[(month - 1) as usize] = factor;
                    }
                }
            }

            anyhow::ensure!(
                months.iter().all(|f| f.is_finite()),
                "seasonality for {item} contains a non-finite factor"
            );

            self.factors.insert(item, months);
            merged += 1;
        }

        Ok(merged)
    }

    pub fn load_with_overrides(path: &str) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read seasonality table {path}"))?;
        let mut table = Self::default();
        let merged = table.merge_json(&text)?;
        tracing::info!(path, merged, "loaded seasonality overrides");
        Ok(table)
    }
}

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct CombinationOptions {
    /// Only score these items (exact, case-sensitive names). Empty means all.
    pub items: Vec<String>,

    /// Only score these cities. Empty means all.
    pub cities: Vec<String>,
}

impl CombinationOptions {
    pub fn from_env() -> Self {
        Self {
            items: parse_list(std::env::var("SCORING_ITEMS").ok().as_deref()),
            cities: parse_list(std::env::var("SCORING_CITIES").ok().as_deref()),
        }
    }
}

fn parse_list(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };

    let mut seen = BTreeSet::new();
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .filter(|s| seen.insert(s.to_string()))
        .map(str::to_string)
        .collect()
}

/// Every (item, city) pair to score, ordered by city then item.
pub fn build_combinations(
    known_items: Vec<String>,
    known_cities: Vec<String>,
    opts: &CombinationOptions,
) -> anyhow::Result<Vec<(String, String)>> {
    let items = select(known_items, &opts.items, "item")?;
    let cities = select(known_cities, &opts.cities, "city")?;

    let mut out = Vec::with_capacity(items.len() * cities.len());
    for city in &cities {
        for item in &items {
            out.push((item.clone(), city.clone()));
        }
    }
    Ok(out)
}

fn select(known: Vec<String>, wanted: &[String], what: &str) -> anyhow::Result<Vec<String>> {
    let known: BTreeSet<String> = known.into_iter().collect();
    if wanted.is_empty() {
        return Ok(known.into_iter().collect());
    }

    let unknown: Vec<&str> = wanted
        .iter()
        .filter(|w| !known.contains(*w))
        .map(String::as_str)
        .collect();
    if !unknown.is_empty() {
        tracing::warn!(kind = what, unknown = ?unknown, "ignoring unknown filter values");
    }

    let selected: Vec<String> = wanted
        .iter()
        .filter(|w| known.contains(*w))
        .cloned()
        .collect();
    anyhow::ensure!(
        !selected.is_empty(),
        "no known {what} matches the configured filter {wanted:?}"
    );
    Ok(selected)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn builds_full_cross_product_sorted() {
        let combos = build_combinations(
            names(&["Potato", "Onion"]),
            names(&["Pune", "Delhi"]),
            &CombinationOptions::default(),
        )
        .unwrap();
        assert_eq!(
            combos,
            vec![
                ("Onion".to_string(), "Delhi".to_string()),
                ("Potato".to_string(), "Delhi".to_string()),
                ("Onion".to_string(), "Pune".to_string()),
                ("Potato".to_string(), "Pune".to_string()),
            ]
        );
    }

    #[test]
    fn filters_restrict_and_ignore_unknowns() {
        let opts = CombinationOptions {
            items: names(&["Tomato", "Okra"]),
            cities: Vec::new(),
        };
        let combos =
            build_combinations(names(&["Tomato", "Onion"]), names(&["Pune"]), &opts).unwrap();
        assert_eq!(combos, vec![("Tomato".to_string(), "Pune".to_string())]);
    }

    #[test]
    fn filter_matching_nothing_is_an_error() {
        let opts = CombinationOptions {
            items: Vec::new(),
            cities: names(&["Atlantis"]),
        };
        assert!(build_combinations(names(&["Tomato"]), names(&["Pune"]), &opts).is_err());
    }

    #[test]
    fn parses_comma_lists() {
        assert_eq!(
            parse_list(Some(" Tomato, ,Onion,Tomato ")),
            names(&["Tomato", "Onion"])
        );
        assert!(parse_list(None).is_empty());
    }
}

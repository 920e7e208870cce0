//! Team inventory builder.
//!
//! Offline companion to the alias resolver: pulls every MATCH_ODDS
//! market over a wide window with no text query, groups the runner
//! labels the exchange actually uses by normalized key, and writes the
//! inventory file the resolver loads. Teams missing from the output
//! usually just have no market in the window; widen `--hours`.

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use tracing::info;

use crate::aliases::normalize;
use crate::exchange::{
    time_window_filter, ExchangeApi, MarketFilter, SOCCER_EVENT_TYPE_ID,
};
use crate::types::MarketTarget;

const INVENTORY_MAX_RESULTS: u32 = 1000;
const INVENTORY_PROJECTION: &[&str] = &["EVENT", "RUNNER_DESCRIPTION", "COMPETITION"];

/// Runner labels that are outcomes, not teams.
const NON_TEAM_LABELS: &[&str] = &["the draw", "draw"];

#[derive(Debug, Serialize)]
pub struct TeamInventory {
    pub updated_at: String,
    pub window_hours: i64,
    pub total_markets: usize,
    pub total_teams: usize,
    pub teams: Vec<TeamEntry>,
}

#[derive(Debug, Serialize)]
pub struct TeamEntry {
    /// Most frequently observed label for this normalized key.
    pub canonical: String,
    pub normalised: String,
    pub aliases: Vec<String>,
}

/// Build the inventory from the exchange's current MATCH_ODDS catalogue.
pub async fn build_inventory(exchange: &dyn ExchangeApi, hours: i64) -> Result<TeamInventory> {
    let filter = MarketFilter {
        event_type_ids: Some(vec![SOCCER_EVENT_TYPE_ID.to_string()]),
        market_type_codes: Some(vec![MarketTarget::MatchOdds.market_type_code().to_string()]),
        market_start_time: Some(time_window_filter(hours)),
        text_query: None,
        market_ids: None,
    };
    let cats = exchange
        .list_market_catalogue(&filter, INVENTORY_MAX_RESULTS, INVENTORY_PROJECTION)
        .await
        .context("inventory catalogue pull failed")?;

    // key -> label -> occurrence count; the most frequent label becomes
    // the canonical spelling for that key.
    let mut groups: BTreeMap<String, HashMap<String, usize>> = BTreeMap::new();
    for market in &cats {
        for runner in &market.runners {
            let label = runner.runner_name.trim();
            let key = normalize(label);
            if key.is_empty() || NON_TEAM_LABELS.contains(&key.as_str()) {
                continue;
            }
            *groups.entry(key).or_default().entry(label.to_string()).or_insert(0) += 1;
        }
    }

    let mut teams: Vec<TeamEntry> = groups
        .into_iter()
        .map(|(key, counts)| {
            let mut labels: Vec<(String, usize)> = counts.into_iter().collect();
            labels.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
            let aliases: Vec<String> = labels.into_iter().map(|(label, _)| label).collect();
            TeamEntry {
                canonical: aliases[0].clone(),
                normalised: key,
                aliases,
            }
        })
        .collect();
    teams.sort_by(|a, b| a.canonical.cmp(&b.canonical));

    Ok(TeamInventory {
        updated_at: Utc::now().to_rfc3339(),
        window_hours: hours,
        total_markets: cats.len(),
        total_teams: teams.len(),
        teams,
    })
}

/// Build and write the inventory file consumed by the alias resolver.
pub async fn dump_inventory(exchange: &dyn ExchangeApi, hours: i64, out: &Path) -> Result<()> {
    let inventory = build_inventory(exchange, hours).await?;
    if let Some(parent) = out.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(out, serde_json::to_string_pretty(&inventory)?)
        .with_context(|| format!("failed to write inventory {}", out.display()))?;
    info!(
        teams = inventory.total_teams,
        markets = inventory.total_markets,
        out = %out.display(),
        "team inventory written"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::{MarketBook, MarketCatalogue, RunnerCatalogue};
    use async_trait::async_trait;

    struct StubExchange {
        catalogues: Vec<MarketCatalogue>,
    }

    #[async_trait]
    impl ExchangeApi for StubExchange {
        async fn list_market_catalogue(
            &self,
            _filter: &MarketFilter,
            _max_results: u32,
            _projection: &[&str],
        ) -> Result<Vec<MarketCatalogue>> {
            Ok(self.catalogues.clone())
        }

        async fn list_market_book(
            &self,
            _market_ids: &[String],
            _with_prices: bool,
        ) -> Result<Vec<MarketBook>> {
            Ok(Vec::new())
        }

        async fn list_market_book_safe(&self, _market_ids: &[String]) -> Result<Vec<MarketBook>> {
            Ok(Vec::new())
        }
    }

    fn market(id: &str, runners: &[&str]) -> MarketCatalogue {
        MarketCatalogue {
            market_id: id.to_string(),
            market_name: Some("Match Odds".to_string()),
            market_start_time: None,
            event: None,
            competition: None,
            runners: runners
                .iter()
                .enumerate()
                .map(|(i, name)| RunnerCatalogue {
                    selection_id: i as u64 + 1,
                    runner_name: name.to_string(),
                })
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_inventory_groups_labels_by_normalized_key() {
        let exchange = StubExchange {
            catalogues: vec![
                market("1.1", &["Sheffield United", "Fulham", "The Draw"]),
                market("1.2", &["Sheffield Utd", "Everton", "The Draw"]),
                market("1.3", &["Sheffield United", "Brentford", "The Draw"]),
            ],
        };
        let inventory = build_inventory(&exchange, 336).await.unwrap();

        assert_eq!(inventory.total_markets, 3);
        // Draw rows are outcomes, not teams.
        assert!(inventory.teams.iter().all(|t| t.normalised != "the draw"));

        // "Sheffield United" and "Sheffield Utd" normalize apart (no
        // abbreviation folding here), so each keeps its own entry.
        let united = inventory.teams.iter().find(|t| t.canonical == "Sheffield United").unwrap();
        assert_eq!(united.aliases, vec!["Sheffield United".to_string()]);
        assert!(inventory.teams.iter().any(|t| t.canonical == "Sheffield Utd"));
    }

    #[tokio::test]
    async fn test_inventory_canonical_is_most_frequent_label() {
        let exchange = StubExchange {
            catalogues: vec![
                market("1.1", &["AFC Bournemouth"]),
                market("1.2", &["Bournemouth"]),
                market("1.3", &["Bournemouth"]),
            ],
        };
        let inventory = build_inventory(&exchange, 336).await.unwrap();
        // Both labels share the normalized key "bournemouth".
        let entry = inventory.teams.iter().find(|t| t.normalised == "bournemouth").unwrap();
        assert_eq!(entry.canonical, "Bournemouth");
        assert_eq!(entry.aliases.len(), 2);
    }

    #[tokio::test]
    async fn test_inventory_written_file_loads_into_resolver() {
        let exchange = StubExchange {
            catalogues: vec![market("1.1", &["Grimsby Town", "Wrexham", "The Draw"])],
        };
        let dir = std::env::temp_dir().join("edgescan_inventory_test");
        let out = dir.join("teams.json");
        dump_inventory(&exchange, 336, &out).await.unwrap();

        let resolver = crate::aliases::TeamAliasResolver::load(Some(&out));
        assert!(resolver.matches_runner("Grimsby Town", "Grimsby Town"));
        std::fs::remove_file(&out).ok();
    }
}

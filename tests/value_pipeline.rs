//! End-to-end pipeline test: snapshot file -> parser -> valuator ->
//! sqlite store -> settlement cycle, with a deterministic in-memory
//! exchange standing in for Betfair.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;

use edgescan::aliases::TeamAliasResolver;
use edgescan::exchange::{
    ExchangeApi, ExchangePrices, MarketBook, MarketCatalogue, MarketFilter, PriceSize, RunnerBook,
    RunnerCatalogue,
};
use edgescan::parser::BoostParser;
use edgescan::pipeline::run_value_check;
use edgescan::settlement::{SettlementConfig, SettlementWorker};
use edgescan::store::{BetStore, SqliteBetStore};
use edgescan::types::OfferKind;
use edgescan::valuation::{OfferValuator, ValuationThresholds};

// ---------------------------------------------------------------------------
// Mock exchange
// ---------------------------------------------------------------------------

/// Catalogue "search" matches the text query against runner names;
/// market-type scoping matches against the market name.
struct MockExchange {
    catalogues: Vec<MarketCatalogue>,
    books: HashMap<String, MarketBook>,
}

#[async_trait]
impl ExchangeApi for MockExchange {
    async fn list_market_catalogue(
        &self,
        filter: &MarketFilter,
        _max_results: u32,
        _projection: &[&str],
    ) -> Result<Vec<MarketCatalogue>> {
        let query = filter.text_query.clone().unwrap_or_default().to_lowercase();
        Ok(self
            .catalogues
            .iter()
            .filter(|c| {
                let name = c.market_name.clone().unwrap_or_default().to_lowercase();
                let type_ok = match filter.market_type_codes.as_deref() {
                    Some([code]) if code == "MATCH_ODDS" => name == "match odds",
                    Some(_) => name.contains("both teams to score"),
                    None => true,
                };
                let text_ok = query.is_empty()
                    || c.runners.iter().any(|r| r.runner_name.to_lowercase().contains(&query));
                type_ok && text_ok
            })
            .cloned()
            .collect())
    }

    async fn list_market_book(
        &self,
        market_ids: &[String],
        _with_prices: bool,
    ) -> Result<Vec<MarketBook>> {
        Ok(market_ids.iter().filter_map(|id| self.books.get(id).cloned()).collect())
    }

    async fn list_market_book_safe(&self, market_ids: &[String]) -> Result<Vec<MarketBook>> {
        self.list_market_book(market_ids, true).await
    }
}

fn catalogue(id: &str, start: &str, runners: &[(u64, &str)]) -> MarketCatalogue {
    MarketCatalogue {
        market_id: id.to_string(),
        market_name: Some("Match Odds".to_string()),
        market_start_time: Some(start.to_string()),
        event: None,
        competition: None,
        runners: runners
            .iter()
            .map(|&(selection_id, name)| RunnerCatalogue {
                selection_id,
                runner_name: name.to_string(),
            })
            .collect(),
    }
}

fn priced_book(id: &str, runners: &[(u64, f64, f64)]) -> MarketBook {
    MarketBook {
        market_id: id.to_string(),
        status: Some("OPEN".to_string()),
        runners: runners
            .iter()
            .map(|&(selection_id, back, lay)| RunnerBook {
                selection_id,
                status: Some("ACTIVE".to_string()),
                ex: Some(ExchangePrices {
                    available_to_back: vec![PriceSize { price: back, size: 200.0 }],
                    available_to_lay: vec![PriceSize { price: lay, size: 200.0 }],
                }),
            })
            .collect(),
    }
}

fn closed_book(id: &str, winner: u64, losers: &[u64]) -> MarketBook {
    let mut runners = vec![RunnerBook {
        selection_id: winner,
        status: Some("WINNER".to_string()),
        ex: None,
    }];
    runners.extend(losers.iter().map(|&selection_id| RunnerBook {
        selection_id,
        status: Some("LOSER".to_string()),
        ex: None,
    }));
    MarketBook { market_id: id.to_string(), status: Some("CLOSED".to_string()), runners }
}

/// Kickoffs sit a day or so ahead of the wall clock so the catalogue
/// window and settlement eligibility behave the same whenever the test
/// runs.
fn kickoff(hours_ahead: i64) -> String {
    (chrono::Utc::now() + chrono::Duration::hours(hours_ahead))
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}

fn pricing_exchange() -> MockExchange {
    MockExchange {
        catalogues: vec![
            catalogue(
                "1.100",
                &kickoff(24),
                &[(11, "Liverpool"), (12, "Bournemouth"), (13, "The Draw")],
            ),
            catalogue(
                "1.200",
                &kickoff(26),
                &[(21, "Arsenal"), (22, "Fulham"), (23, "The Draw")],
            ),
        ],
        books: HashMap::from([
            // mids 2.0 and 2.1 -> fair 4.2
            ("1.100".to_string(), priced_book("1.100", &[(11, 1.98, 2.02), (12, 3.9, 4.1)])),
            ("1.200".to_string(), priced_book("1.200", &[(21, 2.08, 2.12), (22, 3.4, 3.6)])),
        ]),
    }
}

// ---------------------------------------------------------------------------
// Snapshot fixture
// ---------------------------------------------------------------------------

fn write_snapshot(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("edgescan_e2e");
    std::fs::create_dir_all(&dir).unwrap();
    let html_path = dir.join(format!("{name}.html"));
    std::fs::write(
        &html_path,
        r#"<html><body><div class="enhanced-offers">
             <div class="btmarket__selection">
               <p class="btmarket__name"><span>Liverpool &amp; Arsenal All To Win</span></p>
               <button class="betbutton--enhanced-odds" data-num="7" data-denom="2"></button>
             </div>
           </div></body></html>"#,
    )
    .unwrap();
    std::fs::write(
        dir.join(format!("{name}.meta.json")),
        r#"{"url":"https://bookie.test/boosts","ts":"2026-08-29T09:00:00Z"}"#,
    )
    .unwrap();
    html_path
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_snapshot_to_accepted_row() {
    let exchange = pricing_exchange();
    let aliases = TeamAliasResolver::load(None);
    let parser = BoostParser::new().unwrap();
    let valuator =
        OfferValuator::new(&exchange, &aliases, ValuationThresholds::default()).unwrap();
    let store = SqliteBetStore::connect("sqlite::memory:").await.unwrap();

    let snapshot = write_snapshot("accepted");
    let accepted =
        run_value_check(&parser, &valuator, &store, &snapshot, None).await.unwrap();

    assert_eq!(accepted.len(), 1);
    let row = &accepted[0];
    assert_eq!(row.bet_text, "Liverpool & Arsenal All To Win");
    assert_eq!(row.boosted, 4.5);
    assert!((row.fair - 4.2).abs() < 1e-9);
    assert!((row.rating - 1.0714285714).abs() < 1e-6);
    assert_eq!(row.legs, 2);

    // The row is persisted but invisible to settlement until approved.
    assert!(store.pending_mapped().await.unwrap().is_empty());
    assert!(store.approve(row.row_id).await.unwrap());

    let pending = store.pending_mapped().await.unwrap();
    assert_eq!(pending.len(), 1);
    let bet = &pending[0];
    assert_eq!(bet.mapping.kind, OfferKind::AllToWin);
    assert_eq!(bet.mapping.legs.len(), 2);
    assert_eq!(bet.market_ids, vec!["1.100".to_string(), "1.200".to_string()]);
    // Provenance came from the sidecar, not an override.
    assert_eq!(bet.mapping.legs[0].runner_name, "Liverpool");
}

#[tokio::test]
async fn test_strict_threshold_rejects_everything() {
    let exchange = pricing_exchange();
    let aliases = TeamAliasResolver::load(None);
    let parser = BoostParser::new().unwrap();
    // Rating 1.0714 fails a 1.10 bar.
    let valuator = OfferValuator::new(
        &exchange,
        &aliases,
        ValuationThresholds { threshold: 1.10, ..Default::default() },
    )
    .unwrap();
    let store = SqliteBetStore::connect("sqlite::memory:").await.unwrap();

    let snapshot = write_snapshot("rejected");
    let accepted =
        run_value_check(&parser, &valuator, &store, &snapshot, None).await.unwrap();

    assert!(accepted.is_empty());
}

#[tokio::test]
async fn test_accepted_bet_settles_as_won() {
    let exchange = pricing_exchange();
    let aliases = TeamAliasResolver::load(None);
    let parser = BoostParser::new().unwrap();
    let valuator =
        OfferValuator::new(&exchange, &aliases, ValuationThresholds::default()).unwrap();
    let store = SqliteBetStore::connect("sqlite::memory:").await.unwrap();

    let snapshot = write_snapshot("settled");
    let accepted =
        run_value_check(&parser, &valuator, &store, &snapshot, Some("https://bookie.test/boosts"))
            .await
            .unwrap();
    assert_eq!(accepted.len(), 1);
    store.approve(accepted[0].row_id).await.unwrap();

    // Matches are over: both winners came in. The recorded kickoff is
    // still a day ahead, so widen the pre-KO window to make the bet
    // eligible this cycle.
    let settled_exchange = MockExchange {
        catalogues: Vec::new(),
        books: HashMap::from([
            ("1.100".to_string(), closed_book("1.100", 11, &[12, 13])),
            ("1.200".to_string(), closed_book("1.200", 21, &[22, 23])),
        ]),
    };
    let config = SettlementConfig {
        near_before_min: i64::MAX / 2,
        ..SettlementConfig::default()
    };
    let worker = SettlementWorker::new(&settled_exchange, &store, config);
    let summary = worker.run_cycle().await.unwrap();

    assert_eq!(summary.eligible, 1);
    assert_eq!(summary.settled, 1);
    // Terminal result removes the row from future scans.
    assert!(store.pending_mapped().await.unwrap().is_empty());
}

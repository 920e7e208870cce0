//! Snapshot-to-row-store orchestration.
//!
//! Glue between the leaf modules: read a snapshot, parse and de-dupe
//! its offers, value each one, and append accepted rows to the store.
//! Per-offer failures are logged and skipped so one bad offer never
//! aborts its siblings.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{error, info};

use crate::parser::{pick_best_by_signature, BoostParser};
use crate::snapshot::sidecar_url;
use crate::store::BetStore;
use crate::types::{BoostOffer, NewBetRow};
use crate::valuation::{OfferValuator, Valuation};

/// One accepted offer, as reported in the run summary.
#[derive(Debug, Clone)]
pub struct ValuedRow {
    pub row_id: i64,
    pub bet_text: String,
    pub boosted: f64,
    pub fair: f64,
    pub rating: f64,
    pub legs: usize,
}

/// DD/MM/YYYY, the tracker's date convention.
pub fn ddmmyyyy(ts: DateTime<Utc>) -> String {
    ts.format("%d/%m/%Y").to_string()
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// Read a snapshot and resolve its provenance URL: an explicit
/// override wins, otherwise the `.meta.json` sidecar, otherwise empty.
pub fn load_snapshot(file: &Path, url_override: Option<&str>) -> Result<(String, String)> {
    let html = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read snapshot {}", file.display()))?;
    let source_url = match url_override {
        Some(url) if !url.is_empty() => url.to_string(),
        _ => sidecar_url(file),
    };
    Ok((html, source_url))
}

/// Parse a snapshot and keep the best-priced offer per signature.
pub fn parse_snapshot(parser: &BoostParser, file: &Path, url_override: Option<&str>) -> Result<Vec<BoostOffer>> {
    let (html, source_url) = load_snapshot(file, url_override)?;
    let offers = pick_best_by_signature(parser.parse(&html, &source_url));
    info!(count = offers.len(), file = %file.display(), "parsed boost offers");
    Ok(offers)
}

/// Full valuation pipeline for one snapshot: parse, value, append
/// accepted rows. Returns the accepted summary lines. Appends are
/// paced at whatever rate the store asks for.
pub async fn run_value_check(
    parser: &BoostParser,
    valuator: &OfferValuator<'_>,
    store: &dyn BetStore,
    file: &Path,
    url_override: Option<&str>,
) -> Result<Vec<ValuedRow>> {
    let pacing = store.write_pacing();
    let (html, source_url) = load_snapshot(file, url_override)?;
    let offers = pick_best_by_signature(parser.parse(&html, &source_url));
    info!(count = offers.len(), "parsed boost offers");

    let mut accepted = Vec::new();
    for offer in &offers {
        let valuation = match valuator.value_offer(offer).await {
            Ok(v) => v,
            Err(e) => {
                error!(bet = %offer.bet_text, error = %e, "valuation failed, skipping offer");
                continue;
            }
        };
        let result = match valuation {
            Valuation::Accepted(result) => result,
            Valuation::Rejected(reason) => {
                info!(bet = %offer.bet_text, %reason, "offer rejected");
                continue;
            }
        };

        let row = NewBetRow {
            date: ddmmyyyy(Utc::now()),
            bookie: offer.bookie.clone(),
            sport: offer.sport.clone(),
            event: "Multi".to_string(),
            bet_text: offer.bet_text.clone(),
            settle_date: result.mapping.latest_ko.map(ddmmyyyy).unwrap_or_default(),
            odds: offer.boosted_odds,
            fair_odds: Some(round3(result.fair)),
            bookie_url: source_url.clone(),
            mapping: Some(result.mapping.clone()),
        };
        match store.append_pending(&row).await {
            Ok(row_id) => {
                info!(row_id, bet = %offer.bet_text, rating = result.rating, "row added");
                accepted.push(ValuedRow {
                    row_id,
                    bet_text: offer.bet_text.clone(),
                    boosted: offer.boosted_odds,
                    fair: result.fair,
                    rating: result.rating,
                    legs: result.mapping.legs.len(),
                });
                if !pacing.is_zero() {
                    tokio::time::sleep(pacing).await;
                }
            }
            Err(e) => {
                error!(bet = %offer.bet_text, error = %e, "row append failed");
            }
        }
    }
    Ok(accepted)
}

/// Publish parsed offers without valuation: rows get the boosted price
/// only, no fair odds and no mapping (so settlement never picks them
/// up until they are re-valued by hand).
pub async fn publish_offers(store: &dyn BetStore, offers: &[BoostOffer]) -> Result<usize> {
    let pacing = store.write_pacing();
    let mut written = 0;
    for offer in offers {
        let row = NewBetRow {
            date: ddmmyyyy(Utc::now()),
            bookie: offer.bookie.clone(),
            sport: offer.sport.clone(),
            event: "Multi".to_string(),
            bet_text: offer.bet_text.clone(),
            settle_date: String::new(),
            odds: offer.boosted_odds,
            fair_odds: None,
            bookie_url: offer.source_url.clone(),
            mapping: None,
        };
        match store.append_pending(&row).await {
            Ok(row_id) => {
                info!(row_id, bet = %offer.bet_text, "offer published");
                written += 1;
                if !pacing.is_zero() {
                    tokio::time::sleep(pacing).await;
                }
            }
            Err(e) => {
                error!(bet = %offer.bet_text, error = %e, "publish failed");
            }
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_ddmmyyyy_format() {
        let ts = Utc.with_ymd_and_hms(2026, 8, 29, 15, 4, 0).unwrap();
        assert_eq!(ddmmyyyy(ts), "29/08/2026");
    }

    #[test]
    fn test_round3() {
        assert_eq!(round3(4.2001234), 4.2);
        assert_eq!(round3(1.0714285), 1.071);
    }

    #[test]
    fn test_url_override_beats_sidecar() {
        let dir = std::env::temp_dir().join("edgescan_pipeline_test");
        std::fs::create_dir_all(&dir).unwrap();
        let html = dir.join("snap.html");
        std::fs::write(&html, "<html></html>").unwrap();
        std::fs::write(
            dir.join("snap.meta.json"),
            r#"{"url":"https://sidecar.test/","ts":"2026-08-29T12:00:00Z"}"#,
        )
        .unwrap();

        let (_, url) = load_snapshot(&html, Some("https://override.test/")).unwrap();
        assert_eq!(url, "https://override.test/");
        let (_, url) = load_snapshot(&html, None).unwrap();
        assert_eq!(url, "https://sidecar.test/");
    }
}

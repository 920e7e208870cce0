//! Shared types for the edgescan pipeline.
//!
//! These types form the data model used across all modules: parsed
//! bookmaker offers, exchange leg mappings, valuation output, and
//! settlement outcomes. They are designed to be stable so that the
//! parser, valuator, store, and settlement modules can depend on them
//! without circular references.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

// ---------------------------------------------------------------------------
// Offer kinds and legs
// ---------------------------------------------------------------------------

/// Classified multiple type of a boost offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OfferKind {
    #[serde(rename = "ALL_TO_WIN")]
    AllToWin,
    #[serde(rename = "OVER_X_EACH_MATCH")]
    OverEachMatch,
    #[serde(rename = "BOTH_TO_WIN_AND_ALL_TEAMS_SCORE")]
    BothToWinAllScore,
}

impl OfferKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferKind::AllToWin => "ALL_TO_WIN",
            OfferKind::OverEachMatch => "OVER_X_EACH_MATCH",
            OfferKind::BothToWinAllScore => "BOTH_TO_WIN_AND_ALL_TEAMS_SCORE",
        }
    }
}

impl fmt::Display for OfferKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One independent selection within a multiple.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "market")]
pub enum Leg {
    /// Team to win its match (MATCH_ODDS runner).
    #[serde(rename = "MATCH_ODDS")]
    MatchOdds { team: String },
    /// Team to win with both teams scoring (MO&BTTS "Team/Yes" runner).
    #[serde(rename = "MATCH_ODDS_AND_BTTS")]
    MatchOddsBtts { team: String },
    /// Goal-line leg scoped to a competition; not priced yet.
    #[serde(rename = "OVER_GOALS")]
    OverGoals { line: f64, competition: String },
}

impl Leg {
    /// The team this leg references, if it is a team leg.
    pub fn team(&self) -> Option<&str> {
        match self {
            Leg::MatchOdds { team } | Leg::MatchOddsBtts { team } => Some(team),
            Leg::OverGoals { .. } => None,
        }
    }

    /// Stable lowercase identity used for de-duplication signatures.
    pub fn identity(&self) -> String {
        match self {
            Leg::MatchOdds { team } | Leg::MatchOddsBtts { team } => team.to_lowercase(),
            Leg::OverGoals { line, competition } => {
                format!("over {line} goals {}", competition.to_lowercase())
            }
        }
    }
}

// ---------------------------------------------------------------------------
// BoostOffer
// ---------------------------------------------------------------------------

/// A candidate bookmaker promotion extracted from a page snapshot.
///
/// Created per-parse and consumed immediately by the valuator; never
/// mutated after creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BoostOffer {
    pub bookie: String,
    pub sport: String,
    pub kind: OfferKind,
    /// Cleaned, human-readable bet description (source of truth for display).
    pub bet_text: String,
    /// Decimal odds as advertised by the bookmaker.
    pub boosted_odds: f64,
    pub legs: Vec<Leg>,
    pub source_url: String,
    /// Day-bucketed de-duplication signature (see `signature_for_day`).
    pub signature: String,
}

impl BoostOffer {
    /// Deterministic hash of (sport, kind, sorted leg identities, day).
    ///
    /// Two sightings of the same offer within one day collide on this
    /// signature regardless of document position or boosted price.
    pub fn signature_for_day(
        sport: &str,
        kind: OfferKind,
        legs: &[Leg],
        day: NaiveDate,
    ) -> String {
        let mut ids: Vec<String> = legs.iter().map(Leg::identity).collect();
        ids.sort();
        let payload = format!("{sport}|{kind}|{}|{day}", ids.join("+"));
        let digest = Sha256::digest(payload.as_bytes());
        hex::encode(digest)
    }
}

impl fmt::Display for BoostOffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} @ {:.2} ({}, {} legs)",
            self.bookie,
            self.bet_text,
            self.boosted_odds,
            self.kind,
            self.legs.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Exchange pricing
// ---------------------------------------------------------------------------

/// Mid-price snapshot computed from a runner's best back/lay offers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MidPrice {
    pub mid: f64,
    pub back: f64,
    pub lay: f64,
    /// Relative back/lay gap as a percentage of the mid.
    pub spread_pct: f64,
    /// Combined size available at the best back and lay levels.
    pub liquidity: f64,
}

impl fmt::Display for MidPrice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "mid={:.3} ({:.2}/{:.2} spread={:.1}% liq={:.0})",
            self.mid, self.back, self.lay, self.spread_pct, self.liquidity,
        )
    }
}

// ---------------------------------------------------------------------------
// Valuation mapping
// ---------------------------------------------------------------------------

/// Exchange market family a leg resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketTarget {
    #[serde(rename = "MATCH_ODDS")]
    MatchOdds,
    #[serde(rename = "MATCH_ODDS_AND_BTTS")]
    MatchOddsBtts,
}

impl MarketTarget {
    /// Exchange market-type code used for scoped catalogue searches.
    pub fn market_type_code(&self) -> &'static str {
        match self {
            MarketTarget::MatchOdds => "MATCH_ODDS",
            MarketTarget::MatchOddsBtts => "MATCH_ODDS_AND_BOTH_TEAMS_TO_SCORE",
        }
    }
}

/// One leg of an offer resolved to an exchange market, runner and price.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResolvedLeg {
    pub market: MarketTarget,
    pub team: String,
    pub market_id: String,
    pub selection_id: u64,
    pub runner_name: String,
    /// Kickoff (market start time), when the catalogue supplied one.
    pub kickoff: Option<DateTime<Utc>>,
    pub mid: f64,
    pub back: f64,
    pub lay: f64,
    pub spread_pct: f64,
    pub liquidity: f64,
}

/// Persisted leg-to-market mapping for a valued offer.
///
/// Round-trips through the row-store as JSON and is read back by the
/// settlement worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetMapping {
    pub bookie: String,
    pub kind: OfferKind,
    pub legs: Vec<ResolvedLeg>,
    /// Latest kickoff across all legs; settlement checks begin near it.
    pub latest_ko: Option<DateTime<Utc>>,
}

impl BetMapping {
    /// Flattened, de-duplicated market ids for batched book lookups.
    pub fn market_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.legs.iter().map(|l| l.market_id.clone()).collect();
        ids.sort();
        ids.dedup();
        ids
    }
}

/// Output of combining exchange prices for one offer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValuationResult {
    /// Product of each leg's mid price (legs assumed independent).
    pub fair: f64,
    /// boosted_odds / fair.
    pub rating: f64,
    pub mapping: BetMapping,
}

impl fmt::Display for ValuationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fair={:.3} rating={:.3} legs={}",
            self.fair,
            self.rating,
            self.mapping.legs.len(),
        )
    }
}

// ---------------------------------------------------------------------------
// Row-store records
// ---------------------------------------------------------------------------

/// Named-field record appended to the pending-bets store.
///
/// All row-store I/O goes through this shape; the core never indexes
/// into positional columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBetRow {
    /// DD/MM/YYYY capture date.
    pub date: String,
    pub bookie: String,
    pub sport: String,
    /// Event label; multiples use "Multi".
    pub event: String,
    pub bet_text: String,
    /// DD/MM/YYYY expected settlement date (empty when unknown).
    pub settle_date: String,
    pub odds: f64,
    pub fair_odds: Option<f64>,
    pub bookie_url: String,
    pub mapping: Option<BetMapping>,
}

/// A persisted bet awaiting settlement, as read back from the store.
#[derive(Debug, Clone)]
pub struct PendingBet {
    pub row_id: i64,
    pub date: String,
    pub sport: String,
    pub mapping: BetMapping,
    pub latest_ko: Option<DateTime<Utc>>,
    pub market_ids: Vec<String>,
}

// ---------------------------------------------------------------------------
// Settlement outcomes
// ---------------------------------------------------------------------------

/// Classification of a single leg against current market state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegOutcome {
    Won,
    Lost,
    Void,
    Pending,
}

impl fmt::Display for LegOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LegOutcome::Won => write!(f, "W"),
            LegOutcome::Lost => write!(f, "L"),
            LegOutcome::Void => write!(f, "V"),
            LegOutcome::Pending => write!(f, "P"),
        }
    }
}

/// Terminal bet-level outcome written back to the row-store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BetOutcome {
    Won,
    Lost,
    Void,
}

impl BetOutcome {
    /// Single-letter result code stored in the result column.
    pub fn code(&self) -> &'static str {
        match self {
            BetOutcome::Won => "W",
            BetOutcome::Lost => "L",
            BetOutcome::Void => "V",
        }
    }
}

impl fmt::Display for BetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 8, 29).unwrap()
    }

    #[test]
    fn test_offer_kind_serde_tags() {
        let json = serde_json::to_string(&OfferKind::AllToWin).unwrap();
        assert_eq!(json, "\"ALL_TO_WIN\"");
        let parsed: OfferKind =
            serde_json::from_str("\"BOTH_TO_WIN_AND_ALL_TEAMS_SCORE\"").unwrap();
        assert_eq!(parsed, OfferKind::BothToWinAllScore);
    }

    #[test]
    fn test_leg_identity_is_case_insensitive() {
        let a = Leg::MatchOdds { team: "Arsenal".to_string() };
        let b = Leg::MatchOdds { team: "ARSENAL".to_string() };
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_signature_ignores_leg_order() {
        let legs_a = vec![
            Leg::MatchOdds { team: "Arsenal".to_string() },
            Leg::MatchOdds { team: "Chelsea".to_string() },
        ];
        let legs_b = vec![
            Leg::MatchOdds { team: "Chelsea".to_string() },
            Leg::MatchOdds { team: "Arsenal".to_string() },
        ];
        let sig_a = BoostOffer::signature_for_day("Football", OfferKind::AllToWin, &legs_a, day());
        let sig_b = BoostOffer::signature_for_day("Football", OfferKind::AllToWin, &legs_b, day());
        assert_eq!(sig_a, sig_b);
    }

    #[test]
    fn test_signature_differs_across_days() {
        let legs = vec![
            Leg::MatchOdds { team: "Arsenal".to_string() },
            Leg::MatchOdds { team: "Chelsea".to_string() },
        ];
        let other_day = NaiveDate::from_ymd_opt(2026, 8, 30).unwrap();
        let a = BoostOffer::signature_for_day("Football", OfferKind::AllToWin, &legs, day());
        let b = BoostOffer::signature_for_day("Football", OfferKind::AllToWin, &legs, other_day);
        assert_ne!(a, b);
    }

    #[test]
    fn test_signature_differs_across_kinds() {
        let legs = vec![
            Leg::MatchOdds { team: "Arsenal".to_string() },
            Leg::MatchOdds { team: "Chelsea".to_string() },
        ];
        let a = BoostOffer::signature_for_day("Football", OfferKind::AllToWin, &legs, day());
        let b =
            BoostOffer::signature_for_day("Football", OfferKind::BothToWinAllScore, &legs, day());
        assert_ne!(a, b);
    }

    #[test]
    fn test_mapping_market_ids_deduplicated() {
        let leg = |id: &str| ResolvedLeg {
            market: MarketTarget::MatchOdds,
            team: "Arsenal".to_string(),
            market_id: id.to_string(),
            selection_id: 1,
            runner_name: "Arsenal".to_string(),
            kickoff: None,
            mid: 2.0,
            back: 1.98,
            lay: 2.02,
            spread_pct: 2.0,
            liquidity: 100.0,
        };
        let mapping = BetMapping {
            bookie: "William Hill".to_string(),
            kind: OfferKind::AllToWin,
            legs: vec![leg("1.1"), leg("1.2"), leg("1.1")],
            latest_ko: None,
        };
        assert_eq!(mapping.market_ids(), vec!["1.1".to_string(), "1.2".to_string()]);
    }

    #[test]
    fn test_mapping_round_trips_through_json() {
        let mapping = BetMapping {
            bookie: "William Hill".to_string(),
            kind: OfferKind::BothToWinAllScore,
            legs: vec![ResolvedLeg {
                market: MarketTarget::MatchOddsBtts,
                team: "Tottenham".to_string(),
                market_id: "1.234".to_string(),
                selection_id: 47972,
                runner_name: "Tottenham/Yes".to_string(),
                kickoff: Some(Utc::now()),
                mid: 3.1,
                back: 3.0,
                lay: 3.2,
                spread_pct: 6.45,
                liquidity: 240.0,
            }],
            latest_ko: Some(Utc::now()),
        };
        let json = serde_json::to_string(&mapping).unwrap();
        let parsed: BetMapping = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.kind, OfferKind::BothToWinAllScore);
        assert_eq!(parsed.legs.len(), 1);
        assert_eq!(parsed.legs[0].selection_id, 47972);
        assert_eq!(parsed.legs[0].market, MarketTarget::MatchOddsBtts);
    }

    #[test]
    fn test_market_target_codes() {
        assert_eq!(MarketTarget::MatchOdds.market_type_code(), "MATCH_ODDS");
        assert_eq!(
            MarketTarget::MatchOddsBtts.market_type_code(),
            "MATCH_ODDS_AND_BOTH_TEAMS_TO_SCORE"
        );
    }

    #[test]
    fn test_bet_outcome_codes() {
        assert_eq!(BetOutcome::Won.code(), "W");
        assert_eq!(BetOutcome::Lost.code(), "L");
        assert_eq!(BetOutcome::Void.code(), "V");
        assert_eq!(format!("{}", LegOutcome::Pending), "P");
    }

    #[test]
    fn test_leg_serde_market_tag() {
        let leg = Leg::MatchOddsBtts { team: "Arsenal".to_string() };
        let json = serde_json::to_string(&leg).unwrap();
        assert!(json.contains("\"market\":\"MATCH_ODDS_AND_BTTS\""));
        let parsed: Leg = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, leg);
    }
}

//! Offer valuation against exchange mid prices.
//!
//! Each leg of a parsed offer is resolved to an exchange market and
//! runner (catalogue search through the alias queries, scoped to the
//! leg's market type), priced at the best-offer mid, and admitted only
//! if its spread and liquidity clear the thresholds. The fair price of
//! the multiple is the product of leg mids, legs assumed independent.
//!
//! Resolution is all-or-nothing: a multiple's fair price is only
//! meaningful if every leg has a liquid, matched exchange equivalent.
//! Partial pricing would misstate true value, so the first leg that
//! fails to resolve rejects the whole offer.

use anyhow::Result;
use chrono::{DateTime, Utc};
use regex::Regex;
use std::fmt;
use tracing::debug;

use crate::aliases::{normalize, TeamAliasResolver};
use crate::exchange::{
    mid_from_best_offers, time_window_filter, ExchangeApi, MarketCatalogue, MarketFilter,
    CATALOGUE_PROJECTION, SOCCER_EVENT_TYPE_ID,
};
use crate::types::{
    BetMapping, BoostOffer, MarketTarget, MidPrice, OfferKind, ResolvedLeg, ValuationResult,
};

const SCOPED_MAX_RESULTS: u32 = 200;
const UNSCOPED_MAX_RESULTS: u32 = 400;

// ---------------------------------------------------------------------------
// Thresholds and outcomes
// ---------------------------------------------------------------------------

/// Admission and acceptance knobs for a valuation run.
#[derive(Debug, Clone, Copy)]
pub struct ValuationThresholds {
    /// Reject a leg whose back/lay spread exceeds this percentage.
    pub max_spread_pct: f64,
    /// Reject a leg with less combined best-level size than this.
    pub min_liquidity: f64,
    /// Minimum boosted/fair rating worth flagging.
    pub threshold: f64,
    /// Catalogue search look-ahead window.
    pub hours_ahead: i64,
}

impl Default for ValuationThresholds {
    fn default() -> Self {
        Self { max_spread_pct: 20.0, min_liquidity: 50.0, threshold: 1.05, hours_ahead: 120 }
    }
}

/// Outcome of valuing one offer. Rejection carries the reason so
/// callers (and tests) can see why an offer was dropped, not just that
/// it was.
#[derive(Debug, Clone)]
pub enum Valuation {
    Accepted(ValuationResult),
    Rejected(RejectReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum RejectReason {
    /// Offer kind not priced yet (goal-line multiples).
    DeferredKind(OfferKind),
    NoMarket { team: String },
    NoRunner { team: String },
    NoPrice { team: String },
    SpreadTooWide { team: String, spread_pct: f64, max: f64 },
    ThinLiquidity { team: String, liquidity: f64, min: f64 },
    BelowThreshold { rating: f64, threshold: f64 },
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::DeferredKind(kind) => write!(f, "kind {kind} not priced yet"),
            RejectReason::NoMarket { team } => write!(f, "no exchange market for {team}"),
            RejectReason::NoRunner { team } => write!(f, "no runner match for {team}"),
            RejectReason::NoPrice { team } => write!(f, "no price available for {team}"),
            RejectReason::SpreadTooWide { team, spread_pct, max } => {
                write!(f, "spread {spread_pct:.1}% > {max:.1}% for {team}")
            }
            RejectReason::ThinLiquidity { team, liquidity, min } => {
                write!(f, "liquidity {liquidity:.0} < {min:.0} for {team}")
            }
            RejectReason::BelowThreshold { rating, threshold } => {
                write!(f, "rating {rating:.3} below threshold {threshold:.2}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Valuator
// ---------------------------------------------------------------------------

pub struct OfferValuator<'a> {
    exchange: &'a dyn ExchangeApi,
    aliases: &'a TeamAliasResolver,
    thresholds: ValuationThresholds,
    re_match_odds_name: Regex,
    re_btts_name: Regex,
}

impl<'a> OfferValuator<'a> {
    pub fn new(
        exchange: &'a dyn ExchangeApi,
        aliases: &'a TeamAliasResolver,
        thresholds: ValuationThresholds,
    ) -> Result<Self> {
        Ok(Self {
            exchange,
            aliases,
            thresholds,
            re_match_odds_name: Regex::new(r"(?i)\bmatch\s*odds\b")?,
            re_btts_name: Regex::new(r"(?i)match\s*odds\s*and\s*both\s*teams\s*to\s*score")?,
        })
    }

    /// Value one offer against current exchange prices.
    pub async fn value_offer(&self, offer: &BoostOffer) -> Result<Valuation> {
        let target = match offer.kind {
            OfferKind::AllToWin => MarketTarget::MatchOdds,
            OfferKind::BothToWinAllScore => MarketTarget::MatchOddsBtts,
            OfferKind::OverEachMatch => {
                return Ok(Valuation::Rejected(RejectReason::DeferredKind(offer.kind)));
            }
        };

        let mut legs: Vec<ResolvedLeg> = Vec::new();
        let mut latest_ko: Option<DateTime<Utc>> = None;

        for team in offer.legs.iter().filter_map(crate::types::Leg::team) {
            let Some(market) = self.find_market(team, target).await? else {
                debug!(team, target = target.market_type_code(), "no market for leg");
                return Ok(Valuation::Rejected(RejectReason::NoMarket { team: team.to_string() }));
            };
            let Some(runner) = self.match_runner(&market, team, target) else {
                debug!(team, market_id = %market.market_id, "no runner match in market");
                return Ok(Valuation::Rejected(RejectReason::NoRunner { team: team.to_string() }));
            };
            let Some(mid) = self.runner_mid(&market.market_id, runner.selection_id).await? else {
                return Ok(Valuation::Rejected(RejectReason::NoPrice { team: team.to_string() }));
            };
            if mid.spread_pct > self.thresholds.max_spread_pct {
                return Ok(Valuation::Rejected(RejectReason::SpreadTooWide {
                    team: team.to_string(),
                    spread_pct: mid.spread_pct,
                    max: self.thresholds.max_spread_pct,
                }));
            }
            if mid.liquidity < self.thresholds.min_liquidity {
                return Ok(Valuation::Rejected(RejectReason::ThinLiquidity {
                    team: team.to_string(),
                    liquidity: mid.liquidity,
                    min: self.thresholds.min_liquidity,
                }));
            }

            let kickoff = market.start_time();
            if let Some(ko) = kickoff {
                latest_ko = Some(latest_ko.map_or(ko, |prev| prev.max(ko)));
            }
            legs.push(ResolvedLeg {
                market: target,
                team: team.to_string(),
                market_id: market.market_id.clone(),
                selection_id: runner.selection_id,
                runner_name: runner.runner_name.clone(),
                kickoff,
                mid: mid.mid,
                back: mid.back,
                lay: mid.lay,
                spread_pct: mid.spread_pct,
                liquidity: mid.liquidity,
            });
        }

        let fair: f64 = legs.iter().map(|l| l.mid).product();
        let rating = offer.boosted_odds / fair;
        if rating < self.thresholds.threshold {
            debug!(rating, bet = %offer.bet_text, "rating below threshold");
            return Ok(Valuation::Rejected(RejectReason::BelowThreshold {
                rating,
                threshold: self.thresholds.threshold,
            }));
        }

        Ok(Valuation::Accepted(ValuationResult {
            fair,
            rating,
            mapping: BetMapping {
                bookie: offer.bookie.clone(),
                kind: offer.kind,
                legs,
                latest_ko,
            },
        }))
    }

    // -- market resolution --

    /// Find the earliest-starting market of the target type whose
    /// runner set contains the team, trying each alias query in turn.
    /// A type-scoped search that comes back empty falls through to an
    /// unscoped search filtered by market name, which survives upstream
    /// market-type taxonomy changes.
    async fn find_market(
        &self,
        team: &str,
        target: MarketTarget,
    ) -> Result<Option<MarketCatalogue>> {
        let window = || Some(time_window_filter(self.thresholds.hours_ahead));
        for query in self.aliases.queries(team) {
            let scoped = MarketFilter {
                event_type_ids: Some(vec![SOCCER_EVENT_TYPE_ID.to_string()]),
                market_type_codes: Some(vec![target.market_type_code().to_string()]),
                market_start_time: window(),
                text_query: Some(query.clone()),
                market_ids: None,
            };
            let mut cats = self.catalogue_degrading(scoped, SCOPED_MAX_RESULTS).await;
            if cats.is_empty() {
                let unscoped = MarketFilter {
                    event_type_ids: Some(vec![SOCCER_EVENT_TYPE_ID.to_string()]),
                    market_type_codes: None,
                    market_start_time: window(),
                    text_query: Some(query.clone()),
                    market_ids: None,
                };
                let name_matches = |name: &str| match target {
                    MarketTarget::MatchOdds => self.re_match_odds_name.is_match(name),
                    MarketTarget::MatchOddsBtts => self.re_btts_name.is_match(name),
                };
                cats = self
                    .catalogue_degrading(unscoped, UNSCOPED_MAX_RESULTS)
                    .await
                    .into_iter()
                    .filter(|c| c.market_name.as_deref().is_some_and(name_matches))
                    .collect();
            }

            let query_norm = normalize(&query);
            let mut candidates: Vec<MarketCatalogue> = cats
                .into_iter()
                .filter(|c| {
                    c.runners
                        .iter()
                        .any(|r| self.query_hits_runner(&r.runner_name, &query_norm, target))
                })
                .collect();
            // Earliest kickoff first; undated markets sort last.
            candidates.sort_by_key(|c| c.start_time().map_or(i64::MAX, |t| t.timestamp()));
            if let Some(first) = candidates.into_iter().next() {
                return Ok(Some(first));
            }
        }
        Ok(None)
    }

    fn query_hits_runner(&self, runner_name: &str, query_norm: &str, target: MarketTarget) -> bool {
        match target {
            MarketTarget::MatchOdds => normalize(runner_name).contains(query_norm),
            // Composite "Team/Yes" runners: the team must win AND both
            // teams score, so only the Yes side of the pair counts.
            MarketTarget::MatchOddsBtts => {
                runner_name.to_lowercase().ends_with("yes")
                    && normalize(runner_name).contains(query_norm)
            }
        }
    }

    /// Pick the runner within a resolved market that represents the
    /// team, honouring the composite-label rule for BTTS markets.
    fn match_runner<'m>(
        &self,
        market: &'m MarketCatalogue,
        team: &str,
        target: MarketTarget,
    ) -> Option<&'m crate::exchange::RunnerCatalogue> {
        market.runners.iter().find(|r| match target {
            MarketTarget::MatchOdds => self.aliases.matches_runner(&r.runner_name, team),
            MarketTarget::MatchOddsBtts => {
                let name = &r.runner_name;
                name.to_lowercase().ends_with("yes")
                    && self
                        .aliases
                        .matches_runner(name.split('/').next().unwrap_or(name), team)
            }
        })
    }

    async fn runner_mid(&self, market_id: &str, selection_id: u64) -> Result<Option<MidPrice>> {
        let books = self.exchange.list_market_book_safe(&[market_id.to_string()]).await?;
        let Some(book) = books.first() else { return Ok(None) };
        let Some(runner) = book.runners.iter().find(|r| r.selection_id == selection_id) else {
            return Ok(None);
        };
        Ok(runner.ex.as_ref().and_then(mid_from_best_offers))
    }

    /// Catalogue search that degrades instead of failing: retry without
    /// the start-time window, then without the text query, finally an
    /// empty result. Used for leg resolution where a missing market is
    /// an expected outcome, not an error.
    async fn catalogue_degrading(
        &self,
        filter: MarketFilter,
        max_results: u32,
    ) -> Vec<MarketCatalogue> {
        match self
            .exchange
            .list_market_catalogue(&filter, max_results, CATALOGUE_PROJECTION)
            .await
        {
            Ok(cats) => cats,
            Err(e) => {
                debug!(error = %e, "catalogue search failed, degrading filter");
                let mut no_window = filter;
                no_window.market_start_time = None;
                if let Ok(cats) = self
                    .exchange
                    .list_market_catalogue(&no_window, max_results, CATALOGUE_PROJECTION)
                    .await
                {
                    if !cats.is_empty() {
                        return cats;
                    }
                }
                let mut no_text = no_window;
                no_text.text_query = None;
                self.exchange
                    .list_market_catalogue(&no_text, max_results, CATALOGUE_PROJECTION)
                    .await
                    .unwrap_or_default()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

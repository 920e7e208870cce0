//! Settlement of pending bets against exchange market state.
//!
//! Each leg classifies from the market book status and the resolved
//! runner's status alone; wall-clock time only gates which bets are
//! worth checking at all. The per-leg state machine:
//!
//! | market status | runner status                    | outcome |
//! |---------------|----------------------------------|---------|
//! | CLOSED        | present, WINNER                  | W       |
//! | CLOSED        | present, LOSER                   | L       |
//! | CLOSED        | present, unresolved, some WINNER | L       |
//! | CLOSED        | present, unresolved, no WINNER   | V       |
//! | CLOSED        | absent, some WINNER              | L       |
//! | CLOSED        | absent, no WINNER                | V       |
//! | INACTIVE      |                                  | P       |
//! | SUSPENDED/OPEN|                                  | P       |
//! | anything else |                                  | P       |
//!
//! The absent-runner rows are a policy for markets where a runner was
//! removed (team withdrawal): no winner anywhere reads as a voided
//! market, a winner elsewhere reads as a loss for our selection.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tracing::{error, info};

use crate::exchange::{ExchangeApi, MarketBook};
use crate::store::BetStore;
use crate::types::{BetOutcome, LegOutcome};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub struct SettlementConfig {
    /// Start checking this many minutes before the latest kickoff.
    pub near_before_min: i64,
    /// Keep checking this many minutes (plus a 3h settling allowance)
    /// after the latest kickoff.
    pub near_after_min: i64,
    /// Market-book batch size per exchange call.
    pub max_markets_per_call: usize,
}

impl Default for SettlementConfig {
    fn default() -> Self {
        Self { near_before_min: 120, near_after_min: 30, max_markets_per_call: 40 }
    }
}

/// Extra time after the post-KO window for the exchange to settle the
/// market (matches run ~90+ minutes, settlement lags the final whistle).
const SETTLING_ALLOWANCE_MIN: i64 = 180;

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Classify one leg from the current market book. A missing book (the
/// batch fetch failed or the market id is unknown) is pending.
pub fn classify_leg(book: Option<&MarketBook>, selection_id: u64) -> LegOutcome {
    let Some(book) = book else { return LegOutcome::Pending };
    let status = book.status.as_deref().unwrap_or("").to_uppercase();
    if status != "CLOSED" {
        // INACTIVE (pre-open), SUSPENDED/OPEN (live), unknown: all
        // fail safe to pending and get re-checked next cycle.
        return LegOutcome::Pending;
    }

    let any_winner = book
        .runners
        .iter()
        .any(|r| r.status.as_deref().unwrap_or("").eq_ignore_ascii_case("WINNER"));
    let runner = book.runners.iter().find(|r| r.selection_id == selection_id);

    match runner.and_then(|r| r.status.as_deref()).map(str::to_uppercase).as_deref() {
        Some("WINNER") => LegOutcome::Won,
        Some("LOSER") => LegOutcome::Lost,
        // Closed without an explicit result for our runner (absent or
        // unresolved): a winner elsewhere means we lost, otherwise
        // treat the market as voided.
        _ if any_winner => LegOutcome::Lost,
        _ => LegOutcome::Void,
    }
}

/// Reduce leg outcomes to a bet outcome, consuming lazily with early
/// exit: the first lost leg decides the bet and later legs are never
/// evaluated. Returns None while the bet should stay pending.
pub fn reduce_legs(outcomes: impl IntoIterator<Item = LegOutcome>) -> Option<BetOutcome> {
    let mut any_void = false;
    let mut all_won = true;
    for outcome in outcomes {
        match outcome {
            LegOutcome::Lost => return Some(BetOutcome::Lost),
            LegOutcome::Void => {
                any_void = true;
                all_won = false;
            }
            LegOutcome::Pending => all_won = false,
            LegOutcome::Won => {}
        }
    }
    if any_void {
        Some(BetOutcome::Void)
    } else if all_won {
        Some(BetOutcome::Won)
    } else {
        None
    }
}

/// Whether a bet's latest kickoff is close enough to check this cycle.
/// Bets with no recorded kickoff are always checked.
pub fn eligible_for_check(
    latest_ko: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    config: &SettlementConfig,
) -> bool {
    let Some(ko) = latest_ko else { return true };
    let mins_to_ko = (ko - now).num_minutes();
    let mins_since_ko = (now - ko).num_minutes();
    mins_to_ko <= config.near_before_min
        && mins_since_ko <= config.near_after_min + SETTLING_ALLOWANCE_MIN
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Clone, Copy)]
pub struct CycleSummary {
    pub scanned: usize,
    pub eligible: usize,
    pub settled: usize,
    pub failed_writes: usize,
}

/// One settlement poll: scan pending mapped bets, batch-fetch the books
/// they reference, classify, and write terminal results back.
pub struct SettlementWorker<'a> {
    exchange: &'a dyn ExchangeApi,
    store: &'a dyn BetStore,
    config: SettlementConfig,
}

impl<'a> SettlementWorker<'a> {
    pub fn new(
        exchange: &'a dyn ExchangeApi,
        store: &'a dyn BetStore,
        config: SettlementConfig,
    ) -> Self {
        Self { exchange, store, config }
    }

    pub async fn run_cycle(&self) -> Result<CycleSummary> {
        let now = Utc::now();
        let pending = self.store.pending_mapped().await?;
        let mut summary = CycleSummary { scanned: pending.len(), ..Default::default() };

        let eligible: Vec<_> = pending
            .into_iter()
            .filter(|bet| eligible_for_check(bet.latest_ko, now, &self.config))
            .collect();
        summary.eligible = eligible.len();

        // One batched fetch pass across all eligible bets bounds the
        // request count regardless of how many rows reference a market.
        let mut all_ids: Vec<String> =
            eligible.iter().flat_map(|bet| bet.market_ids.iter().cloned()).collect();
        all_ids.sort();
        all_ids.dedup();

        let mut books: HashMap<String, MarketBook> = HashMap::new();
        for batch in all_ids.chunks(self.config.max_markets_per_call.max(1)) {
            match self.exchange.list_market_book(batch, false).await {
                Ok(fetched) => {
                    for book in fetched {
                        books.insert(book.market_id.clone(), book);
                    }
                }
                Err(e) => {
                    // Bets referencing this batch stay pending and get
                    // re-checked next cycle.
                    error!(batch_size = batch.len(), error = %e, "market book batch fetch failed");
                }
            }
        }

        for bet in &eligible {
            if bet.mapping.legs.is_empty() {
                continue;
            }
            let outcomes = bet
                .mapping
                .legs
                .iter()
                .map(|leg| classify_leg(books.get(&leg.market_id), leg.selection_id));
            let Some(result) = reduce_legs(outcomes) else { continue };
            match self.store.write_result(bet.row_id, result).await {
                Ok(()) => {
                    info!(row_id = bet.row_id, result = %result, "bet settled");
                    summary.settled += 1;
                }
                Err(e) => {
                    error!(row_id = bet.row_id, error = %e, "result write-back failed");
                    summary.failed_writes += 1;
                }
            }
        }

        info!(
            scanned = summary.scanned,
            eligible = summary.eligible,
            settled = summary.settled,
            failed_writes = summary.failed_writes,
            "settlement cycle complete"
        );
        Ok(summary)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

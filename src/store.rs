//! Pending-bets row-store.
//!
//! Valuation appends rows; a human approves them; settlement scans
//! approved pending rows and writes a terminal result. The leg mapping
//! round-trips through the `mapping` column as JSON, exactly the
//! `ValuationResult.mapping` structure.

use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;
use tracing::{info, warn};

use crate::types::{BetMapping, BetOutcome, NewBetRow, PendingBet};

/// Delay between row-store appends; the tracker backend throttles
/// rapid writes.
pub const WRITE_PACING: Duration = Duration::from_millis(600);

/// Row-store operations the pipeline needs. Settlement and publishing
/// depend on this seam rather than a concrete backend.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BetStore: Send + Sync {
    /// Append a new pending row, returning its row id.
    async fn append_pending(&self, row: &NewBetRow) -> Result<i64>;

    /// Rows that are approved, unsettled, and carry a leg mapping.
    async fn pending_mapped(&self) -> Result<Vec<PendingBet>>;

    /// Write a terminal result to one row. Once written, the row never
    /// appears in `pending_mapped` again.
    async fn write_result(&self, row_id: i64, result: BetOutcome) -> Result<()>;

    /// Delay callers should leave between appends. Backends that do not
    /// hit the throttled tracker return zero.
    fn write_pacing(&self) -> Duration {
        WRITE_PACING
    }
}

// ---------------------------------------------------------------------------
// SQLite implementation
// ---------------------------------------------------------------------------

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS pending_bets (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    date        TEXT NOT NULL,
    bookie      TEXT NOT NULL,
    sport       TEXT NOT NULL,
    event       TEXT NOT NULL,
    bet_text    TEXT NOT NULL,
    settle_date TEXT NOT NULL DEFAULT '',
    odds        REAL NOT NULL,
    fair_odds   REAL,
    bookie_url  TEXT NOT NULL DEFAULT '',
    mapping     TEXT,
    approved    INTEGER NOT NULL DEFAULT 0,
    result      TEXT
);
"#;

pub struct SqliteBetStore {
    pool: SqlitePool,
}

impl SqliteBetStore {
    /// Open (creating if missing) and migrate the store. A single
    /// connection is enough: the pipeline processes rows sequentially.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("invalid database url {database_url}"))?
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open bet store at {database_url}"))?;
        sqlx::query(SCHEMA)
            .execute(&pool)
            .await
            .context("failed to initialise bet store schema")?;
        Ok(Self { pool })
    }

    /// Flip the approval flag on a row (the human sign-off that makes
    /// it visible to settlement). Returns false if no unapproved row
    /// with that id exists.
    pub async fn approve(&self, row_id: i64) -> Result<bool> {
        let res = sqlx::query("UPDATE pending_bets SET approved = 1 WHERE id = ? AND approved = 0")
            .bind(row_id)
            .execute(&self.pool)
            .await
            .context("failed to approve row")?;
        Ok(res.rows_affected() > 0)
    }
}

#[async_trait]
impl BetStore for SqliteBetStore {
    async fn append_pending(&self, row: &NewBetRow) -> Result<i64> {
        let mapping_json = row
            .mapping
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .context("failed to serialize leg mapping")?;
        let res = sqlx::query(
            "INSERT INTO pending_bets \
             (date, bookie, sport, event, bet_text, settle_date, odds, fair_odds, bookie_url, mapping) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&row.date)
        .bind(&row.bookie)
        .bind(&row.sport)
        .bind(&row.event)
        .bind(&row.bet_text)
        .bind(&row.settle_date)
        .bind(row.odds)
        .bind(row.fair_odds)
        .bind(&row.bookie_url)
        .bind(mapping_json)
        .execute(&self.pool)
        .await
        .context("failed to append pending bet")?;
        Ok(res.last_insert_rowid())
    }

    async fn pending_mapped(&self) -> Result<Vec<PendingBet>> {
        let rows = sqlx::query(
            "SELECT id, date, sport, mapping FROM pending_bets \
             WHERE approved = 1 AND result IS NULL AND mapping IS NOT NULL \
             ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .context("failed to scan pending bets")?;

        let mut bets = Vec::with_capacity(rows.len());
        for row in rows {
            let row_id: i64 = row.try_get("id")?;
            let mapping_json: String = row.try_get("mapping")?;
            let mapping: BetMapping = match serde_json::from_str(&mapping_json) {
                Ok(m) => m,
                Err(e) => {
                    // Leave the row alone; it will keep showing up
                    // until someone repairs or settles it manually.
                    warn!(row_id, error = %e, "unreadable leg mapping, skipping row");
                    continue;
                }
            };
            bets.push(PendingBet {
                row_id,
                date: row.try_get("date")?,
                sport: row.try_get("sport")?,
                latest_ko: mapping.latest_ko,
                market_ids: mapping.market_ids(),
                mapping,
            });
        }
        Ok(bets)
    }

    async fn write_result(&self, row_id: i64, result: BetOutcome) -> Result<()> {
        let res = sqlx::query("UPDATE pending_bets SET result = ? WHERE id = ? AND result IS NULL")
            .bind(result.code())
            .bind(row_id)
            .execute(&self.pool)
            .await
            .context("failed to write bet result")?;
        if res.rows_affected() == 0 {
            anyhow::bail!("row {row_id} not found or already settled");
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dry-run implementation
// ---------------------------------------------------------------------------

/// Store that prints intended writes instead of performing them.
/// Used when `DRY_RUN` is set so the pipeline can be exercised against
/// live pages without touching the tracker.
#[derive(Default)]
pub struct DryRunStore {
    next_id: AtomicI64,
}

#[async_trait]
impl BetStore for DryRunStore {
    async fn append_pending(&self, row: &NewBetRow) -> Result<i64> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        info!(
            bet = %row.bet_text,
            odds = row.odds,
            fair = ?row.fair_odds,
            "[dry-run] would append row"
        );
        Ok(id)
    }

    async fn pending_mapped(&self) -> Result<Vec<PendingBet>> {
        Ok(Vec::new())
    }

    async fn write_result(&self, row_id: i64, result: BetOutcome) -> Result<()> {
        info!(row_id, result = %result, "[dry-run] would write result");
        Ok(())
    }

    // Nothing is written anywhere, so there is nothing to throttle.
    fn write_pacing(&self) -> Duration {
        Duration::ZERO
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

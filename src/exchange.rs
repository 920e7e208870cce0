//! Betfair Exchange client.
//!
//! Thin wrapper over the Betting API (JSON over REST POST). Exposes the
//! two reads the pipeline needs — market catalogue search and market
//! book lookup — plus the best-offer mid-price calculator.
//!
//! Auth: `X-Application: {app_key}`, `X-Authentication: {session_token}`.
//! Timestamps sent to the API must be second-precision ISO-8601; the
//! upstream rejects fractional seconds.
//!
//! `list_market_book_safe` exists because the price endpoint sometimes
//! rejects request bodies on schema validation (DSC-0008). Its failure
//! mode is deterministic, so the defence is an ordered list of request
//! body variants tried in sequence, not retry-with-backoff.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::types::MidPrice;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

const BETTING_URL: &str = "https://api.betfair.com/exchange/betting/rest/v1.0";

/// Betfair event type id for football.
pub const SOCCER_EVENT_TYPE_ID: &str = "1";

/// Default catalogue projection for leg resolution.
pub const CATALOGUE_PROJECTION: &[&str] = &["EVENT", "RUNNER_DESCRIPTION", "MARKET_START_TIME"];

/// Structured upstream failure carrying the status and body the API
/// returned, so callers can distinguish schema rejections from outages.
#[derive(Debug, thiserror::Error)]
pub enum ExchangeError {
    #[error("exchange responded {status}: {body}")]
    Http { status: u16, body: String },
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

/// Market catalogue search filter.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketFilter {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type_ids: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_type_codes: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_start_time: Option<TimeRange>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_query: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub market_ids: Option<Vec<String>>,
}

/// Second-precision ISO-8601 start-time window.
#[derive(Debug, Clone, Serialize)]
pub struct TimeRange {
    pub from: String,
    pub to: String,
}

/// Market catalogue entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketCatalogue {
    pub market_id: String,
    #[serde(default)]
    pub market_name: Option<String>,
    #[serde(default)]
    pub market_start_time: Option<String>,
    #[serde(default)]
    pub event: Option<EventInfo>,
    #[serde(default)]
    pub competition: Option<CompetitionInfo>,
    #[serde(default)]
    pub runners: Vec<RunnerCatalogue>,
}

impl MarketCatalogue {
    /// Kickoff time, falling back to the event open date when the
    /// catalogue omits `marketStartTime`. Unparseable values yield None.
    pub fn start_time(&self) -> Option<DateTime<Utc>> {
        let raw = self
            .market_start_time
            .as_deref()
            .or_else(|| self.event.as_ref().and_then(|e| e.open_date.as_deref()))?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub open_date: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompetitionInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerCatalogue {
    pub selection_id: u64,
    pub runner_name: String,
}

/// Market book (current state, optionally with best-offer prices).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketBook {
    pub market_id: String,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub runners: Vec<RunnerBook>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunnerBook {
    pub selection_id: u64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub ex: Option<ExchangePrices>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangePrices {
    #[serde(default)]
    pub available_to_back: Vec<PriceSize>,
    #[serde(default)]
    pub available_to_lay: Vec<PriceSize>,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct PriceSize {
    pub price: f64,
    pub size: f64,
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Format a timestamp as second-precision ISO-8601 (no milliseconds).
fn iso_no_millis(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%SZ").to_string()
}

/// Start-time window from now to now + `hours_ahead`.
pub fn time_window_filter(hours_ahead: i64) -> TimeRange {
    let now = Utc::now();
    TimeRange {
        from: iso_no_millis(now),
        to: iso_no_millis(now + Duration::hours(hours_ahead)),
    }
}

/// Mid price, spread and best-level liquidity from a runner's exchange
/// offers. Returns None when either side is absent or zero-priced.
pub fn mid_from_best_offers(ex: &ExchangePrices) -> Option<MidPrice> {
    let bb = ex.available_to_back.first()?;
    let bl = ex.available_to_lay.first()?;
    if bb.price <= 0.0 || bl.price <= 0.0 {
        return None;
    }
    let mid = (bb.price + bl.price) / 2.0;
    Some(MidPrice {
        mid,
        back: bb.price,
        lay: bl.price,
        spread_pct: (bl.price - bb.price) / mid * 100.0,
        liquidity: bb.size + bl.size,
    })
}

/// Ordered request-body variants for `list_market_book_safe`:
/// minimal price projection, then +virtualise, then +depth override.
fn book_body_variants(market_ids: &[String]) -> Vec<serde_json::Value> {
    vec![
        serde_json::json!({
            "marketIds": market_ids,
            "priceProjection": { "priceData": ["EX_BEST_OFFERS"] }
        }),
        serde_json::json!({
            "marketIds": market_ids,
            "priceProjection": { "priceData": ["EX_BEST_OFFERS"], "virtualise": true }
        }),
        serde_json::json!({
            "marketIds": market_ids,
            "priceProjection": {
                "priceData": ["EX_BEST_OFFERS"],
                "virtualise": true,
                "exBestOffersOverrides": { "bestPricesDepth": 1 }
            }
        }),
    ]
}

// ---------------------------------------------------------------------------
// Client trait
// ---------------------------------------------------------------------------

/// Abstraction over the exchange reads the pipeline consumes. The
/// valuator and settlement worker depend on this seam so tests can
/// substitute a deterministic in-memory exchange.
#[async_trait]
pub trait ExchangeApi: Send + Sync {
    /// Search exchange markets. Non-2xx responses surface as an error
    /// carrying the upstream status and body.
    async fn list_market_catalogue(
        &self,
        filter: &MarketFilter,
        max_results: u32,
        projection: &[&str],
    ) -> Result<Vec<MarketCatalogue>>;

    /// Current book state for up to ~40 markets per call. Empty input
    /// yields empty output without a network call.
    async fn list_market_book(
        &self,
        market_ids: &[String],
        with_prices: bool,
    ) -> Result<Vec<MarketBook>>;

    /// Book lookup that defends against upstream schema rejections by
    /// trying progressively richer bodies; propagates the final error
    /// only if every variant fails.
    async fn list_market_book_safe(&self, market_ids: &[String]) -> Result<Vec<MarketBook>>;
}

// ---------------------------------------------------------------------------
// HTTP client
// ---------------------------------------------------------------------------

/// Live Betfair client.
pub struct ExchangeClient {
    http: Client,
    app_key: String,
    session_token: String,
}

impl ExchangeClient {
    /// Create a client from `BETFAIR_APP_KEY` / `BETFAIR_SESSION_TOKEN`.
    ///
    /// Missing credentials are fatal: no subsequent call can succeed.
    pub fn new() -> Result<Self> {
        let app_key = std::env::var("BETFAIR_APP_KEY")
            .context("BETFAIR_APP_KEY environment variable not set")?;
        let session_token = std::env::var("BETFAIR_SESSION_TOKEN")
            .context("BETFAIR_SESSION_TOKEN environment variable not set")?;
        Self::with_credentials(app_key, session_token)
    }

    /// Create a client with explicit credentials (for testing).
    pub fn with_credentials(app_key: String, session_token: String) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent("edgescan/0.1.0")
            .build()
            .context("Failed to build HTTP client for the exchange")?;
        Ok(Self { http, app_key, session_token })
    }

    /// Authenticated POST to the Betting API.
    async fn betting_api<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let url = format!("{BETTING_URL}/{endpoint}/");
        debug!(url = %url, "exchange request");

        let resp = self
            .http
            .post(&url)
            .header("X-Application", &self.app_key)
            .header("X-Authentication", &self.session_token)
            .header("Content-Type", "application/json")
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("exchange {endpoint} request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let body_text = resp.text().await.unwrap_or_default();
            return Err(ExchangeError::Http { status: status.as_u16(), body: body_text }.into());
        }

        resp.json()
            .await
            .with_context(|| format!("failed to parse exchange {endpoint} response"))
    }
}

#[async_trait]
impl ExchangeApi for ExchangeClient {
    async fn list_market_catalogue(
        &self,
        filter: &MarketFilter,
        max_results: u32,
        projection: &[&str],
    ) -> Result<Vec<MarketCatalogue>> {
        let body = serde_json::json!({
            "filter": filter,
            "maxResults": max_results,
            "marketProjection": projection,
        });
        self.betting_api("listMarketCatalogue", &body).await
    }

    async fn list_market_book(
        &self,
        market_ids: &[String],
        with_prices: bool,
    ) -> Result<Vec<MarketBook>> {
        if market_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut body = serde_json::json!({
            "marketIds": market_ids,
            "orderProjection": "NONE",
            "matchProjection": "NO_ROLLUP",
        });
        if with_prices {
            body["priceProjection"] = serde_json::json!({
                "priceData": ["EX_BEST_OFFERS"],
                "virtualise": true,
                "exBestOffersOverrides": { "bestPricesDepth": 1 }
            });
        }
        self.betting_api("listMarketBook", &body).await
    }

    async fn list_market_book_safe(&self, market_ids: &[String]) -> Result<Vec<MarketBook>> {
        if market_ids.is_empty() {
            return Ok(Vec::new());
        }
        let variants = book_body_variants(market_ids);
        let Some((last, earlier)) = variants.split_last() else {
            return Ok(Vec::new());
        };
        for (i, body) in earlier.iter().enumerate() {
            match self.betting_api("listMarketBook", body).await {
                Ok(books) => return Ok(books),
                Err(e) => {
                    debug!(variant = i, error = %e, "market book body variant rejected");
                }
            }
        }
        self.betting_api("listMarketBook", last).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

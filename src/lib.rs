//! edgescan: bookmaker price-boost scanner.
//!
//! Scrapes a bookmaker's boost page, values each parsed multiple
//! against Betfair exchange mid prices, records qualifying offers in a
//! pending-bets store, and later settles them by polling the exchange
//! for market outcomes.

pub mod aliases;
pub mod config;
pub mod exchange;
pub mod inventory;
pub mod parser;
pub mod pipeline;
pub mod settlement;
pub mod snapshot;
pub mod store;
pub mod types;
pub mod valuation;

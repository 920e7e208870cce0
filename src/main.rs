//! CLI entry point.
//!
//! Subcommands mirror the pipeline stages: `snapshot` captures a boost
//! page, `parse` extracts offers, `publish` writes parsed offers
//! without valuation, `run` is the full valuation pipeline, `settle`
//! polls one settlement cycle, `dump-teams` rebuilds the alias
//! inventory, and `approve` flips the human sign-off flag on a row.

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing::info;
use tracing_subscriber::EnvFilter;

use edgescan::aliases::TeamAliasResolver;
use edgescan::config::AppConfig;
use edgescan::exchange::ExchangeClient;
use edgescan::inventory::dump_inventory;
use edgescan::parser::BoostParser;
use edgescan::pipeline;
use edgescan::settlement::SettlementWorker;
use edgescan::snapshot;
use edgescan::store::{BetStore, DryRunStore, SqliteBetStore};
use edgescan::valuation::{OfferValuator, ValuationThresholds};

#[derive(Parser)]
#[command(name = "edgescan", about = "Bookmaker price-boost scanner", version)]
struct Cli {
    /// Config file path.
    #[arg(long, default_value = "edgescan.toml")]
    config: String,

    /// Print intended row-store writes instead of performing them.
    #[arg(long, env = "DRY_RUN")]
    dry_run: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Capture a boost page snapshot (HTML + .meta.json sidecar).
    Snapshot {
        #[arg(long)]
        url: String,
    },
    /// Parse a snapshot and print the offers found.
    Parse {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        url: Option<String>,
    },
    /// Append parsed offers to the store without valuation.
    Publish {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        url: Option<String>,
    },
    /// Parse, value against the exchange, and append accepted offers.
    Run {
        #[arg(long)]
        file: PathBuf,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        threshold: Option<f64>,
        #[arg(long)]
        minliq: Option<f64>,
        #[arg(long)]
        maxspread: Option<f64>,
    },
    /// Run one settlement poll cycle.
    Settle,
    /// Rebuild the team alias inventory from the exchange catalogue.
    DumpTeams {
        /// Catalogue look-ahead window in hours.
        #[arg(long, default_value_t = 336)]
        hours: i64,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Approve a pending row, making it visible to settlement.
    Approve {
        #[arg(long)]
        id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(&cli.config)?;

    match cli.command {
        Command::Snapshot { url } => {
            let paths = snapshot::capture(&url, Path::new(&config.snapshot.out_dir)).await?;
            println!("Saved {} (+ sidecar {})", paths.html.display(), paths.meta.display());
        }

        Command::Parse { file, url } => {
            let parser = BoostParser::new()?;
            let offers = pipeline::parse_snapshot(&parser, &file, url.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&offers)?);
            println!("Found {} candidate price boosts.", offers.len());
        }

        Command::Publish { file, url } => {
            let parser = BoostParser::new()?;
            let offers = pipeline::parse_snapshot(&parser, &file, url.as_deref())?;
            let store = open_store(&config, cli.dry_run).await?;
            let written = pipeline::publish_offers(store.as_ref(), &offers).await?;
            println!("Published {written} of {} offers.", offers.len());
        }

        Command::Run { file, url, threshold, minliq, maxspread } => {
            let mut thresholds: ValuationThresholds = config.valuation.thresholds();
            if let Some(t) = threshold {
                thresholds.threshold = t;
            }
            if let Some(l) = minliq {
                thresholds.min_liquidity = l;
            }
            if let Some(s) = maxspread {
                thresholds.max_spread_pct = s;
            }

            let exchange = ExchangeClient::new()?;
            let aliases =
                TeamAliasResolver::load(Some(Path::new(&config.aliases.inventory_path)));
            let parser = BoostParser::new()?;
            let valuator = OfferValuator::new(&exchange, &aliases, thresholds)?;
            let store = open_store(&config, cli.dry_run).await?;

            let accepted = pipeline::run_value_check(
                &parser,
                &valuator,
                store.as_ref(),
                &file,
                url.as_deref(),
            )
            .await?;
            for row in &accepted {
                println!(
                    "{} @ {:.2} fair {:.3} rating {:.3} ({} legs) -> row {}",
                    row.bet_text, row.boosted, row.fair, row.rating, row.legs, row.row_id
                );
            }
            println!("{} value offer(s).", accepted.len());
        }

        Command::Settle => {
            let exchange = ExchangeClient::new()?;
            let store = open_store(&config, cli.dry_run).await?;
            let worker =
                SettlementWorker::new(&exchange, store.as_ref(), config.settlement.worker_config());
            let summary = worker.run_cycle().await?;
            println!(
                "Scanned {} / eligible {} / settled {} / failed writes {}",
                summary.scanned, summary.eligible, summary.settled, summary.failed_writes
            );
        }

        Command::DumpTeams { hours, out } => {
            let exchange = ExchangeClient::new()?;
            let out = out.unwrap_or_else(|| PathBuf::from(&config.aliases.inventory_path));
            dump_inventory(&exchange, hours, &out).await?;
            println!("Inventory written to {}", out.display());
        }

        Command::Approve { id } => {
            let store = SqliteBetStore::connect(&config.store.database_url).await?;
            if store.approve(id).await? {
                info!(row_id = id, "row approved");
                println!("Row {id} approved.");
            } else {
                println!("Row {id} not found or already approved.");
            }
        }
    }

    Ok(())
}

async fn open_store(config: &AppConfig, dry_run: bool) -> Result<Box<dyn BetStore>> {
    if dry_run {
        info!("dry run: row-store writes will be printed, not performed");
        Ok(Box::new(DryRunStore::default()))
    } else {
        Ok(Box::new(SqliteBetStore::connect(&config.store.database_url).await?))
    }
}

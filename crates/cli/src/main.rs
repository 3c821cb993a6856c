use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use filmlist_api::{Coordinator, CoordinatorConfig};
use filmlist_core::{QueryOutcome, QueryParams, ResultPage, Rule, ShowRow, Status};
use filmlist_persist::SqliteShowStore;
use tokio::signal;
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "filmlistctl", version, about = "Filmlist show-list CLI")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// SQLite database file (default: ~/.filmlist/filmlist.db)
    #[arg(long = "db", env = "FILMLIST_DB_PATH", global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Subcommand, Debug)]
enum Commands {
    /// Replace the stored show list with a JSON array of shows
    Import {
        #[arg(long = "file")]
        file: String,
    },
    /// Filter, sort and page the show list
    Query {
        /// Rule such as "title=tatort", "channel!=zdf" or "duration+30"; repeatable
        #[arg(long = "rule")]
        rules: Vec<String>,
        #[arg(long = "page", default_value_t = 1)]
        page: i64,
        #[arg(long = "limit", default_value_t = 10)]
        limit: i64,
        /// title, channel, start, duration or topic
        #[arg(long = "sort-field")]
        sort_field: Option<String>,
        /// ascending (^) or descending (v)
        #[arg(long = "sort-direction")]
        sort_direction: Option<String>,
    },
    /// Load the show list, then reload it if storage moved on or it is too old
    Refresh,
    /// Load the show list and print coordinator counters
    Stats,
}

fn init_tracing() {
    let env = std::env::var("FILMLIST_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("FILMLIST_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid FILMLIST_METRICS_ADDR; expected host:port");
        }
    }
}

fn open_store(db: Option<&str>) -> Result<SqliteShowStore> {
    match db {
        Some(path) => SqliteShowStore::open(path),
        None => SqliteShowStore::open_default(),
    }
}

async fn loaded_coordinator(db: Option<&str>) -> Result<Arc<Coordinator<SqliteShowStore>>> {
    let store = Arc::new(open_store(db)?);
    let coord = Arc::new(Coordinator::new(store, CoordinatorConfig::from_env())?);
    coord.ensure_loaded().await?;
    Ok(coord)
}

fn print_page(page: &ResultPage) {
    for r in &page.items {
        let when = chrono::DateTime::from_timestamp(r.start, 0)
            .map(|t| t.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_default();
        println!("{} • {} • {} • {} • {}m", r.channel, r.topic, r.title, when, r.duration / 60);
    }
    println!("page {}/{} ({} shows)", page.page, page.last_page, page.item_count);
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let db = cli.db.as_deref();

    match cli.command {
        Commands::Import { file } => {
            info!(file = %file, "import invoked");
            let raw = std::fs::read_to_string(&file).with_context(|| format!("reading {}", file))?;
            let shows: Vec<ShowRow> = serde_json::from_str(&raw).with_context(|| format!("parsing {}", file))?;
            let n = open_store(db)?.import(&shows)?;
            match cli.output {
                Output::Human => println!("imported {} shows", n),
                Output::Json => println!("{}", serde_json::json!({ "imported": n })),
            }
        }
        Commands::Query { rules, page, limit, sort_field, sort_direction } => {
            let rules = rules.iter().map(|r| Rule::from_str(r)).collect::<Result<Vec<_>, _>>()?;
            let params = QueryParams { rules, page, limit, sort_field, sort_direction };
            let coord = loaded_coordinator(db).await?;
            let outcome = coord.query(params).await;
            coord.shutdown().await;
            match (outcome?, cli.output) {
                (outcome, Output::Json) => println!("{}", serde_json::to_string_pretty(&outcome)?),
                (QueryOutcome::Page(page), Output::Human) => print_page(&page),
                (QueryOutcome::Busy { busy }, Output::Human) => println!("busy: {}", busy),
            }
        }
        Commands::Refresh => {
            let t0 = Instant::now();
            let coord = loaded_coordinator(db).await?;
            let mut job = coord.trigger_refresh();
            let mut tick = tokio::time::interval(Duration::from_millis(50));
            let mut last: Option<Status> = None;
            loop {
                tokio::select! {
                    _ = tick.tick() => {
                        let now = coord.status();
                        if last != Some(now) {
                            if cli.output == Output::Human { println!("status: {}", now); }
                            last = Some(now);
                        }
                    }
                    res = &mut job => {
                        if let Err(e) = res { error!(error = %e, "refresh task failed"); }
                        break;
                    }
                    _ = signal::ctrl_c() => {
                        warn!("Ctrl-C received; letting the running refresh step finish");
                        job.abort();
                        break;
                    }
                }
            }
            let stats = coord.stats().await;
            coord.shutdown().await;
            match cli.output {
                Output::Human => println!("refresh done in {} ms ({} invalidations)", t0.elapsed().as_millis(), stats.invalidations),
                Output::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
            }
        }
        Commands::Stats => {
            let coord = loaded_coordinator(db).await?;
            let stats = coord.stats().await;
            coord.shutdown().await;
            match cli.output {
                Output::Human => {
                    println!("status: {} • loaded: {} • lock attempts: {}", stats.status, stats.loaded, stats.lock_attempts);
                    println!("cached pages: {} • cached filters: {} • invalidations: {}", stats.cached_pages, stats.cached_filters, stats.invalidations);
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&stats)?),
            }
        }
    }
    Ok(())
}

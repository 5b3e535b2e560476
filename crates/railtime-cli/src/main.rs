use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use railtime_client::{
    DetailSelectors, HtmlDetailParser, HtmlListingParser, ListingSelectors, ReqwestFetcher,
};
use railtime_core::pipeline::{
    DEFAULT_DESTINATION, DEFAULT_LISTING_URL, DEFAULT_SEARCH_URL, IngestConfig, IngestService,
    TracingPipelineReporter,
};
use railtime_core::retry::{RetryPolicy, RetryingFetcher};
use railtime_core::throttle::{ThrottleConfig, ThrottledFetcher};
use railtime_db::{Database, DatabaseConfig, StationRepository};

#[derive(Parser)]
#[command(name = "railtime", version, about = "Station travel-time ingestion")]
struct Cli {
    /// SQLite database URL (overrides RAILTIME_DATABASE_URL)
    #[arg(long, global = true)]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the station listing and record a travel time for every station
    Run(RunArgs),

    /// Create the database schema
    Init,

    /// List stored stations with their latest measurement
    Stations,

    /// Export stored measurements
    Report {
        /// Output format
        #[arg(long, value_enum, default_value_t = ReportFormat::Text)]
        format: ReportFormat,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Only ingest these stations (repeatable)
    #[arg(long = "station")]
    stations: Vec<String>,

    /// Number of concurrent station workers
    #[arg(long, env = "RAILTIME_WORKERS", default_value_t = 3)]
    workers: usize,

    /// Print the run summary as JSON
    #[arg(long, default_value_t = false)]
    json: bool,

    #[command(flatten)]
    upstream: UpstreamArgs,

    #[command(flatten)]
    fetch: FetchArgs,

    #[command(flatten)]
    selectors: SelectorArgs,
}

#[derive(Args)]
struct UpstreamArgs {
    /// Page listing every station on the line
    #[arg(long, env = "RAILTIME_LISTING_URL", default_value = DEFAULT_LISTING_URL)]
    listing_url: String,

    /// Route search endpoint queried once per station
    #[arg(long, env = "RAILTIME_SEARCH_URL", default_value = DEFAULT_SEARCH_URL)]
    search_url: String,

    /// Destination station for every route search
    #[arg(long, env = "RAILTIME_DESTINATION", default_value = DEFAULT_DESTINATION)]
    destination: String,
}

#[derive(Args)]
struct FetchArgs {
    /// Per-request timeout in seconds
    #[arg(long, env = "RAILTIME_TIMEOUT_SECS", default_value_t = 30)]
    timeout_secs: u64,

    /// Minimum delay between requests to the same host, in milliseconds
    #[arg(long, env = "RAILTIME_DELAY_MS", default_value_t = 500)]
    delay_ms: u64,

    /// Random extra delay added to each request, in milliseconds
    #[arg(long, env = "RAILTIME_JITTER_MS", default_value_t = 0)]
    jitter_ms: u64,

    /// Attempts per request, including the first one
    #[arg(long, env = "RAILTIME_MAX_ATTEMPTS", default_value_t = 3)]
    max_attempts: u32,
}

#[derive(Args)]
struct SelectorArgs {
    /// CSS selector for the station list container
    #[arg(long)]
    listing_container: Option<String>,

    /// CSS selector for one station entry inside the container
    #[arg(long)]
    listing_entry: Option<String>,

    /// CSS selector for the name element inside an entry
    #[arg(long)]
    listing_name: Option<String>,

    /// CSS selector for the travel-time field on the search result page
    #[arg(long)]
    detail_field: Option<String>,

    /// Text marking a limited-express stop (repeatable)
    #[arg(long = "express-marker")]
    express_markers: Vec<String>,

    /// Treat the listing as carrying no limited-express information
    #[arg(long, default_value_t = false, conflicts_with = "express_markers")]
    no_express_markers: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    /// Every measurement as CSV
    Csv,
    /// Average travel time per limited-express flag
    Text,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("railtime=info".parse()?))
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let db = connect_db(cli.database_url).await?;

    match cli.command {
        Commands::Run(args) => cmd_run(args, &db).await?,
        Commands::Init => {
            tracing::info!("Schema ready");
        }
        Commands::Stations => cmd_stations(&db.station_repo()).await?,
        Commands::Report { format } => cmd_report(format, &db.station_repo()).await?,
    }

    Ok(())
}

/// Open the database from RAILTIME_DATABASE_URL (or the override) and
/// make sure the schema exists.
async fn connect_db(url_override: Option<String>) -> Result<Database> {
    let mut config = DatabaseConfig::from_env().context("Invalid database configuration")?;
    if let Some(url) = url_override {
        config.url = url;
    }

    Database::open(&config)
        .await
        .with_context(|| format!("Failed to open database {}", config.url))
}

async fn cmd_run(args: RunArgs, db: &Database) -> Result<()> {
    let RunArgs {
        stations,
        workers,
        json,
        upstream,
        fetch,
        selectors,
    } = args;

    let http = ReqwestFetcher::with_timeout(Duration::from_secs(fetch.timeout_secs))
        .context("Failed to create HTTP client")?;
    let throttle = ThrottleConfig::new(Duration::from_millis(fetch.delay_ms))
        .with_jitter(Duration::from_millis(fetch.jitter_ms));
    let policy = RetryPolicy::default().with_max_attempts(fetch.max_attempts);
    let fetcher = RetryingFetcher::new(ThrottledFetcher::new(http, throttle), policy);

    let (listing_parser, detail_parser) = build_parsers(selectors)?;

    let mut config = IngestConfig::default()
        .with_listing_url(upstream.listing_url)
        .with_search_url(upstream.search_url)
        .with_destination(upstream.destination)
        .with_workers(workers);
    if !stations.is_empty() {
        config = config.with_only(stations);
    }

    let service = IngestService::new(
        fetcher,
        listing_parser,
        detail_parser,
        db.station_repo(),
        config,
    );

    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupt received, cancelling run");
            token.cancel();
        }
    });

    let summary = service
        .run(&cancel, &TracingPipelineReporter)
        .await
        .context("Ingestion run aborted")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{summary}");
    }

    Ok(())
}

fn build_parsers(args: SelectorArgs) -> Result<(HtmlListingParser, HtmlDetailParser)> {
    let mut listing = ListingSelectors::default();
    if let Some(container) = args.listing_container {
        listing.container = container;
    }
    if let Some(entry) = args.listing_entry {
        listing.entry = entry;
    }
    if args.listing_name.is_some() {
        listing.name = args.listing_name;
    }

    let mut listing_parser =
        HtmlListingParser::new(&listing).context("Invalid listing selectors")?;
    if args.no_express_markers {
        listing_parser = listing_parser.with_express_markers(Vec::new());
    } else if !args.express_markers.is_empty() {
        listing_parser = listing_parser.with_express_markers(args.express_markers);
    }

    let mut detail = DetailSelectors::default();
    if let Some(field) = args.detail_field {
        detail.field = field;
    }
    let detail_parser = HtmlDetailParser::new(&detail).context("Invalid detail selector")?;

    Ok((listing_parser, detail_parser))
}

async fn cmd_stations(repo: &StationRepository) -> Result<()> {
    let stations = repo.all_stations().await?;

    if stations.is_empty() {
        println!("No stations stored yet. Run `railtime run` first.");
        return Ok(());
    }

    println!("{:<6} {:<20} {:<8} {:>8}  MEASURED", "ID", "STATION", "EXPRESS", "MINUTES");
    for station in &stations {
        let latest = repo.latest_measurement(station.station_id).await?;
        let (minutes, measured) = match latest {
            Some(t) => (
                t.minutes.to_string(),
                t.measured_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            ),
            None => ("-".to_string(), "-".to_string()),
        };
        println!(
            "{:<6} {:<20} {:<8} {:>8}  {}",
            station.station_id,
            station.name,
            station.limited_express.as_str(),
            minutes,
            measured
        );
    }

    println!("\nTotal: {} stations", stations.len());

    Ok(())
}

async fn cmd_report(format: ReportFormat, repo: &StationRepository) -> Result<()> {
    match format {
        ReportFormat::Csv => {
            let rows = repo.measurements().await?;
            let mut writer = csv::Writer::from_writer(std::io::stdout());
            for row in &rows {
                writer.serialize(row).context("Failed to write CSV row")?;
            }
            writer.flush()?;
            tracing::info!(rows = rows.len(), "Exported measurements");
        }
        ReportFormat::Text => {
            let averages = repo.average_minutes_by_express().await?;
            if averages.is_empty() {
                println!("No measurements stored yet.");
                return Ok(());
            }

            println!("{:<8} {:>12} {:>8}", "EXPRESS", "AVG MINUTES", "COUNT");
            for avg in &averages {
                println!(
                    "{:<8} {:>12.1} {:>8}",
                    avg.limited_express.as_str(),
                    avg.average_minutes,
                    avg.measurements
                );
            }
        }
    }

    Ok(())
}

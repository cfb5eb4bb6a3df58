//! fittrack - Fitness Telemetry and Food Diary Binary
//!
//! Watch live telemetry channels and manage the local food diary from the
//! command line.

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use fittrack::diary::today;
use fittrack::{
    ClientConfig, DailyAggregate, FitnessClient, LedgerEntry, MealCategory, Nutrients, UserScope,
};
use futures_util::StreamExt;
use std::path::PathBuf;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "fittrack")]
#[command(about = "fittrack - live fitness telemetry and food diary")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(long_about = "Stream pulse/steps/calories telemetry and keep a per-user food diary")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// JSON configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Ledger directory (overrides the configuration file)
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Stream telemetry channels until Ctrl-C
    Watch(WatchArgs),

    /// Append a food entry to a user's diary
    Log(LogArgs),

    /// Show a day's entries and totals
    Day(DayArgs),

    /// Show cached daily totals
    Summary(SummaryArgs),

    /// Rebuild a user's daily totals from the ledger
    Rebuild(UserArgs),
}

#[derive(Args)]
struct WatchArgs {
    /// Channel to watch as NAME=URL, e.g. pulse=ws://host/pulse (repeatable)
    #[arg(short, long = "channel", required = true, value_parser = parse_channel)]
    channels: Vec<(String, String)>,

    /// Bearer token sent with every handshake
    #[arg(long, env = "FITTRACK_TOKEN")]
    token: Option<String>,
}

#[derive(Args)]
struct UserArgs {
    /// User identifier the diary belongs to
    #[arg(short, long)]
    user: String,
}

#[derive(Args)]
struct LogArgs {
    #[command(flatten)]
    user: UserArgs,

    /// Logical date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    date: Option<String>,

    /// Food name
    #[arg(short, long)]
    name: String,

    #[arg(long, default_value_t = 0.0)]
    calories: f64,

    #[arg(long, default_value_t = 0.0)]
    protein: f64,

    #[arg(long, default_value_t = 0.0)]
    fat: f64,

    #[arg(long, default_value_t = 0.0)]
    carbs: f64,

    /// breakfast, lunch, dinner or snack
    #[arg(long, default_value = "snack")]
    category: MealCategory,

    /// Catalog reference for catalog-sourced foods
    #[arg(long)]
    catalog_id: Option<String>,

    /// Portion weight in grams
    #[arg(long)]
    grams: Option<f64>,
}

#[derive(Args)]
struct DayArgs {
    #[command(flatten)]
    user: UserArgs,

    /// Logical date (YYYY-MM-DD), defaults to today
    #[arg(long)]
    date: Option<String>,

    /// Output format: json or pretty
    #[arg(short, long, default_value = "pretty")]
    format: String,
}

#[derive(Args)]
struct SummaryArgs {
    #[command(flatten)]
    user: UserArgs,

    /// First date of the range (inclusive)
    #[arg(long, requires = "to")]
    from: Option<String>,

    /// Last date of the range (inclusive)
    #[arg(long, requires = "from")]
    to: Option<String>,
}

fn parse_channel(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, url)) if !name.is_empty() && !url.is_empty() => {
            Ok((name.to_string(), url.to_string()))
        }
        _ => Err(format!("expected NAME=URL, got {:?}", raw)),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_logging(&cli)?;
    let config = load_config(&cli)?;

    match &cli.command {
        Commands::Watch(args) => watch_command(config, args).await,
        Commands::Log(args) => log_command(config, args).await,
        Commands::Day(args) => day_command(config, args).await,
        Commands::Summary(args) => summary_command(config, args).await,
        Commands::Rebuild(args) => rebuild_command(config, args).await,
    }
}

/// Log to stderr so `--format json` output stays parseable. `RUST_LOG`
/// directives override the level picked by `--verbose`/`--debug`.
fn init_logging(cli: &Cli) -> anyhow::Result<()> {
    let default_level = match (cli.debug, cli.verbose) {
        (true, _) => LevelFilter::DEBUG,
        (false, true) => LevelFilter::INFO,
        (false, false) => LevelFilter::WARN,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(|e| anyhow::anyhow!(e))
}

fn load_config(cli: &Cli) -> anyhow::Result<ClientConfig> {
    let mut config = match &cli.config {
        Some(path) => ClientConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => ClientConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config = config.with_data_dir(data_dir);
    }
    Ok(config)
}

/// Client with `user` signed in.
fn signed_in(config: ClientConfig, user: &UserArgs) -> anyhow::Result<FitnessClient> {
    let client = FitnessClient::with_websocket(config, None)?;
    client.sign_in(UserScope::new(user.user.as_str())?);
    Ok(client)
}

async fn watch_command(config: ClientConfig, args: &WatchArgs) -> anyhow::Result<()> {
    let client = FitnessClient::with_websocket(config, args.token.clone())?;

    let mut tasks = tokio::task::JoinSet::new();
    for (name, url) in &args.channels {
        let mut values = client.subscribe(name);
        let mut state = client.connection_state(name);
        client.connect(name, url);
        info!("Watching {} at {}", name, url);

        let value_name = name.clone();
        tasks.spawn(async move {
            while let Some(value) = values.next().await {
                println!("{:<10} {}", value_name, value);
            }
        });

        let state_name = name.clone();
        tasks.spawn(async move {
            loop {
                let current = state.borrow_and_update().clone();
                println!("{:<10} [{}]", state_name, current);
                if state.changed().await.is_err() {
                    break;
                }
            }
        });
    }

    let mut reauth = client.reauth_required();
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("waiting for Ctrl-C")?;
            info!("Interrupted, closing channels");
        }
        _ = reauth.wait_for(|required| *required) => {
            eprintln!("Credential rejected; sign in again and pass a fresh --token");
        }
    }

    client.close();
    tasks.shutdown().await;
    Ok(())
}

async fn log_command(config: ClientConfig, args: &LogArgs) -> anyhow::Result<()> {
    let client = signed_in(config, &args.user)?;
    let date = args.date.clone().unwrap_or_else(today);

    let mut builder = LedgerEntry::builder(date, args.name.as_str())
        .nutrients(Nutrients::new(args.calories, args.protein, args.fat, args.carbs))
        .category(args.category);
    if let Some(id) = &args.catalog_id {
        builder = builder.catalog_id(id.as_str());
    }
    if let Some(grams) = args.grams {
        builder = builder.grams(grams);
    }

    let day = client.append(builder.build()?).await?;
    println!("Logged {} for {}", args.name, day.date);
    print_totals(&day);
    Ok(())
}

async fn day_command(config: ClientConfig, args: &DayArgs) -> anyhow::Result<()> {
    let client = signed_in(config, &args.user)?;
    let date = args.date.clone().unwrap_or_else(today);

    let entries = client.entries_for_date(&date).await?;
    let totals = client
        .aggregate_for_date(&date)
        .await?
        .unwrap_or_else(|| DailyAggregate::empty(date.as_str()));

    match args.format.as_str() {
        "json" => {
            let json = serde_json::json!({ "entries": entries, "totals": totals });
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        "pretty" => {
            println!("Diary for {} ({})", args.user.user, date);
            println!("==========================================");
            if entries.is_empty() {
                println!("  (no entries)");
            }
            for entry in &entries {
                let n = entry.nutrients();
                println!(
                    "  [{:<9}] {:<24} {:>7.1} kcal  P {:>5.1}  F {:>5.1}  C {:>5.1}{}",
                    entry.category(),
                    entry.name(),
                    n.calories,
                    n.protein,
                    n.fat,
                    n.carbohydrates,
                    entry
                        .catalog_id()
                        .map(|id| format!("  (catalog {})", id))
                        .unwrap_or_default()
                );
            }
            println!();
            print_totals(&totals);
        }
        other => bail!("Unsupported format: {}. Use 'json' or 'pretty'", other),
    }

    Ok(())
}

async fn summary_command(config: ClientConfig, args: &SummaryArgs) -> anyhow::Result<()> {
    let client = signed_in(config, &args.user)?;
    let days = match (&args.from, &args.to) {
        (Some(from), Some(to)) => client.aggregate_range(from, to).await?,
        _ => client.all_aggregates().await?,
    };

    if days.is_empty() {
        println!("No diary entries for {}", args.user.user);
        return Ok(());
    }
    for day in &days {
        println!(
            "{}  {:>7.1} kcal  P {:>6.1}  F {:>6.1}  C {:>6.1}  ({} entries)",
            day.date,
            day.totals.calories,
            day.totals.protein,
            day.totals.fat,
            day.totals.carbohydrates,
            day.entry_count
        );
    }
    Ok(())
}

async fn rebuild_command(config: ClientConfig, args: &UserArgs) -> anyhow::Result<()> {
    let client = signed_in(config, args)?;
    let days = client.rebuild_aggregates().await?;
    println!("Rebuilt totals for {} days", days.len());
    Ok(())
}

fn print_totals(day: &DailyAggregate) {
    println!(
        "Totals: {:.1} kcal, protein {:.1} g, fat {:.1} g, carbs {:.1} g ({} entries)",
        day.totals.calories,
        day.totals.protein,
        day.totals.fat,
        day.totals.carbohydrates,
        day.entry_count
    );
}

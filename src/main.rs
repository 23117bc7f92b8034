use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use anyhow::Context;
use clap::{Parser, Subcommand};
use log::{info, warn};

use capsim::api::{self, AppState};
use capsim::config::ServerConfig;
use capsim::core::snapshot::Snapshot;
use capsim::pricing::{NullOracle, PriceTable};
use capsim::report;
use capsim::store::collector::KubectlCollector;
use capsim::store::io;
use capsim::store::manager::SnapshotManager;

#[derive(Parser)]
#[command(name = "capsim", about = "Capacity-planning simulator for autoscaled clusters")]
struct Cli {
    /// Path to a YAML config file; defaults apply when omitted.
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server (the default).
    Serve,
    /// Print the utilization table for a snapshot file and exit.
    Report { snapshot: PathBuf },
}

fn load_config(cli: &Cli) -> anyhow::Result<ServerConfig> {
    match &cli.config {
        Some(path) => ServerConfig::from_file(path)
            .with_context(|| format!("cannot load config {}", path.display())),
        None => Ok(ServerConfig::default()),
    }
}

fn build_price_table(config: &ServerConfig) -> PriceTable {
    let prices = PriceTable::with_defaults(config.region.as_deref());
    if let Some(path) = &config.prices_path {
        if let Err(err) = prices.load_from_file(path) {
            warn!("cannot load price file {}: {}", path.display(), err);
        }
    }
    prices
}

fn load_baseline(config: &ServerConfig) -> Snapshot {
    let Some(path) = &config.baseline_path else {
        info!("no baseline file configured, starting on an empty snapshot");
        return Snapshot::default();
    };
    match io::load_snapshot(path) {
        Ok(snapshot) => snapshot,
        Err(err) => {
            // A broken snapshot file is not fatal; the server boots empty
            // and live captures can repopulate it.
            warn!("cannot load baseline {}: {:#}", path.display(), err);
            Snapshot::default()
        }
    }
}

async fn run_server(config: ServerConfig) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.snapshots_dir).with_context(|| {
        format!(
            "cannot create snapshots directory {}",
            config.snapshots_dir.display()
        )
    })?;

    let prices = Arc::new(build_price_table(&config));
    let baseline = load_baseline(&config);

    // Warm the price cache for every instance type the baseline runs;
    // failures leave the cache as it is.
    let oracle = Arc::new(NullOracle);
    let instance_types: Vec<String> = baseline
        .nodes
        .values()
        .map(|n| n.instance_type.clone())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    if !instance_types.is_empty() {
        if let Err(err) = prices.refresh_from_oracle(&*oracle, &instance_types) {
            warn!("initial price refresh failed: {:#}", err);
        }
    }

    let manager = SnapshotManager::new(baseline);

    let state = AppState {
        manager: Arc::new(RwLock::new(manager)),
        prices,
        oracle,
        collector: Arc::new(KubectlCollector::new(config.kube_context.clone())),
        snapshots_dir: config.snapshots_dir.clone(),
    };

    api::serve(state, &config.bind_address).await
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        Command::Report { snapshot } => {
            let prices = build_price_table(&config);
            report::print_report(&snapshot, &prices)
        }
    }
}

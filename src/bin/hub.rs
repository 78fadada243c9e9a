use std::str::FromStr;

use anyhow::Context;
use clap::Parser;
use coffee_monitoring::{
    bridge::forward_lines,
    config::{Config, read_config_file},
    notify::build_sinks,
    pipeline::{Pipeline, seed_registry},
    storage::open_backend,
};
use tokio::io::BufReader;
use tracing::{error, info, level_filters::LevelFilter, trace, warn};
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Clone, Parser)]
struct Args {
    /// Config file; built-in defaults when omitted
    #[arg(short)]
    file: Option<String>,

    /// Read `topic payload` lines from stdin (e.g. piped from `mosquitto_sub -v`)
    #[arg(long)]
    stdin: bool,

    /// Log level for the hub and the library
    #[arg(long, default_value = "debug")]
    log_level: String,
}

fn init(level: LevelFilter) {
    let filter = filter::Targets::new().with_targets(vec![
        ("coffee_monitoring", level),
        ("brewwatch_hub", level),
        ("tower_http", level),
    ]);
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .compact()
                .with_ansi(false),
        )
        .with(filter)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let args = Args::parse();
    let level = LevelFilter::from_str(&args.log_level)
        .with_context(|| format!("invalid log level '{}'", args.log_level))?;
    init(level);
    trace!("started with args: {args:?}");

    let config = match &args.file {
        Some(path) => read_config_file(path)?,
        None => {
            warn!("no config file given, using defaults with an empty machine registry");
            Config::default()
        }
    };

    let backend = open_backend(config.storage.as_ref())
        .await
        .context("failed to open storage")?;
    seed_registry(backend.as_ref(), &config.machines)
        .await
        .context("failed to register machines")?;

    let pipeline = Pipeline::spawn(&config, backend, build_sinks(&config.notifications));

    #[cfg(feature = "api")]
    {
        use coffee_monitoring::api::{ApiState, spawn_api_server};

        let addr = spawn_api_server(&config.api, ApiState::new(pipeline.handle())).await?;
        info!("operator API available at http://{addr}/api/v1");
    }

    if args.stdin {
        let handle = pipeline.handle();
        tokio::select! {
            result = forward_lines(BufReader::new(tokio::io::stdin()), &handle) => {
                if let Err(e) = result {
                    error!("line bridge failed: {e:#}");
                }
            }
            _ = tokio::signal::ctrl_c() => info!("received ctrl-c"),
        }
    } else {
        tokio::signal::ctrl_c()
            .await
            .context("failed to listen for ctrl-c")?;
        info!("received ctrl-c");
    }

    pipeline.shutdown().await
}

//! Linegate CLI - runs the TCP line-protocol gateway.
//!
//! The bus endpoint is stdio: newline-delimited JSON events on stdin,
//! published requests as JSON lines on stdout. Logs go to stderr unless
//! `--log-file` is given.

use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use linegate::bus::{bridge, LocalBus, MessageBus};
use linegate::{run_supervised, BusEventCache, Config};
use mimalloc::MiMalloc;

/// Global allocator configured per M-MIMALLOC-APPS guideline.
#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

/// Global flag for signal-triggered shutdown (as Arc for signal-hook compatibility)
static SHUTDOWN_FLAG: std::sync::LazyLock<Arc<AtomicBool>> =
    std::sync::LazyLock::new(|| Arc::new(AtomicBool::new(false)));

/// How long the bridge tasks get to finish after the gateway stops.
const BRIDGE_SHUTDOWN_GRACE: Duration = Duration::from_millis(200);

#[derive(Parser)]
#[command(name = "linegate")]
#[command(version)]
#[command(about = "TCP line-protocol gateway for modem/radio clients")]
struct Cli {
    /// Configuration file (defaults to <config dir>/linegate/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write logs to this file instead of stderr (or set LINEGATE_LOG_FILE)
    #[arg(long, global = true, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway until interrupted
    Start {
        /// TCP port to listen on
        #[arg(long)]
        port: Option<u16>,
        /// Seconds between telemetry broadcasts
        #[arg(long)]
        telemetry_period: Option<f64>,
        /// Maximum concurrent clients (listen backlog)
        #[arg(long)]
        max_clients: Option<u32>,
        /// Address to bind
        #[arg(long)]
        bind: Option<String>,
    },
    /// Print the effective configuration
    Config,
}

impl Commands {
    /// Layer command-line overrides on top of the loaded configuration.
    fn apply_overrides(&self, config: &mut Config) {
        let Self::Start {
            port,
            telemetry_period,
            max_clients,
            bind,
        } = self
        else {
            return;
        };
        if let Some(port) = port {
            config.port = *port;
        }
        if let Some(period) = telemetry_period {
            config.telemetry_period = *period;
        }
        if let Some(max) = max_clients {
            config.max_clients = *max;
        }
        if let Some(bind) = bind {
            config.bind_address.clone_from(bind);
        }
    }
}

/// `--log-file` wins over `LINEGATE_LOG_FILE`.
fn log_file_path(flag: Option<PathBuf>, env_value: Option<OsString>) -> Option<PathBuf> {
    flag.or_else(|| env_value.filter(|v| !v.is_empty()).map(PathBuf::from))
}

/// Effective configuration as printed by `linegate config`.
fn render_config(config: &Config) -> Result<String> {
    config.validate()?;
    Ok(serde_json::to_string_pretty(config)?)
}

fn init_logging(log_file: Option<&PathBuf>) -> Result<()> {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    builder.format_timestamp_secs();
    if let Some(path) = log_file {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create log file at {}", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Run the supervised gateway with the stdio bus bridge.
fn run_gateway(config: &Config) -> Result<()> {
    use signal_hook::consts::signal::{SIGHUP, SIGINT, SIGTERM};
    use signal_hook::flag;
    flag::register(SIGINT, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGTERM, Arc::clone(&SHUTDOWN_FLAG))?;
    flag::register(SIGHUP, Arc::clone(&SHUTDOWN_FLAG))?;

    let runtime = tokio::runtime::Runtime::new().context("Failed to start tokio runtime")?;

    let (bus, requests) = LocalBus::new();
    let bus = Arc::new(bus);
    let cache = BusEventCache::new();
    cache.subscribe(bus.as_ref());

    let event_bus = Arc::clone(&bus);
    runtime.spawn(async move {
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        if let Err(e) = bridge::pump_events(stdin, &event_bus).await {
            log::error!("[Bus] Event bridge failed: {e:#}");
        }
    });
    runtime.spawn(async move {
        if let Err(e) = bridge::drain_requests(requests, tokio::io::stdout()).await {
            log::error!("[Bus] Request bridge failed: {e:#}");
        }
    });

    log::info!("Linegate v{} starting", env!("CARGO_PKG_VERSION"));
    let result = run_supervised(
        config,
        Arc::clone(&bus) as Arc<dyn MessageBus>,
        cache,
        &SHUTDOWN_FLAG,
    );

    // Stdin reads cannot be cancelled; don't wait on them
    runtime.shutdown_timeout(BRIDGE_SHUTDOWN_GRACE);
    log::info!("Linegate stopped");
    result
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log_file = log_file_path(cli.log_file.clone(), std::env::var_os("LINEGATE_LOG_FILE"));
    init_logging(log_file.as_ref())?;

    let mut config = Config::load(cli.config.as_deref())?;
    cli.command.apply_overrides(&mut config);

    match cli.command {
        Commands::Start { .. } => {
            config.validate()?;
            run_gateway(&config)?;
        }
        Commands::Config => {
            println!("{}", render_config(&config)?);
        }
    }

    Ok(())
}

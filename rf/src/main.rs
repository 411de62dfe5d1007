//! rf - request coordinator CLI
//!
//! Sends single or periodic requests through the coordinator.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result, eyre};
use serde_json::Value;
use tracing::{debug, info};

use reqflow::cli::{Cli, Command, payload_from_pairs};
use reqflow::config::Config;
use reqflow::coordinator::{Coordinator, CoordinatorHandle, DispatchMode, Handlers, Settlement};
use reqflow::csrf::{FileTokenStore, MemoryTokenStore, TokenStore};
use reqflow::notify::ConsoleNotifier;
use reqflow::transport::{HttpTransport, RequestOverrides};

const DRAIN_POLL: Duration = Duration::from_millis(50);

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("reqflow")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("rf.log")).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    cli.apply_overrides(&mut config);

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Config => cmd_config(&config),
        Command::Send {
            identity,
            data,
            locked,
            detach,
        } => {
            let mode = match (locked, detach) {
                (_, true) => DispatchMode::Detached,
                (true, false) => DispatchMode::Locked,
                (false, false) => DispatchMode::Plain,
            };
            cmd_send(&config, &identity, payload_from_pairs(&data), mode).await
        }
        Command::Poll {
            identity,
            data,
            interval_ms,
            count,
        } => cmd_poll(&config, &identity, payload_from_pairs(&data), interval_ms, count).await,
    }
}

fn cmd_config(config: &Config) -> Result<()> {
    debug!("cmd_config: called");
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}

/// Build a coordinator that prints response bodies for `identity`
fn build_coordinator(config: &Config, identity: &str) -> Result<Coordinator> {
    debug!(%identity, "build_coordinator: called");
    let transport = Arc::new(HttpTransport::from_config(&config.transport).context("Failed to create HTTP client")?);

    let token_store: Arc<dyn TokenStore> = match &config.csrf.token_file {
        Some(path) => Arc::new(FileTokenStore::new(path)),
        None => Arc::new(MemoryTokenStore::new()),
    };

    Ok(Coordinator::builder(transport)
        .config(config.coordinator.clone())
        .transport_config(config.transport.clone())
        .token_store(token_store)
        .csrf_header(config.csrf.header_name.clone())
        .notifier(Arc::new(ConsoleNotifier))
        .register(
            identity,
            Handlers::new().on_success(|response| println!("{}", response.body)),
        )
        .build())
}

fn print_settlement(settlement: &Settlement) {
    match settlement {
        Settlement::Succeeded { status } => eprintln!("{} {}", "ok".green().bold(), status),
        Settlement::Failed { error } => eprintln!("{} {}", "failed".red().bold(), error),
        Settlement::Discarded => eprintln!("{}", "discarded".yellow()),
    }
}

async fn cmd_send(config: &Config, identity: &str, payload: Value, mode: DispatchMode) -> Result<()> {
    debug!(%identity, ?mode, "cmd_send: called");
    config.validate()?;

    let (handle, task) = build_coordinator(config, identity)?.spawn();
    let receipt = handle
        .dispatch_with(identity, payload, mode, RequestOverrides::default())
        .await
        .context("Failed to dispatch request")?;

    let settlement = match receipt {
        Some(receipt) => {
            debug!(request_id = %receipt.request_id(), "cmd_send: dispatched");
            receipt.settled().await
        }
        None => {
            // Fresh coordinator, so this only happens if the lock leaked
            return Err(eyre!("Dispatch for '{}' was suppressed", identity));
        }
    };
    print_settlement(&settlement);

    handle.shutdown().await?;
    task.await.context("Coordinator task failed")?;

    match settlement {
        Settlement::Failed { error } => Err(eyre!("Request '{}' failed: {}", identity, error)),
        _ => Ok(()),
    }
}

async fn cmd_poll(
    config: &Config,
    identity: &str,
    payload: Value,
    interval_ms: Option<u64>,
    count: Option<u64>,
) -> Result<()> {
    debug!(%identity, ?interval_ms, ?count, "cmd_poll: called");
    config.validate()?;

    let (handle, task) = build_coordinator(config, identity)?.spawn();
    handle
        .dispatch_periodic_with(
            identity,
            payload,
            interval_ms.map(Duration::from_millis),
            RequestOverrides::default(),
        )
        .await
        .context("Failed to start periodic dispatch")?;

    match count {
        Some(count) => wait_for_fires(&handle, count).await?,
        None => {
            tokio::signal::ctrl_c().await.context("Failed to listen for ctrl-c")?;
            info!("Interrupted, stopping periodic dispatch");
        }
    }

    handle.cancel_periodic(identity).await?;
    wait_for_drain(&handle).await?;

    let metrics = handle.metrics().await?;
    eprintln!(
        "{} dispatched={} suppressed={} succeeded={} failed={}",
        "done".bold(),
        metrics.dispatched,
        metrics.suppressed,
        metrics.succeeded,
        metrics.failed
    );

    handle.shutdown().await?;
    task.await.context("Coordinator task failed")?;
    Ok(())
}

/// Every fire is either dispatched or suppressed by the lock
async fn wait_for_fires(handle: &CoordinatorHandle, count: u64) -> Result<()> {
    loop {
        let metrics = handle.metrics().await?;
        if metrics.dispatched + metrics.suppressed >= count {
            return Ok(());
        }
        tokio::time::sleep(DRAIN_POLL).await;
    }
}

async fn wait_for_drain(handle: &CoordinatorHandle) -> Result<()> {
    while handle.metrics().await?.in_flight > 0 {
        tokio::time::sleep(DRAIN_POLL).await;
    }
    Ok(())
}

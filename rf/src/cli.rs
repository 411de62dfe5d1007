//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing::debug;

use crate::config::Config;
use crate::transport::HttpMethod;

/// rf - identity-keyed request coordinator
#[derive(Debug, Parser)]
#[command(
    name = "rf",
    about = "Send coordinated requests to an endpoint with locking, CSRF rotation and polling",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Endpoint URL, overrides transport.url
    #[arg(short, long, global = true)]
    pub url: Option<String>,

    /// HTTP method, overrides transport.method
    #[arg(short, long, global = true)]
    pub method: Option<HttpMethod>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Dispatch a single request and wait for its outcome
    Send {
        /// Request identity
        identity: String,

        /// Payload field as key=value (repeatable); values that parse as JSON are sent as such
        #[arg(short, long = "data", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        data: Vec<(String, Value)>,

        /// Use a locked dispatch
        #[arg(long, conflicts_with = "detach")]
        locked: bool,

        /// Fire and forget: the response is discarded
        #[arg(long)]
        detach: bool,
    },

    /// Dispatch periodically until interrupted or the fire count is reached
    Poll {
        /// Request identity
        identity: String,

        /// Payload field as key=value (repeatable)
        #[arg(short, long = "data", value_name = "KEY=VALUE", value_parser = parse_key_val)]
        data: Vec<(String, Value)>,

        /// Interval in milliseconds, overrides coordinator.poll-interval-ms
        #[arg(short, long = "interval-ms")]
        interval_ms: Option<u64>,

        /// Stop after this many fires
        #[arg(short = 'n', long)]
        count: Option<u64>,
    },

    /// Print the resolved configuration as YAML
    Config,
}

impl Cli {
    /// Apply global flag overrides to a loaded config
    pub fn apply_overrides(&self, config: &mut Config) {
        debug!(url = ?self.url, method = ?self.method, "Cli::apply_overrides: called");
        if let Some(url) = &self.url {
            config.transport.url = url.clone();
        }
        if let Some(method) = self.method {
            config.transport.method = method;
        }
    }
}

/// Parse a `key=value` payload argument
pub fn parse_key_val(arg: &str) -> Result<(String, Value), String> {
    let (key, raw) = arg
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=VALUE: no `=` found in `{}`", arg))?;
    if key.is_empty() {
        return Err(format!("invalid KEY=VALUE: empty key in `{}`", arg));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Collect parsed pairs into a payload object; later keys win
pub fn payload_from_pairs(pairs: &[(String, Value)]) -> Value {
    let map: Map<String, Value> = pairs.iter().cloned().collect();
    Value::Object(map)
}

//! Discovery Server CLI
//!
//! Loads configuration (file, then `DISCOVERY_*` environment, then flags),
//! builds the orchestrator and serves the REST and WebSocket API.

use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use coordination::{DiscoveryConfig, Language, Roster};
use discovery_server::{serve, AppState};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "discovery-server")]
#[command(about = "Multi-agent physics discovery council over HTTP and WebSocket")]
#[command(version)]
struct Args {
    /// Path to a TOML configuration file
    #[arg(short, long, env = "DISCOVERY_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address, overriding the configuration
    #[arg(short, long)]
    bind: Option<String>,

    /// Built-in persona roster (discovery, legends)
    #[arg(long)]
    roster: Option<Roster>,

    /// Prompt language (en, es)
    #[arg(long)]
    language: Option<Language>,

    /// Answer from canned offline replies instead of hosted models
    #[arg(long)]
    offline: bool,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().with_env_filter(filter).json().init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let mut config = match &args.config {
        Some(path) => DiscoveryConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => {
            let mut config = DiscoveryConfig::default();
            config.apply_env();
            config
        }
    };
    if let Some(bind) = args.bind {
        config.server.bind_addr = bind;
    }
    if let Some(roster) = args.roster {
        config.roster = roster;
        config.personas_file = None;
    }
    if let Some(language) = args.language {
        config.language = language;
    }
    config.validate().context("invalid configuration")?;

    let addr = config.server.bind_addr.clone();
    info!(
        roster = %config.roster,
        language = %config.language,
        offline = args.offline,
        "Starting discovery server"
    );

    let state = AppState::new(config, args.offline);
    // Keys from the environment are enough to start; /api/initialize can
    // rebuild the council with other keys later.
    if let Err(e) = state.initialize(HashMap::new(), None).await {
        warn!(error = %e, "Orchestrator not initialized at startup");
    }

    serve(state, &addr).await
}

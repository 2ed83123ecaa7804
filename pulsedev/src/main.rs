//! pulsedev - developer activity capture and flow-state client
//!
//! Commands:
//! - `status`: show configuration and which features will run
//! - `watch`: feed JSON-lines editor events from stdin through a live tracker
//! - `replay`: classify a recorded capture offline
//! - `profile`, `dashboard`, `achievements`: fetch backend views as JSON
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/pulsedev/config.toml (~/.config/pulsedev/config.toml)
//! - Logs: $XDG_STATE_HOME/pulsedev/pulsedev.log (~/.local/state/pulsedev/pulsedev.log)

mod replay;
mod watch;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pulsedev_core::sync::{ApiClient, Backend};
use pulsedev_core::Config;

#[derive(Parser)]
#[command(name = "pulsedev")]
#[command(about = "Capture editor activity, infer flow state and sync XP")]
#[command(version)]
struct Args {
    /// Config file to use instead of the XDG default
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show configuration and enabled features
    Status,

    /// Run a tracker over JSON-lines events read from stdin
    Watch {
        /// Reuse a session id instead of generating one
        #[arg(long)]
        session_id: Option<String>,

        /// Never contact the backend
        #[arg(long)]
        offline: bool,
    },

    /// Classify a JSON-lines capture offline and print flow transitions
    Replay {
        /// File of raw events, one JSON object per line
        file: PathBuf,

        /// Print only the summary line
        #[arg(long)]
        summary_only: bool,
    },

    /// Fetch the user profile for a session
    Profile { session_id: String },

    /// Fetch the dashboard for a session
    Dashboard { session_id: String },

    /// Fetch unlocked and available achievements for a session
    Achievements { session_id: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)
            .with_context(|| format!("failed to load configuration from {}", path.display()))?,
        None => Config::load().context("failed to load configuration")?,
    };

    let _log_guard =
        pulsedev_core::logging::init(&config.logging).context("failed to initialize logging")?;

    tracing::info!("pulsedev starting up");

    match args.command {
        Command::Status => cmd_status(&config, args.config.as_deref()),
        Command::Watch { session_id, offline } => watch::run(config, session_id, offline).await,
        Command::Replay { file, summary_only } => replay::run(&config, &file, summary_only),
        Command::Profile { session_id } => {
            let client = backend_client(&config)?;
            let stats = client
                .fetch_profile(&session_id)
                .await
                .context("failed to fetch profile")?;
            print_json(&stats)
        }
        Command::Dashboard { session_id } => {
            let client = backend_client(&config)?;
            let dashboard = client
                .fetch_dashboard(&session_id)
                .await
                .context("failed to fetch dashboard")?;
            print_json(&dashboard)
        }
        Command::Achievements { session_id } => {
            let client = backend_client(&config)?;
            let achievements = client
                .fetch_achievements(&session_id)
                .await
                .context("failed to fetch achievements")?;
            print_json(&achievements)
        }
    }
}

fn backend_client(config: &Config) -> Result<ApiClient> {
    if !config.backend.is_ready() {
        anyhow::bail!("backend is not configured; run 'pulsedev status' for details");
    }
    ApiClient::new(config.backend.clone()).context("failed to create backend client")
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to encode response")?;
    println!("{}", text);
    Ok(())
}

fn cmd_status(config: &Config, config_override: Option<&std::path::Path>) -> Result<()> {
    println!("PulseDev Configuration");
    println!("======================");
    println!();

    let config_path = config_override
        .map(std::path::Path::to_path_buf)
        .unwrap_or_else(Config::config_path);
    println!(
        "Config File:     {}{}",
        config_path.display(),
        if config_path.exists() { "" } else { " (not found, using defaults)" }
    );
    println!("Log File:        {}", pulsedev_core::logging::log_file_path().display());

    let backend = &config.backend;
    println!();
    println!("Backend Enabled: {}", backend.enabled);
    if backend.enabled {
        println!(
            "Server URL:      {}",
            backend.server_url.as_deref().unwrap_or("<not set>")
        );
        println!("API Prefix:      {}", backend.api_prefix);
        println!(
            "API Key:         {}",
            if backend.api_key.is_some() { "<set>" } else { "<not set>" }
        );
        println!("Platform:        {}", backend.platform);
        println!("Timeout:         {}s", backend.timeout_secs);
        println!("Retries:         {}", backend.retry_count);
    }

    println!();
    println!("Batch Size:      {}", config.capture.max_batch_size);
    println!("Flush Interval:  {}ms", config.capture.flush_interval_ms);
    println!("Sync Interval:   {}s", config.session.sync_interval_secs);

    let (features, problems) = config.features();
    println!();
    println!("Features:");
    println!("  sync:          {}", on_off(features.sync));
    println!("  flow:          {}", on_off(features.flow));
    println!("  rewards:       {}", on_off(features.rewards));

    if !problems.is_empty() {
        println!();
        println!("Problems:");
        for problem in &problems {
            println!("  - {}", problem);
        }
    }

    if !features.sync {
        println!();
        println!("Running in offline capture mode. To sync, add to config.toml:");
        println!();
        println!("  [backend]");
        println!("  enabled = true");
        println!("  server_url = \"https://your-pulsedev-server.com\"");
        println!("  api_key = \"pk_live_xxxxxxxxxxxx\"");
    }

    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

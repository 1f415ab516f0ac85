//! TestPilot CLI - Main Entry Point
//!
//! Connects to the TestPilot realtime channel to watch executions, print
//! server events and drive browser, recording, playback and replay sessions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use testpilot_cli::commands::{config, control, listen, status, watch};
use testpilot_cli::output::{self, print_error};
use testpilot_cli::session::Settings;

/// TestPilot CLI - realtime test execution events
#[derive(Parser)]
#[command(name = "testpilot")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Realtime server URL
    #[arg(long, env = "TESTPILOT_REALTIME_URL", global = true)]
    url: Option<String>,

    /// Access token; overrides the stored session
    #[arg(long, env = "TESTPILOT_ACCESS_TOKEN", hide_env_values = true, global = true)]
    token: Option<String>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the realtime connection
    Status,

    /// Follow a test execution until it finishes
    Watch(watch::WatchArgs),

    /// Print server events
    Listen(listen::ListenArgs),

    /// Send a command to a browser session
    Browser(control::BrowserArgs),

    /// Control a recording session
    Record(control::RecordArgs),

    /// Control a playback session
    Playback(control::PlaybackArgs),

    /// Control replay of a finished execution
    Replay(control::ReplayArgs),

    /// Manage the client configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings {
        config_path: cli.config,
        url: cli.url,
        token: cli.token,
    };

    let result = match cli.command {
        Commands::Status => match status::execute(&settings, cli.format).await {
            Ok(true) => Ok(()),
            Ok(false) => std::process::exit(1),
            Err(e) => Err(e),
        },
        Commands::Watch(args) => watch::execute(args, &settings, cli.format).await,
        Commands::Listen(args) => listen::execute(args, &settings, cli.format).await,
        Commands::Browser(args) => control::browser(args, &settings, cli.format).await,
        Commands::Record(args) => control::record(args, &settings, cli.format).await,
        Commands::Playback(args) => control::playback(args, &settings, cli.format).await,
        Commands::Replay(args) => control::replay(args, &settings, cli.format).await,
        Commands::Config(cmd) => config::execute(cmd, &settings, cli.format).await,
        Commands::Version => {
            println!("TestPilot CLI v{}", testpilot_common::VERSION);
            println!("Realtime protocol: Socket.IO v5 over Engine.IO v4 (websocket)");
            Ok(())
        }
    };

    if let Err(e) = result {
        print_error(&format!("{:#}", e));
        std::process::exit(1);
    }

    Ok(())
}

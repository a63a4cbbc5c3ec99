use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use pulsehub_server::config;
use pulsehub_server::engine::AutomationEngine;
use pulsehub_server::events::EventBus;
use pulsehub_server::gesture::GestureRecognizer;
use pulsehub_server::server::{run_server, ServerState};
use pulsehub_server::services::{NoopDeviceService, NoopMusicService};
use pulsehub_server::tracker::BeatTracker;

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to TOML configuration file. Values in the file override CLI arguments.
    #[clap(long)]
    pub config: Option<PathBuf>,

    /// The port to listen on.
    #[clap(short, long, default_value_t = 3000)]
    pub port: u16,

    /// Default log level, overridable per-target via LOG_LEVEL.
    #[clap(long, default_value = "info")]
    pub logging_level: String,
}

/// Convert CLI args to CliConfig for config resolution
impl From<&CliArgs> for config::CliConfig {
    fn from(args: &CliArgs) -> Self {
        config::CliConfig {
            port: args.port,
            logging_level: args.logging_level.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    // Load TOML config if provided
    let file_config = match &cli_args.config {
        Some(path) => Some(config::FileConfig::load(path)?),
        None => None,
    };

    // Resolve final configuration (TOML overrides CLI)
    let cli_config: config::CliConfig = (&cli_args).into();
    let app_config = config::AppConfig::resolve(&cli_config, file_config)?;

    let default_level = app_config
        .logging_level
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::INFO);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(default_level.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    info!("Configuration loaded:");
    info!("  port: {}", app_config.port);
    info!("  logging level: {}", app_config.logging_level);
    info!("  tracker poll interval: {}ms", app_config.tracker.poll_interval_ms);
    info!(
        "  synthetic beat fallback: {}",
        app_config.engine.synthetic_beat_fallback
    );

    let bus = EventBus::new(app_config.events.bus_capacity);
    let tracker = Arc::new(BeatTracker::new(bus.clone(), &app_config.tracker));
    let recognizer = Arc::new(GestureRecognizer::new(bus.clone(), &app_config.gesture));

    // Collaborator seams: no vendor integrations are wired in here, the
    // noop services keep the hub fully operational for local clients.
    let engine = AutomationEngine::new(
        bus.clone(),
        Arc::clone(&tracker),
        Arc::new(NoopMusicService),
        Arc::new(NoopDeviceService),
        &app_config.engine,
    );
    let event_loop = Arc::clone(&engine).spawn_event_loop();

    let shutdown_token = CancellationToken::new();
    let state = ServerState {
        bus,
        tracker: Arc::clone(&tracker),
        recognizer,
    };

    info!("Ready to serve at port {}!", app_config.port);

    let result = tokio::select! {
        result = run_server(state, app_config.port, shutdown_token.clone()) => {
            info!("HTTP server stopped: {:?}", result);
            result
        },
        _ = event_loop => {
            info!("Automation event loop stopped");
            Ok(())
        },
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, initiating graceful shutdown");
            shutdown_token.cancel();
            Ok(())
        }
    };

    tracker.stop_tracking();
    engine.shutdown();
    // Give in-flight tasks a moment to observe cancellation.
    tokio::time::sleep(Duration::from_millis(100)).await;
    result
}

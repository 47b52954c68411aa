use clap::Parser;
use std::path::PathBuf;
use std::process::exit;

use frame_runtime::app::{run_display_test, App, LaunchOptions};
use frame_runtime::config::Config;
use frame_runtime::util::log;
use frame_runtime::{log_error, log_info, signals};

/// MQTT-driven e-paper photo frame with battery-aware power management
#[derive(Debug, Parser)]
#[command(name = "frame-runtime-rust", version, about)]
struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = "config.yml")]
    config: PathBuf,

    /// Draw a test pattern and exit
    #[arg(long)]
    test_display: bool,

    /// Use the mock display instead of hardware
    #[arg(long)]
    dry_run: bool,

    /// Run one battery cycle even if pisugar.enabled is false
    #[arg(long)]
    battery_mode: bool,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = match Config::load_from_path(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading config from {}: {}", cli.config.display(), e);
            exit(1);
        }
    };

    if let Err(e) = log::init(&config.logging) {
        eprintln!("Failed to set up logging: {}", e);
        exit(1);
    }

    if cli.test_display {
        if let Err(e) = run_display_test(&config.display, cli.dry_run).await {
            log_error!("Display test failed: {}", e);
            exit(1);
        }
        return Ok(());
    }

    let interrupt = signals::install();
    let app = App::new(
        &config,
        LaunchOptions {
            dry_run: cli.dry_run,
            battery_mode: cli.battery_mode,
        },
    );

    match app.orchestrator.run(interrupt).await {
        Ok(outcome) => {
            log_info!("Finished: {:?}", outcome);
            Ok(())
        }
        Err(e) => {
            log_error!("Fatal error: {}", e);
            exit(1);
        }
    }
}

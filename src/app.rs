// src/app.rs
//! Wires configuration into a ready-to-run orchestrator.

use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::config::{Config, DisplayConfig};
use crate::display::{self, SharedDisplay};
use crate::error::{DisplayError, FrameError, Result};
use crate::handlers::{ImageHandler, SystemHandler};
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::power::SystemPower;
use crate::state::AppState;
use crate::util::image::test_pattern;
use crate::util::io::messenger::Publish;
use crate::util::io::mqtt::MqttClient;
use crate::util::io::pisugar::PisugarClient;
use crate::log_info;

/// Command-line switches that change how the app is assembled
#[derive(Debug, Clone, Copy, Default)]
pub struct LaunchOptions {
    pub dry_run: bool,
    pub battery_mode: bool,
}

pub struct App {
    pub orchestrator: Orchestrator,
    pub messenger: Arc<MqttClient>,
}

impl App {
    pub fn new(config: &Config, options: LaunchOptions) -> Self {
        let state = AppState::new();
        let display = display::shared(display::from_config(&config.display, options.dry_run));

        let messenger = Arc::new(MqttClient::new(config.mqtt.clone()));
        let publisher: Arc<dyn Publish> = Arc::new(messenger.publisher());

        messenger.register_handler(Arc::new(ImageHandler::new(
            display.clone(),
            config.image_processing.clone(),
            config.preview.clone(),
            Some(publisher),
        )));
        messenger.register_handler(Arc::new(SystemHandler::new(state.clone())));

        let orchestrator = Orchestrator::new(
            OrchestratorSettings::from_config(config, options.battery_mode),
            state,
            display,
            messenger.clone(),
            PisugarClient::from_config(&config.pisugar),
            Arc::new(SystemPower::new()),
        );

        Self { orchestrator, messenger }
    }
}

fn with_display<T, F>(display: &SharedDisplay, f: F) -> Result<T>
where
    F: FnOnce(&mut Box<dyn display::Display>) -> std::result::Result<T, DisplayError>,
{
    let mut guard = display
        .lock()
        .map_err(|_| FrameError::Display(DisplayError::Device("display lock poisoned".to_string())))?;
    Ok(f(&mut guard)?)
}

/// Paint the test pattern, wait for Enter, then clear and sleep the panel.
pub async fn run_display_test(config: &DisplayConfig, dry_run: bool) -> Result<()> {
    let display = display::shared(display::from_config(config, dry_run));

    log_info!("Running display test");
    let painted = display.clone();
    tokio::task::spawn_blocking(move || {
        with_display(&painted, |d| {
            d.init()?;
            let pattern = test_pattern(d.width(), d.height());
            d.display_image(&pattern)
        })
    })
    .await
    .map_err(|e| FrameError::Display(DisplayError::Device(e.to_string())))??;

    println!("Test pattern displayed. Press Enter to clear and exit...");
    let mut line = String::new();
    BufReader::new(tokio::io::stdin()).read_line(&mut line).await?;

    tokio::task::spawn_blocking(move || {
        with_display(&display, |d| {
            d.clear()?;
            d.sleep()
        })
    })
    .await
    .map_err(|e| FrameError::Display(DisplayError::Device(e.to_string())))??;

    log_info!("Display test complete");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_handlers_registered_in_order() {
        let config = Config::default();
        let app = App::new(&config, LaunchOptions { dry_run: true, battery_mode: true });

        assert_eq!(app.messenger.dispatcher().handler_count(), 2);
        assert_eq!(app.orchestrator.state().mode(), crate::state::RuntimeMode::Battery);
        assert_eq!(app.orchestrator.mode(), crate::orchestrator::OperatingMode::Battery);
    }
}

// src/orchestrator.rs
//! Power-mode state machine: either stay connected forever, or run one short
//! battery cycle (report, listen, re-arm the RTC alarm, power off).

use chrono::Local;
use rumqttc::QoS;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::display::SharedDisplay;
use crate::error::{DisplayError, FrameError, Result};
use crate::power::PowerControl;
use crate::signals::{wait_for_interrupt, ShutdownSignal};
use crate::state::AppState;
use crate::util::io::messenger::Messenger;
use crate::util::io::pisugar::{PisugarClient, WakeSchedule};
use crate::{log_error, log_info, log_warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatingMode {
    AlwaysOn,
    Battery,
}

/// How a run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The receive loop stopped after an interrupt
    Stopped,
    /// Interrupted before the receive loop started
    Interrupted,
    /// Battery cycle finished without powering off
    CycleComplete,
    PoweredOff,
    /// The power-off command was refused; the host stays up
    PowerOffFailed,
}

#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub battery_mode: bool,
    pub wake_interval_minutes: u32,
    pub message_wait_timeout: Duration,
    pub shutdown_after_display: bool,
    pub battery_topic: String,
}

impl OrchestratorSettings {
    /// `force_battery` comes from `--battery-mode`.
    pub fn from_config(config: &Config, force_battery: bool) -> Self {
        Self {
            battery_mode: force_battery || config.pisugar.enabled,
            wake_interval_minutes: config.pisugar.wake_interval_minutes,
            message_wait_timeout: config.pisugar.message_wait_timeout(),
            shutdown_after_display: config.pisugar.shutdown_after_display,
            battery_topic: config.pisugar.battery_topic.clone(),
        }
    }
}

enum CycleEnd {
    Continuous,
    Done(RunOutcome),
}

#[derive(Debug)]
pub struct Orchestrator {
    settings: OrchestratorSettings,
    state: AppState,
    display: SharedDisplay,
    messenger: Arc<dyn Messenger>,
    pisugar: PisugarClient,
    power: Arc<dyn PowerControl>,
    shut_down: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        state: AppState,
        display: SharedDisplay,
        messenger: Arc<dyn Messenger>,
        pisugar: PisugarClient,
        power: Arc<dyn PowerControl>,
    ) -> Self {
        Self {
            settings,
            state,
            display,
            messenger,
            pisugar,
            power,
            shut_down: AtomicBool::new(false),
        }
    }

    pub fn mode(&self) -> OperatingMode {
        if self.settings.battery_mode {
            OperatingMode::Battery
        } else {
            OperatingMode::AlwaysOn
        }
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    /// Run the selected mode to completion, then always shut down.
    pub async fn run(&self, interrupt: ShutdownSignal) -> Result<RunOutcome> {
        let mode = self.mode();
        log_info!("Starting in {:?} mode", mode);

        let result = match mode {
            OperatingMode::AlwaysOn => self.run_always_on(interrupt).await,
            OperatingMode::Battery => self.run_battery_mode(interrupt).await,
        };
        if let Err(e) = &result {
            log_error!("Application error: {}", e);
        }

        self.shutdown().await;
        result
    }

    pub async fn run_always_on(&self, mut interrupt: ShutdownSignal) -> Result<RunOutcome> {
        tokio::select! {
            setup = self.setup() => setup?,
            _ = wait_for_interrupt(&mut interrupt) => {
                log_info!("Interrupted during startup");
                return Ok(RunOutcome::Interrupted);
            }
        }
        self.messenger.run_forever(interrupt).await?;
        Ok(RunOutcome::Stopped)
    }

    pub async fn run_battery_mode(&self, mut interrupt: ShutdownSignal) -> Result<RunOutcome> {
        let cycle = tokio::select! {
            cycle = self.battery_cycle() => cycle?,
            _ = wait_for_interrupt(&mut interrupt) => {
                log_info!("Interrupted during battery cycle");
                return Ok(RunOutcome::Interrupted);
            }
        };

        match cycle {
            CycleEnd::Done(outcome) => Ok(outcome),
            CycleEnd::Continuous => {
                log_info!("Continuous mode requested - staying awake");
                self.messenger.connect().await?;
                self.messenger.run_forever(interrupt).await?;
                Ok(RunOutcome::Stopped)
            }
        }
    }

    async fn battery_cycle(&self) -> Result<CycleEnd> {
        self.setup().await?;
        if let Err(e) = self.pisugar.clear_rtc_alarm_flag().await {
            log_warn!("Failed to clear RTC alarm flag: {}", e);
        }
        self.publish_battery_level().await;

        let handled = self.messenger.run_once(self.settings.message_wait_timeout).await;
        log_info!("Wait window closed after {} handled message(s)", handled);

        if self.state.is_continuous_mode() {
            return Ok(CycleEnd::Continuous);
        }
        if !self.settings.shutdown_after_display {
            log_info!("Power-off after display is disabled, cycle complete");
            return Ok(CycleEnd::Done(RunOutcome::CycleComplete));
        }

        self.schedule_wake().await;
        Ok(CycleEnd::Done(self.power_off().await))
    }

    async fn setup(&self) -> Result<()> {
        let display = self.display.clone();
        tokio::task::spawn_blocking(move || {
            let mut display = display
                .lock()
                .map_err(|_| DisplayError::Device("display lock poisoned".to_string()))?;
            display.init()
        })
        .await
        .map_err(|e| FrameError::Display(DisplayError::Device(format!("init task failed: {}", e))))??;

        self.messenger.connect().await
    }

    async fn publish_battery_level(&self) {
        let Some(level) = self.pisugar.get_battery_level().await else {
            log_warn!("Battery level unavailable, skipping report");
            return;
        };

        let payload = json!({
            "battery_level": level,
            "timestamp": Local::now().to_rfc3339(),
        });
        match self
            .messenger
            .publish(&self.settings.battery_topic, &payload, QoS::AtLeastOnce, false)
            .await
        {
            Ok(()) => log_info!("Published battery level: {:.1}%", level),
            Err(e) => log_warn!("Failed to publish battery level: {}", e),
        }
    }

    async fn schedule_wake(&self) {
        if let Some(level) = self.pisugar.get_battery_level().await {
            log_info!("Battery level before shutdown: {:.1}%", level);
        }

        let minutes = i64::from(self.settings.wake_interval_minutes);
        let next_wake = Local::now().naive_local() + chrono::Duration::minutes(minutes);
        log_info!(
            "Scheduling wake in {} minute(s) at {}",
            minutes,
            next_wake.format("%Y-%m-%d %H:%M:%S")
        );

        if let Err(e) = self.pisugar.set_rtc_alarm(&WakeSchedule::daily(next_wake)).await {
            log_error!("Failed to set RTC alarm: {}", e);
            return;
        }

        let expected = next_wake.format("%H:%M").to_string();
        if !self.pisugar.is_rtc_alarm_enabled().await {
            log_warn!("RTC alarm is not enabled after setting it - device may not wake up");
            return;
        }
        match self.pisugar.get_rtc_alarm_time().await {
            Some(alarm) if alarm.contains(&expected) => log_info!("RTC alarm verified: {}", alarm),
            Some(alarm) => log_warn!("RTC alarm reads {} but {} was requested", alarm, expected),
            None => log_warn!("RTC alarm enabled but its time could not be read back"),
        }
    }

    async fn power_off(&self) -> RunOutcome {
        log_info!("Powering off");
        match self.power.power_off().await {
            Ok(()) => RunOutcome::PoweredOff,
            Err(e) => {
                log_error!("Power-off failed, the device will stay on: {}", e);
                RunOutcome::PowerOffFailed
            }
        }
    }

    /// Disconnect (draining running handlers) and put the display to sleep.
    /// Only the first call does anything.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        log_info!("Shutting down...");

        self.messenger.disconnect().await;

        let display = self.display.clone();
        let slept = tokio::task::spawn_blocking(move || -> std::result::Result<bool, DisplayError> {
            let mut display = display
                .lock()
                .map_err(|_| DisplayError::Device("display lock poisoned".to_string()))?;
            if !display.is_initialized() {
                return Ok(false);
            }
            display.sleep()?;
            Ok(true)
        })
        .await;

        match slept {
            Ok(Ok(true)) => log_info!("Display put to sleep"),
            Ok(Ok(false)) => {}
            Ok(Err(e)) => log_error!("Error putting display to sleep: {}", e),
            Err(e) => log_error!("Display sleep task failed: {}", e),
        }
        log_info!("Shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_selection() {
        let mut config = Config::default();
        assert!(!OrchestratorSettings::from_config(&config, false).battery_mode);
        assert!(OrchestratorSettings::from_config(&config, true).battery_mode);

        config.pisugar.enabled = true;
        let settings = OrchestratorSettings::from_config(&config, false);
        assert!(settings.battery_mode);
        assert_eq!(settings.message_wait_timeout, Duration::from_secs(30));
        assert_eq!(settings.battery_topic, "frame/battery");
    }
}

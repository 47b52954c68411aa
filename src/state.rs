// src/state.rs
//! Runtime mode latch shared between the orchestrator and command handlers.

use std::sync::{Arc, Mutex};

use crate::log_info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeMode {
    Battery,
    Continuous,
}

/// Cheap to clone; every clone observes the same mode.
///
/// The only transition is `Battery -> Continuous`.
#[derive(Debug, Clone)]
pub struct AppState {
    mode: Arc<Mutex<RuntimeMode>>,
}

impl AppState {
    pub fn new() -> Self {
        Self {
            mode: Arc::new(Mutex::new(RuntimeMode::Battery)),
        }
    }

    /// Cancel the power-off path. Idempotent.
    pub fn enter_continuous_mode(&self) {
        let mut mode = self.mode.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        if *mode != RuntimeMode::Continuous {
            log_info!("Entering continuous mode - shutdown canceled");
            *mode = RuntimeMode::Continuous;
        }
    }

    pub fn is_continuous_mode(&self) -> bool {
        self.mode() == RuntimeMode::Continuous
    }

    pub fn mode(&self) -> RuntimeMode {
        *self.mode.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for AppState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_in_battery_mode() {
        let state = AppState::new();
        assert_eq!(state.mode(), RuntimeMode::Battery);
        assert!(!state.is_continuous_mode());
    }

    #[test]
    fn test_enter_continuous_mode_is_idempotent() {
        let state = AppState::new();
        state.enter_continuous_mode();
        let once = state.mode();
        state.enter_continuous_mode();
        assert_eq!(state.mode(), once);
        assert!(state.is_continuous_mode());
    }

    #[test]
    fn test_clones_share_the_latch() {
        let state = AppState::new();
        let handler_view = state.clone();

        std::thread::spawn(move || handler_view.enter_continuous_mode())
            .join()
            .unwrap();

        assert!(state.is_continuous_mode());
    }
}

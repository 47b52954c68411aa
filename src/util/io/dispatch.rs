// src/util/io/dispatch.rs
//! Command dispatch - decodes inbound payloads and routes them to registered handlers
//!
//! The [`InFlightGate`] pairs a running-handler counter with a shutting-down flag
//! under one mutex. Once shutdown begins no handler can start; the ones already
//! running are counted out by [`InFlightGuard`] when they finish.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::time::Instant;

use crate::handlers::CommandHandler;
use crate::{log_debug, log_error, log_info, log_warn};

/// How often `wait_idle` re-checks the counter
pub const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Wire format of every command: `{"action": "...", "data": {...}}`
#[derive(Debug, Clone, Deserialize)]
pub struct CommandEnvelope {
    pub action: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl CommandEnvelope {
    pub fn parse(payload: &[u8]) -> Result<Self, String> {
        let text = std::str::from_utf8(payload).map_err(|e| format!("payload is not UTF-8: {}", e))?;
        let envelope: CommandEnvelope =
            serde_json::from_str(text).map_err(|e| format!("Invalid JSON in message: {}", e))?;
        if envelope.action.trim().is_empty() {
            return Err("Message missing 'action' field".to_string());
        }
        Ok(envelope)
    }
}

/// What happened to one inbound message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Handled,
    HandlerFailed,
    NoHandler,
    Malformed,
    ShuttingDown,
}

impl DispatchOutcome {
    /// A handler was found and invoked, whatever its result
    pub fn matched_handler(self) -> bool {
        matches!(self, DispatchOutcome::Handled | DispatchOutcome::HandlerFailed)
    }
}

#[derive(Debug, Default)]
struct GateState {
    in_flight: usize,
    shutting_down: bool,
}

#[derive(Debug, Clone, Default)]
pub struct InFlightGate {
    state: Arc<Mutex<GateState>>,
}

impl InFlightGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, GateState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn is_shutting_down(&self) -> bool {
        self.lock().shutting_down
    }

    pub fn in_flight(&self) -> usize {
        self.lock().in_flight
    }

    /// Count a handler in, unless shutdown already began.
    pub fn try_enter(&self) -> Option<InFlightGuard> {
        let mut state = self.lock();
        if state.shutting_down {
            return None;
        }
        state.in_flight += 1;
        Some(InFlightGuard { gate: self.clone() })
    }

    /// Close the gate for good.
    pub fn begin_shutdown(&self) {
        self.lock().shutting_down = true;
    }

    /// Wait until no handler is running. Returns false if `timeout` ran out first.
    pub async fn wait_idle(&self, timeout: Duration) -> bool {
        // An unrepresentable deadline means no deadline
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let active = self.in_flight();
            if active == 0 {
                log_info!("All handlers completed");
                return true;
            }
            let remaining = deadline.map(|d| d.saturating_duration_since(Instant::now()));
            if remaining == Some(Duration::ZERO) {
                log_warn!(
                    "Timeout waiting for {} handler(s) to complete after {:.1}s",
                    active,
                    timeout.as_secs_f64()
                );
                return false;
            }
            log_debug!("Waiting for {} handler(s) to complete...", active);
            tokio::time::sleep(remaining.map_or(DRAIN_POLL_INTERVAL, |r| r.min(DRAIN_POLL_INTERVAL))).await;
        }
    }
}

/// Counts its handler out on drop, including on error or panic.
#[derive(Debug)]
pub struct InFlightGuard {
    gate: InFlightGate,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut state = self.gate.lock();
        debug_assert!(state.in_flight > 0, "in-flight counter underflow");
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

/// Handlers in registration order; the first that supports an action wins.
#[derive(Debug, Default)]
pub struct Dispatcher {
    handlers: RwLock<Vec<Arc<dyn CommandHandler>>>,
    gate: InFlightGate,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_handler(&self, handler: Arc<dyn CommandHandler>) {
        log_info!(
            "Registered handler {} for actions: {:?}",
            handler.name(),
            handler.supported_actions()
        );
        self.handlers
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(handler);
    }

    pub fn handler_count(&self) -> usize {
        self.handlers.read().map(|h| h.len()).unwrap_or(0)
    }

    pub fn gate(&self) -> &InFlightGate {
        &self.gate
    }

    fn find_handler(&self, action: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .iter()
            .find(|handler| handler.can_handle(action))
            .cloned()
    }

    /// Route one inbound message. Never fails; every problem is logged and reported
    /// through the outcome.
    pub async fn dispatch(&self, topic: &str, payload: &[u8]) -> DispatchOutcome {
        if self.gate.is_shutting_down() {
            log_debug!("Ignoring message on {} - shutting down", topic);
            return DispatchOutcome::ShuttingDown;
        }

        let envelope = match CommandEnvelope::parse(payload) {
            Ok(envelope) => envelope,
            Err(reason) => {
                log_error!("Dropping message on {}: {}", topic, reason);
                return DispatchOutcome::Malformed;
            }
        };
        log_debug!("Received '{}' on {}", envelope.action, topic);

        let Some(handler) = self.find_handler(&envelope.action) else {
            log_warn!("No handler found for action: {}", envelope.action);
            return DispatchOutcome::NoHandler;
        };

        // Shutdown may have begun since the first check
        let Some(guard) = self.gate.try_enter() else {
            log_info!("Shutdown initiated - not processing '{}'", envelope.action);
            return DispatchOutcome::ShuttingDown;
        };

        log_info!("Processing '{}' with {}", envelope.action, handler.name());
        let result = handler.handle(&envelope.action, &envelope.data).await;
        drop(guard);

        match result {
            Ok(()) => DispatchOutcome::Handled,
            Err(e) => {
                log_error!("Handler {} failed to process '{}': {}", handler.name(), envelope.action, e);
                DispatchOutcome::HandlerFailed
            }
        }
    }
}

// src/handlers/system.rs
//! System commands that change how the runtime behaves.

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::HandlerError;
use crate::handlers::CommandHandler;
use crate::state::AppState;

pub const ENTER_CONTINUOUS_MODE: &str = "enter_continuous_mode";

#[derive(Debug, Clone)]
pub struct SystemHandler {
    state: AppState,
}

impl SystemHandler {
    pub fn new(state: AppState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl CommandHandler for SystemHandler {
    fn name(&self) -> &str {
        "SystemHandler"
    }

    fn supported_actions(&self) -> &[&'static str] {
        &[ENTER_CONTINUOUS_MODE]
    }

    async fn handle(&self, action: &str, _data: &Map<String, Value>) -> Result<(), HandlerError> {
        match action {
            ENTER_CONTINUOUS_MODE => {
                self.state.enter_continuous_mode();
                Ok(())
            }
            other => Err(HandlerError::InvalidData(format!("Unsupported action: {}", other))),
        }
    }
}

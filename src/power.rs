// src/power.rs
//! Host power control.

use async_trait::async_trait;
use std::fmt::Debug;
use std::io::ErrorKind;
use tokio::process::Command;

use crate::error::{FrameError, Result};
use crate::log_info;

/// Shown to the operator when the power-off command is refused
pub const SUDOERS_HINT: &str = "Make sure the user has passwordless sudo for shutdown. \
Add to /etc/sudoers.d/frame-runtime: <user> ALL=(ALL) NOPASSWD: /sbin/shutdown";

#[async_trait]
pub trait PowerControl: Send + Sync + Debug {
    async fn power_off(&self) -> Result<()>;
}

/// Powers the host off with an external command, `sudo shutdown -h now` by default.
#[derive(Debug, Clone)]
pub struct SystemPower {
    program: String,
    args: Vec<String>,
}

impl SystemPower {
    pub fn new() -> Self {
        Self::with_command("sudo", &["shutdown", "-h", "now"])
    }

    pub fn with_command(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|arg| arg.to_string()).collect(),
        }
    }
}

impl Default for SystemPower {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PowerControl for SystemPower {
    async fn power_off(&self) -> Result<()> {
        log_info!("Initiating system shutdown: {} {}", self.program, self.args.join(" "));
        let status = Command::new(&self.program)
            .args(&self.args)
            .status()
            .await
            .map_err(|e| match e.kind() {
                ErrorKind::NotFound => FrameError::PowerOff("shutdown command not found".to_string()),
                _ => FrameError::PowerOff(format!("Failed to run shutdown command: {}", e)),
            })?;

        if !status.success() {
            return Err(FrameError::PowerOff(format!(
                "Failed to shutdown system ({}). {}",
                status, SUDOERS_HINT
            )));
        }
        Ok(())
    }
}

// src/error.rs
use std::path::PathBuf;
use thiserror::Error;

/// Failures talking to the power peripheral over its line protocol.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Pisugar socket not found at {0}. Is pisugar-server running?")]
    SocketNotFound(PathBuf),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Timeout waiting for Pisugar response to: {0}")]
    Timeout(String),
}

#[derive(Error, Debug)]
pub enum DisplayError {
    #[error("Display not initialized. Call init() first.")]
    NotInitialized,

    #[error("Device error: {0}")]
    Device(String),
}

/// Raised by a registered handler while processing a command.
#[derive(Error, Debug)]
pub enum HandlerError {
    #[error("Invalid message data: {0}")]
    InvalidData(String),

    #[error("Failed to fetch image: {0}")]
    Fetch(String),

    #[error("Failed to decode image: {0}")]
    Decode(String),

    #[error("Display error: {0}")]
    Display(#[from] DisplayError),

    #[error("Publish error: {0}")]
    Publish(String),
}

#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Handler error: {0}")]
    Handler(#[from] HandlerError),

    #[error("Power-off error: {0}")]
    PowerOff(String),

    #[error("Display error: {0}")]
    Display(#[from] DisplayError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl From<rumqttc::ClientError> for FrameError {
    fn from(error: rumqttc::ClientError) -> Self {
        FrameError::Transport(error.to_string())
    }
}

pub type Result<T> = std::result::Result<T, FrameError>;

pub mod app;
pub mod config;
pub mod display;
pub mod error;
pub mod handlers;
pub mod orchestrator;
pub mod power;
pub mod signals;
pub mod state;
pub mod util;

pub use config::Config;
pub use error::{FrameError, Result};
pub use orchestrator::{Orchestrator, OrchestratorSettings, RunOutcome};

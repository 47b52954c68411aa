// src/handlers/mod.rs
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::fmt::Debug;

use crate::error::HandlerError;

pub mod image;
pub mod system;

pub use image::ImageHandler;
pub use system::SystemHandler;

/// A unit of command-processing logic bound to a set of action names.
#[async_trait]
pub trait CommandHandler: Send + Sync + Debug {
    fn name(&self) -> &str;

    fn supported_actions(&self) -> &[&'static str];

    fn can_handle(&self, action: &str) -> bool {
        self.supported_actions().contains(&action)
    }

    async fn handle(&self, action: &str, data: &Map<String, Value>) -> Result<(), HandlerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct EchoHandler;

    #[async_trait]
    impl CommandHandler for EchoHandler {
        fn name(&self) -> &str {
            "EchoHandler"
        }

        fn supported_actions(&self) -> &[&'static str] {
            &["echo"]
        }

        async fn handle(&self, _action: &str, data: &Map<String, Value>) -> Result<(), HandlerError> {
            match data.get("text") {
                Some(Value::String(_)) => Ok(()),
                _ => Err(HandlerError::InvalidData("missing text".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_default_can_handle_uses_supported_actions() {
        let handler = EchoHandler;
        assert!(handler.can_handle("echo"));
        assert!(!handler.can_handle("Echo"));
        assert!(!handler.can_handle(""));

        let mut data = Map::new();
        assert!(handler.handle("echo", &data).await.is_err());
        data.insert("text".into(), Value::from("hi"));
        assert!(handler.handle("echo", &data).await.is_ok());
    }
}

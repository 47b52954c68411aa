// src/util/io/messenger.rs
//! Transport-agnostic messaging seams used by the orchestrator and handlers.

use async_trait::async_trait;
use rumqttc::QoS;
use std::fmt::Debug;
use std::time::Duration;

use crate::error::Result;
use crate::signals::ShutdownSignal;

/// Outbound half of a messaging session
#[async_trait]
pub trait Publish: Send + Sync + Debug {
    /// Publish raw bytes. Fails if the transport rejects the request.
    async fn publish_binary(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<()>;

    /// Publish a JSON document.
    async fn publish(&self, topic: &str, payload: &serde_json::Value, qos: QoS, retain: bool) -> Result<()> {
        let bytes = serde_json::to_vec(payload)?;
        self.publish_binary(topic, bytes, qos, retain).await
    }
}

/// Full session lifecycle: connect, receive, drain, disconnect
#[async_trait]
pub trait Messenger: Publish {
    /// Resolve once the broker has acknowledged the session. Safe to call again
    /// while already connected.
    async fn connect(&self) -> Result<()>;

    /// Keep receiving for `timeout`, then report how many messages matched a handler.
    async fn run_once(&self, timeout: Duration) -> usize;

    /// Receive until `shutdown` fires, then disconnect.
    async fn run_forever(&self, shutdown: ShutdownSignal) -> Result<()>;

    /// Stop accepting work, drain running handlers, then close the session.
    /// Idempotent.
    async fn disconnect(&self);
}

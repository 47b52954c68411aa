// src/util/io/mqtt.rs
//! MQTT client - owns the broker session and feeds inbound commands to the dispatcher
//!
//! One background task polls the rumqttc event loop. Handlers run on that task, so
//! anything they publish goes through the non-blocking `try_*` request path.

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;

use crate::config::MqttConfig;
use crate::error::{FrameError, Result};
use crate::handlers::CommandHandler;
use crate::signals::{wait_for_interrupt, ShutdownSignal};
use crate::util::io::dispatch::Dispatcher;
use crate::util::io::messenger::{Messenger, Publish};
use crate::{log_debug, log_error, log_info, log_warn};

/// How long `connect` waits for the broker to acknowledge
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
/// How long the event loop gets to wind down after the disconnect request
pub const LOOP_STOP_TIMEOUT: Duration = Duration::from_secs(2);
/// Pause between reconnect attempts after a transport error
pub const RECONNECT_DELAY: Duration = Duration::from_secs(1);
const REQUEST_CHANNEL_CAPACITY: usize = 16;
/// Fixed header, topic length, and packet id of a PUBLISH
const PUBLISH_OVERHEAD: usize = 9;

type SharedClient = Arc<Mutex<Option<AsyncClient>>>;

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn publish_on(
    client: &SharedClient,
    max_packet_size: usize,
    topic: &str,
    payload: Vec<u8>,
    qos: QoS,
    retain: bool,
) -> Result<()> {
    let size = payload.len();
    let packet_size = size + topic.len() + PUBLISH_OVERHEAD;
    if packet_size > max_packet_size {
        return Err(FrameError::Transport(format!(
            "Publish to {} is {} bytes, over the {} byte packet limit",
            topic, packet_size, max_packet_size
        )));
    }
    let client = lock(client)
        .clone()
        .ok_or_else(|| FrameError::Transport("Not connected to MQTT broker".to_string()))?;
    client
        .try_publish(topic, qos, retain, payload)
        .map_err(|e| FrameError::Transport(format!("Failed to publish to {}: {}", topic, e)))?;
    log_debug!("Published {} bytes to {}", size, topic);
    Ok(())
}

/// Clonable outbound handle onto the client's live session.
///
/// Handed to handlers before the session exists; publishing before `connect`
/// fails with a transport error.
#[derive(Debug, Clone)]
pub struct MqttPublisher {
    client: SharedClient,
    max_packet_size: usize,
}

#[async_trait]
impl Publish for MqttPublisher {
    async fn publish_binary(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<()> {
        publish_on(&self.client, self.max_packet_size, topic, payload, qos, retain)
    }
}

#[derive(Debug)]
pub struct MqttClient {
    config: MqttConfig,
    client_id: String,
    connect_timeout: Duration,
    topics: RwLock<Vec<String>>,
    dispatcher: Arc<Dispatcher>,
    client: SharedClient,
    event_loop: Mutex<Option<JoinHandle<()>>>,
    connected: Arc<watch::Sender<bool>>,
    matched: Arc<AtomicUsize>,
    /// `matched` at the start of the current counting window
    window_start: AtomicUsize,
}

impl MqttClient {
    pub fn new(config: MqttConfig) -> Self {
        let client_id = config.client_id_or_generate();
        let (connected, _) = watch::channel(false);
        Self {
            topics: RwLock::new(config.topics.clone()),
            config,
            client_id,
            connect_timeout: CONNECT_TIMEOUT,
            dispatcher: Arc::new(Dispatcher::new()),
            client: Arc::new(Mutex::new(None)),
            event_loop: Mutex::new(None),
            connected: Arc::new(connected),
            matched: Arc::new(AtomicUsize::new(0)),
            window_start: AtomicUsize::new(0),
        }
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn register_handler(&self, handler: Arc<dyn CommandHandler>) {
        self.dispatcher.register_handler(handler);
    }

    /// Topics are subscribed on every broker acknowledgement; add them before `connect`.
    pub async fn add_topic(&self, topic: impl Into<String>) {
        let topic = topic.into();
        let mut topics = self.topics.write().await;
        if !topics.contains(&topic) {
            topics.push(topic);
        }
    }

    pub async fn topics(&self) -> Vec<String> {
        self.topics.read().await.clone()
    }

    pub fn publisher(&self) -> MqttPublisher {
        MqttPublisher {
            client: self.client.clone(),
            max_packet_size: self.config.max_packet_size,
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    fn options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(&self.client_id, &self.config.host, self.config.port);
        options.set_keep_alive(Duration::from_secs(self.config.keep_alive_secs));
        options.set_clean_session(false);
        options.set_max_packet_size(self.config.max_packet_size, self.config.max_packet_size);
        if let Some(username) = &self.config.username {
            options.set_credentials(username, self.config.password.clone().unwrap_or_default());
        }
        options
    }

    /// Start a session unless one is already being driven.
    async fn ensure_session(&self) {
        let running = lock(&self.event_loop)
            .as_ref()
            .map(|task| !task.is_finished())
            .unwrap_or(false);
        if running {
            return;
        }

        log_info!(
            "Connecting to MQTT broker at {}:{} as {}",
            self.config.host, self.config.port, self.client_id
        );
        let (client, event_loop) = AsyncClient::new(self.options(), REQUEST_CHANNEL_CAPACITY);
        *lock(&self.client) = Some(client.clone());
        // Queued session messages can arrive before the first wait window opens
        self.window_start.store(self.matched.load(Ordering::SeqCst), Ordering::SeqCst);

        let driver = EventLoopDriver {
            client,
            topics: self.topics().await,
            dispatcher: self.dispatcher.clone(),
            connected: self.connected.clone(),
            matched: self.matched.clone(),
        };
        *lock(&self.event_loop) = Some(tokio::spawn(driver.run(event_loop)));
    }
}

#[async_trait]
impl Publish for MqttClient {
    async fn publish_binary(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<()> {
        publish_on(&self.client, self.config.max_packet_size, topic, payload, qos, retain)
    }
}

#[async_trait]
impl Messenger for MqttClient {
    async fn connect(&self) -> Result<()> {
        if self.dispatcher.gate().is_shutting_down() {
            return Err(FrameError::Transport("Client is shutting down".to_string()));
        }
        if self.is_connected() {
            log_debug!("Already connected to MQTT broker");
            return Ok(());
        }

        self.ensure_session().await;

        let mut connected = self.connected.subscribe();
        let acknowledged = matches!(
            tokio::time::timeout(self.connect_timeout, connected.wait_for(|up| *up)).await,
            Ok(Ok(_))
        );
        if !acknowledged {
            return Err(FrameError::Transport(format!(
                "Failed to connect to MQTT broker at {}:{} within {:.1}s",
                self.config.host,
                self.config.port,
                self.connect_timeout.as_secs_f64()
            )));
        }
        log_info!("Successfully connected to MQTT broker");
        Ok(())
    }

    async fn run_once(&self, timeout: Duration) -> usize {
        log_info!("Waiting {:.1}s for messages...", timeout.as_secs_f64());
        tokio::time::sleep(timeout).await;
        let now = self.matched.load(Ordering::SeqCst);
        let before = self.window_start.swap(now, Ordering::SeqCst);
        let received = now.saturating_sub(before);
        log_info!("Received {} message(s)", received);
        received
    }

    async fn run_forever(&self, mut shutdown: ShutdownSignal) -> Result<()> {
        log_info!("Running in continuous mode - waiting for messages");
        let mut connected = self.connected.subscribe();
        loop {
            tokio::select! {
                _ = wait_for_interrupt(&mut shutdown) => {
                    log_info!("Received interrupt, stopping message loop");
                    break;
                }
                changed = connected.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    if *connected.borrow_and_update() {
                        log_info!("Connection to MQTT broker restored");
                    } else {
                        log_warn!("Connection to MQTT broker lost, waiting for reconnect");
                    }
                }
            }
        }
        self.disconnect().await;
        Ok(())
    }

    async fn disconnect(&self) {
        let gate = self.dispatcher.gate();
        if !gate.is_shutting_down() {
            log_info!("Disconnecting from MQTT broker");
        }
        gate.begin_shutdown();
        gate.wait_idle(self.config.shutdown_timeout()).await;

        let client = lock(&self.client).take();
        let task = lock(&self.event_loop).take();

        if let Some(client) = client {
            if let Err(e) = client.try_disconnect() {
                log_debug!("Disconnect request not queued: {}", e);
            }
        }
        if let Some(mut task) = task {
            if tokio::time::timeout(LOOP_STOP_TIMEOUT, &mut task).await.is_err() {
                log_warn!("MQTT event loop did not stop in time, aborting it");
                task.abort();
            }
            log_info!("Disconnected from MQTT broker");
        }
        self.connected.send_replace(false);
    }
}

/// State moved into the event loop task
struct EventLoopDriver {
    client: AsyncClient,
    topics: Vec<String>,
    dispatcher: Arc<Dispatcher>,
    connected: Arc<watch::Sender<bool>>,
    matched: Arc<AtomicUsize>,
}

impl EventLoopDriver {
    async fn run(self, mut event_loop: EventLoop) {
        loop {
            match event_loop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    log_info!("Connected to MQTT broker (session present: {})", ack.session_present);
                    self.connected.send_replace(true);
                    self.subscribe_all();
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    let outcome = self.dispatcher.dispatch(&publish.topic, &publish.payload).await;
                    if outcome.matched_handler() {
                        self.matched.fetch_add(1, Ordering::SeqCst);
                    }
                }
                Ok(Event::Incoming(Packet::Disconnect)) => {
                    log_warn!("Broker closed the MQTT session");
                    self.connected.send_replace(false);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    log_info!("Disconnected from MQTT broker cleanly");
                    self.connected.send_replace(false);
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    self.connected.send_replace(false);
                    if self.dispatcher.gate().is_shutting_down() {
                        log_debug!("MQTT event loop stopped during shutdown: {}", e);
                        break;
                    }
                    match e {
                        ConnectionError::ConnectionRefused(code) => {
                            log_error!("MQTT broker refused the connection: {:?}", code)
                        }
                        e => log_warn!("Unexpected disconnection from MQTT broker: {}", e),
                    }
                    tokio::time::sleep(RECONNECT_DELAY).await;
                }
            }
        }
    }

    fn subscribe_all(&self) {
        for topic in &self.topics {
            match self.client.try_subscribe(topic.as_str(), QoS::ExactlyOnce) {
                Ok(()) => log_info!("Subscribed to topic: {}", topic),
                Err(e) => log_error!("Failed to subscribe to {}: {}", topic, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(port: u16) -> MqttConfig {
        MqttConfig {
            host: "127.0.0.1".to_string(),
            port,
            client_id: Some("frame-test".to_string()),
            topics: vec!["frame/commands".to_string()],
            shutdown_timeout_secs: 1.0,
            ..MqttConfig::default()
        }
    }

    #[tokio::test]
    async fn test_add_topic_deduplicates() {
        let client = MqttClient::new(config(1883));
        client.add_topic("frame/commands").await;
        client.add_topic("frame/extra").await;
        assert_eq!(client.topics().await, vec!["frame/commands", "frame/extra"]);
        assert_eq!(client.client_id(), "frame-test");
    }

    #[tokio::test]
    async fn test_publish_without_session_fails() {
        let client = MqttClient::new(config(1883));
        let err = client
            .publish("frame/battery", &serde_json::json!({"x": 1}), QoS::AtLeastOnce, false)
            .await
            .unwrap_err();
        assert!(matches!(err, FrameError::Transport(_)));

        let publisher = client.publisher();
        assert!(publisher
            .publish_binary("frame/preview", vec![1, 2, 3], QoS::AtLeastOnce, true)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_oversized_publish_is_rejected_before_queueing() {
        let mut config = config(1883);
        config.max_packet_size = 2048;
        let client = MqttClient::new(config);

        let err = client
            .publisher()
            .publish_binary("frame/preview", vec![0; 4096], QoS::AtLeastOnce, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("packet limit"), "{}", err);

        // Within the limit it gets as far as the missing session
        let err = client
            .publish_binary("frame/preview", vec![0; 1024], QoS::AtLeastOnce, true)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("Not connected"), "{}", err);
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let client = MqttClient::new(config(1883));
        client.disconnect().await;
        client.disconnect().await;
        assert!(!client.is_connected());
        assert!(client.dispatcher().gate().is_shutting_down());
        assert!(client.connect().await.is_err());
    }

    #[tokio::test]
    async fn test_connect_times_out_without_broker() {
        // Bind then drop to get a port nothing listens on
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = MqttClient::new(config(port)).with_connect_timeout(Duration::from_millis(300));
        let err = client.connect().await.unwrap_err();
        assert!(matches!(err, FrameError::Transport(_)));
        client.disconnect().await;
    }
}

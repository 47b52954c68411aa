#![allow(dead_code)]

use async_trait::async_trait;
use frame_runtime::error::{FrameError, Result};
use frame_runtime::signals::ShutdownSignal;
use frame_runtime::util::io::{Dispatcher, Messenger, PisugarClient, PisugarEndpoint, Publish};
use frame_runtime::power::PowerControl;
use rumqttc::QoS;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixListener;

/// In-process peripheral on a Unix socket. Answers with `responder` and records
/// every command it receives.
pub struct StubPeripheral {
    pub client: PisugarClient,
    seen: Arc<Mutex<Vec<String>>>,
    _dir: tempfile::TempDir,
}

impl StubPeripheral {
    pub fn spawn<F>(responder: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("pisugar-server.sock");
        let listener = UnixListener::bind(&path).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();

        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let (read, mut write) = stream.into_split();
                let mut line = String::new();
                let _ = BufReader::new(read).read_line(&mut line).await;
                let command = line.trim_end().to_string();
                log.lock().unwrap().push(command.clone());
                let _ = write.write_all(responder(&command).as_bytes()).await;
            }
        });

        Self {
            client: PisugarClient::new(PisugarEndpoint::Unix(path)),
            seen,
            _dir: dir,
        }
    }

    /// A healthy PiSugar whose RTC runs at `offset`
    pub fn healthy(offset: &'static str) -> Self {
        Self::spawn(move |command| match command {
            "get battery" => "battery: 85%".to_string(),
            "get rtc_time" => format!("rtc_time: 2025-06-01T06:45:00.000{}", offset),
            "get rtc_alarm_enabled" => "rtc_alarm_enabled: true".to_string(),
            "get rtc_alarm_time" => format!("rtc_alarm_time: 2000-01-01T00:00:00.000{}", offset),
            _ => "done".to_string(),
        })
    }

    pub fn commands(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

/// Peripheral client pointed at a socket that does not exist
pub fn absent_peripheral(dir: &tempfile::TempDir) -> PisugarClient {
    PisugarClient::new(PisugarEndpoint::Unix(dir.path().join("missing.sock")))
}

/// Messenger that records calls and feeds queued payloads through a real
/// dispatcher during `run_once`.
#[derive(Debug, Default)]
pub struct StubMessenger {
    pub dispatcher: Dispatcher,
    inbound: Mutex<Vec<Vec<u8>>>,
    calls: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Vec<u8>, QoS, bool)>>,
    pub fail_connect: bool,
    pub hang_on_connect: bool,
}

impl StubMessenger {
    pub fn with_inbound(payloads: &[&[u8]]) -> Self {
        let stub = Self::default();
        *stub.inbound.lock().unwrap() = payloads.iter().map(|p| p.to_vec()).collect();
        stub
    }

    pub fn failing_connect() -> Self {
        Self { fail_connect: true, ..Self::default() }
    }

    pub fn hanging_connect() -> Self {
        Self { hang_on_connect: true, ..Self::default() }
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, call: &str) -> usize {
        self.calls().iter().filter(|c| c.as_str() == call).count()
    }

    pub fn published(&self) -> Vec<(String, Vec<u8>, QoS, bool)> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl Publish for StubMessenger {
    async fn publish_binary(&self, topic: &str, payload: Vec<u8>, qos: QoS, retain: bool) -> Result<()> {
        self.record(format!("publish:{}", topic));
        self.published
            .lock()
            .unwrap()
            .push((topic.to_string(), payload, qos, retain));
        Ok(())
    }
}

#[async_trait]
impl Messenger for StubMessenger {
    async fn connect(&self) -> Result<()> {
        self.record("connect");
        if self.hang_on_connect {
            std::future::pending::<()>().await;
        }
        if self.fail_connect {
            return Err(FrameError::Transport("broker unreachable".to_string()));
        }
        Ok(())
    }

    async fn run_once(&self, timeout: Duration) -> usize {
        self.record("run_once");
        let payloads: Vec<Vec<u8>> = self.inbound.lock().unwrap().drain(..).collect();
        let mut matched = 0;
        for payload in payloads {
            if self.dispatcher.dispatch("frame/commands", &payload).await.matched_handler() {
                matched += 1;
            }
        }
        tokio::time::sleep(timeout).await;
        matched
    }

    async fn run_forever(&self, _shutdown: ShutdownSignal) -> Result<()> {
        self.record("run_forever");
        self.disconnect().await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.record("disconnect");
        self.dispatcher.gate().begin_shutdown();
    }
}

/// Counts power-off requests instead of powering anything off
#[derive(Debug, Default)]
pub struct RecordingPower {
    pub calls: AtomicUsize,
    pub refuse: bool,
}

impl RecordingPower {
    pub fn refusing() -> Self {
        Self { calls: AtomicUsize::new(0), refuse: true }
    }

    pub fn count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PowerControl for RecordingPower {
    async fn power_off(&self) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            Err(FrameError::PowerOff("Failed to shutdown system (exit status: 1)".to_string()))
        } else {
            Ok(())
        }
    }
}

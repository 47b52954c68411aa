// src/util/io/pisugar.rs
//! Pisugar Client - line protocol for the power manager's battery gauge and RTC alarm
//!
//! Every command opens a fresh connection, writes one newline-terminated line,
//! reads until the server goes idle or closes, then closes. The server keeps no
//! session state, so nothing is pooled.

use chrono::NaiveDateTime;
use regex::Regex;
use std::path::PathBuf;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::config::PisugarConfig;
use crate::error::ProtocolError;
use crate::{log_debug, log_error, log_info, log_warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Silence on the socket for this long means the response is complete
const READ_IDLE_TIMEOUT: Duration = Duration::from_secs(1);
const READ_CHUNK: usize = 1024;

/// All seven weekdays
pub const REPEAT_EVERY_DAY: u8 = 0b111_1111;
const DEFAULT_OFFSET: &str = "+00:00";

static OFFSET_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"([+-]\d{2}:\d{2})").expect("offset pattern is valid"));

/// When the peripheral should wake the host.
///
/// The RTC keeps only time-of-day plus a weekday mask; the date part of
/// `wake_time` is sent but not stored, so it does not round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WakeSchedule {
    pub wake_time: NaiveDateTime,
    pub repeat_mask: u8,
}

impl WakeSchedule {
    pub fn daily(wake_time: NaiveDateTime) -> Self {
        Self {
            wake_time,
            repeat_mask: REPEAT_EVERY_DAY,
        }
    }

    /// Bit 0 is Sunday. Bits above the seventh are dropped.
    pub fn with_repeat(wake_time: NaiveDateTime, repeat_mask: u8) -> Self {
        if repeat_mask > REPEAT_EVERY_DAY {
            log_warn!("Repeat mask {:#010b} has bits above the weekday range, masking", repeat_mask);
        }
        Self {
            wake_time,
            repeat_mask: repeat_mask & REPEAT_EVERY_DAY,
        }
    }

    /// `rtc_alarm_set` argument list, with the time rendered in `offset`
    fn to_command(&self, offset: &str) -> String {
        format!(
            "rtc_alarm_set {}{} {}",
            self.wake_time.format("%Y-%m-%dT%H:%M:%S"),
            offset,
            self.repeat_mask
        )
    }
}

/// Where pisugar-server listens. Exactly one is used per client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PisugarEndpoint {
    Unix(PathBuf),
    Tcp { host: String, port: u16 },
}

impl std::fmt::Display for PisugarEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PisugarEndpoint::Unix(path) => write!(f, "unix:{}", path.display()),
            PisugarEndpoint::Tcp { host, port } => write!(f, "tcp:{}:{}", host, port),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PisugarClient {
    endpoint: PisugarEndpoint,
}

impl PisugarClient {
    pub fn new(endpoint: PisugarEndpoint) -> Self {
        Self { endpoint }
    }

    pub fn from_config(config: &PisugarConfig) -> Self {
        let endpoint = if config.use_tcp {
            PisugarEndpoint::Tcp {
                host: config.tcp_host.clone(),
                port: config.tcp_port,
            }
        } else {
            PisugarEndpoint::Unix(config.socket_path.clone())
        };
        Self::new(endpoint)
    }

    pub fn endpoint(&self) -> &PisugarEndpoint {
        &self.endpoint
    }

    /// One full connect/send/receive/close cycle. Returns the trimmed response.
    pub async fn send_command(&self, command: &str) -> Result<String, ProtocolError> {
        log_debug!("Sending command to Pisugar via {}: {}", self.endpoint, command);

        let response = match &self.endpoint {
            PisugarEndpoint::Unix(path) => send_unix(path, command).await?,
            PisugarEndpoint::Tcp { host, port } => {
                let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect((host.as_str(), *port)))
                    .await
                    .map_err(|_| ProtocolError::Timeout(command.to_string()))?
                    .map_err(|e| match e.kind() {
                        std::io::ErrorKind::ConnectionRefused => ProtocolError::Connection(format!(
                            "Connection refused to Pisugar at {}:{}. Is pisugar-server running?",
                            host, port
                        )),
                        _ => ProtocolError::Connection(format!(
                            "Failed to communicate with Pisugar: {}",
                            e
                        )),
                    })?;
                exchange(stream, command).await?
            }
        };

        log_debug!("Pisugar response: {}", response);
        Ok(response)
    }

    /// Battery percentage, or `None` on any transport or parse failure.
    pub async fn get_battery_level(&self) -> Option<f64> {
        match self.send_command("get battery").await {
            Ok(response) => {
                let level = parse_battery_level(&response);
                if level.is_none() {
                    log_warn!("Unexpected battery response: {}", response);
                }
                level
            }
            Err(e) => {
                log_error!("Failed to get battery level: {}", e);
                None
            }
        }
    }

    /// Arm the RTC alarm, rendering the wake time in the RTC's own UTC offset.
    pub async fn set_rtc_alarm(&self, schedule: &WakeSchedule) -> Result<(), ProtocolError> {
        let rtc_response = self.send_command("get rtc_time").await?;
        let offset = extract_offset(&rtc_response).unwrap_or_else(|| {
            log_warn!("No timezone offset in rtc_time response '{}', assuming {}", rtc_response, DEFAULT_OFFSET);
            DEFAULT_OFFSET.to_string()
        });

        log_info!(
            "Setting RTC alarm for {} (timezone: {})",
            schedule.wake_time.format("%H:%M:%S"),
            offset
        );
        let response = self.send_command(&schedule.to_command(&offset)).await?;

        // Checked by the caller via is_rtc_alarm_enabled()
        log_debug!("RTC alarm set response: {}", response);
        Ok(())
    }

    pub async fn is_rtc_alarm_enabled(&self) -> bool {
        match self.send_command("get rtc_alarm_enabled").await {
            Ok(response) => response.to_lowercase().contains("true"),
            Err(e) => {
                log_error!("Failed to check RTC alarm status: {}", e);
                false
            }
        }
    }

    /// Configured alarm as ISO8601. The date part is meaningless (see [`WakeSchedule`]).
    pub async fn get_rtc_alarm_time(&self) -> Option<String> {
        match self.send_command("get rtc_alarm_time").await {
            Ok(response) => parse_keyed_value(&response, "rtc_alarm_time"),
            Err(e) => {
                log_error!("Failed to get RTC alarm time: {}", e);
                None
            }
        }
    }

    pub async fn disable_rtc_alarm(&self) -> Result<(), ProtocolError> {
        log_info!("Disabling RTC alarm");
        self.send_command("rtc_alarm_disable").await?;
        Ok(())
    }

    /// Must run after an RTC wake, otherwise the next alarm will not fire.
    pub async fn clear_rtc_alarm_flag(&self) -> Result<(), ProtocolError> {
        log_info!("Clearing RTC alarm flag");
        let response = self.send_command("rtc_clear_flag").await?;
        log_debug!("Clear alarm flag response: {}", response);
        Ok(())
    }

    /// Copy the battery-backed RTC time into the system clock.
    pub async fn sync_time_from_rtc(&self) -> Result<(), ProtocolError> {
        log_info!("Syncing system time from Pisugar RTC");
        let response = self.send_command("rtc_rtc2pi").await?;
        log_debug!("Time sync response: {}", response);
        log_info!(
            "System time synced from RTC: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        Ok(())
    }
}

#[cfg(unix)]
async fn send_unix(path: &std::path::Path, command: &str) -> Result<String, ProtocolError> {
    let stream = timeout(CONNECT_TIMEOUT, tokio::net::UnixStream::connect(path))
        .await
        .map_err(|_| ProtocolError::Timeout(command.to_string()))?
        .map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ProtocolError::SocketNotFound(path.to_path_buf()),
            std::io::ErrorKind::ConnectionRefused => ProtocolError::Connection(
                "Connection refused to Pisugar socket. Is pisugar-server running?".to_string(),
            ),
            _ => ProtocolError::Connection(format!("Failed to communicate with Pisugar: {}", e)),
        })?;
    exchange(stream, command).await
}

#[cfg(not(unix))]
async fn send_unix(path: &std::path::Path, _command: &str) -> Result<String, ProtocolError> {
    Err(ProtocolError::Connection(format!(
        "Unix sockets are not available on this platform ({})",
        path.display()
    )))
}

async fn exchange<S>(mut stream: S, command: &str) -> Result<String, ProtocolError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let line = format!("{}\n", command);
    timeout(CONNECT_TIMEOUT, stream.write_all(line.as_bytes()))
        .await
        .map_err(|_| ProtocolError::Timeout(command.to_string()))?
        .map_err(|e| ProtocolError::Connection(format!("Failed to communicate with Pisugar: {}", e)))?;

    let mut response = Vec::new();
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        match timeout(READ_IDLE_TIMEOUT, stream.read(&mut chunk)).await {
            // Peer closed
            Ok(Ok(0)) => break,
            Ok(Ok(n)) => response.extend_from_slice(&chunk[..n]),
            Ok(Err(e)) => {
                return Err(ProtocolError::Connection(format!(
                    "Failed to communicate with Pisugar: {}",
                    e
                )))
            }
            // Idle: no more data
            Err(_) => break,
        }
    }

    let _ = stream.shutdown().await;
    Ok(String::from_utf8_lossy(&response).trim().to_string())
}

/// Scan every line for `battery:` and parse the number after it, `%` optional.
pub fn parse_battery_level(response: &str) -> Option<f64> {
    let line = response
        .lines()
        .find(|line| line.to_lowercase().contains("battery:"))?;
    let value = line.split(':').nth(1)?;
    value.trim().trim_end_matches('%').trim().parse().ok()
}

/// First `±HH:MM` token in the response
pub fn extract_offset(response: &str) -> Option<String> {
    OFFSET_PATTERN
        .captures(response)
        .and_then(|captures| captures.get(1))
        .map(|m| m.as_str().to_string())
}

/// Value after the first `:` on the line that carries `key`.
///
/// Scans all lines; older firmware answered on a single line, which this also accepts.
pub fn parse_keyed_value(response: &str, key: &str) -> Option<String> {
    let key = format!("{}:", key.to_lowercase());
    let line = response
        .lines()
        .find(|line| line.to_lowercase().contains(&key))?;
    let (_, value) = line.split_once(':')?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

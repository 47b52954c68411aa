mod common;

use common::{absent_peripheral, RecordingPower, StubMessenger, StubPeripheral};
use frame_runtime::display::{self, MockDisplay, SharedDisplay};
use frame_runtime::handlers::SystemHandler;
use frame_runtime::orchestrator::{Orchestrator, OrchestratorSettings, RunOutcome};
use frame_runtime::signals;
use frame_runtime::state::AppState;
use frame_runtime::util::io::PisugarClient;
use frame_runtime::FrameError;
use rumqttc::QoS;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn settings(battery_mode: bool, wait: Duration) -> OrchestratorSettings {
    OrchestratorSettings {
        battery_mode,
        wake_interval_minutes: 15,
        message_wait_timeout: wait,
        shutdown_after_display: true,
        battery_topic: "frame/battery".to_string(),
    }
}

fn mock_display() -> SharedDisplay {
    display::shared(Box::new(MockDisplay::new("7in3e", 800, 480)))
}

fn display_initialized(display: &SharedDisplay) -> bool {
    display.lock().unwrap().is_initialized()
}

struct Harness {
    orchestrator: Orchestrator,
    messenger: Arc<StubMessenger>,
    power: Arc<RecordingPower>,
    display: SharedDisplay,
    state: AppState,
}

fn harness(
    settings: OrchestratorSettings,
    messenger: StubMessenger,
    pisugar: PisugarClient,
    power: RecordingPower,
) -> Harness {
    let state = AppState::new();
    let display = mock_display();
    let messenger = Arc::new(messenger);
    let power = Arc::new(power);
    messenger
        .dispatcher
        .register_handler(Arc::new(SystemHandler::new(state.clone())));

    let orchestrator = Orchestrator::new(
        settings,
        state.clone(),
        display.clone(),
        messenger.clone(),
        pisugar,
        power.clone(),
    );
    Harness { orchestrator, messenger, power, display, state }
}

#[tokio::test]
async fn test_continuous_mode_cancels_power_off() {
    let peripheral = StubPeripheral::healthy("+11:00");
    let h = harness(
        settings(true, Duration::from_millis(200)),
        StubMessenger::with_inbound(&[br#"{"action":"enter_continuous_mode"}"#]),
        peripheral.client.clone(),
        RecordingPower::default(),
    );
    let (_tx, interrupt) = signals::manual();

    let outcome = h.orchestrator.run(interrupt).await.unwrap();

    assert_eq!(outcome, RunOutcome::Stopped);
    assert!(h.state.is_continuous_mode());
    assert_eq!(h.power.count(), 0);
    assert!(!peripheral.commands().iter().any(|c| c.starts_with("rtc_alarm_set")));

    // Reconnect, then the forever loop
    assert_eq!(h.messenger.count("connect"), 2);
    assert_eq!(h.messenger.count("run_forever"), 1);
    let calls = h.messenger.calls();
    let run_once = calls.iter().position(|c| c == "run_once").unwrap();
    let run_forever = calls.iter().position(|c| c == "run_forever").unwrap();
    assert!(run_once < run_forever);

    assert!(!display_initialized(&h.display));
}

#[tokio::test]
async fn test_battery_cycle_without_messages_powers_off() {
    let peripheral = StubPeripheral::healthy("+11:00");
    let h = harness(
        settings(true, Duration::from_secs(5)),
        StubMessenger::default(),
        peripheral.client.clone(),
        RecordingPower::default(),
    );
    let (_tx, interrupt) = signals::manual();

    let started = Instant::now();
    let outcome = h.orchestrator.run(interrupt).await.unwrap();
    let elapsed = started.elapsed();

    assert_eq!(outcome, RunOutcome::PoweredOff);
    assert!(elapsed >= Duration::from_secs(5));
    assert!(elapsed < Duration::from_secs(8), "cycle took {:?}", elapsed);

    // Battery report
    let published = h.messenger.published();
    assert_eq!(published.len(), 1);
    let (topic, payload, qos, retain) = &published[0];
    assert_eq!(topic, "frame/battery");
    assert_eq!(*qos, QoS::AtLeastOnce);
    assert!(!retain);
    let report: serde_json::Value = serde_json::from_slice(payload).unwrap();
    assert_eq!(report["battery_level"], 85.0);
    assert!(report["timestamp"].as_str().is_some());

    // Alarm carries the peripheral's offset and repeats daily
    let commands = peripheral.commands();
    let alarm = commands
        .iter()
        .find(|c| c.starts_with("rtc_alarm_set "))
        .expect("alarm was not set");
    assert!(alarm.ends_with("+11:00 127"), "unexpected alarm command: {}", alarm);
    assert!(commands.contains(&"rtc_clear_flag".to_string()));
    assert!(commands.contains(&"get rtc_alarm_enabled".to_string()));

    assert_eq!(h.power.count(), 1);
    assert_eq!(h.messenger.count("run_forever"), 0);
    assert_eq!(h.messenger.count("disconnect"), 1);
    assert!(!display_initialized(&h.display));
}

#[tokio::test]
async fn test_peripheral_outage_does_not_block_power_off() {
    let dir = tempfile::TempDir::new().unwrap();
    let h = harness(
        settings(true, Duration::from_millis(100)),
        StubMessenger::default(),
        absent_peripheral(&dir),
        RecordingPower::default(),
    );
    let (_tx, interrupt) = signals::manual();

    let outcome = h.orchestrator.run(interrupt).await.unwrap();

    assert_eq!(outcome, RunOutcome::PoweredOff);
    assert!(h.messenger.published().is_empty());
    assert_eq!(h.power.count(), 1);
}

#[tokio::test]
async fn test_refused_power_off_is_reported_not_fatal() {
    let peripheral = StubPeripheral::healthy("-05:00");
    let h = harness(
        settings(true, Duration::from_millis(100)),
        StubMessenger::default(),
        peripheral.client.clone(),
        RecordingPower::refusing(),
    );
    let (_tx, interrupt) = signals::manual();

    let outcome = h.orchestrator.run(interrupt).await.unwrap();

    assert_eq!(outcome, RunOutcome::PowerOffFailed);
    assert_eq!(h.power.count(), 1);
    assert!(peripheral
        .commands()
        .iter()
        .any(|c| c.starts_with("rtc_alarm_set ") && c.ends_with("-05:00 127")));
}

#[tokio::test]
async fn test_cycle_without_power_off() {
    let peripheral = StubPeripheral::healthy("+00:00");
    let mut settings = settings(true, Duration::from_millis(100));
    settings.shutdown_after_display = false;
    let h = harness(
        settings,
        StubMessenger::default(),
        peripheral.client.clone(),
        RecordingPower::default(),
    );
    let (_tx, interrupt) = signals::manual();

    let outcome = h.orchestrator.run(interrupt).await.unwrap();

    assert_eq!(outcome, RunOutcome::CycleComplete);
    assert_eq!(h.power.count(), 0);
    assert!(!peripheral.commands().iter().any(|c| c.starts_with("rtc_alarm_set")));
}

#[tokio::test]
async fn test_always_on_runs_forever_and_shuts_down_once() {
    let peripheral = StubPeripheral::healthy("+00:00");
    let h = harness(
        settings(false, Duration::from_secs(30)),
        StubMessenger::default(),
        peripheral.client.clone(),
        RecordingPower::default(),
    );
    let (_tx, interrupt) = signals::manual();

    let outcome = h.orchestrator.run(interrupt).await.unwrap();
    assert_eq!(outcome, RunOutcome::Stopped);
    assert_eq!(h.messenger.count("run_once"), 0);
    assert!(peripheral.commands().is_empty());

    // run_forever disconnected, shutdown disconnected again; a second shutdown is a no-op
    let disconnects = h.messenger.count("disconnect");
    h.orchestrator.shutdown().await;
    assert_eq!(h.messenger.count("disconnect"), disconnects);
    assert!(!display_initialized(&h.display));
}

#[tokio::test]
async fn test_connect_failure_is_fatal_but_still_shuts_down() {
    let peripheral = StubPeripheral::healthy("+00:00");
    let messenger = StubMessenger::failing_connect();
    let h = harness(
        settings(true, Duration::from_millis(100)),
        messenger,
        peripheral.client.clone(),
        RecordingPower::default(),
    );
    let (_tx, interrupt) = signals::manual();

    let err = h.orchestrator.run(interrupt).await.unwrap_err();

    assert!(matches!(err, FrameError::Transport(_)));
    assert_eq!(h.power.count(), 0);
    assert_eq!(h.messenger.count("run_once"), 0);
    assert_eq!(h.messenger.count("disconnect"), 1);
    // Initialized before the connect failed, so it was put to sleep
    assert!(!display_initialized(&h.display));
}

#[tokio::test]
async fn test_interrupt_during_startup() {
    let peripheral = StubPeripheral::healthy("+00:00");
    let messenger = StubMessenger::hanging_connect();
    let h = harness(
        settings(false, Duration::from_secs(30)),
        messenger,
        peripheral.client.clone(),
        RecordingPower::default(),
    );
    let (tx, interrupt) = signals::manual();

    let fire = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        tx.send_replace(true);
        tx
    });

    let outcome = tokio::time::timeout(Duration::from_secs(5), h.orchestrator.run(interrupt))
        .await
        .expect("run did not stop on interrupt")
        .unwrap();
    let _tx = fire.await.unwrap();

    assert_eq!(outcome, RunOutcome::Interrupted);
    assert_eq!(h.messenger.count("run_forever"), 0);
    assert_eq!(h.messenger.count("disconnect"), 1);
}

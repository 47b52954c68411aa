pub mod dispatch;
pub mod messenger;
pub mod mqtt;
pub mod pisugar;

pub use dispatch::{CommandEnvelope, DispatchOutcome, Dispatcher, InFlightGate};
pub use messenger::{Messenger, Publish};
pub use mqtt::{MqttClient, MqttPublisher};
pub use pisugar::{PisugarClient, PisugarEndpoint, WakeSchedule};

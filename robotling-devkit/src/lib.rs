/*!
# Robotling DevKit - stubs and fixtures for relay development

- `TelemetryBuilder`: raw snapshots shaped like the robotling firmware sends them
- `FakeBroker`: minimal MQTT 3.1.1 broker stub for tests without mosquitto
*/

pub mod broker_stub;
pub mod telemetry;

pub use broker_stub::FakeBroker;
pub use telemetry::{format_list, TelemetryBuilder};

//! Robotling telemetry relay
//!
//! Subscribes to a robotling's `<guid>/raw` MQTT topic, reshapes every nested
//! status snapshot into one fixed-width row and appends it to a SQLite table:
//!
//! ```text
//! BrokerLink -> Mailbox -> flatten -> TopicResolver -> expand -> RowAssembler -> StatusStore
//! ```

pub mod config;
pub mod driver;
pub mod expand;
pub mod flatten;
pub mod link;
pub mod mailbox;
pub mod row;
pub mod snapshot;
pub mod state;
pub mod store;
pub mod topics;

pub use config::RelayConfig;
pub use driver::{CycleOutcome, DriverState, Relay, RelayStats};
pub use expand::Cell;
pub use link::{BrokerLink, LinkError};
pub use mailbox::{Mailbox, SnapshotSource};
pub use row::{AssembleError, ColumnMapping, RowAssembler, StatusRow};
pub use snapshot::{DecodeError, Snapshot};
pub use state::ConnectionState;
pub use store::{StatusStore, StoreError};
pub use topics::{StatusTopic, TopicResolver, ROW_WIDTH, SCHEMA};

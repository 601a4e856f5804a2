//! Driver loop: connect, poll the mailbox, assemble and store
//!
//! ```text
//! NotConnected --connect ok--> ConnectedIdle --fresh snapshot--> ConnectedProcessing
//!      ^   |                       |   ^                                 |
//!      |   +--refused, backoff-----+   +-----------assembled/stored------+
//!      +--------disconnect---------+
//! ```

use crate::link::BrokerLink;
use crate::mailbox::SnapshotSource;
use crate::row::RowAssembler;
use crate::state::ConnectionState;
use crate::store::StatusStore;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, sleep, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    NotConnected,
    ConnectedIdle,
    ConnectedProcessing,
}

/// Result of one poll tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Nothing fresh (or the pending payload was unreadable)
    Idle,
    Stored,
    /// Snapshot did not fit the schema or held a malformed value
    Rejected,
    StoreFailed,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RelayStats {
    pub stored: u64,
    pub rejected: u64,
    pub store_failures: u64,
}

pub struct Relay {
    assembler: RowAssembler,
    store: StatusStore,
    poll_interval: Duration,
    reconnect_backoff: Duration,
    state: DriverState,
    stats: RelayStats,
}

impl Relay {
    pub fn new(
        assembler: RowAssembler,
        store: StatusStore,
        poll_interval: Duration,
        reconnect_backoff: Duration,
    ) -> Self {
        Self {
            assembler,
            store,
            poll_interval,
            reconnect_backoff,
            state: DriverState::NotConnected,
            stats: RelayStats::default(),
        }
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn store(&self) -> &StatusStore {
        &self.store
    }

    /// Claim at most one snapshot and push it through the pipeline
    pub fn poll_once(&mut self, source: &impl SnapshotSource) -> CycleOutcome {
        let Some(snapshot) = source.take_snapshot() else {
            return CycleOutcome::Idle;
        };

        self.state = DriverState::ConnectedProcessing;
        let outcome = match self.assembler.assemble(&snapshot) {
            Err(e) => {
                self.stats.rejected += 1;
                warn!(error = %e, "snapshot dropped");
                CycleOutcome::Rejected
            }
            Ok(row) => match self.store.append(&row) {
                Ok(()) => {
                    self.stats.stored += 1;
                    debug!(table = %self.store.table(), "status row stored");
                    CycleOutcome::Stored
                }
                Err(e) => {
                    self.stats.store_failures += 1;
                    error!(error = %e, "status row lost");
                    CycleOutcome::StoreFailed
                }
            },
        };
        self.state = DriverState::ConnectedIdle;
        outcome
    }

    /// Run until `shutdown` resolves, then close the broker session
    pub async fn run(mut self, mut link: BrokerLink, shutdown: impl Future<Output = ()>) -> RelayStats {
        tokio::pin!(shutdown);
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("shutdown requested");
                    break;
                }
                _ = ticker.tick() => {}
            }

            if self.state != DriverState::NotConnected && link.state() != ConnectionState::Connected {
                warn!(broker = %link.broker(), "lost broker connection");
                self.state = DriverState::NotConnected;
            }

            match self.state {
                DriverState::NotConnected => {
                    info!(broker = %link.broker(), "trying to connect");
                    match link.connect().await {
                        Ok(()) => self.state = DriverState::ConnectedIdle,
                        Err(e) => {
                            warn!(error = %e, retry_in = ?self.reconnect_backoff, "connect failed");
                            tokio::select! {
                                _ = &mut shutdown => {
                                    info!("shutdown requested");
                                    break;
                                }
                                _ = sleep(self.reconnect_backoff) => {}
                            }
                        }
                    }
                }
                DriverState::ConnectedIdle | DriverState::ConnectedProcessing => {
                    self.poll_once(&link);
                }
            }
        }

        link.close().await;
        let link_stats = link.stats();
        info!(
            stored = self.stats.stored,
            rejected = self.stats.rejected,
            store_failures = self.stats.store_failures,
            received = link_stats.received(),
            coalesced = link_stats.coalesced(),
            decode_failures = link_stats.decode_failures(),
            reconnects = link_stats.reconnects(),
            "relay stopped"
        );
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MqttConf;
    use crate::mailbox::Mailbox;
    use crate::row::ColumnMapping;
    use crate::state::LinkStats;
    use crate::topics::TopicResolver;
    use std::sync::Arc;

    const FULL: &str = r#"{"power":{"motor_load":"[5, 7]","battery_V":7.4},"sensor":{"compass":{"pitch_deg":1,"heading_deg":2,"roll_deg":3},"distance_cm":"[10, 11, 12]"},"state":"RUN","timestamp_s":100}"#;

    fn relay() -> Relay {
        let store = StatusStore::open_in_memory("rob").unwrap();
        store.create_table_if_missing().unwrap();
        Relay::new(
            RowAssembler::new(TopicResolver::new("robotling_X"), ColumnMapping::Positional),
            store,
            Duration::from_millis(10),
            Duration::from_millis(10),
        )
    }

    fn mailbox() -> Mailbox {
        Mailbox::new(Arc::new(LinkStats::default()))
    }

    #[test]
    fn test_cycle_outcomes() {
        let mut relay = relay();
        let mb = mailbox();
        assert_eq!(relay.poll_once(&mb), CycleOutcome::Idle);

        mb.deliver(FULL.as_bytes()).unwrap();
        assert_eq!(relay.poll_once(&mb), CycleOutcome::Stored);
        assert_eq!(relay.state(), DriverState::ConnectedIdle);

        mb.deliver(br#"{"state": "RUN"}"#).unwrap();
        assert_eq!(relay.poll_once(&mb), CycleOutcome::Rejected);

        mb.deliver(b"not json").unwrap();
        assert_eq!(relay.poll_once(&mb), CycleOutcome::Idle);

        assert_eq!(relay.store().count().unwrap(), 1);
        assert_eq!(
            relay.stats(),
            RelayStats {
                stored: 1,
                rejected: 1,
                store_failures: 0
            }
        );
    }

    #[test]
    fn test_store_failure_does_not_stop_relay() {
        let store = StatusStore::open_in_memory("missing_table").unwrap();
        let mut relay = Relay::new(
            RowAssembler::new(TopicResolver::new("robotling_X"), ColumnMapping::Positional),
            store,
            Duration::from_millis(10),
            Duration::from_millis(10),
        );
        let mb = mailbox();
        mb.deliver(FULL.as_bytes()).unwrap();
        assert_eq!(relay.poll_once(&mb), CycleOutcome::StoreFailed);
        mb.deliver(FULL.as_bytes()).unwrap();
        assert_eq!(relay.poll_once(&mb), CycleOutcome::StoreFailed);
        assert_eq!(relay.stats().store_failures, 2);
    }

    #[tokio::test]
    async fn test_run_retries_until_shutdown() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let conf = MqttConf {
            host: "127.0.0.1".into(),
            port,
            keep_alive_secs: 5,
            client_id: Some("relay-test".into()),
            connect_timeout_ms: 500,
            ..MqttConf::default()
        };
        let link = BrokerLink::new(&conf, "robotling_X/raw");
        let stats = relay()
            .run(link, sleep(Duration::from_millis(150)))
            .await;
        assert_eq!(stats, RelayStats::default());
    }
}

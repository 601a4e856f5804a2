//! MQTT session to the broker the robotling publishes to
//!
//! `connect()` performs the CONNECT/CONNACK handshake (bounded by the connect
//! timeout), subscribes to `<root>/raw` and hands the rumqttc event loop to a
//! delivery task. That task writes every inbound snapshot into the [`Mailbox`]
//! and flips the state back to `Disconnected` when the session ends; the driver
//! notices and calls `connect()` again.

use crate::config::MqttConf;
use crate::mailbox::{Mailbox, SnapshotSource};
use crate::snapshot::Snapshot;
use crate::state::{new_state, ConnectionState, LinkStats, Shared};
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, Incoming, MqttOptions, Outgoing, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, info, warn};

const REQUEST_CAPACITY: usize = 10;
const CLOSE_GRACE: Duration = Duration::from_secs(1);

#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    #[error("broker {broker} refused connection: {reason}")]
    ConnectionRefused { broker: String, reason: String },
    #[error("broker {broker} did not answer within {timeout:?}")]
    ConnectTimeout { broker: String, timeout: Duration },
    #[error("subscribe to {topic} failed: {source}")]
    Subscribe {
        topic: String,
        #[source]
        source: rumqttc::ClientError,
    },
}

struct Session {
    client: AsyncClient,
    delivery: JoinHandle<()>,
}

pub struct BrokerLink {
    options: MqttOptions,
    broker: String,
    raw_topic: String,
    connect_timeout: Duration,
    state: Shared<ConnectionState>,
    mailbox: Mailbox,
    stats: Arc<LinkStats>,
    session: Option<Session>,
}

impl BrokerLink {
    pub fn new(conf: &MqttConf, raw_topic: impl Into<String>) -> Self {
        let mut options = MqttOptions::new(conf.client_id(), &conf.host, conf.port);
        options.set_keep_alive(Duration::from_secs(conf.keep_alive_secs));
        options.set_clean_session(true);
        options.set_max_packet_size(conf.max_packet_bytes, conf.max_packet_bytes);

        let stats = Arc::new(LinkStats::default());
        Self {
            options,
            broker: format!("{}:{}", conf.host, conf.port),
            raw_topic: raw_topic.into(),
            connect_timeout: conf.connect_timeout(),
            state: new_state(ConnectionState::Disconnected),
            mailbox: Mailbox::new(stats.clone()),
            stats,
            session: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.lock()
    }

    pub fn broker(&self) -> &str {
        &self.broker
    }

    pub fn raw_topic(&self) -> &str {
        &self.raw_topic
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }

    /// Open a session and subscribe to the raw snapshot topic
    pub async fn connect(&mut self) -> Result<(), LinkError> {
        if let Some(stale) = self.session.take() {
            stale.delivery.abort();
        }
        *self.state.lock() = ConnectionState::Connecting;

        let (client, mut eventloop) = AsyncClient::new(self.options.clone(), REQUEST_CAPACITY);
        let handshake = timeout(self.connect_timeout, await_connack(&mut eventloop)).await;
        let refused = match handshake {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(LinkError::ConnectionRefused {
                broker: self.broker.clone(),
                reason: e.to_string(),
            }),
            Err(_) => Some(LinkError::ConnectTimeout {
                broker: self.broker.clone(),
                timeout: self.connect_timeout,
            }),
        };
        if let Some(err) = refused {
            *self.state.lock() = ConnectionState::Disconnected;
            return Err(err);
        }

        // queued here, sent by the delivery task's first poll
        if let Err(source) = client.subscribe(self.raw_topic.as_str(), QoS::AtMostOnce).await {
            *self.state.lock() = ConnectionState::Disconnected;
            return Err(LinkError::Subscribe {
                topic: self.raw_topic.clone(),
                source,
            });
        }

        *self.state.lock() = ConnectionState::Connected;
        self.stats.record_connection();
        info!(broker = %self.broker, topic = %self.raw_topic, "connected and subscribed");

        let delivery = tokio::spawn(run_delivery(
            eventloop,
            self.mailbox.clone(),
            self.state.clone(),
            self.raw_topic.clone(),
        ));
        self.session = Some(Session { client, delivery });
        Ok(())
    }

    /// Unsubscribe and close the session
    pub async fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        if self.state() == ConnectionState::Connected {
            if let Err(e) = session.client.unsubscribe(self.raw_topic.as_str()).await {
                warn!(error = %e, "unsubscribe failed");
            }
            if let Err(e) = session.client.disconnect().await {
                warn!(error = %e, "disconnect failed");
            }
        }
        if timeout(CLOSE_GRACE, &mut session.delivery).await.is_err() {
            session.delivery.abort();
        }
        *self.state.lock() = ConnectionState::Disconnected;
        info!(broker = %self.broker, "broker session closed");
    }

    /// Mailbox fed by the delivery task; exposed for diagnostics and tests
    pub fn mailbox(&self) -> &Mailbox {
        &self.mailbox
    }
}

impl SnapshotSource for BrokerLink {
    fn take_snapshot(&self) -> Option<Snapshot> {
        self.mailbox.take_snapshot()
    }
}

async fn await_connack(eventloop: &mut EventLoop) -> Result<(), ConnectionError> {
    loop {
        if let Event::Incoming(Incoming::ConnAck(_)) = eventloop.poll().await? {
            return Ok(());
        }
    }
}

/// Delivery context: polls the event loop until the session ends
async fn run_delivery(
    mut eventloop: EventLoop,
    mailbox: Mailbox,
    state: Shared<ConnectionState>,
    raw_topic: String,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Incoming::Publish(publish))) if publish.topic == raw_topic => {
                on_message(&mailbox, &publish.payload);
            }
            Ok(Event::Incoming(Incoming::Disconnect)) => {
                info!("broker closed the session");
                break;
            }
            Ok(Event::Outgoing(Outgoing::Disconnect)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "broker connection lost");
                break;
            }
        }
    }
    on_disconnect(&state);
}

fn on_message(mailbox: &Mailbox, payload: &[u8]) {
    match mailbox.deliver(payload) {
        Ok(true) => debug!(bytes = payload.len(), "snapshot replaced an unclaimed one"),
        Ok(false) => debug!(bytes = payload.len(), "snapshot received"),
        Err(e) => warn!(error = %e, "undecodable message dropped"),
    }
}

fn on_disconnect(state: &Shared<ConnectionState>) {
    *state.lock() = ConnectionState::Disconnected;
}

/*!
Fake MQTT broker for tests without a real broker

Speaks just enough MQTT 3.1.1 for one client at a time: answers CONNECT,
SUBSCRIBE, UNSUBSCRIBE and PINGREQ, records subscriptions, and lets the test
push PUBLISH packets (QoS 0) or cut the connection. Clients may reconnect.
*/

use bytes::BytesMut;
use rumqttc::mqttbytes::v4::{
    self, ConnAck, ConnectReturnCode, Packet, PingResp, Publish, SubAck, SubscribeReasonCode,
    UnsubAck,
};
use rumqttc::mqttbytes::{Error as CodecError, QoS};
use std::io;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Largest inbound packet the stub accepts
const MAX_PACKET: usize = 1024 * 1024;

enum Command {
    Publish { topic: String, payload: Vec<u8> },
    DropClient,
}

pub struct FakeBroker {
    addr: SocketAddr,
    commands: mpsc::UnboundedSender<Command>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<usize>>,
    task: JoinHandle<()>,
}

impl FakeBroker {
    /// Bind on an ephemeral localhost port and start serving
    pub async fn start() -> io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (commands, rx) = mpsc::unbounded_channel();
        let subscriptions = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(Mutex::new(0));
        let task = tokio::spawn(serve(listener, rx, subscriptions.clone(), connections.clone()));
        Ok(Self {
            addr,
            commands,
            subscriptions,
            connections,
            task,
        })
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Send a QoS 0 PUBLISH to the connected client
    pub fn publish(&self, topic: impl Into<String>, payload: impl Into<Vec<u8>>) {
        let _ = self.commands.send(Command::Publish {
            topic: topic.into(),
            payload: payload.into(),
        });
    }

    /// Close the client's socket without a DISCONNECT packet
    pub fn drop_client(&self) {
        let _ = self.commands.send(Command::DropClient);
    }

    /// Current subscriptions of the connected client
    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions.lock().unwrap().clone()
    }

    /// Number of CONNECT packets answered so far
    pub fn connections(&self) -> usize {
        *self.connections.lock().unwrap()
    }

    pub async fn wait_for_subscription(&self, topic: &str, timeout: Duration) -> bool {
        let start = std::time::Instant::now();
        while start.elapsed() < timeout {
            if self.subscriptions().iter().any(|t| t == topic) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn serve(
    listener: TcpListener,
    mut commands: mpsc::UnboundedReceiver<Command>,
    subscriptions: Arc<Mutex<Vec<String>>>,
    connections: Arc<Mutex<usize>>,
) {
    loop {
        let Ok((socket, peer)) = listener.accept().await else {
            return;
        };
        debug!(%peer, "fake broker: client connected");
        let (reader, writer) = socket.into_split();
        let (packets_tx, packets_rx) = mpsc::unbounded_channel();
        let reader_task = tokio::spawn(read_packets(reader, packets_tx));
        session(writer, packets_rx, &mut commands, &subscriptions, &connections).await;
        reader_task.abort();
        subscriptions.lock().unwrap().clear();
        debug!(%peer, "fake broker: client gone");
    }
}

async fn session(
    mut writer: OwnedWriteHalf,
    mut packets: mpsc::UnboundedReceiver<Packet>,
    commands: &mut mpsc::UnboundedReceiver<Command>,
    subscriptions: &Mutex<Vec<String>>,
    connections: &Mutex<usize>,
) {
    let mut out = BytesMut::new();
    loop {
        let written = tokio::select! {
            packet = packets.recv() => {
                let Some(packet) = packet else { return };
                match packet {
                    Packet::Connect(_) => {
                        *connections.lock().unwrap() += 1;
                        ConnAck::new(ConnectReturnCode::Success, false).write(&mut out)
                    }
                    Packet::Subscribe(subscribe) => {
                        let codes = subscribe
                            .filters
                            .iter()
                            .map(|f| SubscribeReasonCode::Success(f.qos))
                            .collect();
                        subscriptions
                            .lock()
                            .unwrap()
                            .extend(subscribe.filters.into_iter().map(|f| f.path));
                        SubAck::new(subscribe.pkid, codes).write(&mut out)
                    }
                    Packet::Unsubscribe(unsubscribe) => {
                        subscriptions
                            .lock()
                            .unwrap()
                            .retain(|t| !unsubscribe.topics.contains(t));
                        UnsubAck::new(unsubscribe.pkid).write(&mut out)
                    }
                    Packet::PingReq => PingResp.write(&mut out),
                    Packet::Disconnect => return,
                    _ => continue,
                }
            }
            command = commands.recv() => {
                match command {
                    Some(Command::Publish { topic, payload }) => {
                        Publish::new(topic, QoS::AtMostOnce, payload).write(&mut out)
                    }
                    Some(Command::DropClient) | None => return,
                }
            }
        };
        if let Err(e) = written {
            warn!(error = %e, "fake broker: cannot encode reply");
            return;
        }
        if writer.write_all(&out.split()).await.is_err() {
            return;
        }
    }
}

async fn read_packets(mut reader: OwnedReadHalf, packets: mpsc::UnboundedSender<Packet>) {
    let mut buf = BytesMut::with_capacity(4096);
    loop {
        match v4::read(&mut buf, MAX_PACKET) {
            Ok(packet) => {
                if packets.send(packet).is_err() {
                    return;
                }
            }
            Err(CodecError::InsufficientBytes(_)) => match reader.read_buf(&mut buf).await {
                Ok(0) | Err(_) => return,
                Ok(_) => {}
            },
            Err(e) => {
                warn!(error = %e, "fake broker: malformed packet from client");
                return;
            }
        }
    }
}

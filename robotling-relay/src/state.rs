use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

pub type Shared<T> = Arc<Mutex<T>>;

pub fn new_state<T>(value: T) -> Shared<T> {
    Arc::new(Mutex::new(value))
}

/// Broker session state, owned by `BrokerLink`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Counters shared between the delivery task and the driver
#[derive(Debug, Default)]
pub struct LinkStats {
    received: AtomicU64,
    coalesced: AtomicU64,
    decode_failures: AtomicU64,
    connections: AtomicU64,
}

impl LinkStats {
    pub fn record_received(&self, replaced_pending: bool) {
        self.received.fetch_add(1, Ordering::Relaxed);
        if replaced_pending {
            self.coalesced.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_decode_failure(&self) {
        self.decode_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    /// Messages written into the mailbox
    pub fn received(&self) -> u64 {
        self.received.load(Ordering::Relaxed)
    }

    /// Messages overwritten before the driver claimed them
    pub fn coalesced(&self) -> u64 {
        self.coalesced.load(Ordering::Relaxed)
    }

    pub fn decode_failures(&self) -> u64 {
        self.decode_failures.load(Ordering::Relaxed)
    }

    /// Successful broker sessions, the first one included
    pub fn connections(&self) -> u64 {
        self.connections.load(Ordering::Relaxed)
    }

    /// Sessions opened after the first one
    pub fn reconnects(&self) -> u64 {
        self.connections().saturating_sub(1)
    }
}

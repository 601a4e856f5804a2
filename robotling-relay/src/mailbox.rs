//! Single-slot handoff between the MQTT delivery task and the driver loop
//!
//! Not a queue: a delivery overwrites whatever the driver has not claimed yet,
//! so a burst of messages between two polls leaves only the newest one.

use crate::snapshot::{DecodeError, Snapshot};
use crate::state::{new_state, LinkStats, Shared};
use std::sync::Arc;
use tracing::warn;

/// Anything the driver can claim a fresh snapshot from
pub trait SnapshotSource {
    /// Claim the pending snapshot, if any. Malformed payloads count as no data.
    fn take_snapshot(&self) -> Option<Snapshot>;
}

#[derive(Clone)]
pub struct Mailbox {
    // `Some` means fresh; the driver clears it with `take`
    slot: Shared<Option<String>>,
    stats: Arc<LinkStats>,
}

impl Mailbox {
    pub fn new(stats: Arc<LinkStats>) -> Self {
        Self {
            slot: new_state(None),
            stats,
        }
    }

    /// Store a raw payload as the pending snapshot.
    /// Returns `true` when an unclaimed payload was overwritten.
    pub fn deliver(&self, payload: &[u8]) -> Result<bool, DecodeError> {
        let text = match std::str::from_utf8(payload) {
            Ok(text) => text.to_owned(),
            Err(e) => {
                self.stats.record_decode_failure();
                return Err(e.into());
            }
        };
        let replaced = self.slot.lock().replace(text).is_some();
        self.stats.record_received(replaced);
        Ok(replaced)
    }

    pub fn is_fresh(&self) -> bool {
        self.slot.lock().is_some()
    }

    /// Claim the pending payload text and clear freshness
    pub fn take_text(&self) -> Option<String> {
        self.slot.lock().take()
    }

    pub fn stats(&self) -> &LinkStats {
        &self.stats
    }
}

impl SnapshotSource for Mailbox {
    fn take_snapshot(&self) -> Option<Snapshot> {
        let text = self.take_text()?;
        if text.trim().is_empty() {
            return None;
        }
        // parsed outside the lock so deliveries never wait on it
        match Snapshot::parse(&text) {
            Ok(snapshot) => Some(snapshot),
            Err(e) => {
                self.stats.record_decode_failure();
                warn!(error = %e, bytes = text.len(), "corrupt snapshot dropped");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mailbox() -> Mailbox {
        Mailbox::new(Arc::new(LinkStats::default()))
    }

    #[test]
    fn test_newest_delivery_wins() {
        let mb = mailbox();
        assert!(!mb.deliver(br#"{"state": "first"}"#).unwrap());
        assert!(mb.deliver(br#"{"state": "second"}"#).unwrap());

        let snap = mb.take_snapshot().unwrap();
        assert_eq!(snap, Snapshot::parse(r#"{"state": "second"}"#).unwrap());
        assert!(mb.take_snapshot().is_none());
        assert_eq!(mb.stats().received(), 2);
        assert_eq!(mb.stats().coalesced(), 1);
    }

    #[test]
    fn test_non_utf8_payload_leaves_slot_untouched() {
        let mb = mailbox();
        mb.deliver(br#"{"state": "ok"}"#).unwrap();
        assert!(matches!(mb.deliver(&[0xff, 0xfe, 0x00]), Err(DecodeError::Utf8(_))));
        assert_eq!(mb.take_snapshot(), Some(Snapshot::parse(r#"{"state": "ok"}"#).unwrap()));
        assert_eq!(mb.stats().decode_failures(), 1);
    }

    #[test]
    fn test_corrupt_and_empty_payloads_are_no_data() {
        let mb = mailbox();
        mb.deliver(b"{\"state\": ").unwrap();
        assert!(mb.is_fresh());
        assert!(mb.take_snapshot().is_none());
        assert!(!mb.is_fresh());
        assert_eq!(mb.stats().decode_failures(), 1);

        mb.deliver(b"   ").unwrap();
        assert!(mb.take_snapshot().is_none());
        assert_eq!(mb.stats().decode_failures(), 1);
    }

    #[test]
    fn test_concurrent_deliveries_keep_one_whole_payload() {
        let mb = mailbox();
        let writers: Vec<_> = (0..4)
            .map(|w| {
                let mb = mb.clone();
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let payload = format!(r#"{{"writer": {w}, "seq": {i}}}"#);
                        mb.deliver(payload.as_bytes()).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }
        assert_eq!(mb.stats().received(), 1000);
        assert!(mb.take_snapshot().is_some());
        assert!(mb.take_snapshot().is_none());
    }
}

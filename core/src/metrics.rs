use crate::utils::misc::{Typename, get_unix_secs_now};
use scc::HashIndex;
use scc::ebr::Guard;
use serde_json::Value;
use std::collections::HashMap as StdHashMap;
use std::fmt::Debug;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::warn;

/// Counters for one service instance. Owned by the `Context` and injected
/// where needed; there is intentionally no process-wide instance.
pub struct Metrics {
    incoming_bytes: AtomicU64,     // total UDP payload bytes received
    incoming_datagrams: AtomicU64, // total UDP datagrams received
    outgoing_datagrams: AtomicU64, // total UDP datagrams sent

    // Handled packet counters by wire kind (dynamic)
    handled_packets: HashIndex<String, Arc<AtomicU64>>,

    // Swallowed error counters by type name (dynamic)
    errors: HashIndex<String, Arc<AtomicU64>>,

    start_time: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            incoming_bytes: AtomicU64::new(0),
            incoming_datagrams: AtomicU64::new(0),
            outgoing_datagrams: AtomicU64::new(0),
            handled_packets: HashIndex::new(),
            errors: HashIndex::new(),
            start_time: get_unix_secs_now(),
        }
    }

    /// Count one received datagram with its payload size
    pub fn add_udp_datagram(&self, len: usize) {
        self.incoming_bytes.fetch_add(len as u64, Ordering::Relaxed);
        self.incoming_datagrams.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one datagram handed to the socket
    pub fn add_sent_datagram(&self) {
        self.outgoing_datagrams.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_handled_packet_by_name(&self, kind: &str) {
        // owned key is required by scc HashIndex lookups
        let kind_owned = kind.to_string();
        if let Some(counter) = self.handled_packets.get(&kind_owned) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            let _ = self.handled_packets.insert(kind_owned, Arc::new(AtomicU64::new(1)));
        }
    }

    /// Count a swallowed error under its type name
    pub fn add_error<E: Debug + Typename>(&self, error: &E) {
        warn!(target: "metrics", "swallowed: {error:?}");
        self.add_error_by_name(error.typename());
    }

    fn add_error_by_name(&self, error_type: &str) {
        let et_owned = error_type.to_string();
        if let Some(counter) = self.errors.get(&et_owned) {
            counter.fetch_add(1, Ordering::Relaxed);
        } else {
            let _ = self.errors.insert(et_owned, Arc::new(AtomicU64::new(1)));
        }
    }

    /// Get JSON-formatted metrics
    pub fn get_json(&self) -> Value {
        let guard = Guard::new();

        let mut packets = StdHashMap::new();
        let mut iter = self.handled_packets.iter(&guard);
        while let Some((kind, counter)) = iter.next() {
            packets.insert(kind.clone(), counter.load(Ordering::Relaxed));
        }

        let mut errors = StdHashMap::new();
        let mut iter = self.errors.iter(&guard);
        while let Some((error_type, counter)) = iter.next() {
            errors.insert(error_type.clone(), counter.load(Ordering::Relaxed));
        }

        serde_json::json!({
            "handled_packets": packets,
            "errors": errors,
            "datagrams": {
                "total_incoming_datagrams": self.incoming_datagrams.load(Ordering::Relaxed),
                "total_incoming_bytes": self.incoming_bytes.load(Ordering::Relaxed),
                "total_outgoing_datagrams": self.outgoing_datagrams.load(Ordering::Relaxed),
            },
            "uptime": get_unix_secs_now().saturating_sub(self.start_time),
        })
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

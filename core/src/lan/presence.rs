use scc::HashMap;
use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::sync::Arc;

/// Last observation of one device, built entirely from its heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerInfo {
    #[serde(rename = "deviceId")]
    pub device_id: String,
    pub name: String,
    /// Source address of the latest heartbeat, never the address a packet claims
    #[serde(rename = "ip")]
    pub addr: IpAddr,
    pub port: u16,
    #[serde(rename = "lastSeen")]
    pub last_seen: u64,
}

/// In-memory map from device id to its latest observation. Pure data
/// structure with an injected clock (`now_ms` parameters), no I/O and no
/// failure modes.
#[derive(Debug, Clone)]
pub struct PresenceRegistry {
    peers: Arc<HashMap<String, PeerInfo>>,
    offline_after_ms: u64,
}

impl PresenceRegistry {
    pub fn new(offline_after_ms: u64) -> Self {
        Self { peers: Arc::new(HashMap::new()), offline_after_ms }
    }

    /// Record a heartbeat. A changed address, port or name replaces the entry
    /// outright; an identical repeat only refreshes `last_seen`. Returns the
    /// entry as stored.
    pub fn upsert_heartbeat(&self, device_id: &str, name: &str, addr: IpAddr, port: u16, now_ms: u64) -> PeerInfo {
        let updated = self.peers.update(device_id, |_, peer| {
            if peer.name != name || peer.addr != addr || peer.port != port {
                *peer = PeerInfo {
                    device_id: device_id.to_string(),
                    name: name.to_string(),
                    addr,
                    port,
                    last_seen: now_ms,
                };
            } else {
                peer.last_seen = now_ms;
            }
            peer.clone()
        });

        match updated {
            Some(peer) => peer,
            None => {
                let peer = PeerInfo {
                    device_id: device_id.to_string(),
                    name: name.to_string(),
                    addr,
                    port,
                    last_seen: now_ms,
                };
                let _ = self.peers.insert(device_id.to_string(), peer.clone());
                peer
            }
        }
    }

    /// Unconditional removal. No packet kind triggers this today; departure
    /// is otherwise only ever inferred from silence.
    pub fn remove(&self, device_id: &str) -> bool {
        self.peers.remove(device_id).is_some()
    }

    /// Peers heard from within the offline threshold, most recent first.
    /// Ties are broken by device id so listings are deterministic.
    pub fn list_online(&self, now_ms: u64) -> Vec<PeerInfo> {
        let mut online = Vec::new();
        self.peers.scan(|_, peer| {
            if now_ms.saturating_sub(peer.last_seen) <= self.offline_after_ms {
                online.push(peer.clone());
            }
        });
        online.sort_by(|a, b| b.last_seen.cmp(&a.last_seen).then_with(|| a.device_id.cmp(&b.device_id)));
        online
    }

    /// Drop every entry past the offline threshold.
    pub fn sweep(&self, now_ms: u64) {
        self.peers.retain(|_, peer| now_ms.saturating_sub(peer.last_seen) <= self.offline_after_ms);
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

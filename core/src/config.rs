use std::net::Ipv4Addr;

pub const DEFAULT_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(239, 255, 255, 250);
pub const DEFAULT_PORT: u16 = 53210;
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 3_000;
pub const DEFAULT_OFFLINE_AFTER_MS: u64 = 10_000;
pub const DEFAULT_BUFFER_SIZE: usize = 65_536; // 64 KiB, far above any JSON packet

#[derive(Debug, thiserror::Error, strum_macros::IntoStaticStr)]
pub enum Error {
    #[error("invalid {name}: {value:?}")]
    BadEnvValue { name: &'static str, value: String },
}

impl crate::utils::misc::Typename for Error {
    fn typename(&self) -> &'static str {
        self.into()
    }
}

/// Everything one LAN node needs to know about itself and its group.
/// Built by the owning process and handed to `Context::new`; nothing here
/// is read from globals after construction.
#[derive(Debug, Clone)]
pub struct Config {
    /// Stable per-installation identity, see `MessageStore::ensure_device_id`
    pub device_id: String,
    /// Human-readable name announced in heartbeats
    pub device_name: String,
    pub multicast_addr: Ipv4Addr,
    pub port: u16,
    pub heartbeat_interval_ms: u64,
    /// A peer silent for longer than this is considered offline
    pub offline_after_ms: u64,
    /// Receive buffer handed to `recv_from`
    pub buffer_size: usize,
}

impl Config {
    pub fn new(device_id: String, device_name: String) -> Self {
        Self {
            device_id,
            device_name,
            multicast_addr: DEFAULT_MULTICAST_ADDR,
            port: DEFAULT_PORT,
            heartbeat_interval_ms: DEFAULT_HEARTBEAT_INTERVAL_MS,
            offline_after_ms: DEFAULT_OFFLINE_AFTER_MS,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Defaults with `LAN_*` environment overrides applied. A set but
    /// unparsable variable is a startup error, not a silent fallback.
    pub fn from_env(device_id: String, device_name: String) -> Result<Self, Error> {
        let mut config = Self::new(device_id, device_name);
        if let Some(addr) = read_env("LAN_MULTICAST_ADDR") {
            config.multicast_addr =
                addr.parse().map_err(|_| Error::BadEnvValue { name: "LAN_MULTICAST_ADDR", value: addr })?;
        }
        if let Some(port) = read_env("LAN_PORT") {
            config.port = port.parse().map_err(|_| Error::BadEnvValue { name: "LAN_PORT", value: port })?;
        }
        if let Some(ms) = read_env("LAN_HEARTBEAT_MS") {
            config.heartbeat_interval_ms =
                ms.parse().map_err(|_| Error::BadEnvValue { name: "LAN_HEARTBEAT_MS", value: ms })?;
        }
        if let Some(ms) = read_env("LAN_OFFLINE_MS") {
            config.offline_after_ms =
                ms.parse().map_err(|_| Error::BadEnvValue { name: "LAN_OFFLINE_MS", value: ms })?;
        }
        Ok(config)
    }
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

pub mod presence;
pub mod proto;
pub mod service;
pub mod tasks;

pub use presence::{PeerInfo, PresenceRegistry};
pub use proto::Packet;
pub use service::{LanService, SubscriptionId};

use crate::config::Config;
use crate::lan::{LanService, PeerInfo, PresenceRegistry};
use crate::metrics::Metrics;
use crate::store::MessageStore;
use serde_json::Value;
use std::sync::Arc;

pub mod config;
pub mod lan;
pub mod metrics;
pub mod store;
pub mod utils;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] config::Error),
    #[error(transparent)]
    Proto(#[from] lan::proto::Error),
    #[error(transparent)]
    Service(#[from] lan::service::Error),
    #[error(transparent)]
    Store(#[from] store::Error),
}

/// Everything one process needs to be a device on the LAN: the message
/// store, the presence registry, metrics and the service wired on top of
/// them. The parts are shared `Arc`s so an embedding application can reach
/// each one directly.
pub struct Context {
    pub config: Config,
    pub metrics: Arc<Metrics>,
    pub presence: Arc<PresenceRegistry>,
    pub store: Arc<MessageStore>,
    pub service: Arc<LanService>,
}

impl Context {
    pub fn new(config: Config, store: Arc<MessageStore>) -> Context {
        let metrics = Arc::new(Metrics::new());
        let presence = Arc::new(PresenceRegistry::new(config.offline_after_ms));
        let service = Arc::new(LanService::new(
            config.clone(),
            presence.clone(),
            store.clone(),
            metrics.clone(),
        ));
        Context { config, metrics, presence, store, service }
    }

    /// Go on the air. Binds the group port, so at most one started context
    /// per host works.
    pub async fn start(&self) -> Result<(), Error> {
        self.service.clone().start().await?;
        Ok(())
    }

    pub async fn stop(&self) {
        self.service.stop().await;
    }

    pub fn get_online_peers(&self) -> Vec<PeerInfo> {
        self.service.get_online_peers()
    }

    pub fn get_json_metrics(&self) -> Value {
        self.metrics.get_json()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::misc::get_unix_millis_now;

    #[tokio::test]
    async fn test_context_wires_shared_state() {
        let store = Arc::new(MessageStore::open_in_memory().unwrap());
        let ctx = Context::new(Config::new("me".to_string(), "Me".to_string()), store);

        assert!(ctx.get_online_peers().is_empty());
        ctx.presence.upsert_heartbeat(
            "a",
            "Alice",
            "10.0.0.1".parse().unwrap(),
            53210,
            get_unix_millis_now(),
        );
        // the service sees the same registry the context exposes
        assert_eq!(ctx.get_online_peers().len(), 1);
        assert_eq!(ctx.get_json_metrics()["datagrams"]["total_incoming_datagrams"], 0);
    }
}

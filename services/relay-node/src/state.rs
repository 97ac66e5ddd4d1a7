use lifeline_core::SystemClock;
use lifeline_relay::{ExpoPushGateway, InMemoryRecordStore, NoticeFeed, RelayEngine};
use std::sync::Arc;
use tracing::info;

use crate::config::NodeConfig;

pub struct AppState {
    pub engine: RelayEngine,
    pub feed: Arc<NoticeFeed>,
}

impl AppState {
    pub fn new(config: &NodeConfig) -> anyhow::Result<Self> {
        let relay_config = config.relay_config()?;

        let store = match &config.seed_path {
            Some(path) => {
                info!(seed = %path.display(), "Seeding record store");
                InMemoryRecordStore::from_seed_file(path)?
            }
            None => InMemoryRecordStore::new(),
        };
        let gateway = ExpoPushGateway::new(&relay_config.gateway)?;
        let feed = Arc::new(NoticeFeed::new());

        let engine = RelayEngine::new(
            relay_config,
            Arc::new(store),
            Arc::new(gateway),
            feed.clone(),
            Arc::new(SystemClock),
        );

        Ok(AppState { engine, feed })
    }
}

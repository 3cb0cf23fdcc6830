use crate::{config::Config, services::ChatHub};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub hub: ChatHub,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(hub: ChatHub, config: Config) -> Self {
        Self {
            hub,
            config: Arc::new(config),
        }
    }
}

//! Shared application state for all routes. The config document is re-read on every request.

use crate::store::StoreConnector;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub config_file: PathBuf,
    /// Opens a fresh ConfigDB connection per request.
    pub connector: Arc<dyn StoreConnector>,
}

impl AppState {
    pub fn new(config_file: impl Into<PathBuf>, connector: Arc<dyn StoreConnector>) -> Self {
        AppState {
            config_file: config_file.into(),
            connector,
        }
    }
}

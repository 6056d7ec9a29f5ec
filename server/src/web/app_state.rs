use std::sync::Arc;

use crate::config::ServerConfig;
use crate::engine::relay::RelayEngine;

/// Shared state handed to every HTTP and WebSocket handler.
pub struct AppState {
    pub engine: Arc<RelayEngine>,
    pub config: ServerConfig,
}

//! Shared Application State

use crate::{config::Config, upstream::UpstreamClient};
use std::sync::Arc;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub upstream: Arc<dyn UpstreamClient>,
}

use std::sync::Arc;

use crate::db::store::JobStore;
use crate::services::queue::TaskQueue;

/// Shared state passed to the health route handlers.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
    pub queue: Arc<dyn TaskQueue>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>, queue: Arc<dyn TaskQueue>) -> Self {
        Self { store, queue }
    }
}

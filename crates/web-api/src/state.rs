use std::sync::Arc;
use std::time::Instant;

use application::{ChatHub, StorageHealth};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<ChatHub>,
    pub storage_health: Arc<dyn StorageHealth>,
    pub jwt_service: Arc<JwtService>,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(
        hub: Arc<ChatHub>,
        storage_health: Arc<dyn StorageHealth>,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        Self {
            hub,
            storage_health,
            jwt_service,
            started_at: Instant::now(),
        }
    }
}

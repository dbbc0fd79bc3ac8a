//! Application state shared across handlers.

use crate::auth::AuthService;
use crate::config::Config;
use crate::db::Database;
use crate::storage::Storage;
use std::sync::Arc;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<Config>,
    /// Database connection.
    pub db: Database,
    /// Authentication service.
    pub auth: Arc<AuthService>,
    /// File storage adapter.
    pub storage: Storage,
}

impl AppState {
    /// Create new application state.
    pub fn new(config: Config, db: Database, auth: AuthService) -> Self {
        let storage = Storage::new(&config.storage);
        Self {
            config: Arc::new(config),
            db,
            auth: Arc::new(auth),
            storage,
        }
    }
}

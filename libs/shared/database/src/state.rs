use std::path::Path;

use shared_config::AppConfig;

use crate::{Database, DatabaseError};

/// Shared state handed to every router.
#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub db: Database,
}

impl AppState {
    pub fn new(config: AppConfig, db: Database) -> Self {
        Self { config, db }
    }

    /// Open the database named in the configuration.
    pub fn open(config: AppConfig) -> Result<Self, DatabaseError> {
        let db = Database::open(Path::new(&config.database_path))?;
        Ok(Self::new(config, db))
    }
}

//! Application state for the monitoring server.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::StoreResult;
use crate::store::{EventStore, SqliteEventStore};

/// Environment variable holding the bind address.
pub const ENV_BIND: &str = "FARMHAND_MONITOR_BIND";
/// Environment variable holding the SQLite database path.
pub const ENV_DB: &str = "FARMHAND_MONITOR_DB";

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,
    /// SQLite database file; in-memory when `None`.
    pub database: Option<PathBuf>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            bind_address: ([127, 0, 0, 1], 5000).into(),
            database: None,
        }
    }
}

impl MonitorConfig {
    /// Defaults overridden by `FARMHAND_MONITOR_BIND` and `FARMHAND_MONITOR_DB`.
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`MonitorConfig::from_env`] with an explicit variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, String> {
        let mut config = Self::default();
        if let Some(bind) = lookup(ENV_BIND).filter(|v| !v.trim().is_empty()) {
            config.bind_address = bind
                .trim()
                .parse()
                .map_err(|e| format!("Invalid {ENV_BIND} address '{bind}': {e}"))?;
        }
        if let Some(path) = lookup(ENV_DB).filter(|v| !v.trim().is_empty()) {
            config.database = Some(PathBuf::from(path));
        }
        Ok(config)
    }

    /// Open the configured store.
    pub fn open_store(&self) -> StoreResult<SqliteEventStore> {
        match &self.database {
            Some(path) => SqliteEventStore::new(path),
            None => SqliteEventStore::in_memory(),
        }
    }
}

/// Shared application state.
pub struct AppState {
    pub config: MonitorConfig,
    pub store: Arc<dyn EventStore>,
}

impl AppState {
    pub fn new(config: MonitorConfig, store: Arc<dyn EventStore>) -> Self {
        Self { config, store }
    }

    /// State over a fresh in-memory store.
    pub fn in_memory() -> StoreResult<Self> {
        Ok(Self::new(
            MonitorConfig::default(),
            Arc::new(SqliteEventStore::in_memory()?),
        ))
    }
}

use std::{path::PathBuf, time::Duration};

/// Configuration surface (spec §6.3). Scopes persistence and the sync
/// connection; there is no other source of global state.
#[derive(Debug, Clone)]
pub struct Config {
    /// Scopes persistence and the WebSocket URL.
    pub app_id: String,
    /// Protocol + host the WebSocket URL is derived from.
    pub base_url: String,
    /// If false, the Sync Engine is never started and every transaction
    /// stays `pending` in the durable log.
    pub sync_enabled: bool,
    /// Directory for the local store. `None` opens an ephemeral, in-memory
    /// store (suitable for `sync_enabled = false` demos and tests).
    pub persistence_dir: Option<PathBuf>,
    /// Delay before the first reconnect attempt; doubles on each subsequent
    /// failure up to an internal cap (spec §4.4.1).
    pub reconnect_delay: Duration,
    /// Raises the log level emitted by this crate's `tracing` spans. Does
    /// not install a subscriber — that remains the application's job.
    pub verbose_logging: bool,
}

impl Config {
    pub fn new(app_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            base_url: base_url.into(),
            sync_enabled: true,
            persistence_dir: None,
            reconnect_delay: Duration::from_secs(1),
            verbose_logging: false,
        }
    }

    pub fn with_persistence_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.persistence_dir = Some(dir.into());
        self
    }

    pub fn with_sync_enabled(mut self, enabled: bool) -> Self {
        self.sync_enabled = enabled;
        self
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    pub fn with_verbose_logging(mut self, verbose: bool) -> Self {
        self.verbose_logging = verbose;
        self
    }
}

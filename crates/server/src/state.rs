use harvestline_core::{Config, RunManager};

/// Shared application state
pub struct AppState {
    runs: RunManager,
    config_hash: String,
}

impl AppState {
    pub fn new(runs: RunManager, config_hash: String) -> Self {
        Self { runs, config_hash }
    }

    pub fn config(&self) -> &Config {
        self.runs.config()
    }

    /// Short SHA-256 of the loaded configuration.
    pub fn config_hash(&self) -> &str {
        &self.config_hash
    }

    pub fn runs(&self) -> &RunManager {
        &self.runs
    }
}

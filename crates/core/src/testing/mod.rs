//! Testing utilities and mock implementations.
//!
//! This module provides mock implementations of the collaborator traits
//! (browser session, filesystem, download driver), allowing the download loop,
//! scheduler and session pipeline to be exercised without a browser.
//!
//! # Example
//!
//! ```rust,ignore
//! use harvestline_core::testing::{MockBrowser, MockFileSystem, ScriptedDriver};
//!
//! let fs = MockFileSystem::new();
//! fs.add_dir("/downloads/s1");
//! let driver = ScriptedDriver::new(fs.clone(), "/downloads/s1");
//! driver.fail_export(2);
//! ```

mod mock_browser;
mod mock_fs;
mod mock_session_factory;
mod scripted_driver;

pub use mock_browser::{ClickHook, MockBrowser};
pub use mock_fs::MockFileSystem;
pub use mock_session_factory::MockSessionFactory;
pub use scripted_driver::ScriptedDriver;

/// Test fixtures and helper functions.
pub mod fixtures {
    use std::path::PathBuf;

    use crate::config::{Config, SelectorConfig, SessionConfig};

    /// A session bound to `debug_port`, downloading into `/downloads/<id>`.
    pub fn session(id: &str, debug_port: u16, max_items: u32) -> SessionConfig {
        SessionConfig {
            id: id.to_string(),
            debug_port,
            download_dir: PathBuf::from(format!("/downloads/{}", id)),
            feed_url: format!("https://example.test/{}/feed", id),
            max_items,
            enabled: true,
        }
    }

    /// Selectors matching the element names used by [`super::MockBrowser`] setups.
    pub fn selectors() -> SelectorConfig {
        SelectorConfig {
            feed_item: "article".to_string(),
            ready: vec![".panel".to_string()],
            overflow_menu_trigger: Some("button.more".to_string()),
            menu_root: Some("[role=menu]".to_string()),
            menu_item: Some("[role=menuitem]".to_string()),
            export_control: Some("button.download".to_string()),
            media: Some("video".to_string()),
            active_item: Some("article.active".to_string()),
            export_labels: vec!["Download".to_string()],
        }
    }

    /// Config with the given sessions and timings short enough for tests.
    pub fn config(sessions: Vec<SessionConfig>) -> Config {
        let mut config = Config {
            sessions,
            selectors: selectors(),
            ..Default::default()
        };
        config.download.settle_ms = 100;
        config.download.poll_interval_ms = 100;
        config.download.export_start_timeout_ms = 2_000;
        config.download.file_save_timeout_ms = 5_000;
        config.navigator.settle_ms = 100;
        config.watchdog.timeout_ms = 10_000;
        config
    }
}

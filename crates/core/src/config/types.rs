use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr};
use std::path::PathBuf;

use crate::download::DownloadConfig;
use crate::feed::NavigatorConfig;
use crate::scheduler::SchedulerConfig;

/// Root configuration
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub webdriver: WebDriverConfig,
    #[serde(default)]
    pub sessions: Vec<SessionConfig>,
    #[serde(default)]
    pub selectors: SelectorConfig,
    #[serde(default)]
    pub download: DownloadConfig,
    #[serde(default)]
    pub navigator: NavigatorConfig,
    #[serde(default)]
    pub watchdog: WatchdogConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub collect: Option<CollectConfig>,
}

impl Config {
    /// Sessions with `enabled = true`, in configured order.
    pub fn enabled_sessions(&self) -> impl Iterator<Item = &SessionConfig> {
        self.sessions.iter().filter(|s| s.enabled)
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_port() -> u16 {
    8080
}

/// WebDriver endpoint used to attach to the session browsers
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WebDriverConfig {
    /// Driver URL (e.g., "http://127.0.0.1:9515")
    #[serde(default = "default_webdriver_url")]
    pub url: String,
    /// Host the browsers expose their debugging ports on
    #[serde(default = "default_debugger_host")]
    pub debugger_host: String,
    /// Per-request timeout in seconds
    #[serde(default = "default_webdriver_timeout")]
    pub timeout_secs: u32,
    /// Interval for element visibility polling
    #[serde(default = "default_element_poll_ms")]
    pub poll_interval_ms: u64,
}

impl Default for WebDriverConfig {
    fn default() -> Self {
        Self {
            url: default_webdriver_url(),
            debugger_host: default_debugger_host(),
            timeout_secs: default_webdriver_timeout(),
            poll_interval_ms: default_element_poll_ms(),
        }
    }
}

fn default_webdriver_url() -> String {
    "http://127.0.0.1:9515".to_string()
}

fn default_debugger_host() -> String {
    "127.0.0.1".to_string()
}

fn default_webdriver_timeout() -> u32 {
    30
}

fn default_element_poll_ms() -> u64 {
    250
}

/// One independent browser session
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Unique session tag
    pub id: String,
    /// Remote debugging port of this session's browser
    pub debug_port: u16,
    /// Where this session's browser saves exports
    pub download_dir: PathBuf,
    /// Page holding the content feed
    pub feed_url: String,
    /// Items to export before the session is done
    #[serde(default = "default_max_items")]
    pub max_items: u32,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_max_items() -> u32 {
    10
}

fn default_true() -> bool {
    true
}

/// Selector strings and export labels for the driven site.
///
/// Treated as opaque: the engine only passes these strings to the browser.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct SelectorConfig {
    /// A single feed item / card
    #[serde(default)]
    pub feed_item: String,
    /// Conditions that must all be visible before exporting
    #[serde(default)]
    pub ready: Vec<String>,
    /// Button opening the overflow menu
    #[serde(default)]
    pub overflow_menu_trigger: Option<String>,
    /// Root element of the opened menu
    #[serde(default)]
    pub menu_root: Option<String>,
    /// Entries inside the menu root
    #[serde(default)]
    pub menu_item: Option<String>,
    /// Direct export/download control
    #[serde(default)]
    pub export_control: Option<String>,
    /// Element carrying the active media source
    #[serde(default)]
    pub media: Option<String>,
    /// Currently highlighted feed item
    #[serde(default)]
    pub active_item: Option<String>,
    /// Known export labels, any locale (matched case-insensitively)
    #[serde(default)]
    pub export_labels: Vec<String>,
}

/// Liveness monitoring per session run
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WatchdogConfig {
    /// Heartbeat timeout in milliseconds
    #[serde(default = "default_watchdog_timeout")]
    pub timeout_ms: u64,
    /// Consecutive timeouts before the run is cancelled
    #[serde(default = "default_escalation_threshold")]
    pub escalation_threshold: u32,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_watchdog_timeout(),
            escalation_threshold: default_escalation_threshold(),
        }
    }
}

fn default_watchdog_timeout() -> u64 {
    240_000 // 4 minutes, longer than any single wait
}

fn default_escalation_threshold() -> u32 {
    3
}

/// Post-processing handoff
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CollectConfig {
    /// Directory that receives every saved file after the downloads finish
    pub output_dir: PathBuf,
}

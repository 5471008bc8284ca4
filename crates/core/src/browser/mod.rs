//! Browser-session abstraction.
//!
//! This module provides a `BrowserSession` trait covering the capabilities the
//! orchestration core needs from a driven browser tab. Selector strings are
//! always supplied by the caller; nothing here knows about a concrete site.

mod webdriver;

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::time::Duration;

pub use webdriver::WebDriverSession;

/// W3C identifier for element references in WebDriver payloads.
pub const ELEMENT_KEY: &str = "element-6066-11e4-a052-4f4d4e4e4e4e";

/// Errors from browser operations.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Could not reach the driver.
    #[error("connection failed: {0}")]
    ConnectionFailed(String),

    /// The driver or browser did not answer in time.
    #[error("browser request timed out")]
    Timeout,

    /// No element matched the selector.
    #[error("no such element: {0}")]
    NoSuchElement(String),

    /// The element is no longer attached to the page.
    #[error("stale element reference: {0}")]
    StaleElement(String),

    /// Script evaluation failed in the page.
    #[error("script error: {0}")]
    Script(String),

    /// Any other driver-reported error.
    #[error("webdriver error '{error}': {message}")]
    Protocol { error: String, message: String },

    /// Malformed driver response.
    #[error("invalid driver response: {0}")]
    InvalidResponse(String),
}

impl BrowserError {
    /// Whether the error means "not there (anymore)" rather than a failure.
    pub fn is_missing_element(&self) -> bool {
        matches!(self, Self::NoSuchElement(_) | Self::StaleElement(_))
    }
}

/// Opaque reference to an element in the page.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(String);

impl ElementHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Keys the core can press.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Key {
    ArrowDown,
    ArrowRight,
    PageDown,
    Escape,
    Enter,
}

impl Key {
    /// Code point used by the WebDriver actions API.
    pub fn webdriver_code(&self) -> &'static str {
        match self {
            Key::ArrowDown => "\u{E015}",
            Key::ArrowRight => "\u{E014}",
            Key::PageDown => "\u{E00F}",
            Key::Escape => "\u{E00C}",
            Key::Enter => "\u{E007}",
        }
    }
}

/// A driven browser tab.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Session tag this browser belongs to.
    fn session_id(&self) -> &str;

    /// Wait up to `timeout` for a visible element matching `selector`.
    async fn find_visible(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>, BrowserError>;

    /// Wait up to `timeout` for `selector` to be hidden or detached.
    async fn find_hidden(&self, selector: &str, timeout: Duration) -> Result<bool, BrowserError>;

    /// All elements matching `selector`, optionally inside `scope`.
    async fn find_all(
        &self,
        scope: Option<&ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, BrowserError>;

    /// Visible text of an element.
    async fn element_text(&self, element: &ElementHandle) -> Result<String, BrowserError>;

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError>;

    /// Run a function body in the page; arguments are available as `arguments[i]`.
    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value, BrowserError>;

    /// Mouse-wheel scroll by `delta_y` pixels.
    async fn scroll(&self, delta_y: i64) -> Result<(), BrowserError>;

    async fn press_key(&self, key: Key) -> Result<(), BrowserError>;

    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Direct downloads of this session into `dir`.
    async fn set_download_dir(&self, dir: &Path) -> Result<(), BrowserError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_deserialize() {
        let key: Key = serde_json::from_str("\"arrow_down\"").unwrap();
        assert_eq!(key, Key::ArrowDown);
        assert_eq!(key.webdriver_code(), "\u{E015}");
    }

    #[test]
    fn test_missing_element_classification() {
        assert!(BrowserError::NoSuchElement("x".into()).is_missing_element());
        assert!(BrowserError::StaleElement("x".into()).is_missing_element());
        assert!(!BrowserError::Timeout.is_missing_element());
    }
}

//! Browser-facing actions of the download loop.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::browser::{BrowserError, BrowserSession, ElementHandle, Key};
use crate::config::SelectorConfig;
use crate::feed::FeedNavigator;

use super::config::DownloadConfig;
use super::error::DownloadError;

/// Actions the download loop delegates to a concrete session.
#[async_trait]
pub trait DownloadDriver: Send + Sync {
    /// Locate and activate the first feed item.
    async fn open_first_item(&self) -> Result<(), DownloadError>;

    /// Wait for every ready condition, then settle.
    async fn wait_item_ready(&self) -> Result<(), DownloadError>;

    /// Fire the export action for the current item.
    async fn trigger_export(&self) -> Result<(), DownloadError>;

    /// Move to the next item. `false` means the feed did not move.
    async fn advance_feed(&self) -> bool;

    /// Re-acquire the working page after a watchdog timeout.
    async fn recover(&self) -> Result<(), DownloadError>;
}

/// [`DownloadDriver`] over a [`BrowserSession`], using configured selectors.
pub struct BrowserDriver {
    session: Arc<dyn BrowserSession>,
    selectors: Arc<SelectorConfig>,
    navigator: FeedNavigator,
    config: DownloadConfig,
    feed_url: String,
}

impl BrowserDriver {
    pub fn new(
        session: Arc<dyn BrowserSession>,
        selectors: Arc<SelectorConfig>,
        navigator: FeedNavigator,
        config: DownloadConfig,
        feed_url: impl Into<String>,
    ) -> Self {
        Self {
            session,
            selectors,
            navigator,
            config,
            feed_url: feed_url.into(),
        }
    }

    fn session_id(&self) -> &str {
        self.session.session_id()
    }

    /// First visible match of an optional selector, waiting the control timeout.
    async fn visible(&self, selector: Option<&str>) -> Result<Option<ElementHandle>, BrowserError> {
        match selector.filter(|s| !s.is_empty()) {
            Some(selector) => {
                self.session
                    .find_visible(selector, self.config.control_timeout())
                    .await
            }
            None => Ok(None),
        }
    }

    /// Export control placed directly on the item.
    async fn try_direct_control(&self) -> Result<bool, BrowserError> {
        match self.visible(self.selectors.export_control.as_deref()).await? {
            Some(control) => {
                self.session.click(&control).await?;
                debug!(session = %self.session_id(), "Export via direct control");
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Open the overflow menu and pick an entry inside it.
    async fn try_overflow_menu(&self) -> Result<bool, BrowserError> {
        let Some(trigger) = self
            .visible(self.selectors.overflow_menu_trigger.as_deref())
            .await?
        else {
            return Ok(false);
        };
        self.session.click(&trigger).await?;

        let root = self.visible(self.selectors.menu_root.as_deref()).await?;
        if self.selectors.menu_root.is_some() && root.is_none() {
            warn!(session = %self.session_id(), "Overflow menu did not open");
            return Ok(false);
        }
        let scope = root.as_ref();

        if let Some(selector) = self.selectors.export_control.as_deref() {
            if let Some(control) = self.session.find_all(scope, selector).await?.into_iter().next() {
                self.session.click(&control).await?;
                debug!(session = %self.session_id(), "Export via control inside menu");
                return Ok(true);
            }
        }

        let Some(item_selector) = self.selectors.menu_item.as_deref() else {
            self.dismiss_menu().await;
            return Ok(false);
        };
        let entries = self.session.find_all(scope, item_selector).await?;
        if entries.is_empty() {
            self.dismiss_menu().await;
            return Ok(false);
        }

        for entry in &entries {
            let text = match self.session.element_text(entry).await {
                Ok(text) => text,
                Err(e) if e.is_missing_element() => continue,
                Err(e) => return Err(e),
            };
            if matches_label(&text, &self.selectors.export_labels) {
                self.session.click(entry).await?;
                debug!(session = %self.session_id(), label = %text.trim(), "Export via labelled menu entry");
                return Ok(true);
            }
        }

        // No label matched: take the first entry.
        self.session.click(&entries[0]).await?;
        debug!(session = %self.session_id(), "Export via first menu entry");
        Ok(true)
    }

    async fn dismiss_menu(&self) {
        if let Err(e) = self.session.press_key(Key::Escape).await {
            debug!(session = %self.session_id(), "Could not dismiss menu: {}", e);
        }
    }
}

/// Case-insensitive match of visible text against known labels.
fn matches_label(text: &str, labels: &[String]) -> bool {
    let text = text.trim().to_lowercase();
    if text.is_empty() {
        return false;
    }
    labels.iter().any(|label| {
        let label = label.trim().to_lowercase();
        !label.is_empty() && (text == label || text.contains(&label))
    })
}

#[async_trait]
impl DownloadDriver for BrowserDriver {
    async fn open_first_item(&self) -> Result<(), DownloadError> {
        let selector = self.selectors.feed_item.as_str();
        let item = self
            .session
            .find_visible(selector, self.config.ready_timeout())
            .await
            .map_err(|e| DownloadError::Setup(e.to_string()))?
            .ok_or_else(|| DownloadError::Setup(format!("no feed item matches '{}'", selector)))?;
        self.session
            .click(&item)
            .await
            .map_err(|e| DownloadError::Setup(e.to_string()))?;
        info!(session = %self.session_id(), "Opened first feed item");
        Ok(())
    }

    async fn wait_item_ready(&self) -> Result<(), DownloadError> {
        for selector in &self.selectors.ready {
            let found = self
                .session
                .find_visible(selector, self.config.ready_timeout())
                .await?;
            if found.is_none() {
                return Err(DownloadError::ReadinessTimeout(selector.clone()));
            }
        }
        tokio::time::sleep(self.config.settle()).await;
        Ok(())
    }

    async fn trigger_export(&self) -> Result<(), DownloadError> {
        if self.try_direct_control().await? {
            return Ok(());
        }
        if self.try_overflow_menu().await? {
            return Ok(());
        }
        Err(DownloadError::ExportTriggerNotFound)
    }

    async fn advance_feed(&self) -> bool {
        self.navigator.advance().await
    }

    async fn recover(&self) -> Result<(), DownloadError> {
        self.session
            .navigate(&self.feed_url)
            .await
            .map_err(|e| DownloadError::Recovery(e.to_string()))?;
        self.open_first_item()
            .await
            .map_err(|e| DownloadError::Recovery(e.to_string()))
    }
}

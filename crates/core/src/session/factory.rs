//! Session acquisition.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::browser::{BrowserSession, WebDriverSession};
use crate::config::{Config, SessionConfig};
use crate::download::{BrowserDriver, DownloadDriver};
use crate::feed::FeedNavigator;
use crate::fs::FileSystem;

/// Opens configured sessions for downloading.
#[async_trait]
pub trait SessionFactory: Send + Sync {
    /// Attach to the session's browser and prepare its feed.
    async fn open(&self, session: &SessionConfig) -> anyhow::Result<Arc<dyn DownloadDriver>>;

    /// Release whatever `open` acquired.
    async fn close(&self, _session_id: &str) {}
}

/// [`SessionFactory`] attaching to running browsers over WebDriver.
pub struct BrowserSessionFactory {
    config: Arc<Config>,
    fs: Arc<dyn FileSystem>,
    attached: Mutex<HashMap<String, Arc<WebDriverSession>>>,
}

impl BrowserSessionFactory {
    pub fn new(config: Arc<Config>, fs: Arc<dyn FileSystem>) -> Self {
        Self {
            config,
            fs,
            attached: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl SessionFactory for BrowserSessionFactory {
    async fn open(&self, session: &SessionConfig) -> anyhow::Result<Arc<dyn DownloadDriver>> {
        self.fs
            .create_dir_all(&session.download_dir)
            .await
            .with_context(|| format!("create {}", session.download_dir.display()))?;

        let browser = WebDriverSession::attach(&self.config.webdriver, &session.id, session.debug_port)
            .await
            .with_context(|| format!("attach to browser on port {}", session.debug_port))?;
        let browser = Arc::new(browser);

        if let Err(e) = prepare(browser.as_ref(), session).await {
            if let Err(detach_err) = browser.detach().await {
                warn!(session = %session.id, "Failed to detach from browser: {}", detach_err);
            }
            return Err(e);
        }

        let selectors = Arc::new(self.config.selectors.clone());
        let navigator = FeedNavigator::new(
            browser.clone(),
            selectors.clone(),
            self.config.navigator.clone(),
        );
        let driver = BrowserDriver::new(
            browser.clone(),
            selectors,
            navigator,
            self.config.download.clone(),
            session.feed_url.clone(),
        );

        self.attached
            .lock()
            .await
            .insert(session.id.clone(), browser);
        info!(session = %session.id, port = session.debug_port, "Session opened");
        Ok(Arc::new(driver))
    }

    async fn close(&self, session_id: &str) {
        let Some(browser) = self.attached.lock().await.remove(session_id) else {
            return;
        };
        if let Err(e) = browser.detach().await {
            warn!(session = %session_id, "Failed to detach from browser: {}", e);
        }
    }
}

/// Point the attached browser at the session's download directory and feed.
async fn prepare(browser: &dyn BrowserSession, session: &SessionConfig) -> anyhow::Result<()> {
    browser
        .set_download_dir(&session.download_dir)
        .await
        .context("configure download directory")?;
    browser
        .navigate(&session.feed_url)
        .await
        .with_context(|| format!("open feed {}", session.feed_url))?;
    Ok(())
}

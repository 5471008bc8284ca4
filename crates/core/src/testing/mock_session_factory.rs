//! Mock session factory for testing pipelines.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::config::SessionConfig;
use crate::download::DownloadDriver;
use crate::session::SessionFactory;

/// Mock implementation of the [`SessionFactory`] trait.
///
/// Hands out pre-registered drivers by session id and records which sessions
/// were opened and closed.
///
/// ```rust,ignore
/// let factory = MockSessionFactory::new();
/// factory.add("s1", Arc::new(ScriptedDriver::new(fs.clone(), "/downloads/s1"))).await;
/// factory.fail("s2").await;
/// ```
#[derive(Default)]
pub struct MockSessionFactory {
    drivers: RwLock<HashMap<String, Arc<dyn DownloadDriver>>>,
    failing: RwLock<HashSet<String>>,
    opened: RwLock<Vec<String>>,
    closed: RwLock<Vec<String>>,
}

impl MockSessionFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the driver returned when `session_id` is opened.
    pub async fn add(&self, session_id: &str, driver: Arc<dyn DownloadDriver>) {
        self.drivers
            .write()
            .await
            .insert(session_id.to_string(), driver);
    }

    /// Make opening `session_id` fail.
    pub async fn fail(&self, session_id: &str) {
        self.failing.write().await.insert(session_id.to_string());
    }

    /// Session ids opened, in order.
    pub async fn opened(&self) -> Vec<String> {
        self.opened.read().await.clone()
    }

    /// Session ids closed, in order.
    pub async fn closed(&self) -> Vec<String> {
        self.closed.read().await.clone()
    }
}

#[async_trait]
impl SessionFactory for MockSessionFactory {
    async fn open(&self, session: &SessionConfig) -> anyhow::Result<Arc<dyn DownloadDriver>> {
        if self.failing.read().await.contains(&session.id) {
            anyhow::bail!("browser on port {} unreachable", session.debug_port);
        }
        let driver = self
            .drivers
            .read()
            .await
            .get(&session.id)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("no mock driver for session '{}'", session.id))?;
        self.opened.write().await.push(session.id.clone());
        Ok(driver)
    }

    async fn close(&self, session_id: &str) {
        self.closed.write().await.push(session_id.to_string());
    }
}

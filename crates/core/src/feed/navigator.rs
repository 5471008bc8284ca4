//! Feed navigator implementation.

use std::sync::Arc;

use tokio::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::browser::BrowserSession;
use crate::config::SelectorConfig;
use crate::metrics::FEED_ADVANCES;
use crate::polling::{poll_until, PollSettings};

use super::config::NavigatorConfig;
use super::signature::{capture_signature, ItemSignature};

/// Moves a session's feed to the next item.
pub struct FeedNavigator {
    session: Arc<dyn BrowserSession>,
    selectors: Arc<SelectorConfig>,
    config: NavigatorConfig,
}

impl FeedNavigator {
    pub fn new(
        session: Arc<dyn BrowserSession>,
        selectors: Arc<SelectorConfig>,
        config: NavigatorConfig,
    ) -> Self {
        Self {
            session,
            selectors,
            config,
        }
    }

    /// Current item signature, `None` if the page could not be probed.
    pub async fn capture(&self) -> Option<ItemSignature> {
        match capture_signature(self.session.as_ref(), &self.selectors).await {
            Ok(signature) => Some(signature),
            Err(e) => {
                debug!(session = %self.session.session_id(), "Signature capture failed: {}", e);
                None
            }
        }
    }

    /// Poll until the signature moved past `before`, up to `timeout`.
    async fn wait_for_move(&self, before: &ItemSignature, timeout: Duration) -> bool {
        let settings = PollSettings::new(self.config.poll_interval(), timeout);
        poll_until(settings, || async {
            self.capture()
                .await
                .filter(|now| now.advanced_from(before))
        })
        .await
        .is_ok()
    }

    async fn settle_and_report(&self, attempt: u32, started: Instant) -> bool {
        tokio::time::sleep(self.config.settle()).await;
        FEED_ADVANCES.with_label_values(&["moved"]).inc();
        debug!(
            session = %self.session.session_id(),
            attempt = attempt + 1,
            "Feed advanced after {:?}",
            started.elapsed()
        );
        true
    }

    /// Advance to the next feed item.
    ///
    /// Never fails with an error; `false` means the feed did not move within
    /// the attempt count and overall time budget.
    pub async fn advance(&self) -> bool {
        let session_id = self.session.session_id().to_string();
        let started = Instant::now();
        let budget = self.config.overall_timeout();

        let Some(before) = self.capture().await else {
            warn!(session = %session_id, "Cannot advance feed: no item signature");
            FEED_ADVANCES.with_label_values(&["stuck"]).inc();
            return false;
        };

        for attempt in 0..self.config.max_attempts {
            let remaining = budget.saturating_sub(started.elapsed());
            if remaining.is_zero() {
                break;
            }

            if let Err(e) = self.session.scroll(self.config.scroll_delta).await {
                warn!(session = %session_id, "Scroll gesture failed: {}", e);
            }

            let window = self.config.change_timeout().min(remaining);
            if self.wait_for_move(&before, window).await {
                return self.settle_and_report(attempt, started).await;
            }

            if attempt == 0 {
                continue;
            }

            if started.elapsed() >= budget {
                break;
            }
            if let Err(e) = self.session.press_key(self.config.next_key).await {
                warn!(session = %session_id, "Key gesture failed: {}", e);
            }
            tokio::time::sleep(self.config.poll_interval()).await;
            if self
                .capture()
                .await
                .is_some_and(|now| now.advanced_from(&before))
            {
                return self.settle_and_report(attempt, started).await;
            }
        }

        FEED_ADVANCES.with_label_values(&["stuck"]).inc();
        warn!(
            session = %session_id,
            "Feed did not advance after {} attempts ({:?})",
            self.config.max_attempts,
            started.elapsed()
        );
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::Key;
    use crate::testing::MockBrowser;

    fn selectors() -> Arc<SelectorConfig> {
        Arc::new(SelectorConfig {
            feed_item: "article".to_string(),
            active_item: Some("article.active".to_string()),
            media: Some("video".to_string()),
            ..Default::default()
        })
    }

    fn navigator(browser: &Arc<MockBrowser>) -> FeedNavigator {
        FeedNavigator::new(
            browser.clone() as Arc<dyn BrowserSession>,
            selectors(),
            NavigatorConfig::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_scroll_moves_feed() {
        let browser = Arc::new(MockBrowser::new("s1"));
        let nav = navigator(&browser);

        assert!(nav.advance().await);
        assert_eq!(browser.scroll_count(), 1);
        assert!(browser.pressed_keys().is_empty());
        assert_eq!(browser.feed_index(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_moves_after_third_scroll_within_budget() {
        let browser = Arc::new(MockBrowser::new("s1"));
        browser.set_scrolls_per_move(3);
        let nav = navigator(&browser);

        let started = Instant::now();
        assert!(nav.advance().await);

        assert_eq!(browser.scroll_count(), 3);
        assert!(started.elapsed() < NavigatorConfig::default().overall_timeout());
        // Secondary gesture only after the first attempt failed.
        assert_eq!(browser.pressed_keys(), vec![Key::ArrowDown]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_key_fallback_moves_feed() {
        let browser = Arc::new(MockBrowser::new("s1"));
        browser.set_scrolls_per_move(0);
        browser.set_key_moves(true);
        let nav = navigator(&browser);

        assert!(nav.advance().await);
        assert_eq!(browser.scroll_count(), 2);
        assert_eq!(browser.pressed_keys().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_feed_returns_false_within_budget() {
        let browser = Arc::new(MockBrowser::new("s1"));
        browser.set_scrolls_per_move(0);
        let nav = navigator(&browser);

        let started = Instant::now();
        assert!(!nav.advance().await);

        let config = NavigatorConfig::default();
        assert!(started.elapsed() <= config.overall_timeout() + config.poll_interval());
        assert_eq!(browser.scroll_count(), config.max_attempts);
    }

    #[tokio::test(start_paused = true)]
    async fn test_url_change_counts_as_move() {
        let browser = Arc::new(MockBrowser::new("s1"));
        browser.set_scrolls_per_move(0);
        let nav = navigator(&browser);

        let mover = browser.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(400)).await;
            mover.set_url("https://example.test/item/2");
        });

        assert!(nav.advance().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unprobeable_page_fails_fast() {
        let browser = Arc::new(MockBrowser::new("s1"));
        browser.set_evaluate_fails(true);
        let nav = navigator(&browser);

        assert!(!nav.advance().await);
        assert_eq!(browser.scroll_count(), 0);
    }
}

//! Mock browser session for testing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::Duration;

use crate::browser::{BrowserError, BrowserSession, ElementHandle, Key};
use crate::feed::SIGNATURE_SCRIPT;
use crate::polling::{poll_until, PollSettings};

use super::MockFileSystem;

/// Hook run when an element is clicked.
pub type ClickHook = Arc<dyn Fn(&MockBrowser) + Send + Sync>;

#[derive(Debug, Clone)]
struct MockElement {
    id: String,
    selector: String,
    text: String,
    visible: bool,
}

struct State {
    url: String,
    feed_index: i64,
    scrolls_per_move: u32,
    scrolls_since_move: u32,
    key_moves: bool,
    evaluate_fails: bool,
    elements: Vec<MockElement>,
    hooks: HashMap<String, Vec<ClickHook>>,
    clicked: Vec<String>,
    scrolls: u32,
    keys: Vec<Key>,
    navigations: Vec<String>,
    download_dirs: Vec<PathBuf>,
}

/// Mock implementation of the [`BrowserSession`] trait.
///
/// Models a feed whose highlighted index moves forward after a configurable
/// number of scrolls, plus a flat element registry keyed by selector string.
/// Scope arguments are ignored; selectors are matched verbatim.
///
/// ```rust,ignore
/// let browser = Arc::new(MockBrowser::new("s1"));
/// browser.add_element("article", "item-0", "");
/// browser.set_scrolls_per_move(3);
/// browser.materialize_on_click("export", fs.clone(), "/downloads/s1", "mp4");
/// ```
pub struct MockBrowser {
    session_id: String,
    state: Arc<Mutex<State>>,
}

impl MockBrowser {
    pub fn new(session_id: &str) -> Self {
        Self {
            session_id: session_id.to_string(),
            state: Arc::new(Mutex::new(State {
                url: format!("https://example.test/{}/feed", session_id),
                feed_index: 0,
                scrolls_per_move: 1,
                scrolls_since_move: 0,
                key_moves: false,
                evaluate_fails: false,
                elements: Vec::new(),
                hooks: HashMap::new(),
                clicked: Vec::new(),
                scrolls: 0,
                keys: Vec::new(),
                navigations: Vec::new(),
                download_dirs: Vec::new(),
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    // Feed behaviour

    /// Scrolls needed per feed move; 0 means scrolling never moves the feed.
    pub fn set_scrolls_per_move(&self, scrolls: u32) {
        let mut state = self.lock();
        state.scrolls_per_move = scrolls;
        state.scrolls_since_move = 0;
    }

    /// Whether the "next" key moves the feed.
    pub fn set_key_moves(&self, moves: bool) {
        self.lock().key_moves = moves;
    }

    pub fn set_url(&self, url: &str) {
        self.lock().url = url.to_string();
    }

    /// Make every script evaluation fail.
    pub fn set_evaluate_fails(&self, fails: bool) {
        self.lock().evaluate_fails = fails;
    }

    pub fn feed_index(&self) -> i64 {
        self.lock().feed_index
    }

    // Elements

    pub fn add_element(&self, selector: &str, id: &str, text: &str) {
        self.push_element(selector, id, text, true);
    }

    pub fn add_hidden_element(&self, selector: &str, id: &str, text: &str) {
        self.push_element(selector, id, text, false);
    }

    fn push_element(&self, selector: &str, id: &str, text: &str, visible: bool) {
        self.lock().elements.push(MockElement {
            id: id.to_string(),
            selector: selector.to_string(),
            text: text.to_string(),
            visible,
        });
    }

    /// Show or hide every element matching `selector`.
    pub fn set_visible(&self, selector: &str, visible: bool) {
        for element in self.lock().elements.iter_mut() {
            if element.selector == selector {
                element.visible = visible;
            }
        }
    }

    /// Run `hook` every time element `id` is clicked.
    pub fn on_click(&self, id: &str, hook: ClickHook) {
        self.lock()
            .hooks
            .entry(id.to_string())
            .or_default()
            .push(hook);
    }

    /// Clicking `id` makes everything matching `selectors` visible.
    pub fn reveal_on_click(&self, id: &str, selectors: &[&str]) {
        let selectors: Vec<String> = selectors.iter().map(|s| s.to_string()).collect();
        self.on_click(
            id,
            Arc::new(move |browser| {
                for selector in &selectors {
                    browser.set_visible(selector, true);
                }
            }),
        );
    }

    /// Clicking `id` writes a new finished file into `dir`, as the real
    /// browser would after an export.
    pub fn materialize_on_click(&self, id: &str, fs: MockFileSystem, dir: &str, extension: &str) {
        let dir = PathBuf::from(dir);
        let extension = extension.to_string();
        let session = self.session_id.clone();
        self.on_click(
            id,
            Arc::new(move |browser| {
                let index = browser.feed_index();
                fs.add_file(
                    dir.join(format!("{}-item-{}.{}", session, index, extension)),
                    4096,
                );
            }),
        );
    }

    // Recorded interactions

    pub fn clicked(&self) -> Vec<String> {
        self.lock().clicked.clone()
    }

    pub fn scroll_count(&self) -> u32 {
        self.lock().scrolls
    }

    pub fn pressed_keys(&self) -> Vec<Key> {
        self.lock().keys.clone()
    }

    pub fn navigations(&self) -> Vec<String> {
        self.lock().navigations.clone()
    }

    pub fn download_dirs(&self) -> Vec<PathBuf> {
        self.lock().download_dirs.clone()
    }

    fn first_visible(&self, selector: &str) -> Option<ElementHandle> {
        self.lock()
            .elements
            .iter()
            .find(|e| e.selector == selector && e.visible)
            .map(|e| ElementHandle::new(e.id.clone()))
    }

    fn move_feed(state: &mut State) {
        state.feed_index += 1;
        state.scrolls_since_move = 0;
    }

    fn poll_settings(timeout: Duration) -> PollSettings {
        PollSettings::new(Duration::from_millis(50), timeout)
    }
}

#[async_trait]
impl BrowserSession for MockBrowser {
    fn session_id(&self) -> &str {
        &self.session_id
    }

    async fn find_visible(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>, BrowserError> {
        Ok(poll_until(Self::poll_settings(timeout), || async {
            self.first_visible(selector)
        })
        .await
        .ok())
    }

    async fn find_hidden(&self, selector: &str, timeout: Duration) -> Result<bool, BrowserError> {
        Ok(poll_until(Self::poll_settings(timeout), || async {
            self.first_visible(selector).is_none().then_some(())
        })
        .await
        .is_ok())
    }

    async fn find_all(
        &self,
        _scope: Option<&ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, BrowserError> {
        Ok(self
            .lock()
            .elements
            .iter()
            .filter(|e| e.selector == selector && e.visible)
            .map(|e| ElementHandle::new(e.id.clone()))
            .collect())
    }

    async fn element_text(&self, element: &ElementHandle) -> Result<String, BrowserError> {
        self.lock()
            .elements
            .iter()
            .find(|e| e.id == element.id())
            .map(|e| e.text.clone())
            .ok_or_else(|| BrowserError::StaleElement(element.id().to_string()))
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        let hooks = {
            let mut state = self.lock();
            if !state.elements.iter().any(|e| e.id == element.id()) {
                return Err(BrowserError::StaleElement(element.id().to_string()));
            }
            state.clicked.push(element.id().to_string());
            state.hooks.get(element.id()).cloned().unwrap_or_default()
        };
        for hook in hooks {
            hook(self);
        }
        Ok(())
    }

    async fn evaluate(&self, script: &str, _args: Vec<Value>) -> Result<Value, BrowserError> {
        let state = self.lock();
        if state.evaluate_fails {
            return Err(BrowserError::Script("evaluation disabled".to_string()));
        }
        if script == SIGNATURE_SCRIPT {
            return Ok(json!({
                "url": state.url,
                "mediaSrc": format!("blob:{}-{}", self.session_id, state.feed_index),
                "index": state.feed_index,
            }));
        }
        Ok(Value::Null)
    }

    async fn scroll(&self, _delta_y: i64) -> Result<(), BrowserError> {
        let mut state = self.lock();
        state.scrolls += 1;
        state.scrolls_since_move += 1;
        if state.scrolls_per_move > 0 && state.scrolls_since_move >= state.scrolls_per_move {
            Self::move_feed(&mut state);
        }
        Ok(())
    }

    async fn press_key(&self, key: Key) -> Result<(), BrowserError> {
        let mut state = self.lock();
        state.keys.push(key);
        if state.key_moves && key != Key::Escape {
            Self::move_feed(&mut state);
        }
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        let mut state = self.lock();
        state.url = url.to_string();
        state.navigations.push(url.to_string());
        Ok(())
    }

    async fn set_download_dir(&self, dir: &Path) -> Result<(), BrowserError> {
        self.lock().download_dirs.push(dir.to_path_buf());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_scrolls_move_feed() {
        let browser = MockBrowser::new("s1");
        browser.set_scrolls_per_move(2);

        browser.scroll(800).await.unwrap();
        assert_eq!(browser.feed_index(), 0);
        browser.scroll(800).await.unwrap();
        assert_eq!(browser.feed_index(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_click_runs_hooks() {
        let browser = MockBrowser::new("s1");
        browser.add_element("button.more", "more", "");
        browser.add_hidden_element("[role=menu]", "menu", "");
        browser.reveal_on_click("more", &["[role=menu]"]);

        assert!(browser.find_all(None, "[role=menu]").await.unwrap().is_empty());
        browser.click(&ElementHandle::new("more")).await.unwrap();
        assert_eq!(browser.find_all(None, "[role=menu]").await.unwrap().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_find_hidden() {
        let browser = MockBrowser::new("s1");
        browser.add_element(".spinner", "spinner", "");
        assert!(!browser
            .find_hidden(".spinner", Duration::from_millis(200))
            .await
            .unwrap());

        browser.set_visible(".spinner", false);
        assert!(browser
            .find_hidden(".spinner", Duration::from_millis(200))
            .await
            .unwrap());
    }
}

//! Item fingerprints used to tell whether the feed moved.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::browser::{BrowserError, BrowserSession};
use crate::config::SelectorConfig;

/// Page-side probe. Arguments: media selector, active-item selector, feed-item selector.
pub const SIGNATURE_SCRIPT: &str = r#"
const [mediaSel, activeSel, itemSel] = arguments;
const media = mediaSel ? document.querySelector(mediaSel) : null;
const mediaSrc = media ? (media.currentSrc || media.src || null) : null;
let index = null;
if (activeSel && itemSel) {
  const active = document.querySelector(activeSel);
  if (active) {
    const items = Array.from(document.querySelectorAll(itemSel));
    const i = items.findIndex(el => el === active || el.contains(active) || active.contains(el));
    index = i >= 0 ? i : null;
  }
}
return { url: window.location.href, mediaSrc, index };
"#;

/// Fingerprint of the item currently in view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ItemSignature {
    pub url: String,
    #[serde(default)]
    pub media_src: Option<String>,
    #[serde(default)]
    pub index: Option<i64>,
}

impl ItemSignature {
    /// Whether this signature shows the feed moved forward from `before`.
    ///
    /// A higher highlighted index or a different URL counts as a move. When no
    /// index is available on either side, a changed media source counts too.
    pub fn advanced_from(&self, before: &ItemSignature) -> bool {
        if self.url != before.url {
            return true;
        }
        match (before.index, self.index) {
            (Some(prev), Some(now)) => now > prev,
            (None, None) => match (&before.media_src, &self.media_src) {
                (Some(prev), Some(now)) => prev != now,
                _ => false,
            },
            _ => false,
        }
    }
}

/// Capture the current signature through the browser.
pub async fn capture_signature(
    session: &dyn BrowserSession,
    selectors: &SelectorConfig,
) -> Result<ItemSignature, BrowserError> {
    let args = vec![
        optional_arg(selectors.media.as_deref()),
        optional_arg(selectors.active_item.as_deref()),
        optional_arg(Some(selectors.feed_item.as_str()).filter(|s| !s.is_empty())),
    ];
    let value = session.evaluate(SIGNATURE_SCRIPT, args).await?;
    serde_json::from_value(value).map_err(|e| BrowserError::Script(format!("bad signature: {}", e)))
}

fn optional_arg(selector: Option<&str>) -> Value {
    selector.map(Value::from).unwrap_or(Value::Null)
}

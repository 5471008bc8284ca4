//! W3C WebDriver session implementation.
//!
//! Attaches to an already running browser through its remote debugging port
//! and speaks the WebDriver HTTP protocol to the driver.

use std::path::Path;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use reqwest::{Client, Method};
use serde_json::{json, Value};
use tokio::time::Duration;
use tracing::{debug, warn};

use crate::config::WebDriverConfig;
use crate::polling::{poll_until, PollSettings};

use super::{BrowserError, BrowserSession, ElementHandle, Key, ELEMENT_KEY};

/// Browser session driven over WebDriver.
pub struct WebDriverSession {
    client: Client,
    base_url: String,
    /// Driver-assigned session id.
    driver_session: String,
    /// Session tag from configuration.
    tag: String,
    poll_interval: Duration,
}

impl WebDriverSession {
    /// Open a driver session attached to the browser listening on `debug_port`.
    pub async fn attach(
        config: &WebDriverConfig,
        tag: &str,
        debug_port: u16,
    ) -> Result<Self, BrowserError> {
        let client = Client::builder()
            .timeout(StdDuration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| BrowserError::ConnectionFailed(e.to_string()))?;
        let base_url = config.url.trim_end_matches('/').to_string();

        let body = attach_capabilities(&config.debugger_host, debug_port);
        let value = send(&client, Method::POST, &format!("{}/session", base_url), Some(body)).await?;
        let driver_session = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| BrowserError::InvalidResponse("missing sessionId".to_string()))?
            .to_string();

        debug!(
            session = %tag,
            driver_session = %driver_session,
            "Attached to browser on port {}",
            debug_port
        );

        Ok(Self {
            client,
            base_url,
            driver_session,
            tag: tag.to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    /// End the driver session. The attached browser keeps running.
    pub async fn detach(&self) -> Result<(), BrowserError> {
        self.command(Method::DELETE, "", None).await.map(|_| ())
    }

    fn session_url(&self, path: &str) -> String {
        format!(
            "{}/session/{}{}",
            self.base_url,
            urlencoding::encode(&self.driver_session),
            path
        )
    }

    fn element_url(&self, element: &ElementHandle, path: &str) -> String {
        self.session_url(&format!(
            "/element/{}{}",
            urlencoding::encode(element.id()),
            path
        ))
    }

    async fn command(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
    ) -> Result<Value, BrowserError> {
        send(&self.client, method, &self.session_url(path), body).await
    }

    async fn find_element(&self, selector: &str) -> Result<ElementHandle, BrowserError> {
        let value = self
            .command(Method::POST, "/element", Some(locator(selector)))
            .await
            .map_err(|e| match e {
                BrowserError::NoSuchElement(_) => BrowserError::NoSuchElement(selector.to_string()),
                other => other,
            })?;
        parse_element(&value)
    }

    async fn is_displayed(&self, element: &ElementHandle) -> Result<bool, BrowserError> {
        let value = send(
            &self.client,
            Method::GET,
            &self.element_url(element, "/displayed"),
            None,
        )
        .await?;
        Ok(value.as_bool().unwrap_or(false))
    }

    async fn viewport_center(&self) -> (i64, i64) {
        let script = "return [Math.floor(window.innerWidth / 2), Math.floor(window.innerHeight / 2)];";
        match self.evaluate(script, Vec::new()).await {
            Ok(Value::Array(dims)) if dims.len() == 2 => (
                dims[0].as_i64().unwrap_or(0),
                dims[1].as_i64().unwrap_or(0),
            ),
            _ => (0, 0),
        }
    }

    async fn perform_actions(&self, actions: Value) -> Result<(), BrowserError> {
        self.command(Method::POST, "/actions", Some(actions))
            .await
            .map(|_| ())
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    fn session_id(&self) -> &str {
        &self.tag
    }

    async fn find_visible(
        &self,
        selector: &str,
        timeout: Duration,
    ) -> Result<Option<ElementHandle>, BrowserError> {
        let settings = PollSettings::new(self.poll_interval, timeout);
        let outcome = poll_until(settings, || async {
            let element = match self.find_element(selector).await {
                Ok(element) => element,
                Err(e) if e.is_missing_element() => return None,
                Err(e) => return Some(Err(e)),
            };
            match self.is_displayed(&element).await {
                Ok(true) => Some(Ok(element)),
                Ok(false) => None,
                Err(e) if e.is_missing_element() => None,
                Err(e) => Some(Err(e)),
            }
        })
        .await;

        match outcome {
            Ok(result) => result.map(Some),
            Err(_) => Ok(None),
        }
    }

    async fn find_hidden(&self, selector: &str, timeout: Duration) -> Result<bool, BrowserError> {
        let settings = PollSettings::new(self.poll_interval, timeout);
        let outcome = poll_until(settings, || async {
            let element = match self.find_element(selector).await {
                Ok(element) => element,
                Err(e) if e.is_missing_element() => return Some(Ok(())),
                Err(e) => return Some(Err(e)),
            };
            match self.is_displayed(&element).await {
                Ok(false) => Some(Ok(())),
                Ok(true) => None,
                Err(e) if e.is_missing_element() => Some(Ok(())),
                Err(e) => Some(Err(e)),
            }
        })
        .await;

        match outcome {
            Ok(result) => result.map(|_| true),
            Err(_) => Ok(false),
        }
    }

    async fn find_all(
        &self,
        scope: Option<&ElementHandle>,
        selector: &str,
    ) -> Result<Vec<ElementHandle>, BrowserError> {
        let url = match scope {
            Some(parent) => self.element_url(parent, "/elements"),
            None => self.session_url("/elements"),
        };
        let value = send(&self.client, Method::POST, &url, Some(locator(selector))).await?;
        match value {
            Value::Array(items) => items.iter().map(parse_element).collect(),
            other => Err(BrowserError::InvalidResponse(format!(
                "expected element list, got {}",
                other
            ))),
        }
    }

    async fn element_text(&self, element: &ElementHandle) -> Result<String, BrowserError> {
        let value = send(&self.client, Method::GET, &self.element_url(element, "/text"), None).await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn click(&self, element: &ElementHandle) -> Result<(), BrowserError> {
        send(
            &self.client,
            Method::POST,
            &self.element_url(element, "/click"),
            Some(json!({})),
        )
        .await
        .map(|_| ())
    }

    async fn evaluate(&self, script: &str, args: Vec<Value>) -> Result<Value, BrowserError> {
        self.command(
            Method::POST,
            "/execute/sync",
            Some(json!({ "script": script, "args": args })),
        )
        .await
    }

    async fn scroll(&self, delta_y: i64) -> Result<(), BrowserError> {
        let (x, y) = self.viewport_center().await;
        self.perform_actions(wheel_actions(x, y, delta_y)).await
    }

    async fn press_key(&self, key: Key) -> Result<(), BrowserError> {
        self.perform_actions(key_actions(key)).await
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.command(Method::POST, "/url", Some(json!({ "url": url })))
            .await
            .map(|_| ())
    }

    async fn set_download_dir(&self, dir: &Path) -> Result<(), BrowserError> {
        let params = json!({
            "cmd": "Browser.setDownloadBehavior",
            "params": {
                "behavior": "allow",
                "downloadPath": dir.to_string_lossy(),
            },
        });
        self.command(Method::POST, "/goog/cdp/execute", Some(params))
            .await
            .map(|_| ())
    }
}

/// Send one WebDriver request and unwrap its `value` field.
async fn send(
    client: &Client,
    method: Method,
    url: &str,
    body: Option<Value>,
) -> Result<Value, BrowserError> {
    let mut request = client.request(method, url);
    if let Some(body) = body {
        request = request.json(&body);
    }

    let response = request.send().await.map_err(|e| {
        if e.is_timeout() {
            BrowserError::Timeout
        } else if e.is_connect() {
            BrowserError::ConnectionFailed(e.to_string())
        } else {
            BrowserError::InvalidResponse(e.to_string())
        }
    })?;

    let status = response.status();
    let payload: Value = response
        .json()
        .await
        .map_err(|e| BrowserError::InvalidResponse(e.to_string()))?;

    if !status.is_success() {
        let err = map_error(&payload);
        if !err.is_missing_element() {
            warn!("WebDriver request to {} failed with HTTP {}: {}", url, status, err);
        }
        return Err(err);
    }

    Ok(payload.get("value").cloned().unwrap_or(Value::Null))
}

/// New-session payload attaching to an existing browser.
fn attach_capabilities(host: &str, debug_port: u16) -> Value {
    json!({
        "capabilities": {
            "alwaysMatch": {
                "browserName": "chrome",
                "goog:chromeOptions": {
                    "debuggerAddress": format!("{}:{}", host, debug_port),
                },
            },
        },
    })
}

fn locator(selector: &str) -> Value {
    json!({ "using": "css selector", "value": selector })
}

fn parse_element(value: &Value) -> Result<ElementHandle, BrowserError> {
    value
        .get(ELEMENT_KEY)
        .and_then(Value::as_str)
        .map(ElementHandle::new)
        .ok_or_else(|| BrowserError::InvalidResponse(format!("not an element reference: {}", value)))
}

/// Translate a W3C error payload into a [`BrowserError`].
fn map_error(payload: &Value) -> BrowserError {
    let value = payload.get("value").unwrap_or(payload);
    let error = value
        .get("error")
        .and_then(Value::as_str)
        .unwrap_or("unknown error")
        .to_string();
    let message = value
        .get("message")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    match error.as_str() {
        "no such element" => BrowserError::NoSuchElement(message),
        "stale element reference" => BrowserError::StaleElement(message),
        "timeout" | "script timeout" => BrowserError::Timeout,
        "javascript error" => BrowserError::Script(message),
        _ => BrowserError::Protocol { error, message },
    }
}

fn wheel_actions(x: i64, y: i64, delta_y: i64) -> Value {
    json!({
        "actions": [{
            "type": "wheel",
            "id": "wheel",
            "actions": [{
                "type": "scroll",
                "x": x,
                "y": y,
                "deltaX": 0,
                "deltaY": delta_y,
                "origin": "viewport",
            }],
        }],
    })
}

fn key_actions(key: Key) -> Value {
    let code = key.webdriver_code();
    json!({
        "actions": [{
            "type": "key",
            "id": "keyboard",
            "actions": [
                { "type": "keyDown", "value": code },
                { "type": "keyUp", "value": code },
            ],
        }],
    })
}

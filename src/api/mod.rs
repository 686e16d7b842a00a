//! Host-facing operation envelope.
//!
//! The host shell (window management, job queue) talks to the engine
//! exclusively through [`Engine`]. Every operation returns a uniform
//! `{success, ...}` envelope; no raw error ever crosses this boundary, and
//! every page-requiring call fails with the named "no active page"
//! condition when nothing is open yet.

use std::path::PathBuf;
use std::time::Duration;

use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::behavior::{HumanBehavior, ScrollDirection};
use crate::error::{EngineError, Result};
use crate::fingerprint::SessionFingerprint;
use crate::proxy::{ProxyDescriptor, ProxyRotator, ProxyScheme};
use crate::session::{LaunchOptions, Session};

/// Uniform result envelope for host calls.
#[derive(Debug, Clone, Serialize)]
pub struct CallResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CallResult {
    fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    fn with_data(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn failure(error: impl std::fmt::Display) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }

    fn from_result(result: Result<serde_json::Value>) -> Self {
        match result {
            Ok(serde_json::Value::Null) => Self::ok(),
            Ok(data) => Self::with_data(data),
            Err(e) => Self::failure(e),
        }
    }
}

/// Proxy part of the host launch configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ProxyConfig {
    pub server: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Launch configuration consumed from the host. Headful is the default.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LaunchConfig {
    pub headless: bool,
    pub profile_path: Option<PathBuf>,
    pub proxy: Option<ProxyConfig>,
}

/// Engine facade: one optional session, one shared proxy pool.
#[derive(Default)]
pub struct Engine {
    rotator: ProxyRotator,
    session: Option<Session>,
    behavior: Option<HumanBehavior>,
}

impl Engine {
    pub fn new() -> Self {
        Self::default()
    }

    /// The proxy pool, for programmatic setup.
    pub fn rotator(&self) -> &ProxyRotator {
        &self.rotator
    }

    fn behavior_mut(&mut self) -> Result<&mut HumanBehavior> {
        self.behavior.as_mut().ok_or(EngineError::NoActivePage)
    }

    fn session_ref(&self) -> Result<&Session> {
        self.session.as_ref().ok_or(EngineError::NoActivePage)
    }

    /// Launch a stealth session with a fresh fingerprint.
    ///
    /// An explicit proxy in the config wins; otherwise the next unused
    /// proxy is drawn from the pool when one is available.
    pub async fn launch(&mut self, config: LaunchConfig) -> CallResult {
        let proxy = match &config.proxy {
            Some(p) => {
                // Reuse the line grammar so the scheme comes from the URI;
                // explicit credentials override any embedded ones.
                let mut descriptor = ProxyDescriptor::parse_line(&p.server)
                    .unwrap_or_else(|| ProxyDescriptor::new(p.server.clone(), ProxyScheme::Http));
                if p.username.is_some() {
                    descriptor.username = p.username.clone();
                    descriptor.password = p.password.clone();
                }
                Some(descriptor)
            }
            None => self.rotator.unused().await,
        };

        let fingerprint = SessionFingerprint::generate();
        let options = LaunchOptions {
            headless: config.headless,
            profile_path: config.profile_path.clone(),
            executable: None,
        };

        match Session::launch(fingerprint, proxy, options).await {
            Ok(session) => {
                self.behavior = None;
                self.session = Some(session);
                CallResult::ok()
            }
            Err(e) => CallResult::failure(e),
        }
    }

    /// Open a page in the current session and make it active.
    pub async fn new_page(&mut self) -> CallResult {
        let result: Result<serde_json::Value> = async {
            let session = self.session.as_mut().ok_or(EngineError::NoActivePage)?;
            let page = session.new_page().await?.clone();
            self.behavior = Some(HumanBehavior::new(page));
            Ok(serde_json::Value::Null)
        }
        .await;
        CallResult::from_result(result)
    }

    pub async fn navigate(&self, url: &str) -> CallResult {
        let result = async {
            self.session_ref()?.navigate(url).await?;
            Ok(json!({ "url": url }))
        }
        .await;
        CallResult::from_result(result)
    }

    /// Screenshot of the active page, base64-encoded for the envelope.
    pub async fn screenshot(&self) -> CallResult {
        let result = async {
            let png = self.session_ref()?.screenshot().await?;
            Ok(json!({
                "base64": base64::engine::general_purpose::STANDARD.encode(png)
            }))
        }
        .await;
        CallResult::from_result(result)
    }

    pub async fn click(&mut self, selector: &str) -> CallResult {
        let result = async {
            self.behavior_mut()?.click(selector).await?;
            Ok(serde_json::Value::Null)
        }
        .await;
        CallResult::from_result(result)
    }

    pub async fn type_text(&mut self, selector: &str, text: &str) -> CallResult {
        let result = async {
            self.behavior_mut()?.type_text(selector, text, true).await?;
            Ok(serde_json::Value::Null)
        }
        .await;
        CallResult::from_result(result)
    }

    pub async fn scroll(&mut self, direction: &str) -> CallResult {
        let direction = match direction {
            "up" => ScrollDirection::Up,
            "down" => ScrollDirection::Down,
            other => return CallResult::failure(format!("unknown scroll direction: {other}")),
        };
        let result = async {
            self.behavior_mut()?.scroll(direction).await?;
            Ok(serde_json::Value::Null)
        }
        .await;
        CallResult::from_result(result)
    }

    pub async fn wait_and_click(&mut self, selector: &str, timeout_ms: u64) -> CallResult {
        let result = async {
            self.behavior_mut()?
                .wait_and_click(selector, Duration::from_millis(timeout_ms))
                .await?;
            Ok(serde_json::Value::Null)
        }
        .await;
        CallResult::from_result(result)
    }

    pub async fn simulate_reading(&mut self, duration_ms: u64) -> CallResult {
        let result = async {
            self.behavior_mut()?
                .simulate_reading(Duration::from_millis(duration_ms))
                .await?;
            Ok(serde_json::Value::Null)
        }
        .await;
        CallResult::from_result(result)
    }

    pub async fn get_content(&self) -> CallResult {
        let result = async {
            let html = self.session_ref()?.content().await?;
            Ok(json!({ "content": html }))
        }
        .await;
        CallResult::from_result(result)
    }

    pub async fn evaluate(&self, script: &str) -> CallResult {
        let result = async {
            let value = self.session_ref()?.evaluate(script).await?;
            Ok(json!({ "result": value }))
        }
        .await;
        CallResult::from_result(result)
    }

    /// Load a proxy list file into the pool. Best-effort: an unreadable
    /// file is reported in the envelope, never propagated.
    pub async fn load_proxies(&self, path: &str) -> CallResult {
        match self.rotator.load_from_file(path).await {
            Ok(loaded) => CallResult::with_data(json!({ "loaded": loaded })),
            Err(e) => {
                warn!(path, error = %e, "proxy list load failed");
                CallResult::failure(e)
            }
        }
    }

    /// Add a single proxy given in any supported line form.
    pub async fn add_proxy(&self, line: &str) -> CallResult {
        match ProxyDescriptor::parse_line(line) {
            Some(proxy) => {
                self.rotator.add(proxy).await;
                CallResult::ok()
            }
            None => CallResult::failure(format!("unparseable proxy: {line}")),
        }
    }

    pub async fn proxy_count(&self) -> CallResult {
        CallResult::with_data(json!({ "count": self.rotator.count().await }))
    }

    /// Tear down the current session, if any.
    pub async fn close(&mut self) -> CallResult {
        self.behavior = None;
        match self.session.take() {
            Some(session) => match session.close().await {
                Ok(()) => CallResult::ok(),
                Err(e) => CallResult::failure(e),
            },
            None => CallResult::ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_page_calls_fail_with_no_active_page() {
        let mut engine = Engine::new();

        for result in [
            engine.navigate("https://example.com").await,
            engine.click("#go").await,
            engine.type_text("#q", "hi").await,
            engine.scroll("down").await,
            engine.get_content().await,
            engine.screenshot().await,
        ] {
            assert!(!result.success);
            assert_eq!(result.error.as_deref(), Some("no active page"));
        }
    }

    #[tokio::test]
    async fn test_scroll_rejects_unknown_direction() {
        let mut engine = Engine::new();
        let result = engine.scroll("sideways").await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("sideways"));
    }

    #[tokio::test]
    async fn test_proxy_ops_through_envelope() {
        let engine = Engine::new();

        let added = engine.add_proxy("1.2.3.4:8080").await;
        assert!(added.success);

        let bad = engine.add_proxy("not a proxy").await;
        assert!(!bad.success);
        assert!(bad.error.unwrap().contains("not a proxy"));

        let count = engine.proxy_count().await;
        assert!(count.success);
        assert_eq!(count.data.unwrap()["count"], 1);
    }

    #[tokio::test]
    async fn test_load_proxies_missing_file_is_reported_not_thrown() {
        let engine = Engine::new();
        let result = engine.load_proxies("/nonexistent/proxies.txt").await;
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_envelope_serialization_shape() {
        let ok = CallResult::with_data(json!({ "count": 2 }));
        let v = serde_json::to_value(&ok).unwrap();
        assert_eq!(v["success"], true);
        assert_eq!(v["data"]["count"], 2);
        assert!(v.get("error").is_none());

        let err = CallResult::failure("no active page");
        let v = serde_json::to_value(&err).unwrap();
        assert_eq!(v["success"], false);
        assert_eq!(v["error"], "no active page");
    }

    #[test]
    fn test_launch_config_defaults_headful() {
        let config: LaunchConfig = serde_json::from_str("{}").unwrap();
        assert!(!config.headless);
        assert!(config.proxy.is_none());

        let config: LaunchConfig = serde_json::from_str(
            r#"{ "headless": true, "proxy": { "server": "http://1.2.3.4:8080" } }"#,
        )
        .unwrap();
        assert!(config.headless);
        assert_eq!(config.proxy.unwrap().server, "http://1.2.3.4:8080");
    }
}

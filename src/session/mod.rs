//! Stealth session launch and lifetime.
//!
//! A [`Session`] owns one browser process, the fingerprint it was launched
//! with, and at most one active page. The launcher composes the Chrome
//! argument list, registers the evasion payload so it runs in every new
//! document before site code, and applies every fingerprint-derived
//! override (UA, viewport metrics, locale, timezone, geolocation,
//! permissions, client-hint headers) from the one fingerprint the session
//! was created with.

use std::path::PathBuf;
use std::time::Duration;

use chromiumoxide::browser::{Browser, BrowserConfig};
use chromiumoxide::cdp::browser_protocol::browser::{GrantPermissionsParams, PermissionType};
use chromiumoxide::cdp::browser_protocol::emulation::{
    SetDeviceMetricsOverrideParams, SetGeolocationOverrideParams, SetLocaleOverrideParams,
    SetTimezoneOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::network::{Headers, SetExtraHttpHeadersParams};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat,
};
use chromiumoxide::page::ScreenshotParams;
use chromiumoxide::Page;
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{EngineError, Result};
use crate::fingerprint::SessionFingerprint;
use crate::proxy::ProxyDescriptor;
use crate::stealth::build_init_script;

/// Chrome binaries probed when no explicit executable is configured.
const CHROME_CANDIDATES: &[&str] = &[
    "google-chrome",
    "google-chrome-stable",
    "chromium",
    "chromium-browser",
];

/// Launch configuration consumed from the host collaborator.
///
/// Headful is the stealthier default; headless is opt-in.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub headless: bool,
    /// Persistent on-disk profile for cookie/session continuity across
    /// runs. When set, the profile and the browser share a lifetime.
    pub profile_path: Option<PathBuf>,
    /// Explicit Chrome binary; discovered on PATH when absent.
    pub executable: Option<PathBuf>,
}

/// One stealth browser session: fingerprint + optional proxy + browser
/// process + at most one tracked page.
pub struct Session {
    pub fingerprint: SessionFingerprint,
    pub proxy: Option<ProxyDescriptor>,
    browser: Browser,
    handler_task: JoinHandle<()>,
    init_script: String,
    active_page: Option<Page>,
}

/// Compose the Chrome argument list for a fingerprint + proxy combination.
///
/// Disables the automation indicator blink feature and the background
/// throttling that makes automated timing distinguishable from a
/// foregrounded interactive browser.
fn stealth_args(fingerprint: &SessionFingerprint, proxy: Option<&ProxyDescriptor>) -> Vec<String> {
    let mut args = vec![
        "--disable-blink-features=AutomationControlled".to_string(),
        "--disable-infobars".to_string(),
        "--disable-background-timer-throttling".to_string(),
        "--disable-backgrounding-occluded-windows".to_string(),
        "--disable-renderer-backgrounding".to_string(),
        "--disable-ipc-flooding-protection".to_string(),
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-sync".to_string(),
        "--metrics-recording-only".to_string(),
        "--password-store=basic".to_string(),
        "--use-mock-keychain".to_string(),
        format!(
            "--window-size={},{}",
            fingerprint.viewport.width, fingerprint.viewport.height
        ),
    ];
    if let Some(proxy) = proxy {
        // Credentials are not forwarded here; network-level proxy auth is
        // outside the engine. Connection failures surface at navigation.
        args.push(format!("--proxy-server={}", proxy.server));
    }
    args
}

/// Locate a Chrome binary on PATH.
fn find_chrome() -> Option<PathBuf> {
    CHROME_CANDIDATES
        .iter()
        .find_map(|name| which::which(name).ok())
}

impl Session {
    /// Launch a browser configured for the given fingerprint.
    ///
    /// Binary launch failure is fatal and propagates; no retry happens
    /// here. A bad proxy is only observable once navigation is attempted.
    pub async fn launch(
        fingerprint: SessionFingerprint,
        proxy: Option<ProxyDescriptor>,
        options: LaunchOptions,
    ) -> Result<Self> {
        let mut builder = BrowserConfig::builder();

        if !options.headless {
            builder = builder.with_head();
        }
        if let Some(profile) = &options.profile_path {
            // Persistent-context mode: profile and browser share a lifetime.
            builder = builder.user_data_dir(profile);
        }
        if let Some(executable) = &options.executable {
            builder = builder.chrome_executable(executable);
        } else if let Some(found) = find_chrome() {
            debug!(path = %found.display(), "discovered chrome binary");
            builder = builder.chrome_executable(found);
        }

        builder = builder.window_size(fingerprint.viewport.width, fingerprint.viewport.height);
        for arg in stealth_args(&fingerprint, proxy.as_ref()) {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| EngineError::Setup(format!("invalid browser config: {e}")))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| EngineError::Setup(format!("failed to launch browser: {e}")))?;

        // Pump CDP events until the browser goes away.
        let handler_task = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if event.is_err() {
                    break;
                }
            }
        });

        info!(
            headless = options.headless,
            proxy = proxy.as_ref().map(|p| p.server.as_str()),
            ua = %fingerprint.user_agent,
            "stealth session launched"
        );

        // Rendered once per session: every page of this session injects the
        // exact same payload, keeping the identity stable across loads.
        let init_script = build_init_script(&fingerprint);

        Ok(Self {
            fingerprint,
            proxy,
            browser,
            handler_task,
            init_script,
            active_page: None,
        })
    }

    /// Open a page and make it the session's active page.
    ///
    /// The evasion payload is registered before any navigation, so it runs
    /// in every document this page ever loads. Header overrides that cannot
    /// be set at context scope are re-asserted here per page.
    pub async fn new_page(&mut self) -> Result<&Page> {
        let page = self
            .browser
            .new_page("about:blank")
            .await
            .map_err(EngineError::cdp)?;

        page.execute(
            AddScriptToEvaluateOnNewDocumentParams::builder()
                .source(self.init_script.clone())
                .build()
                .map_err(EngineError::Cdp)?,
        )
        .await
        .map_err(EngineError::cdp)?;

        self.apply_fingerprint_overrides(&page).await?;

        Ok(&*self.active_page.insert(page))
    }

    /// Apply every fingerprint-derived override to a fresh page. All values
    /// come from the one session fingerprint; nothing here re-randomizes.
    async fn apply_fingerprint_overrides(&self, page: &Page) -> Result<()> {
        let fp = &self.fingerprint;

        page.set_user_agent(fp.user_agent.as_str())
            .await
            .map_err(EngineError::cdp)?;

        page.execute(
            SetDeviceMetricsOverrideParams::builder()
                .width(fp.viewport.width as i64)
                .height(fp.viewport.height as i64)
                .device_scale_factor(1.0)
                .mobile(false)
                .build()
                .map_err(EngineError::Cdp)?,
        )
        .await
        .map_err(EngineError::cdp)?;

        page.execute(
            SetTimezoneOverrideParams::builder()
                .timezone_id(fp.timezone_id.clone())
                .build()
                .map_err(EngineError::Cdp)?,
        )
        .await
        .map_err(EngineError::cdp)?;

        page.execute(SetLocaleOverrideParams::builder().locale(fp.locale.clone()).build())
            .await
            .map_err(EngineError::cdp)?;

        page.execute(
            SetGeolocationOverrideParams::builder()
                .latitude(fp.geolocation.latitude)
                .longitude(fp.geolocation.longitude)
                .accuracy(50.0)
                .build(),
        )
        .await
        .map_err(EngineError::cdp)?;

        // Grants limited to geolocation and notifications; anything wider
        // is itself unusual for a real profile.
        page.execute(
            GrantPermissionsParams::builder()
                .permissions(vec![
                    PermissionType::Geolocation,
                    PermissionType::Notifications,
                ])
                .build()
                .map_err(EngineError::Cdp)?,
        )
        .await
        .map_err(EngineError::cdp)?;

        let headers = serde_json::json!({
            "Accept-Language": fp.accept_language(),
            "Sec-CH-UA": fp.sec_ch_ua(),
            "Sec-CH-UA-Platform": fp.platform.sec_ch_ua_platform(),
            "Sec-CH-UA-Mobile": "?0",
        });
        page.execute(
            SetExtraHttpHeadersParams::builder()
                .headers(Headers::new(headers))
                .build()
                .map_err(EngineError::Cdp)?,
        )
        .await
        .map_err(EngineError::cdp)?;

        Ok(())
    }

    /// The page currently driven by this session, if one is open.
    pub fn active_page(&self) -> Result<&Page> {
        self.active_page.as_ref().ok_or(EngineError::NoActivePage)
    }

    /// Navigate the active page and wait for the load to settle.
    pub async fn navigate(&self, url: &str) -> Result<()> {
        let page = self.active_page()?;
        page.goto(url)
            .await
            .map_err(|e| EngineError::Navigation(e.to_string()))?;
        page.wait_for_navigation()
            .await
            .map_err(|e| EngineError::Navigation(e.to_string()))?;
        debug!(url, "navigated");
        Ok(())
    }

    /// Capture a PNG screenshot of the active page.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let page = self.active_page()?;
        page.screenshot(
            ScreenshotParams::builder()
                .format(CaptureScreenshotFormat::Png)
                .build(),
        )
        .await
        .map_err(EngineError::cdp)
    }

    /// Full HTML of the active page.
    pub async fn content(&self) -> Result<String> {
        let page = self.active_page()?;
        page.content().await.map_err(EngineError::cdp)
    }

    /// Evaluate a script in the active page, returning its JSON value.
    pub async fn evaluate(&self, script: &str) -> Result<serde_json::Value> {
        let page = self.active_page()?;
        let result = page.evaluate(script).await.map_err(EngineError::cdp)?;
        Ok(result.value().cloned().unwrap_or(serde_json::Value::Null))
    }

    /// Tear the session down: page, browser process, handler task.
    pub async fn close(mut self) -> Result<()> {
        self.active_page = None;
        if let Err(e) = self.browser.close().await {
            warn!(error = %e, "browser close reported an error");
        }
        let _ = self.browser.wait().await;
        self.handler_task.abort();
        Ok(())
    }
}

/// Poll until a selector is present and visible, or the deadline passes.
pub async fn wait_for_selector(page: &Page, selector: &str, timeout: Duration) -> Result<()> {
    let deadline = tokio::time::Instant::now() + timeout;
    let probe = format!(
        r#"(() => {{
            const el = document.querySelector({selector});
            if (!el) return false;
            const rect = el.getBoundingClientRect();
            return rect.width > 0 && rect.height > 0;
        }})()"#,
        selector = serde_json::to_string(selector).unwrap_or_default(),
    );

    loop {
        let visible = page
            .evaluate(probe.as_str())
            .await
            .ok()
            .and_then(|r| r.value().and_then(|v| v.as_bool()))
            .unwrap_or(false);
        if visible {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(EngineError::Timeout {
                selector: selector.to_string(),
                timeout_ms: timeout.as_millis() as u64,
            });
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}

//! Browser session control: one disposable stealth session per target.
//!
//! Sessions are single-use: launch, navigate, capture, tear down. A session
//! reused across targets accumulates a behavioral fingerprint (cookies,
//! timing history, cache state) that ties requests together; a fresh process
//! per target keeps each visit independent.

use std::path::Path;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chromiumoxide::browser::BrowserConfig;
use chromiumoxide::cdp::browser_protocol::input::{
    DispatchMouseEventParams, DispatchMouseEventType, MouseButton,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, CaptureScreenshotFormat, CaptureScreenshotParams,
    Viewport as ClipViewport,
};
use chromiumoxide::handler::viewport::Viewport;
use chromiumoxide::{Browser, Page};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::challenge::{detector, ChallengeSurface, SLIDER_HANDLE_SELECTORS};
use crate::core::error::HarvestError;
use crate::core::types::{PathPoint, Rect};
use crate::scraping::stealth;

// ── Browser executable discovery ─────────────────────────────────────────────

/// Find a usable Chromium-family browser executable.
///
/// Resolution order:
/// 1. `CHROME_EXECUTABLE` env var (explicit override)
/// 2. PATH scan — finds package-manager installs on all platforms.
/// 3. OS-specific well-known install paths.
pub fn find_browser_executable() -> Option<String> {
    if let Ok(p) = std::env::var("CHROME_EXECUTABLE") {
        if Path::new(&p).exists() {
            return Some(p);
        }
    }

    if let Ok(path_var) = std::env::var("PATH") {
        let candidates = [
            "brave-browser",
            "brave",
            "google-chrome",
            "chromium",
            "chromium-browser",
            "chrome",
        ];
        for dir in std::env::split_paths(&path_var) {
            for exe in candidates {
                let full = dir.join(exe);
                if full.exists() {
                    return Some(full.to_string_lossy().to_string());
                }
            }
        }
    }

    #[cfg(target_os = "macos")]
    {
        let candidates = [
            "/Applications/Brave Browser.app/Contents/MacOS/Brave Browser",
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "linux")]
    {
        let candidates = [
            "/usr/bin/brave-browser",
            "/usr/bin/brave",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/usr/bin/google-chrome",
            "/usr/local/bin/chromium",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    #[cfg(target_os = "windows")]
    {
        let candidates = [
            r"C:\Program Files\BraveSoftware\Brave-Browser\Application\brave.exe",
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Microsoft\Edge\Application\msedge.exe",
        ];
        for c in candidates {
            if Path::new(c).exists() {
                return Some(c.to_string());
            }
        }
    }

    None
}

// ── Session launch ───────────────────────────────────────────────────────────

/// Launch parameters for one session.
#[derive(Debug, Clone, Default)]
pub struct SessionOptions {
    /// Explicit executable; auto-discovered when `None`.
    pub executable: Option<String>,
    /// Proxy endpoint for this session, already chosen by the caller.
    pub proxy: Option<String>,
    /// Browser profile (user-data) directory; throwaway default when `None`.
    pub profile_dir: Option<String>,
    pub viewport_width: u32,
    pub viewport_height: u32,
}

impl SessionOptions {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            executable: None,
            proxy: None,
            profile_dir: None,
            viewport_width: width,
            viewport_height: height,
        }
    }
}

/// Build a `BrowserConfig` for headless operation with stealth defaults.
///
/// Flags chosen for compatibility with CI / restricted environments
/// (`--no-sandbox`, `--disable-dev-shm-usage`) and stealth —
/// `--disable-blink-features=AutomationControlled` hides the
/// `navigator.webdriver` flag; the UA is drawn at random per session.
fn build_session_config(exe: &str, opts: &SessionOptions) -> Result<BrowserConfig, HarvestError> {
    let ua = stealth::random_user_agent();
    let (width, height) = (opts.viewport_width, opts.viewport_height);

    let mut builder = BrowserConfig::builder()
        .chrome_executable(exe)
        .viewport(Viewport {
            width,
            height,
            device_scale_factor: Some(1.0),
            emulating_mobile: false,
            is_landscape: true,
            has_touch: false,
        })
        .window_size(width, height)
        .arg("--disable-gpu")
        .arg("--no-sandbox")
        .arg("--disable-setuid-sandbox")
        .arg("--disable-dev-shm-usage")
        .arg("--disable-extensions")
        .arg("--disable-background-networking")
        .arg("--disable-sync")
        .arg("--disable-translate")
        .arg("--disable-crash-reporter")
        .arg("--disable-breakpad")
        .arg("--no-first-run")
        .arg("--no-default-browser-check")
        .arg("--hide-scrollbars")
        .arg("--mute-audio")
        // Stealth: suppress the CDP automation fingerprint
        .arg("--disable-blink-features=AutomationControlled")
        .arg(format!("--user-agent={}", ua));

    if let Some(proxy) = opts.proxy.as_deref() {
        builder = builder.arg(format!("--proxy-server={}", proxy));
    }
    if let Some(profile) = opts.profile_dir.as_deref() {
        builder = builder.user_data_dir(profile);
    }

    builder
        .build()
        .map_err(|e| HarvestError::Launch(format!("browser config: {e}")))
}

/// One disposable browser session.
pub struct Session {
    browser: Browser,
    page: Page,
    handler: JoinHandle<()>,
}

impl Session {
    /// Launch a stealth-configured browser and open a blank page with the
    /// stealth script armed. Failure here is fatal to the run.
    pub async fn open(opts: &SessionOptions) -> Result<Self, HarvestError> {
        let exe = opts
            .executable
            .clone()
            .or_else(find_browser_executable)
            .ok_or_else(|| {
                HarvestError::Launch(
                    "no browser found — install Brave, Chrome, or Chromium, or set CHROME_EXECUTABLE"
                        .to_string(),
                )
            })?;

        let config = build_session_config(&exe, opts)?;

        info!(
            "Launching session ({}{})",
            exe,
            opts.proxy
                .as_deref()
                .map(|p| format!(", proxy {p}"))
                .unwrap_or_default()
        );
        let (browser, mut handler) = Browser::launch(config)
            .await
            .map_err(|e| HarvestError::Launch(format!("{exe}: {e}")))?;

        let handler = tokio::spawn(async move {
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    warn!("CDP handler error: {}", e);
                }
            }
        });

        let page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| HarvestError::Launch(format!("open page: {e}")))?;

        page.execute(AddScriptToEvaluateOnNewDocumentParams::new(
            stealth::universal_stealth_script().to_string(),
        ))
        .await
        .map_err(|e| HarvestError::Launch(format!("stealth injection: {e}")))?;

        Ok(Self {
            browser,
            page,
            handler,
        })
    }

    /// Navigate to `url`, bounded by `timeout`.
    pub async fn navigate(&self, url: &str, timeout: Duration) -> Result<(), HarvestError> {
        debug!("Navigating to {}", url);
        match tokio::time::timeout(timeout, self.page.goto(url)).await {
            Err(_) => Err(HarvestError::NavigationTimeout(timeout)),
            Ok(Err(e)) => Err(HarvestError::Navigation(e.to_string())),
            Ok(Ok(_)) => Ok(()),
        }
    }

    /// Raw page markup.
    pub async fn content(&self) -> Result<String, HarvestError> {
        self.page
            .content()
            .await
            .map_err(|e| HarvestError::Navigation(format!("content capture: {e}")))
    }

    /// PNG screenshot of a viewport region.
    pub async fn screenshot_region(&self, region: Rect) -> Result<Vec<u8>, HarvestError> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .clip(ClipViewport {
                x: region.x as f64,
                y: region.y as f64,
                width: region.width as f64,
                height: region.height as f64,
                scale: 1.0,
            })
            .build();
        self.capture(params).await
    }

    /// PNG screenshot of the full viewport, for diagnostics.
    pub async fn screenshot_full(&self) -> Result<Vec<u8>, HarvestError> {
        let params = CaptureScreenshotParams::builder()
            .format(CaptureScreenshotFormat::Png)
            .build();
        self.capture(params).await
    }

    async fn capture(&self, params: CaptureScreenshotParams) -> Result<Vec<u8>, HarvestError> {
        let resp = self
            .page
            .execute(params)
            .await
            .map_err(|e| HarvestError::Navigation(format!("screenshot: {e}")))?;
        let data_b64: &str = resp.data.as_ref();
        BASE64
            .decode(data_b64.as_bytes())
            .map_err(|e| HarvestError::Navigation(format!("screenshot decode: {e}")))
    }

    /// Smooth scroll by `dy` pixels (negative scrolls up).
    pub async fn scroll_by(&self, dy: i32) -> Result<(), HarvestError> {
        self.page
            .evaluate(format!(
                "window.scrollBy({{top: {}, behavior: 'smooth'}});",
                dy
            ))
            .await
            .map_err(|e| HarvestError::Navigation(format!("scroll: {e}")))?;
        Ok(())
    }

    /// Wait until the page network goes idle (no new resource entries for
    /// `quiet_ms` consecutive ms) or until `timeout_ms` elapses.
    ///
    /// Polls `performance.getEntriesByType("resource").length` — a
    /// networkidle heuristic that works without CDP Network events.
    pub async fn wait_until_stable(&self, quiet_ms: u64, timeout_ms: u64) {
        let poll_ms = 250u64;
        let start = std::time::Instant::now();
        let mut last_count: u64 = 0;
        let mut stable_since = std::time::Instant::now();

        loop {
            if start.elapsed().as_millis() as u64 >= timeout_ms {
                debug!("wait_until_stable: timeout after {}ms", timeout_ms);
                return;
            }

            let count: u64 = self
                .page
                .evaluate("performance.getEntriesByType('resource').length")
                .await
                .ok()
                .and_then(|v| v.into_value::<serde_json::Value>().ok())
                .and_then(|j| j.as_u64())
                .unwrap_or(0);

            let ready_complete: bool = self
                .page
                .evaluate("document.readyState")
                .await
                .ok()
                .and_then(|v| v.into_value::<serde_json::Value>().ok())
                .and_then(|j| j.as_str().map(|s| s == "complete"))
                .unwrap_or(false);

            if !ready_complete {
                stable_since = std::time::Instant::now();
                last_count = count;
            } else if count != last_count {
                last_count = count;
                stable_since = std::time::Instant::now();
            } else if stable_since.elapsed().as_millis() as u64 >= quiet_ms {
                debug!(
                    "wait_until_stable: idle after {}ms ({} resources)",
                    start.elapsed().as_millis(),
                    count
                );
                return;
            }

            tokio::time::sleep(Duration::from_millis(poll_ms)).await;
        }
    }

    /// Tear the session down. Close errors are logged, never propagated — a
    /// capture that already succeeded must not be shadowed by teardown.
    pub async fn close(mut self) {
        if let Err(e) = self.browser.close().await {
            warn!("Browser close error (non-fatal): {}", e);
        }
        self.handler.abort();
    }
}

// ── Live challenge surface ───────────────────────────────────────────────────

#[async_trait::async_trait]
impl ChallengeSurface for Session {
    async fn frame_present(&self) -> Result<bool, HarvestError> {
        let val = self
            .page
            .evaluate(detector::frame_probe_script())
            .await
            .map_err(|e| HarvestError::Navigation(format!("frame probe: {e}")))?;
        Ok(val.into_value::<bool>().unwrap_or(false))
    }

    async fn page_markup(&self) -> Result<String, HarvestError> {
        self.content().await
    }

    async fn click_first(
        &self,
        selectors: &[String],
        timeout: Duration,
    ) -> Result<bool, HarvestError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for selector in selectors {
                let sel_json =
                    serde_json::to_string(selector).unwrap_or_else(|_| "\"\"".to_string());
                let js = format!(
                    r#"(() => {{
                        const el = document.querySelector({sel_json});
                        if (!el) return false;
                        el.click();
                        return true;
                    }})()"#
                );
                let clicked = self
                    .page
                    .evaluate(js)
                    .await
                    .ok()
                    .and_then(|v| v.into_value::<bool>().ok())
                    .unwrap_or(false);
                if clicked {
                    debug!("confirmation matched: {}", selector);
                    return Ok(true);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(false);
            }
            tokio::time::sleep(Duration::from_millis(150)).await;
        }
    }

    async fn capture_region(&self, region: Rect) -> Result<Vec<u8>, HarvestError> {
        self.screenshot_region(region).await
    }

    async fn slider_handle_origin(&self) -> Result<Option<(f64, f64)>, HarvestError> {
        let selectors =
            serde_json::to_string(SLIDER_HANDLE_SELECTORS).unwrap_or_else(|_| "[]".to_string());
        let js = format!(
            r#"(() => {{
                for (const sel of {selectors}) {{
                    const el = document.querySelector(sel);
                    if (el) {{
                        const r = el.getBoundingClientRect();
                        return [r.x + r.width / 2, r.y + r.height / 2];
                    }}
                }}
                return null;
            }})()"#
        );
        let val = self
            .page
            .evaluate(js)
            .await
            .map_err(|e| HarvestError::Navigation(format!("handle probe: {e}")))?;
        Ok(val.into_value::<Option<(f64, f64)>>().unwrap_or(None))
    }

    async fn replay_pointer_path(&self, path: &[PathPoint]) -> Result<(), HarvestError> {
        let Some(first) = path.first() else {
            return Ok(());
        };
        let last = path.last().unwrap_or(first);

        let press = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MousePressed)
            .x(first.x)
            .y(first.y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(HarvestError::ChallengeUnresolved)?;
        self.page
            .execute(press)
            .await
            .map_err(|e| HarvestError::ChallengeUnresolved(format!("press: {e}")))?;
        tokio::time::sleep(first.pause).await;

        for point in &path[1..] {
            let step = DispatchMouseEventParams::builder()
                .r#type(DispatchMouseEventType::MouseMoved)
                .x(point.x)
                .y(point.y)
                .button(MouseButton::Left)
                .buttons(1)
                .build()
                .map_err(HarvestError::ChallengeUnresolved)?;
            self.page
                .execute(step)
                .await
                .map_err(|e| HarvestError::ChallengeUnresolved(format!("move: {e}")))?;
            tokio::time::sleep(point.pause).await;
        }

        let release = DispatchMouseEventParams::builder()
            .r#type(DispatchMouseEventType::MouseReleased)
            .x(last.x)
            .y(last.y)
            .button(MouseButton::Left)
            .click_count(1)
            .build()
            .map_err(HarvestError::ChallengeUnresolved)?;
        self.page
            .execute(release)
            .await
            .map_err(|e| HarvestError::ChallengeUnresolved(format!("release: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_options_carry_viewport() {
        let opts = SessionOptions::new(1280, 900);
        assert_eq!((opts.viewport_width, opts.viewport_height), (1280, 900));
        assert!(opts.proxy.is_none());
        assert!(opts.executable.is_none());
    }

    #[test]
    fn discovery_does_not_panic_without_a_browser() {
        // Whatever the host has installed, discovery must return cleanly.
        let _ = find_browser_executable();
    }
}

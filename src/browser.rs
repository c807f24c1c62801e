use anyhow::{anyhow, Result};
use async_trait::async_trait;
use headless_chrome::protocol::cdp::{Network, Page};
use headless_chrome::{Browser, LaunchOptions, Tab};
use once_cell::sync::Lazy;
use serde_json::{json, Value};
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::cookies::CookieRecord;
use crate::dom::ElementSnapshot;

static USER_AGENTS: Lazy<Vec<&'static str>> = Lazy::new(|| {
    vec![
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
        "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Edge/123.0.0.0 Safari/537.36",
    ]
});

/// The operations the engine needs from one browser tab.
///
/// Implementations must never panic on a dead browser; they return an error and
/// let the session manager decide whether to relaunch.
#[async_trait]
pub trait PageDriver: Send + Sync {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()>;

    /// Current URL as reported by the page. Errors when the browser is gone.
    async fn current_url(&self) -> Result<String>;

    /// Elements matching a CSS selector in the document and the cafe content frame.
    async fn query(&self, selector: &str) -> Result<Vec<ElementSnapshot>>;

    async fn page_html(&self) -> Result<String>;

    async fn cookies(&self) -> Result<Vec<CookieRecord>>;

    async fn set_cookie(&self, cookie: &CookieRecord) -> Result<()>;

    async fn screenshot(&self) -> Result<Vec<u8>>;
}

#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    async fn launch(&self, profile_dir: &Path) -> Result<Box<dyn PageDriver>>;
}

pub struct ChromeLauncher {
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
}

const STEALTH_SCRIPT: &str = r#"
    Object.defineProperty(navigator, 'webdriver', { get: () => undefined });
    Object.defineProperty(navigator, 'languages', { get: () => ['ko-KR', 'ko', 'en-US', 'en'] });
    window.chrome = { runtime: {}, loadTimes: function() {}, csi: function() {}, app: {} };
"#;

/// Runs a selector against the top document and the same-origin `cafe_main`
/// frame, returning a JSON string of element snapshots.
const QUERY_SCRIPT: &str = r#"
(() => {
    const sel = __SELECTOR__;
    const docs = [document];
    const frame = document.querySelector('iframe#cafe_main');
    try { if (frame && frame.contentDocument) docs.push(frame.contentDocument); } catch (e) {}
    const out = [];
    for (const doc of docs) {
        let nodes;
        try { nodes = doc.querySelectorAll(sel); } catch (e) { return JSON.stringify({ error: String(e) }); }
        nodes.forEach((el) => {
            const attrs = {};
            for (const a of el.attributes) attrs[a.name] = a.value;
            if (el.href) attrs['href'] = el.href;
            if (el.currentSrc) attrs['src'] = el.currentSrc;
            const row = el.closest('tr, li');
            out.push({
                text: (el.innerText || el.textContent || '').trim(),
                html: el.outerHTML,
                attrs: attrs,
                row_html: row ? row.outerHTML : null,
            });
        });
    }
    return JSON.stringify(out);
})()
"#;

#[async_trait]
impl BrowserLauncher for ChromeLauncher {
    async fn launch(&self, profile_dir: &Path) -> Result<Box<dyn PageDriver>> {
        use rand::seq::SliceRandom;
        let user_agent = USER_AGENTS
            .choose(&mut rand::thread_rng())
            .copied()
            .unwrap_or("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36");
        debug!("Using User-Agent: {}", user_agent);

        std::fs::create_dir_all(profile_dir)?;

        let mut args = vec![
            OsStr::new("--disable-blink-features=AutomationControlled"),
            OsStr::new("--no-sandbox"),
            OsStr::new("--disable-dev-shm-usage"),
            OsStr::new("--disable-infobars"),
            OsStr::new("--window-position=0,0"),
            OsStr::new("--lang=ko-KR"),
        ];
        let ua_arg = format!("--user-agent={}", user_agent);
        args.push(OsStr::new(&ua_arg));

        info!(
            "🚀 Launching Chrome (headless: {}, profile: {})",
            self.headless,
            profile_dir.display()
        );
        let browser = Browser::new(LaunchOptions {
            headless: self.headless,
            window_size: Some((1920, 1080)),
            path: self.chrome_path.clone(),
            user_data_dir: Some(profile_dir.to_path_buf()),
            idle_browser_timeout: Duration::from_secs(30 * 60),
            args,
            ..Default::default()
        })?;

        let tab = browser.new_tab()?;
        tab.enable_debugger()?;
        tab.call_method(Page::AddScriptToEvaluateOnNewDocument {
            source: STEALTH_SCRIPT.to_string(),
            world_name: None,
            include_command_line_api: None,
            run_immediately: None,
        })?;

        Ok(Box::new(ChromePage {
            _browser: browser,
            tab,
        }))
    }
}

/// A live Chrome tab. Dropping it closes the browser process.
pub struct ChromePage {
    _browser: Browser,
    tab: Arc<Tab>,
}

impl ChromePage {
    fn eval_string(&self, script: &str) -> Result<String> {
        let result = self.tab.evaluate(script, false)?;
        match result.value {
            Some(Value::String(s)) => Ok(s),
            Some(other) => Ok(other.to_string()),
            None => Err(anyhow!("script returned no value")),
        }
    }
}

#[async_trait]
impl PageDriver for ChromePage {
    async fn navigate(&self, url: &str, timeout: Duration) -> Result<()> {
        self.tab.set_default_timeout(timeout);
        self.tab.navigate_to(url)?;
        self.tab.wait_until_navigated()?;
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        // `Tab::get_url` is cached on our side; evaluating proves the
        // DevTools connection is still alive.
        self.eval_string("window.location.href")
    }

    async fn query(&self, selector: &str) -> Result<Vec<ElementSnapshot>> {
        let script = QUERY_SCRIPT.replace("__SELECTOR__", &serde_json::to_string(selector)?);
        let raw = self.eval_string(&script)?;
        let parsed: Value = serde_json::from_str(&raw)?;
        if let Some(err) = parsed.get("error") {
            return Err(anyhow!("selector {:?} rejected by page: {}", selector, err));
        }
        Ok(serde_json::from_value(parsed)?)
    }

    async fn page_html(&self) -> Result<String> {
        self.tab.get_content()
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>> {
        let cookies = self.tab.get_cookies()?;
        let mut out = Vec::with_capacity(cookies.len());
        for cookie in cookies {
            // Go through JSON so CDP field additions across versions don't matter.
            let v = serde_json::to_value(&cookie)?;
            let expires = v["expires"].as_f64().filter(|e| *e > 0.0);
            out.push(CookieRecord {
                name: v["name"].as_str().unwrap_or_default().to_string(),
                value: v["value"].as_str().unwrap_or_default().to_string(),
                domain: v["domain"].as_str().map(str::to_string),
                path: v["path"].as_str().map(str::to_string),
                expiry: expires,
                secure: v["secure"].as_bool().unwrap_or(false),
                http_only: v["httpOnly"].as_bool().unwrap_or(false),
                same_site: v["sameSite"].as_str().map(str::to_string),
            });
        }
        Ok(out)
    }

    async fn set_cookie(&self, cookie: &CookieRecord) -> Result<()> {
        let mut param = json!({
            "name": cookie.name,
            "value": cookie.value,
            "path": cookie.path.clone().unwrap_or_else(|| "/".to_string()),
            "secure": cookie.secure,
            "httpOnly": cookie.http_only,
        });
        match &cookie.domain {
            Some(domain) => param["domain"] = json!(domain),
            None => param["url"] = json!(self.tab.get_url()),
        }
        if let Some(expiry) = cookie.expiry {
            param["expires"] = json!(expiry);
        }
        if let Some(same_site) = cookie.same_site.as_deref() {
            if matches!(same_site, "Strict" | "Lax" | "None") {
                param["sameSite"] = json!(same_site);
            }
        }
        let param: Network::CookieParam = serde_json::from_value(param)?;
        self.tab.set_cookies(vec![param])?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        self.tab.capture_screenshot(
            Page::CaptureScreenshotFormatOption::Png,
            None,
            None,
            true,
        )
    }
}

//! Browser session lifecycle: launch, cookie restore/save, login detection,
//! manual login, and dead-session recovery.
//!
//! The session manager is the only owner of the browser handle. Everything
//! else borrows the page through [`SessionManager::page`], which refuses to hand
//! out a handle unless the session is live.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

use crate::browser::{BrowserLauncher, PageDriver};
use crate::config::SessionSettings;
use crate::cookies::{cookie_header, CookieFile, DomainTable, SaveOutcome};
use crate::error::{ScrapeError, ScrapeResult};

/// What `ensure_session` tells its caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Live,
    NeedsManualLogin,
    Dead,
}

/// Login markers, in priority order.
const LOGIN_LINKS: &[&str] = &[
    "a[href*='nidlogin.login']",
    ".link_login",
    "[class*='link_login']",
];
const LOGOUT_LINKS: &[&str] = &["a[href*='nidlogin.logout']", ".btn_logout", "a[class*='logout']"];
const ACCOUNT_MARKERS: &[&str] = &[
    ".MyView-module__nickname",
    ".gnb_my_namebox",
    "#gnb_my_layer",
    "[class*='MyView'] [class*='nickname']",
];

/// URLs a crashed or detached tab reports.
const BLANK_URLS: &[&str] = &["", "data:,", "about:blank"];

enum Lifecycle {
    Unstarted,
    Live(Box<dyn PageDriver>),
    Dead,
}

pub struct SessionManager {
    launcher: Arc<dyn BrowserLauncher>,
    settings: SessionSettings,
    cookie_file: CookieFile,
    domains: DomainTable,
    page_load_timeout: Duration,
    lifecycle: Lifecycle,
}

impl SessionManager {
    pub fn new(launcher: Arc<dyn BrowserLauncher>, settings: SessionSettings) -> Self {
        let cookie_file = CookieFile::new(settings.cookie_file());
        Self {
            launcher,
            settings,
            cookie_file,
            domains: DomainTable::default(),
            page_load_timeout: Duration::from_secs(30),
            lifecycle: Lifecycle::Unstarted,
        }
    }

    pub fn with_page_load_timeout(mut self, timeout: Duration) -> Self {
        self.page_load_timeout = timeout;
        self
    }

    pub fn cookie_file(&self) -> &CookieFile {
        &self.cookie_file
    }

    pub fn is_live(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Live(_))
    }

    pub fn page(&self) -> ScrapeResult<&dyn PageDriver> {
        match &self.lifecycle {
            Lifecycle::Live(page) => Ok(page.as_ref()),
            _ => Err(ScrapeError::SessionDead),
        }
    }

    /// Launch the browser on the persistent profile and open the home page.
    pub async fn start(&mut self) -> ScrapeResult<()> {
        self.lifecycle = Lifecycle::Unstarted;
        let page = self.launcher.launch(&self.settings.profile_dir()).await?;
        if let Err(e) = page.navigate(&self.settings.home_url, self.page_load_timeout).await {
            warn!("Home page did not load after launch: {}", e);
        }
        self.lifecycle = Lifecycle::Live(page);
        info!("✅ Browser session started");
        Ok(())
    }

    /// Read the current URL; a blank sentinel or an error marks the session dead.
    pub async fn check_liveness(&mut self) -> bool {
        let alive = match &self.lifecycle {
            Lifecycle::Live(page) => match page.current_url().await {
                Ok(url) => !BLANK_URLS.contains(&url.trim()),
                Err(e) => {
                    debug!("current_url failed: {}", e);
                    false
                }
            },
            _ => false,
        };
        if !alive && matches!(self.lifecycle, Lifecycle::Live(_)) {
            warn!("💀 Browser session is dead");
            self.lifecycle = Lifecycle::Dead;
        }
        alive
    }

    /// Relaunch the browser and re-inject the stored cookies.
    pub async fn recover(&mut self) -> ScrapeResult<()> {
        info!("🔄 Recovering browser session");
        self.lifecycle = Lifecycle::Dead;
        if let Err(e) = self.start().await {
            error!("🔥 Relaunch failed: {}", e);
            self.lifecycle = Lifecycle::Dead;
            return Err(ScrapeError::SessionDead);
        }
        if let Err(e) = self.load_cookies().await {
            warn!("Cookie reload after recovery failed: {}", e);
        }
        if self.check_liveness().await {
            Ok(())
        } else {
            Err(ScrapeError::SessionDead)
        }
    }

    /// Inject stored cookies into the browser. Returns how many were accepted.
    pub async fn load_cookies(&mut self) -> ScrapeResult<usize> {
        let cookies = self.cookie_file.load()?;
        if cookies.is_empty() {
            debug!("No stored cookies at {}", self.cookie_file.path().display());
            return Ok(0);
        }
        let page = self.page()?;
        // Cookies can only be set against a loaded origin.
        page.navigate(&self.settings.home_url, self.page_load_timeout)
            .await?;

        let mut injected = 0;
        for cookie in &cookies {
            let cookie = self.domains.normalize(cookie);
            match page.set_cookie(&cookie).await {
                Ok(()) => injected += 1,
                Err(e) => warn!("Skipping cookie {}: {}", cookie.name, e),
            }
        }
        page.navigate(&self.settings.home_url, self.page_load_timeout)
            .await?;
        info!("🍪 Injected {}/{} stored cookies", injected, cookies.len());
        Ok(injected)
    }

    pub async fn save_cookies(&mut self) -> ScrapeResult<SaveOutcome> {
        let cookies = self.page()?.cookies().await?;
        Ok(self
            .cookie_file
            .save(&cookies, self.settings.refresh_cookies)?)
    }

    /// Prioritised OR of login signals. With `trust_cookie_file` an existing
    /// cookie file is taken as proof of login without touching the DOM.
    pub async fn is_logged_in(&mut self) -> bool {
        if self.settings.trust_cookie_file && self.cookie_file.exists_non_empty() {
            debug!("Cookie file present, trusting stored session");
            return true;
        }
        let Ok(page) = self.page() else {
            return false;
        };
        if any_match(page, LOGOUT_LINKS).await {
            return true;
        }
        if any_match(page, ACCOUNT_MARKERS).await {
            return true;
        }
        // Only meaningful once the home page actually rendered.
        let rendered = page
            .query("body *")
            .await
            .map(|els| !els.is_empty())
            .unwrap_or(false);
        rendered && !any_match(page, LOGIN_LINKS).await
    }

    /// Open the login page and wait for a human to finish logging in.
    pub async fn manual_login(&mut self) -> ScrapeResult<SessionState> {
        info!("🔐 Waiting for manual login at {}", self.settings.login_url);
        self.page()?
            .navigate(&self.settings.login_url, self.page_load_timeout)
            .await?;

        let deadline = Instant::now() + self.settings.login_timeout;
        while Instant::now() < deadline {
            sleep(self.settings.login_poll).await;
            let polled = self.page()?.current_url().await;
            let url = match polled {
                Ok(url) => url,
                Err(e) => {
                    warn!("Lost the browser during login: {}", e);
                    self.lifecycle = Lifecycle::Dead;
                    return Ok(SessionState::Dead);
                }
            };
            if !url.contains(&self.settings.login_path) && url.contains(&self.settings.main_domain) {
                info!("✅ Login detected ({})", url);
                if let Err(e) = self.save_cookies().await {
                    warn!("Could not save cookies after login: {}", e);
                }
                return Ok(SessionState::Live);
            }
        }
        warn!(
            "⏳ Manual login not completed within {:?}",
            self.settings.login_timeout
        );
        Ok(SessionState::NeedsManualLogin)
    }

    /// Bring the session to a usable state, launching or recovering as needed.
    pub async fn ensure_session(&mut self) -> SessionState {
        if !self.is_live() {
            if let Err(e) = self.start().await {
                error!("🔥 Browser launch failed: {}", e);
                self.lifecycle = Lifecycle::Dead;
                return SessionState::Dead;
            }
            if let Err(e) = self.load_cookies().await {
                warn!("Cookie load failed: {}", e);
            }
        } else if !self.check_liveness().await {
            if let Err(e) = self.recover().await {
                error!("🔥 Session recovery failed: {}", e);
                return SessionState::Dead;
            }
        }

        if self.is_logged_in().await {
            return SessionState::Live;
        }
        match self.manual_login().await {
            Ok(state) => state,
            Err(e) => {
                warn!("Manual login flow failed: {}", e);
                if self.check_liveness().await {
                    SessionState::NeedsManualLogin
                } else {
                    SessionState::Dead
                }
            }
        }
    }

    pub async fn cookie_header_for(&self, host: &str) -> Option<String> {
        let cookies = self.page().ok()?.cookies().await.ok()?;
        cookie_header(&cookies, host)
    }

    /// Save cookies and drop the browser.
    pub async fn close(&mut self) {
        if self.is_live() {
            match self.save_cookies().await {
                Ok(outcome) => debug!("Cookie save on close: {:?}", outcome),
                Err(e) => warn!("Cookie save on close failed: {}", e),
            }
        }
        self.lifecycle = Lifecycle::Unstarted;
        info!("🔒 Browser session closed");
    }
}

async fn any_match(page: &dyn PageDriver, selectors: &[&str]) -> bool {
    for selector in selectors {
        if let Ok(found) = page.query(selector).await {
            if !found.is_empty() {
                return true;
            }
        }
    }
    false
}

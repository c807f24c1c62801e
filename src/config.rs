use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Naver front door. Cookies can only be injected once this origin is loaded.
pub const HOME_URL: &str = "https://www.naver.com";
pub const LOGIN_URL: &str = "https://nid.naver.com/nidlogin.login";

#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    pub outputs_dir: PathBuf,
    pub static_dir: PathBuf,
    pub session: SessionSettings,
    pub navigator: NavigatorSettings,
    pub extractor: ExtractorSettings,
    pub pacing: PacingSettings,
}

#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub sessions_dir: PathBuf,
    pub headless: bool,
    pub chrome_path: Option<PathBuf>,
    pub home_url: String,
    pub login_url: String,
    /// Path fragment that identifies the login page in the current URL.
    pub login_path: String,
    /// Domain the browser lands on after a successful login.
    pub main_domain: String,
    pub login_poll: Duration,
    pub login_timeout: Duration,
    /// Write the live cookie jar even when a non-empty cookie file exists.
    pub refresh_cookies: bool,
    /// Treat an existing cookie file as proof of login without a DOM check.
    pub trust_cookie_file: bool,
}

impl SessionSettings {
    pub fn profile_dir(&self) -> PathBuf {
        self.sessions_dir.join("chrome-profile")
    }

    pub fn cookie_file(&self) -> PathBuf {
        self.sessions_dir.join("naver_cookies.json")
    }
}

#[derive(Debug, Clone)]
pub struct NavigatorSettings {
    pub retries: u32,
    pub settle_delay: Duration,
    pub page_load_timeout: Duration,
    pub snapshots_dir: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ExtractorSettings {
    pub selector_timeout: Duration,
    pub selector_poll: Duration,
    /// Wait after navigation for client-rendered article content.
    pub render_wait: Duration,
    pub max_retries: u32,
    pub retry_step: Duration,
    pub max_images: usize,
    pub max_image_mb: f64,
    pub image_timeout: Duration,
    pub false_positives: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct PacingSettings {
    pub min_delay: Duration,
    pub max_delay: Duration,
    pub cap: Duration,
    pub growth: f64,
    pub jitter: f64,
    pub board_factor: f64,
}

impl Settings {
    pub fn from_env() -> Self {
        let sessions_dir = path_var("SESSIONS_DIR", "sessions");
        let snapshots_dir = path_var("SNAPSHOTS_DIR", "snapshots");
        let debug_snapshots = var_or("DEBUG_SNAPSHOTS", false);

        Self {
            port: var_or("PORT", 8000),
            outputs_dir: path_var("OUTPUTS_DIR", "outputs"),
            static_dir: path_var("STATIC_DIR", "static"),
            session: SessionSettings {
                sessions_dir,
                headless: var_or("HEADLESS", false),
                chrome_path: env::var("CHROME_PATH").ok().map(PathBuf::from),
                home_url: env::var("HOME_URL").unwrap_or_else(|_| HOME_URL.to_string()),
                login_url: env::var("LOGIN_URL").unwrap_or_else(|_| LOGIN_URL.to_string()),
                login_path: "nidlogin".to_string(),
                main_domain: "naver.com".to_string(),
                login_poll: Duration::from_secs(var_or("LOGIN_POLL_SECS", 3)),
                login_timeout: Duration::from_secs(var_or("LOGIN_TIMEOUT_SECS", 120)),
                refresh_cookies: var_or("REFRESH_COOKIES", false),
                trust_cookie_file: var_or("TRUST_COOKIE_FILE", true),
            },
            navigator: NavigatorSettings {
                retries: var_or("NAV_RETRIES", 3),
                settle_delay: Duration::from_millis(var_or("NAV_SETTLE_MS", 2000)),
                page_load_timeout: Duration::from_secs(var_or("PAGE_LOAD_TIMEOUT_SECS", 30)),
                snapshots_dir: debug_snapshots.then_some(snapshots_dir),
            },
            extractor: ExtractorSettings {
                selector_timeout: Duration::from_millis(var_or("SELECTOR_TIMEOUT_MS", 2000)),
                selector_poll: Duration::from_millis(250),
                render_wait: Duration::from_millis(var_or("RENDER_WAIT_MS", 3000)),
                max_retries: var_or("MAX_RETRIES", 3),
                retry_step: Duration::from_secs(var_or("RETRY_STEP_SECS", 5)),
                max_images: var_or("MAX_IMAGES", 10),
                max_image_mb: var_or("MAX_IMAGE_MB", 5.0),
                image_timeout: Duration::from_secs(var_or("IMAGE_TIMEOUT_SECS", 15)),
                false_positives: list_var("FALSE_POSITIVES"),
            },
            pacing: PacingSettings {
                min_delay: secs_f64(var_or("DELAY_MIN_SECS", 2.0)),
                max_delay: secs_f64(var_or("DELAY_MAX_SECS", 5.0)),
                cap: secs_f64(var_or("DELAY_CAP_SECS", 20.0)),
                growth: var_or("DELAY_GROWTH", 1.0),
                jitter: var_or("DELAY_JITTER", 0.2),
                board_factor: var_or("DELAY_BOARD_FACTOR", 2.0),
            },
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.session.sessions_dir)?;
        std::fs::create_dir_all(&self.outputs_dir)?;
        if let Some(dir) = &self.navigator.snapshots_dir {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn var_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn path_var(key: &str, default: &str) -> PathBuf {
    PathBuf::from(env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn list_var(key: &str) -> Vec<String> {
    env::var(key)
        .map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

fn secs_f64(secs: f64) -> Duration {
    Duration::from_secs_f64(secs.max(0.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unset_variables_fall_back_to_defaults() {
        assert_eq!(var_or("CAFE_SCRAPER_TEST_UNSET_NUMBER", 42u32), 42);
        assert!(list_var("CAFE_SCRAPER_TEST_UNSET_LIST").is_empty());
    }

    #[test]
    fn cookie_file_lives_in_sessions_dir() {
        let settings = Settings::from_env();
        assert!(settings
            .session
            .cookie_file()
            .starts_with(&settings.session.sessions_dir));
        assert_ne!(settings.session.profile_dir(), settings.session.cookie_file());
    }

    #[test]
    fn negative_seconds_clamp_to_zero() {
        assert_eq!(secs_f64(-1.5), Duration::ZERO);
    }
}

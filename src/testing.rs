//! In-memory browser used by the unit tests.
//!
//! `FakeWeb` holds URL -> HTML fixtures plus scripted behaviour (navigation
//! failures, session death, manual login). `FakeLauncher` hands out
//! `FakeDriver`s that all share one `FakeWeb`, so a relaunch keeps the site but
//! loses the page state, as a real browser restart would.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::browser::{BrowserLauncher, PageDriver};
use crate::config::{ExtractorSettings, NavigatorSettings, PacingSettings, SessionSettings};
use crate::cookies::CookieRecord;
use crate::dom::{select_snapshots, ElementSnapshot};

pub const AUTH_COOKIE: &str = "NID_AUT";
pub const HOME: &str = "https://www.naver.com";
pub const LOGIN: &str = "https://nid.naver.com/nidlogin.login";

#[derive(Default)]
pub struct FakeWeb {
    pages: Mutex<HashMap<String, String>>,
    /// url -> remaining scripted failures
    failures: Mutex<HashMap<String, usize>>,
    navigations: Mutex<Vec<String>>,
    queries: Mutex<HashMap<String, usize>>,
    cookies: Mutex<Vec<CookieRecord>>,
    rejected_cookies: Mutex<Vec<String>>,
    /// The next driver dies after this many more successful navigations.
    kill_after: Mutex<Option<usize>>,
    /// Manual login completes after this many URL polls on the login page.
    login_after_polls: Mutex<Option<usize>>,
    /// Launches beyond this count fail as if Chrome could not start.
    max_launches: Mutex<Option<usize>>,
    pub launches: AtomicUsize,
}

impl FakeWeb {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn page(&self, url: &str, html: &str) {
        self.pages.lock().unwrap().insert(url.to_string(), html.to_string());
    }

    pub fn fail_times(&self, url: &str, times: usize) {
        self.failures.lock().unwrap().insert(url.to_string(), times);
    }

    pub fn kill_after(&self, navigations: usize) {
        *self.kill_after.lock().unwrap() = Some(navigations);
    }

    pub fn login_after_polls(&self, polls: usize) {
        *self.login_after_polls.lock().unwrap() = Some(polls);
    }

    pub fn max_launches(&self, launches: usize) {
        *self.max_launches.lock().unwrap() = Some(launches);
    }

    pub fn reject_cookie(&self, name: &str) {
        self.rejected_cookies.lock().unwrap().push(name.to_string());
    }

    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().unwrap().clone()
    }

    pub fn visited(&self, url: &str) -> bool {
        self.navigations.lock().unwrap().iter().any(|u| u == url)
    }

    pub fn query_count(&self, selector: &str) -> usize {
        self.queries.lock().unwrap().get(selector).copied().unwrap_or(0)
    }

    pub fn browser_cookies(&self) -> Vec<CookieRecord> {
        self.cookies.lock().unwrap().clone()
    }

    pub fn clear_browser_cookies(&self) {
        self.cookies.lock().unwrap().clear();
    }

    fn logged_in(&self) -> bool {
        self.cookies.lock().unwrap().iter().any(|c| c.name == AUTH_COOKIE)
    }

    fn home_html(&self) -> String {
        if self.logged_in() {
            r#"<div id="account"><a href="https://nid.naver.com/nidlogin.logout" class="btn_logout">로그아웃</a></div>"#
                .to_string()
        } else {
            r#"<div id="account"><a href="https://nid.naver.com/nidlogin.login" class="link_login">로그인</a></div>"#
                .to_string()
        }
    }

    fn html_for(&self, url: &str) -> String {
        if url.trim_end_matches('/') == HOME {
            return self.home_html();
        }
        self.pages
            .lock()
            .unwrap()
            .get(url)
            .cloned()
            .unwrap_or_else(|| "<html><body></body></html>".to_string())
    }
}

pub struct FakeLauncher {
    pub web: Arc<FakeWeb>,
}

impl FakeLauncher {
    pub fn new(web: Arc<FakeWeb>) -> Arc<Self> {
        Arc::new(Self { web })
    }
}

#[async_trait]
impl BrowserLauncher for FakeLauncher {
    async fn launch(&self, _profile_dir: &Path) -> Result<Box<dyn PageDriver>> {
        let launched = self.web.launches.fetch_add(1, Ordering::SeqCst) + 1;
        if matches!(*self.web.max_launches.lock().unwrap(), Some(max) if launched > max) {
            return Err(anyhow!("chrome failed to start"));
        }
        Ok(Box::new(FakeDriver {
            web: self.web.clone(),
            current: Mutex::new("about:blank".to_string()),
            dead: AtomicBool::new(false),
            polls: AtomicUsize::new(0),
        }))
    }
}

pub struct FakeDriver {
    web: Arc<FakeWeb>,
    current: Mutex<String>,
    dead: AtomicBool,
    polls: AtomicUsize,
}

#[async_trait]
impl PageDriver for FakeDriver {
    async fn navigate(&self, url: &str, _timeout: Duration) -> Result<()> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(anyhow!("chrome not reachable"));
        }
        self.web.navigations.lock().unwrap().push(url.to_string());
        {
            let mut failures = self.web.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(url) {
                if *left > 0 {
                    *left -= 1;
                    return Err(anyhow!("net::ERR_TIMED_OUT loading {}", url));
                }
            }
        }
        *self.current.lock().unwrap() = url.to_string();
        let mut kill = self.web.kill_after.lock().unwrap();
        if let Some(left) = kill.as_mut() {
            if *left == 0 {
                self.dead.store(true, Ordering::SeqCst);
                *kill = None;
            } else {
                *left -= 1;
            }
        }
        Ok(())
    }

    async fn current_url(&self) -> Result<String> {
        if self.dead.load(Ordering::SeqCst) {
            return Ok("data:,".to_string());
        }
        let current = self.current.lock().unwrap().clone();
        if current.contains("nidlogin.login") {
            let polls = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
            let target = *self.web.login_after_polls.lock().unwrap();
            if matches!(target, Some(n) if polls >= n) {
                self.web
                    .cookies
                    .lock()
                    .unwrap()
                    .push(CookieRecord::new(AUTH_COOKIE, "fresh", Some(".naver.com")));
                let landed = format!("{}/", HOME);
                *self.current.lock().unwrap() = landed.clone();
                return Ok(landed);
            }
        }
        Ok(current)
    }

    async fn query(&self, selector: &str) -> Result<Vec<ElementSnapshot>> {
        if self.dead.load(Ordering::SeqCst) {
            return Err(anyhow!("chrome not reachable"));
        }
        *self
            .web
            .queries
            .lock()
            .unwrap()
            .entry(selector.to_string())
            .or_insert(0) += 1;
        let current = self.current.lock().unwrap().clone();
        select_snapshots(&self.web.html_for(&current), selector)
    }

    async fn page_html(&self) -> Result<String> {
        let current = self.current.lock().unwrap().clone();
        Ok(self.web.html_for(&current))
    }

    async fn cookies(&self) -> Result<Vec<CookieRecord>> {
        Ok(self.web.browser_cookies())
    }

    async fn set_cookie(&self, cookie: &CookieRecord) -> Result<()> {
        if self.web.rejected_cookies.lock().unwrap().contains(&cookie.name) {
            return Err(anyhow!("Invalid cookie fields: {}", cookie.name));
        }
        let mut jar = self.web.cookies.lock().unwrap();
        jar.retain(|c| c.name != cookie.name);
        jar.push(cookie.clone());
        Ok(())
    }

    async fn screenshot(&self) -> Result<Vec<u8>> {
        Ok(vec![0x89, b'P', b'N', b'G'])
    }
}

pub fn session_settings(dir: &Path) -> SessionSettings {
    SessionSettings {
        sessions_dir: dir.to_path_buf(),
        headless: true,
        chrome_path: None,
        home_url: HOME.to_string(),
        login_url: LOGIN.to_string(),
        login_path: "nidlogin".to_string(),
        main_domain: "naver.com".to_string(),
        login_poll: Duration::from_millis(1),
        login_timeout: Duration::from_millis(50),
        refresh_cookies: false,
        trust_cookie_file: false,
    }
}

pub fn navigator_settings() -> NavigatorSettings {
    NavigatorSettings {
        retries: 3,
        settle_delay: Duration::ZERO,
        page_load_timeout: Duration::from_secs(1),
        snapshots_dir: None,
    }
}

pub fn extractor_settings() -> ExtractorSettings {
    ExtractorSettings {
        selector_timeout: Duration::ZERO,
        selector_poll: Duration::from_millis(1),
        render_wait: Duration::ZERO,
        max_retries: 2,
        retry_step: Duration::ZERO,
        max_images: 10,
        max_image_mb: 5.0,
        image_timeout: Duration::from_secs(5),
        false_positives: vec!["중고나라".to_string()],
    }
}

pub fn no_pacing() -> PacingSettings {
    PacingSettings {
        min_delay: Duration::ZERO,
        max_delay: Duration::ZERO,
        cap: Duration::ZERO,
        growth: 0.0,
        jitter: 0.0,
        board_factor: 1.0,
    }
}

pub fn article_html(title: &str, author: &str, body: &str, comments: &[(&str, &str)]) -> String {
    let comment_items: String = comments
        .iter()
        .map(|(nick, text)| {
            format!(
                r#"<li class="CommentItem"><div class="comment_area">
                     <a class="comment_nickname">{}</a>
                     <span class="text_comment">{}</span>
                     <span class="comment_info_date">2024.03.01. 10:00</span>
                   </div></li>"#,
                nick, text
            )
        })
        .collect();
    format!(
        r#"<html><body>
            <div class="cafe-name">중고나라</div>
            <div class="ArticleTitle"><h3 class="title_text">{}</h3></div>
            <div class="WriterInfo"><span class="nickname">{}</span><span class="date">2024.03.01. 09:30</span></div>
            <div class="se-main-container"><p>{}</p></div>
            <ul class="comment_list">{}</ul>
        </body></html>"#,
        title, author, body, comment_items
    )
}

pub fn listing_html(rows: &[(u64, &str, &str, &str)]) -> String {
    let body: String = rows
        .iter()
        .map(|(id, title, author, date)| {
            format!(
                r#"<tr>
                     <td class="td_article"><a class="article" href="https://cafe.naver.com/ArticleRead.nhn?clubid=100&articleid={}">{}</a></td>
                     <td class="td_name"><span class="nickname">{}</span></td>
                     <td class="td_date">{}</td>
                   </tr>"#,
                id, title, author, date
            )
        })
        .collect();
    format!(
        r#"<html><body><table class="article-board"><tbody>{}</tbody></table></body></html>"#,
        body
    )
}

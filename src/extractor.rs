//! Whole-article extraction: metadata, images and comments.
//!
//! Each sub-extraction is best-effort on its own. Only an article that never
//! renders anything recognisable (no title and no content) is an error, and
//! that error triggers a full retry of navigate, settle and extract.

use anyhow::{anyhow, Context};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::browser::PageDriver;
use crate::config::ExtractorSettings;
use crate::dom::{fragment_text, ElementSnapshot};
use crate::error::{ScrapeError, ScrapeResult};
use crate::navigator::Navigator;
use crate::records::{
    article_id_from_url, cafe_id_from_url, ArticleDetail, CommentRecord, ImageRecord, NOT_FOUND, UNKNOWN,
};
use crate::selectors::{SelectorResolver, SemanticTarget, Validity, COMMENT_AUTHOR, COMMENT_DATE, COMMENT_TEXT};
use crate::session::SessionManager;

/// Include/exclude nickname filter for comments. Matching is a
/// case-insensitive substring test; include is an OR over its entries,
/// exclude likewise, and a comment must pass both.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NicknameFilter {
    #[serde(default, alias = "include_nicks")]
    pub include: Vec<String>,
    #[serde(default, alias = "exclude_nicks")]
    pub exclude: Vec<String>,
}

impl NicknameFilter {
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Self {
        Self { include, exclude }
    }

    pub fn allows(&self, nickname: &str) -> bool {
        let nick = nickname.to_lowercase();
        let hits = |list: &[String]| {
            list.iter()
                .map(|n| n.trim().to_lowercase())
                .filter(|n| !n.is_empty())
                .any(|n| nick.contains(&n))
        };
        let included = self.include.iter().all(|n| n.trim().is_empty()) || hits(&self.include);
        included && !hits(&self.exclude)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageMode {
    #[default]
    Embed,
    Skip,
}

/// Fetches article images with the session's cookies, enforcing the count and
/// size caps.
#[derive(Debug, Clone)]
pub struct ImageDownloader {
    client: reqwest::Client,
    max_images: usize,
    max_bytes: u64,
}

impl ImageDownloader {
    pub fn new(settings: &ExtractorSettings) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(settings.image_timeout)
            .build()?;
        Ok(Self {
            client,
            max_images: settings.max_images,
            max_bytes: (settings.max_image_mb.max(0.0) * 1024.0 * 1024.0) as u64,
        })
    }

    /// Absolute, de-duplicated image URLs from `img` snapshots, in page order.
    pub fn sources(elements: &[ElementSnapshot], page_url: &str) -> Vec<String> {
        let base = Url::parse(page_url).ok();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for el in elements {
            let Some(src) = ["src", "data-src", "data-lazy-src"]
                .iter()
                .filter_map(|k| el.attr(k))
                .map(str::trim)
                .find(|s| !s.is_empty() && !s.starts_with("data:"))
            else {
                continue;
            };
            let absolute = match &base {
                Some(base) => base.join(src).map(|u| u.to_string()).unwrap_or_else(|_| src.to_string()),
                None => src.to_string(),
            };
            if seen.insert(absolute.clone()) {
                out.push(absolute);
            }
        }
        out
    }

    /// Downloads at most `max_images` of `urls`. Failed or oversized images are
    /// skipped.
    pub async fn download_all(&self, urls: &[String], cookie: Option<&str>, referer: &str) -> Vec<ImageRecord> {
        let mut images = Vec::new();
        for (idx, url) in urls.iter().take(self.max_images).enumerate() {
            match self.fetch(url, cookie, referer, idx).await {
                Ok(Some(image)) => images.push(image),
                Ok(None) => {}
                Err(e) => warn!("Image {} skipped: {:#}", url, e),
            }
        }
        images
    }

    async fn fetch(
        &self,
        url: &str,
        cookie: Option<&str>,
        referer: &str,
        idx: usize,
    ) -> anyhow::Result<Option<ImageRecord>> {
        let mut request = self.client.get(url).header("Referer", referer);
        if let Some(cookie) = cookie {
            request = request.header("Cookie", cookie);
        }
        let resp = request.send().await?.error_for_status()?;
        if matches!(resp.content_length(), Some(len) if len > self.max_bytes) {
            info!("Image {} exceeds the size cap, skipping", url);
            return Ok(None);
        }
        let bytes = resp.bytes().await.context("reading image body")?;
        if bytes.len() as u64 > self.max_bytes {
            info!("Image {} exceeds the size cap, skipping", url);
            return Ok(None);
        }
        let filename = image_filename(url, idx);
        Ok(Some(ImageRecord {
            mime: mime_for(&filename).to_string(),
            data: STANDARD.encode(&bytes),
            filename,
            size_mb: bytes.len() as f64 / (1024.0 * 1024.0),
        }))
    }
}

fn image_filename(url: &str, idx: usize) -> String {
    Url::parse(url)
        .ok()
        .and_then(|u| {
            u.path_segments()
                .and_then(|mut segs| segs.next_back().map(str::to_string))
        })
        .filter(|name| !name.is_empty())
        .map(|name| urlencoding::decode(&name).map(|n| n.into_owned()).unwrap_or(name))
        .unwrap_or_else(|| format!("image_{}.jpg", idx + 1))
}

fn mime_for(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        _ => "image/jpeg",
    }
}

pub struct Extractor {
    resolver: SelectorResolver,
    navigator: Navigator,
    images: ImageDownloader,
    settings: ExtractorSettings,
}

impl Extractor {
    pub fn new(navigator: Navigator, settings: ExtractorSettings) -> anyhow::Result<Self> {
        let resolver = SelectorResolver::new(
            settings.selector_timeout,
            settings.selector_poll,
            settings.false_positives.clone(),
        );
        let images = ImageDownloader::new(&settings)?;
        Ok(Self {
            resolver,
            navigator,
            images,
            settings,
        })
    }

    pub fn settings(&self) -> &ExtractorSettings {
        &self.settings
    }

    /// Extract one article, retrying the whole pipeline with linear backoff.
    /// Exhausted retries surface as [`ScrapeError::Extraction`]; a dead
    /// session is returned as is.
    pub async fn extract_article(
        &self,
        session: &mut SessionManager,
        url: &str,
        nicknames: &NicknameFilter,
        image_mode: ImageMode,
        max_retries: u32,
    ) -> ScrapeResult<ArticleDetail> {
        let attempts = max_retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match self.extract_once(session, url, nicknames, image_mode).await {
                Ok(detail) => {
                    info!(
                        "✅ Extracted {} ({} images, {} comments)",
                        url,
                        detail.images.len(),
                        detail.comments.len()
                    );
                    return Ok(detail);
                }
                Err(e) if e.is_batch_fatal() => return Err(e),
                Err(e) => {
                    warn!("⚠️ Extraction attempt {}/{} for {} failed: {}", attempt, attempts, url, e);
                    last_error = e.to_string();
                    if attempt < attempts {
                        sleep(self.settings.retry_step * attempt).await;
                    }
                }
            }
        }
        Err(ScrapeError::Extraction {
            url: url.to_string(),
            attempts,
            last: last_error,
        })
    }

    async fn extract_once(
        &self,
        session: &mut SessionManager,
        url: &str,
        nicknames: &NicknameFilter,
        image_mode: ImageMode,
    ) -> ScrapeResult<ArticleDetail> {
        self.navigator.goto(session, url).await?;
        sleep(self.settings.render_wait).await;

        let page = session.page()?;
        let title = self.resolver.resolve(page, SemanticTarget::Title).await;
        let content = self.resolver.resolve(page, SemanticTarget::Content).await;
        if !title.is_found() && !content.is_found() {
            return Err(anyhow!("article body not rendered").into());
        }
        let author = self.resolver.resolve(page, SemanticTarget::Author).await;
        let date = self.resolver.resolve(page, SemanticTarget::Date).await;

        let (content_text, content_html) = match (content.text(), content.html()) {
            (Some(text), Some(html)) => (text.to_string(), html.to_string()),
            _ => (self.fallback_text(page, url).await, NOT_FOUND.to_string()),
        };

        let images = match image_mode {
            ImageMode::Skip => Vec::new(),
            ImageMode::Embed => self.extract_images(session, page, url).await,
        };
        let comments = self.extract_comments(page, nicknames).await;

        Ok(ArticleDetail {
            cafe_id: cafe_id_from_url(url).unwrap_or_default(),
            article_id: article_id_from_url(url).unwrap_or_default(),
            article_url: url.to_string(),
            title: title.text().unwrap_or(NOT_FOUND).to_string(),
            author_nickname: author.text().unwrap_or(UNKNOWN).to_string(),
            posted_at: date.text().map(str::to_string),
            content_text,
            content_html,
            images,
            comments,
            scraped_at: Utc::now(),
            error: None,
        })
    }

    /// Readability over the rendered page, then the plain body text.
    async fn fallback_text(&self, page: &dyn PageDriver, url: &str) -> String {
        let html = match page.page_html().await {
            Ok(html) => html,
            Err(e) => {
                debug!("page_html failed: {}", e);
                return NOT_FOUND.to_string();
            }
        };
        let readable = Url::parse(url).ok().and_then(|u| {
            let mut reader = html.as_bytes();
            readability::extractor::extract(&mut reader, &u)
                .ok()
                .map(|product| product.text.trim().to_string())
        });
        match readable.filter(|t| !t.is_empty()) {
            Some(text) => text,
            None => {
                let text = fragment_text(&html);
                if text.is_empty() {
                    NOT_FOUND.to_string()
                } else {
                    text
                }
            }
        }
    }

    async fn extract_images(&self, session: &SessionManager, page: &dyn PageDriver, url: &str) -> Vec<ImageRecord> {
        let elements = self.resolver.resolve_all(page, SemanticTarget::Image).await;
        let sources = ImageDownloader::sources(&elements, url);
        if sources.is_empty() {
            return Vec::new();
        }
        let host = sources
            .first()
            .and_then(|s| Url::parse(s).ok())
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default();
        let cookie = session.cookie_header_for(&host).await;
        self.images
            .download_all(&sources, cookie.as_deref(), url)
            .await
    }

    async fn extract_comments(&self, page: &dyn PageDriver, nicknames: &NicknameFilter) -> Vec<CommentRecord> {
        let elements = self.resolver.resolve_all(page, SemanticTarget::Comment).await;
        let mut comments = Vec::new();
        for el in &elements {
            let nickname = self
                .resolver
                .resolve_in(&el.html, COMMENT_AUTHOR, Validity::shorter_than(50))
                .unwrap_or_else(|| UNKNOWN.to_string());
            if !nicknames.allows(&nickname) {
                debug!("Comment by {} filtered out", nickname);
                continue;
            }
            let text = self
                .resolver
                .resolve_in(&el.html, COMMENT_TEXT, Validity::non_empty())
                .unwrap_or_else(|| el.text.trim().to_string());
            let created_at = self
                .resolver
                .resolve_in(&el.html, COMMENT_DATE, Validity::shorter_than(40));
            comments.push(CommentRecord {
                comment_id: comments.len() + 1,
                nickname,
                text,
                created_at,
            });
        }
        comments
    }
}

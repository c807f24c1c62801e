use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Placeholder for a required text field that could not be extracted.
pub const NOT_FOUND: &str = "N/A";
/// Placeholder for an author or commenter that could not be identified.
pub const UNKNOWN: &str = "Unknown";

static ARTICLE_ID: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)/articles/(\d+)").unwrap(),
        Regex::new(r"(?i)[?&]articleid=(\d+)").unwrap(),
    ]
});

static CAFE_ID: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)/cafes/(\d+)").unwrap(),
        Regex::new(r"(?i)[?&]clubid=(\d+)").unwrap(),
    ]
});

fn first_capture(patterns: &[Regex], url: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(url))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

pub fn article_id_from_url(url: &str) -> Option<String> {
    first_capture(&ARTICLE_ID, url)
}

pub fn cafe_id_from_url(url: &str) -> Option<String> {
    first_capture(&CAFE_ID, url)
}

/// A cafe board discovered from the cafe home menu.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardRef {
    pub menu_id: String,
    pub menu_name: String,
    pub board_url: String,
}

/// Listing-derived record used for filtering before the detail fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleStub {
    pub article_id: String,
    pub article_url: String,
    pub title: String,
    pub author_nickname: String,
    pub posted_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImageRecord {
    pub mime: String,
    /// Base64 of the raw bytes.
    pub data: String,
    pub filename: String,
    pub size_mb: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub comment_id: usize,
    pub nickname: String,
    pub text: String,
    pub created_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArticleDetail {
    pub cafe_id: String,
    pub article_id: String,
    pub article_url: String,
    pub title: String,
    pub author_nickname: String,
    pub posted_at: Option<String>,
    pub content_text: String,
    pub content_html: String,
    pub images: Vec<ImageRecord>,
    pub comments: Vec<CommentRecord>,
    pub scraped_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ArticleDetail {
    /// Placeholder record for an article whose extraction failed, so the
    /// failure still produces a row.
    pub fn degraded(url: &str, error: impl Into<String>) -> Self {
        Self {
            cafe_id: cafe_id_from_url(url).unwrap_or_default(),
            article_id: article_id_from_url(url).unwrap_or_default(),
            article_url: url.to_string(),
            title: NOT_FOUND.to_string(),
            author_nickname: UNKNOWN.to_string(),
            posted_at: None,
            content_text: NOT_FOUND.to_string(),
            content_html: NOT_FOUND.to_string(),
            images: Vec::new(),
            comments: Vec::new(),
            scraped_at: Utc::now(),
            error: Some(error.into()),
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.error.is_some()
    }
}

//! Ranked fallback search over structural selector candidates.
//!
//! Cafe markup is owned by Naver and changes without notice, so each semantic
//! target maps to an ordered list of candidates: the most specific selectors
//! known to work come first, generic attribute-substring patterns last.

use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::debug;

use crate::browser::PageDriver;
use crate::dom::{first_text_in, ElementSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SemanticTarget {
    Title,
    Author,
    Content,
    Date,
    Comment,
    Image,
    BoardLink,
    ArticleLink,
}

pub const TITLE: &[&str] = &[
    "h3.title_text",
    ".ArticleTitle .title_text",
    ".article_header h3",
    "h3.title",
    "h2.title",
    "h1.title",
    ".tit-box .title",
    ".title",
];

pub const AUTHOR: &[&str] = &[
    ".ArticleWriterProfile .nickname",
    ".WriterInfo .nickname",
    ".article_writer .nickname",
    ".nick_box .nickname",
    ".nickname",
    ".nick",
    ".author",
    ".writer",
    "[class*='nick']",
    "[class*='author']",
    "[class*='writer']",
];

pub const CONTENT: &[&str] = &[
    ".se-main-container",
    ".ContentRenderer",
    ".article_viewer",
    "#tbody",
    ".se-component-content",
    ".content",
    "[class*='content']",
];

pub const DATE: &[&str] = &[
    ".article_info .date",
    ".WriterInfo .date",
    ".article_writer .date",
    ".date",
    "[class*='date']",
];

pub const COMMENT: &[&str] = &[
    ".CommentItem",
    ".comment_list > li",
    ".comment_area",
    ".LinkComment",
    ".comment",
    ".reply",
];

pub const IMAGE: &[&str] = &[
    ".se-main-container img",
    ".ContentRenderer img",
    ".article_viewer img",
    "#tbody img",
    "img",
];

pub const BOARD_LINK: &[&str] = &[
    "#cafe-menu a[href*='menuid=']",
    "a[href*='menuid=']",
    "a[href*='/menus/']",
    ".cafe-menu-list a",
];

pub const ARTICLE_LINK: &[&str] = &[
    "a.article",
    ".article-board a[href*='articleid=']",
    "a[href*='/articles/']",
    "a[href*='ArticleRead']",
    ".board_list a",
    "tr td a",
    "a[href*='cafe.naver.com']",
];

// Scoped candidates, applied to snapshot HTML rather than the live page.
pub const COMMENT_TEXT: &[&str] = &[
    ".text_comment",
    ".comment_text_view",
    ".comment_text",
    ".comment_box p",
    "p",
];
pub const COMMENT_AUTHOR: &[&str] = &[
    ".comment_nickname",
    ".comment_nick",
    ".nickname",
    ".nick",
    "[class*='nick']",
    ".author",
];
pub const COMMENT_DATE: &[&str] = &[".comment_info_date", ".date", "[class*='date']", "time"];
pub const ROW_AUTHOR: &[&str] = &[
    ".td_name .nickname",
    ".p-nick",
    ".nickname",
    ".nick",
    "[class*='nick']",
    ".author",
    ".writer",
];
pub const ROW_DATE: &[&str] = &[".td_date", ".date", "[class*='date']", "time"];

impl SemanticTarget {
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            SemanticTarget::Title => TITLE,
            SemanticTarget::Author => AUTHOR,
            SemanticTarget::Content => CONTENT,
            SemanticTarget::Date => DATE,
            SemanticTarget::Comment => COMMENT,
            SemanticTarget::Image => IMAGE,
            SemanticTarget::BoardLink => BOARD_LINK,
            SemanticTarget::ArticleLink => ARTICLE_LINK,
        }
    }

    pub fn validity(self) -> Validity {
        match self {
            SemanticTarget::Title => Validity::longer_than(5),
            SemanticTarget::Author => Validity::shorter_than(50),
            SemanticTarget::Content => Validity::longer_than(10),
            SemanticTarget::Date => Validity::shorter_than(40),
            // Images carry no text; the extractor judges them by src.
            SemanticTarget::Image => Validity::any(),
            _ => Validity::non_empty(),
        }
    }
}

/// Predicate a matched element's text must pass to be accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Validity {
    /// Trimmed text must be strictly longer than this many characters.
    pub min_exclusive: usize,
    /// Trimmed text must be strictly shorter than this many characters.
    pub max_exclusive: Option<usize>,
    pub allow_empty: bool,
}

impl Validity {
    pub fn non_empty() -> Self {
        Self {
            min_exclusive: 0,
            max_exclusive: None,
            allow_empty: false,
        }
    }

    pub fn any() -> Self {
        Self {
            allow_empty: true,
            ..Self::non_empty()
        }
    }

    pub fn longer_than(n: usize) -> Self {
        Self {
            min_exclusive: n,
            ..Self::non_empty()
        }
    }

    pub fn shorter_than(n: usize) -> Self {
        Self {
            max_exclusive: Some(n),
            ..Self::non_empty()
        }
    }

    pub fn accepts(&self, text: &str, false_positives: &[String]) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return self.allow_empty;
        }
        let len = text.chars().count();
        if len <= self.min_exclusive {
            return false;
        }
        if matches!(self.max_exclusive, Some(max) if len >= max) {
            return false;
        }
        !false_positives.iter().any(|fp| fp.trim() == text)
    }
}

/// Outcome of a ranked search. `NotFound` is a value, not an error: callers
/// decide whether a miss matters.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    Found {
        selector: &'static str,
        element: ElementSnapshot,
    },
    NotFound,
}

impl Resolution {
    pub fn text(&self) -> Option<&str> {
        match self {
            Resolution::Found { element, .. } => Some(element.text.trim()),
            Resolution::NotFound => None,
        }
    }

    pub fn html(&self) -> Option<&str> {
        match self {
            Resolution::Found { element, .. } => Some(element.html.as_str()),
            Resolution::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        matches!(self, Resolution::Found { .. })
    }
}

#[derive(Debug, Clone)]
pub struct SelectorResolver {
    pub timeout: Duration,
    pub poll_interval: Duration,
    pub false_positives: Vec<String>,
}

impl SelectorResolver {
    pub fn new(timeout: Duration, poll_interval: Duration, false_positives: Vec<String>) -> Self {
        Self {
            timeout,
            poll_interval,
            false_positives,
        }
    }

    /// Wait up to `timeout` for `selector` to match at least one element.
    /// Query errors (bad selector, frame gone) read as a miss.
    pub async fn try_match(
        &self,
        page: &dyn PageDriver,
        selector: &str,
        timeout: Duration,
    ) -> Option<Vec<ElementSnapshot>> {
        let deadline = Instant::now() + timeout;
        loop {
            match page.query(selector).await {
                Ok(found) if !found.is_empty() => return Some(found),
                Ok(_) => {}
                Err(e) => debug!("selector {:?} failed: {}", selector, e),
            }
            if Instant::now() >= deadline {
                return None;
            }
            sleep(self.poll_interval).await;
        }
    }

    pub async fn resolve(&self, page: &dyn PageDriver, target: SemanticTarget) -> Resolution {
        self.resolve_with(page, target.candidates(), target.validity(), self.timeout)
            .await
    }

    /// First element, over candidates in rank order, whose text passes
    /// `validity`. Later candidates are never queried once one is accepted.
    pub async fn resolve_with(
        &self,
        page: &dyn PageDriver,
        candidates: &'static [&'static str],
        validity: Validity,
        timeout: Duration,
    ) -> Resolution {
        for selector in candidates {
            let Some(found) = self.try_match(page, selector, timeout).await else {
                continue;
            };
            if let Some(element) = found
                .into_iter()
                .find(|el| validity.accepts(&el.text, &self.false_positives))
            {
                debug!("resolved via {:?}", selector);
                return Resolution::Found { selector, element };
            }
        }
        Resolution::NotFound
    }

    /// All valid elements of the first candidate that yields any.
    pub async fn resolve_all(&self, page: &dyn PageDriver, target: SemanticTarget) -> Vec<ElementSnapshot> {
        let validity = target.validity();
        for selector in target.candidates() {
            let Some(found) = self.try_match(page, selector, self.timeout).await else {
                continue;
            };
            let valid: Vec<ElementSnapshot> = found
                .into_iter()
                .filter(|el| validity.accepts(&el.text, &self.false_positives))
                .collect();
            if !valid.is_empty() {
                debug!("{:?}: {} elements via {:?}", target, valid.len(), selector);
                return valid;
            }
        }
        Vec::new()
    }

    /// Ranked search inside a snapshot's HTML (comment fields, listing rows).
    pub fn resolve_in(&self, html: &str, candidates: &[&str], validity: Validity) -> Option<String> {
        first_text_in(html, candidates, |text| validity.accepts(text, &self.false_positives))
    }
}

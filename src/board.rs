//! Board discovery on a cafe home page and paginated listing walks.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Url;
use std::collections::HashSet;
use tracing::{debug, info, warn};

use crate::dom::{normalize_text, ElementSnapshot};
use crate::error::{ScrapeError, ScrapeResult};
use crate::navigator::Navigator;
use crate::records::{article_id_from_url, ArticleStub, BoardRef, NOT_FOUND, UNKNOWN};
use crate::selectors::{SelectorResolver, SemanticTarget, Validity, ARTICLE_LINK, ROW_AUTHOR, ROW_DATE};
use crate::session::SessionManager;

static MENU_ID: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        Regex::new(r"(?i)menuid=(\d+)").unwrap(),
        Regex::new(r"(?i)/menus/(\d+)").unwrap(),
    ]
});

static PERMALINK: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)(?:[?&]articleid=\d+|/articles/\d+)").unwrap());

pub fn menu_id(href: &str) -> Option<String> {
    MENU_ID
        .iter()
        .find_map(|re| re.captures(href))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// `board_url` with its page parameter set to `page`. Legacy list pages
/// (`ArticleList.nhn`, `BoardList.nhn`) take `search.page`, the rest `page`.
pub fn page_url(board_url: &str, page: u32) -> String {
    let Ok(mut url) = Url::parse(board_url) else {
        let sep = if board_url.contains('?') { '&' } else { '?' };
        return format!("{}{}page={}", board_url, sep, page);
    };
    let key = if url.path().contains("ArticleList") || url.path().contains("BoardList") {
        "search.page"
    } else {
        "page"
    };
    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != key)
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair(key, &page.to_string());
    url.to_string()
}

fn absolute(base: &str, href: &str) -> String {
    Url::parse(base)
        .and_then(|b| b.join(href))
        .map(|u| u.to_string())
        .unwrap_or_else(|_| href.to_string())
}

pub struct BoardWalker {
    resolver: SelectorResolver,
    navigator: Navigator,
}

impl BoardWalker {
    pub fn new(navigator: Navigator, resolver: SelectorResolver) -> Self {
        Self { resolver, navigator }
    }

    /// Boards linked from the cafe home. An empty result is an error: a cafe
    /// always has at least one board, so nothing found means the menu did not
    /// render or access was denied.
    pub async fn discover_boards(&self, session: &mut SessionManager, cafe_url: &str) -> ScrapeResult<Vec<BoardRef>> {
        self.navigator.goto(session, cafe_url).await?;
        let page = session.page()?;
        let links = self.resolver.resolve_all(page, SemanticTarget::BoardLink).await;

        let mut seen = HashSet::new();
        let mut boards = Vec::new();
        for (idx, link) in links.iter().enumerate() {
            let Some(href) = link.attr("href") else {
                continue;
            };
            let board_url = absolute(cafe_url, href);
            let menu_id = menu_id(&board_url).unwrap_or_else(|| format!("auto-{}", idx + 1));
            if !seen.insert(menu_id.clone()) {
                continue;
            }
            boards.push(BoardRef {
                menu_id,
                menu_name: normalize_text(&link.text),
                board_url,
            });
        }

        if boards.is_empty() {
            return Err(ScrapeError::NoBoards(cafe_url.to_string()));
        }
        info!("📋 Discovered {} boards at {}", boards.len(), cafe_url);
        Ok(boards)
    }

    /// Article stubs from pages `1..=max_pages`, stopping early at the first
    /// page with no article links. A navigation failure after the first page
    /// ends the walk with what was collected so far.
    pub async fn walk_board(
        &self,
        session: &mut SessionManager,
        board_url: &str,
        max_pages: u32,
    ) -> ScrapeResult<Vec<ArticleStub>> {
        let mut stubs = Vec::new();
        let mut seen = HashSet::new();

        for page_no in 1..=max_pages.max(1) {
            let url = page_url(board_url, page_no);
            if let Err(e) = self.navigator.goto(session, &url).await {
                if page_no == 1 {
                    return Err(e);
                }
                warn!("Stopping walk of {} at page {}: {}", board_url, page_no, e);
                break;
            }

            let links = self.article_links(session).await?;
            if links.is_empty() {
                debug!("Page {} of {} is empty, end of listing", page_no, board_url);
                break;
            }

            let before = stubs.len();
            for link in &links {
                if let Some(stub) = self.stub_from(link, &url) {
                    if seen.insert(stub.article_id.clone()) {
                        stubs.push(stub);
                    }
                }
            }
            info!(
                "📄 {} page {}: {} new articles",
                board_url,
                page_no,
                stubs.len() - before
            );
        }
        Ok(stubs)
    }

    /// Links of the first candidate that yields any article permalinks.
    async fn article_links(&self, session: &SessionManager) -> ScrapeResult<Vec<ElementSnapshot>> {
        let page = session.page()?;
        for selector in ARTICLE_LINK {
            let Some(found) = self.resolver.try_match(page, selector, self.resolver.timeout).await else {
                continue;
            };
            let permalinks: Vec<ElementSnapshot> = found
                .into_iter()
                .filter(|el| el.attr("href").map_or(false, |h| PERMALINK.is_match(h)))
                .collect();
            if !permalinks.is_empty() {
                return Ok(permalinks);
            }
        }
        Ok(Vec::new())
    }

    fn stub_from(&self, link: &ElementSnapshot, page_url: &str) -> Option<ArticleStub> {
        let article_url = absolute(page_url, link.attr("href")?);
        let article_id = article_id_from_url(&article_url)?;
        let title = normalize_text(&link.text);
        let row = link.row_html.as_deref().unwrap_or_default();
        let author_nickname = self
            .resolver
            .resolve_in(row, ROW_AUTHOR, Validity::shorter_than(50))
            .unwrap_or_else(|| UNKNOWN.to_string());
        let posted_at = self.resolver.resolve_in(row, ROW_DATE, Validity::shorter_than(40));
        Some(ArticleStub {
            article_id,
            article_url,
            title: if title.is_empty() { NOT_FOUND.to_string() } else { title },
            author_nickname,
            posted_at,
        })
    }
}

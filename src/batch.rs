//! Multi-board batch runs: walk, filter, cap, extract, pace.

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::board::BoardWalker;
use crate::error::{ScrapeError, ScrapeResult};
use crate::extractor::{Extractor, ImageMode, NicknameFilter};
use crate::filter::FilterSpec;
use crate::observer::{ScrapeEvent, ScrapeObserver};
use crate::pacing::Pacing;
use crate::records::{ArticleDetail, ArticleStub, BoardRef};
use crate::session::SessionManager;

#[derive(Debug, Clone)]
pub struct BatchRequest {
    /// Restrict the run to these menu ids. `None` or empty means every board.
    pub menu_ids: Option<Vec<String>>,
    pub filters: FilterSpec,
    pub max_articles: usize,
    pub max_pages: u32,
    pub image_mode: ImageMode,
    pub nicknames: NicknameFilter,
    pub max_retries: u32,
}

impl BatchRequest {
    pub fn new(max_articles: usize, max_pages: u32) -> Self {
        Self {
            menu_ids: None,
            filters: FilterSpec::default(),
            max_articles,
            max_pages,
            image_mode: ImageMode::Embed,
            nicknames: NicknameFilter::default(),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BoardFailure {
    pub menu_id: String,
    pub menu_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub details: Vec<ArticleDetail>,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Extracted but dropped by the content keyword filter.
    pub filtered_out: usize,
    pub boards_visited: usize,
    pub board_failures: Vec<BoardFailure>,
    pub cancelled: bool,
}

pub struct BatchOrchestrator<'a> {
    walker: &'a BoardWalker,
    extractor: &'a Extractor,
    pacing: Pacing,
    observer: Arc<dyn ScrapeObserver>,
    rng: StdRng,
    /// Articles fetched so far in this run, for pacing and spacing.
    fetched: usize,
}

impl<'a> BatchOrchestrator<'a> {
    pub fn new(
        walker: &'a BoardWalker,
        extractor: &'a Extractor,
        pacing: Pacing,
        observer: Arc<dyn ScrapeObserver>,
    ) -> Self {
        Self {
            walker,
            extractor,
            pacing,
            observer,
            rng: StdRng::from_entropy(),
            fetched: 0,
        }
    }

    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    /// Run over `boards`. Board-level failures are recorded and skipped; only
    /// batch-fatal errors abort. Cancellation returns the partial report.
    pub async fn run(
        &mut self,
        session: &mut SessionManager,
        boards: &[BoardRef],
        request: &BatchRequest,
        cancel: &CancellationToken,
    ) -> ScrapeResult<BatchReport> {
        let targets: Vec<&BoardRef> = match request.menu_ids.as_deref() {
            Some(ids) if !ids.is_empty() => boards.iter().filter(|b| ids.contains(&b.menu_id)).collect(),
            _ => boards.iter().collect(),
        };
        if targets.is_empty() {
            return Err(ScrapeError::NoBoards(format!(
                "no board matches menu ids {:?}",
                request.menu_ids.clone().unwrap_or_default()
            )));
        }

        self.fetched = 0;
        self.observer.on_event(&ScrapeEvent::RunStarted { label: "batch" });
        let mut report = BatchReport::default();

        for (idx, board) in targets.iter().enumerate() {
            if report.details.len() >= request.max_articles {
                info!("🧮 Article cap of {} reached", request.max_articles);
                break;
            }
            if idx > 0 {
                let delay = self.pacing.board_delay(idx, targets.len(), &mut self.rng);
                if !pause(delay, cancel).await {
                    report.cancelled = true;
                    break;
                }
            }
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            self.observer.on_event(&ScrapeEvent::BoardStarted {
                menu_id: &board.menu_id,
                menu_name: &board.menu_name,
            });
            report.boards_visited += 1;
            match self.scrape_board(session, board, request, cancel, &mut report).await {
                Ok(()) => {}
                Err(ScrapeError::Cancelled) => {
                    report.cancelled = true;
                    break;
                }
                Err(e) if e.is_batch_fatal() => {
                    self.finish(&report);
                    return Err(e);
                }
                Err(e) => {
                    let error = e.to_string();
                    self.observer.on_event(&ScrapeEvent::BoardFailed {
                        menu_id: &board.menu_id,
                        error: &error,
                    });
                    report.board_failures.push(BoardFailure {
                        menu_id: board.menu_id.clone(),
                        menu_name: board.menu_name.clone(),
                        error,
                    });
                }
            }
        }

        self.finish(&report);
        Ok(report)
    }

    /// Extract explicit article URLs, paced like a batch.
    pub async fn run_urls(
        &mut self,
        session: &mut SessionManager,
        urls: &[String],
        request: &BatchRequest,
        cancel: &CancellationToken,
    ) -> ScrapeResult<BatchReport> {
        self.fetched = 0;
        self.observer.on_event(&ScrapeEvent::RunStarted { label: "urls" });
        let mut report = BatchReport::default();
        let stubs: Vec<ArticleStub> = urls
            .iter()
            .map(|url| ArticleStub {
                article_id: crate::records::article_id_from_url(url).unwrap_or_default(),
                article_url: url.clone(),
                title: String::new(),
                author_nickname: String::new(),
                posted_at: None,
            })
            .collect();
        let outcome = self
            .extract_stubs(session, &stubs, request, cancel, &mut report)
            .await;
        self.finish(&report);
        match outcome {
            Ok(()) => Ok(report),
            Err(ScrapeError::Cancelled) => {
                report.cancelled = true;
                Ok(report)
            }
            Err(e) => Err(e),
        }
    }

    async fn scrape_board(
        &mut self,
        session: &mut SessionManager,
        board: &BoardRef,
        request: &BatchRequest,
        cancel: &CancellationToken,
        report: &mut BatchReport,
    ) -> ScrapeResult<()> {
        let stubs = self
            .walker
            .walk_board(session, &board.board_url, request.max_pages)
            .await?;
        let found = stubs.len();
        let stubs = request.filters.filter_stubs(stubs);
        let budget = request.max_articles.saturating_sub(report.details.len());
        let selected: Vec<ArticleStub> = stubs.into_iter().take(budget).collect();
        info!(
            "📂 {}: {} listed, {} selected (budget {})",
            board.menu_name,
            found,
            selected.len(),
            budget
        );
        self.extract_stubs(session, &selected, request, cancel, report)
            .await
    }

    async fn extract_stubs(
        &mut self,
        session: &mut SessionManager,
        stubs: &[ArticleStub],
        request: &BatchRequest,
        cancel: &CancellationToken,
        report: &mut BatchReport,
    ) -> ScrapeResult<()> {
        for stub in stubs {
            if self.fetched > 0 {
                let delay = self
                    .pacing
                    .article_delay(report.details.len(), request.max_articles, &mut self.rng);
                if !pause(delay, cancel).await {
                    return Err(ScrapeError::Cancelled);
                }
            }
            if cancel.is_cancelled() {
                return Err(ScrapeError::Cancelled);
            }

            self.fetched += 1;
            report.attempted += 1;
            let started = Instant::now();
            let result = self
                .extractor
                .extract_article(
                    session,
                    &stub.article_url,
                    &request.nicknames,
                    request.image_mode,
                    request.max_retries,
                )
                .await;

            match result {
                Ok(detail) => {
                    self.observer.on_event(&ScrapeEvent::Article {
                        url: &stub.article_url,
                        elapsed: started.elapsed(),
                        error: None,
                    });
                    report.succeeded += 1;
                    if request.filters.admits_detail(&detail) {
                        report.details.push(detail);
                    } else {
                        report.filtered_out += 1;
                    }
                }
                Err(e) if e.is_batch_fatal() => return Err(e),
                Err(e) => {
                    let error = e.to_string();
                    self.observer.on_event(&ScrapeEvent::Article {
                        url: &stub.article_url,
                        elapsed: started.elapsed(),
                        error: Some(&error),
                    });
                    warn!("Recording degraded row for {}", stub.article_url);
                    report.failed += 1;
                    report.details.push(ArticleDetail::degraded(&stub.article_url, error));
                }
            }
        }
        Ok(())
    }

    fn finish(&self, report: &BatchReport) {
        self.observer.on_event(&ScrapeEvent::RunFinished {
            attempted: report.attempted,
            succeeded: report.succeeded,
            failed: report.failed,
        });
    }
}

/// Sleep for `delay` unless cancelled first. Returns false when cancelled.
async fn pause(delay: std::time::Duration, cancel: &CancellationToken) -> bool {
    tokio::select! {
        _ = sleep(delay) => !cancel.is_cancelled(),
        _ = cancel.cancelled() => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::page_url;
    use crate::navigator::Navigator;
    use crate::observer::StatsObserver;
    use crate::selectors::SelectorResolver;
    use crate::testing::{
        article_html, extractor_settings, listing_html, navigator_settings, no_pacing, session_settings, FakeLauncher,
        FakeWeb,
    };

    const BOARD_1: &str = "https://cafe.naver.com/ArticleList.nhn?search.clubid=100&search.menuid=1";
    const BOARD_2: &str = "https://cafe.naver.com/ArticleList.nhn?search.clubid=100&search.menuid=2";

    fn article_url(id: u64) -> String {
        format!("https://cafe.naver.com/ArticleRead.nhn?clubid=100&articleid={id}")
    }

    fn boards() -> Vec<BoardRef> {
        vec![
            BoardRef {
                menu_id: "1".into(),
                menu_name: "장터".into(),
                board_url: BOARD_1.into(),
            },
            BoardRef {
                menu_id: "2".into(),
                menu_name: "자유".into(),
                board_url: BOARD_2.into(),
            },
        ]
    }

    struct Harness {
        web: Arc<FakeWeb>,
        walker: BoardWalker,
        extractor: Extractor,
        _dir: tempfile::TempDir,
        session: SessionManager,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let web = FakeWeb::new();
            let s = extractor_settings();
            let navigator = Navigator::new(navigator_settings());
            let walker = BoardWalker::new(
                navigator.clone(),
                SelectorResolver::new(s.selector_timeout, s.selector_poll, s.false_positives.clone()),
            );
            let extractor = Extractor::new(navigator, s).unwrap();
            let mut session = SessionManager::new(FakeLauncher::new(web.clone()), session_settings(dir.path()));
            session.start().await.unwrap();
            Self {
                web,
                walker,
                extractor,
                _dir: dir,
                session,
            }
        }

        fn board(&self, url: &str, first_id: u64, count: u64, title: &str) {
            let rows: Vec<(u64, String)> = (first_id..first_id + count)
                .map(|id| (id, format!("{title} #{id}")))
                .collect();
            let rows: Vec<(u64, &str, &str, &str)> = rows
                .iter()
                .map(|(id, t)| (*id, t.as_str(), "seller", "2024.01.05."))
                .collect();
            self.web.page(&page_url(url, 1), &listing_html(&rows));
            for (id, t, _, _) in &rows {
                self.web.page(
                    &article_url(*id),
                    &article_html(t, "seller", "Item in good condition, pickup only.", &[]),
                );
            }
        }

        async fn run(&mut self, request: &BatchRequest, cancel: &CancellationToken) -> ScrapeResult<BatchReport> {
            let stats = StatsObserver::new();
            let mut orchestrator = BatchOrchestrator::new(&self.walker, &self.extractor, Pacing::new(no_pacing()), stats)
                .with_rng(StdRng::seed_from_u64(9));
            orchestrator
                .run(&mut self.session, &boards(), request, cancel)
                .await
        }
    }

    #[tokio::test]
    async fn cap_stops_before_second_board() {
        let mut h = Harness::new().await;
        h.board(BOARD_1, 1, 8, "Camping stove");
        h.board(BOARD_2, 100, 3, "Tent");

        let report = h
            .run(&BatchRequest::new(5, 1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.details.len(), 5);
        assert_eq!(report.attempted, 5);
        assert!(report.details.iter().all(|d| d.article_id.parse::<u64>().unwrap() < 100));
        assert!(!h.web.visited(&page_url(BOARD_2, 1)));
        assert_eq!(report.boards_visited, 1);
    }

    #[tokio::test]
    async fn cap_is_never_exceeded() {
        for cap in [0usize, 1, 4, 11, 30] {
            let mut h = Harness::new().await;
            h.board(BOARD_1, 1, 6, "Lantern");
            h.board(BOARD_2, 100, 6, "Cooler");
            let report = h
                .run(&BatchRequest::new(cap, 1), &CancellationToken::new())
                .await
                .unwrap();
            assert!(report.details.len() <= cap, "cap {cap} exceeded");
            assert_eq!(report.details.len(), cap.min(12));
        }
    }

    #[tokio::test]
    async fn failing_board_does_not_abort_the_batch() {
        let mut h = Harness::new().await;
        h.web.fail_times(&page_url(BOARD_1, 1), 100);
        h.board(BOARD_2, 100, 2, "Backpack");

        let report = h
            .run(&BatchRequest::new(10, 1), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.board_failures.len(), 1);
        assert_eq!(report.board_failures[0].menu_id, "1");
        assert_eq!(report.details.len(), 2);
        assert_eq!(report.boards_visited, 2);
    }

    #[tokio::test]
    async fn failed_article_becomes_degraded_row() {
        let mut h = Harness::new().await;
        h.board(BOARD_1, 1, 2, "Sleeping bag");
        h.web.page(&article_url(2), "<html><body><div>로딩중</div></body></html>");

        let mut request = BatchRequest::new(10, 1);
        request.menu_ids = Some(vec!["1".into()]);
        request.max_retries = 1;
        let report = h.run(&request, &CancellationToken::new()).await.unwrap();

        assert_eq!((report.attempted, report.succeeded, report.failed), (2, 1, 1));
        let degraded = report.details.iter().find(|d| d.is_degraded()).unwrap();
        assert_eq!(degraded.article_url, article_url(2));
        assert!(degraded.error.as_deref().unwrap().contains("failed after 1 attempts"));
    }

    #[tokio::test]
    async fn unrecoverable_browser_aborts_the_batch() {
        let mut h = Harness::new().await;
        h.board(BOARD_1, 1, 3, "Hammock");
        h.web.max_launches(1);
        h.web.kill_after(1);

        let mut request = BatchRequest::new(10, 1);
        request.menu_ids = Some(vec!["1".into()]);
        let err = h.run(&request, &CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, ScrapeError::SessionDead));
        assert_eq!(h.web.launches.load(std::sync::atomic::Ordering::SeqCst), 2);
        assert!(!h.web.visited(&article_url(2)));
    }

    #[tokio::test]
    async fn keyword_filter_runs_before_detail_fetch() {
        let mut h = Harness::new().await;
        h.board(BOARD_1, 1, 3, "Tent");
        h.board(BOARD_2, 100, 3, "Chair");

        let mut request = BatchRequest::new(10, 1);
        request.filters.keywords = vec!["chair".into()];
        let report = h.run(&request, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.details.len(), 3);
        assert!(!h.web.visited(&article_url(1)));
        assert!(h.web.visited(&article_url(100)));
    }

    #[tokio::test]
    async fn content_keywords_drop_details_after_fetch() {
        let mut h = Harness::new().await;
        h.board(BOARD_1, 1, 2, "Table");

        let mut request = BatchRequest::new(10, 1);
        request.menu_ids = Some(vec!["1".into()]);
        request.filters.content_keywords = vec!["delivery".into()];
        let report = h.run(&request, &CancellationToken::new()).await.unwrap();

        assert_eq!(report.attempted, 2);
        assert_eq!(report.filtered_out, 2);
        assert!(report.details.is_empty());
    }

    #[tokio::test]
    async fn cancelled_batch_returns_partial_report() {
        let mut h = Harness::new().await;
        h.board(BOARD_1, 1, 3, "Kayak");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let report = h.run(&BatchRequest::new(10, 1), &cancel).await.unwrap();
        assert!(report.cancelled);
        assert_eq!(report.attempted, 0);
    }

    #[tokio::test]
    async fn unknown_menu_ids_are_batch_fatal() {
        let mut h = Harness::new().await;
        let mut request = BatchRequest::new(10, 1);
        request.menu_ids = Some(vec!["999".into()]);
        let err = h.run(&request, &CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ScrapeError::NoBoards(_)));
    }
}

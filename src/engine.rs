//! One authenticated browser session plus the components that drive it.
//!
//! The engine is the unit the HTTP layer locks: every operation runs to
//! completion on the single browser before the next one starts.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::batch::{BatchOrchestrator, BatchReport, BatchRequest};
use crate::board::BoardWalker;
use crate::browser::BrowserLauncher;
use crate::config::Settings;
use crate::error::{ScrapeError, ScrapeResult};
use crate::extractor::{Extractor, ImageMode, NicknameFilter};
use crate::navigator::Navigator;
use crate::observer::{FanoutObserver, ScrapeObserver, ScrapeStats, StatsObserver, TracingObserver};
use crate::pacing::Pacing;
use crate::records::{ArticleDetail, BoardRef};
use crate::selectors::SelectorResolver;
use crate::session::{SessionManager, SessionState};

pub struct ScrapeEngine {
    settings: Settings,
    session: SessionManager,
    walker: BoardWalker,
    extractor: Extractor,
    observer: Arc<dyn ScrapeObserver>,
    stats: Arc<StatsObserver>,
}

impl ScrapeEngine {
    pub fn new(settings: Settings, launcher: Arc<dyn BrowserLauncher>) -> anyhow::Result<Self> {
        let session = SessionManager::new(launcher, settings.session.clone())
            .with_page_load_timeout(settings.navigator.page_load_timeout);
        let navigator = Navigator::new(settings.navigator.clone());
        let resolver = SelectorResolver::new(
            settings.extractor.selector_timeout,
            settings.extractor.selector_poll,
            settings.extractor.false_positives.clone(),
        );
        let walker = BoardWalker::new(navigator.clone(), resolver);
        let extractor = Extractor::new(navigator, settings.extractor.clone())?;
        let stats = StatsObserver::new();
        let observer = FanoutObserver::new(vec![Arc::new(TracingObserver)]).with(stats.clone());
        Ok(Self {
            settings,
            session,
            walker,
            extractor,
            observer: Arc::new(observer),
            stats,
        })
    }

    pub async fn ensure_session(&mut self) -> SessionState {
        self.session.ensure_session().await
    }

    async fn require_session(&mut self) -> ScrapeResult<()> {
        match self.session.ensure_session().await {
            SessionState::Live => Ok(()),
            SessionState::NeedsManualLogin => Err(ScrapeError::NotLoggedIn(
                "manual login was not completed in time".to_string(),
            )),
            SessionState::Dead => Err(ScrapeError::SessionDead),
        }
    }

    fn request(&self, max_articles: usize, max_pages: u32, nicknames: NicknameFilter) -> BatchRequest {
        BatchRequest {
            nicknames,
            max_retries: self.settings.extractor.max_retries,
            ..BatchRequest::new(max_articles, max_pages)
        }
    }

    pub async fn scrape_article(&mut self, url: &str, nicknames: &NicknameFilter) -> ScrapeResult<ArticleDetail> {
        self.require_session().await?;
        self.extractor
            .extract_article(
                &mut self.session,
                url,
                nicknames,
                ImageMode::Embed,
                self.settings.extractor.max_retries,
            )
            .await
    }

    pub async fn scrape_urls(
        &mut self,
        urls: &[String],
        nicknames: NicknameFilter,
        cancel: &CancellationToken,
    ) -> ScrapeResult<BatchReport> {
        self.require_session().await?;
        let request = self.request(urls.len(), 1, nicknames);
        let pacing = Pacing::new(self.settings.pacing.clone());
        let mut orchestrator =
            BatchOrchestrator::new(&self.walker, &self.extractor, pacing, self.observer.clone());
        orchestrator
            .run_urls(&mut self.session, urls, &request, cancel)
            .await
    }

    pub async fn discover_boards(&mut self, cafe_url: &str) -> ScrapeResult<Vec<BoardRef>> {
        self.require_session().await?;
        self.walker.discover_boards(&mut self.session, cafe_url).await
    }

    /// Scrape one board given by URL, without discovery or filters.
    pub async fn scrape_board(
        &mut self,
        board_url: &str,
        max_pages: u32,
        max_articles: usize,
        nicknames: NicknameFilter,
        cancel: &CancellationToken,
    ) -> ScrapeResult<BatchReport> {
        self.require_session().await?;
        let menu_id = crate::board::menu_id(board_url).unwrap_or_else(|| "board".to_string());
        let board = BoardRef {
            menu_name: menu_id.clone(),
            menu_id,
            board_url: board_url.to_string(),
        };
        let request = self.request(max_articles, max_pages, nicknames);
        let pacing = Pacing::new(self.settings.pacing.clone());
        let mut orchestrator =
            BatchOrchestrator::new(&self.walker, &self.extractor, pacing, self.observer.clone());
        orchestrator
            .run(&mut self.session, &[board], &request, cancel)
            .await
    }

    /// Discover the cafe's boards and run a filtered, capped batch over them.
    /// `delay_min`/`delay_max` override the configured pacing range in seconds.
    pub async fn run_batch(
        &mut self,
        cafe_url: &str,
        mut request: BatchRequest,
        delay_min: Option<f64>,
        delay_max: Option<f64>,
        cancel: &CancellationToken,
    ) -> ScrapeResult<BatchReport> {
        self.require_session().await?;
        let boards = self.walker.discover_boards(&mut self.session, cafe_url).await?;
        if request.max_retries == 0 {
            request.max_retries = self.settings.extractor.max_retries;
        }
        info!(
            "🚚 Batch over {} boards of {} (cap {})",
            boards.len(),
            cafe_url,
            request.max_articles
        );
        let pacing = Pacing::new(self.settings.pacing.clone()).with_range(delay_min, delay_max);
        let mut orchestrator =
            BatchOrchestrator::new(&self.walker, &self.extractor, pacing, self.observer.clone());
        orchestrator
            .run(&mut self.session, &boards, &request, cancel)
            .await
    }

    pub fn base_request(&self, max_articles: usize, max_pages: u32) -> BatchRequest {
        self.request(max_articles, max_pages, NicknameFilter::default())
    }

    pub fn stats(&self) -> ScrapeStats {
        self.stats.stats()
    }

    pub async fn close(&mut self) {
        self.session.close().await;
    }
}

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use uuid::Uuid;

use crate::batch::{BatchReport, BoardFailure};
use crate::csv_sink::CsvSink;
use crate::engine::ScrapeEngine;
use crate::error::ScrapeError;
use crate::extractor::{ImageMode, NicknameFilter};
use crate::filter::{FilterSpec, Period};
use crate::observer::ScrapeStats;
use crate::records::{ArticleDetail, BoardRef};
use crate::session::SessionState;

pub struct AppState {
    pub engine: tokio::sync::Mutex<ScrapeEngine>,
    /// Token of the run in progress; replaced at the start of every run.
    pub cancel: Mutex<CancellationToken>,
    pub csv: CsvSink,
}

impl AppState {
    pub fn new(engine: ScrapeEngine, csv: CsvSink) -> Self {
        Self {
            engine: tokio::sync::Mutex::new(engine),
            cancel: Mutex::new(CancellationToken::new()),
            csv,
        }
    }

    /// Install the token for a new run. Taking the engine proves the caller
    /// holds its lock, so a request still queued on it never steals the slot.
    fn fresh_token(&self, _running: &ScrapeEngine) -> CancellationToken {
        let token = CancellationToken::new();
        let mut current = self.cancel.lock().unwrap_or_else(|p| p.into_inner());
        *current = token.clone();
        token
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/login/start", post(login_start))
        .route("/scrape/article", post(scrape_article))
        .route("/scrape/board", post(scrape_board))
        .route("/scrape/multiple", post(scrape_multiple))
        .route("/cafe/boards", post(cafe_boards))
        .route("/scrape/cafe", post(scrape_cafe))
        .route("/scrape/batch", post(scrape_batch))
        .route("/scrape/cancel", post(cancel_scrape))
        .with_state(state)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Warning,
    Error,
}

#[derive(Serialize)]
pub struct ScrapeResponse {
    pub status: Status,
    pub message: String,
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub saved_csvs: Vec<String>,
    pub results: Vec<ArticleDetail>,
    #[serde(skip_serializing_if = "is_zero")]
    pub filtered_out: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub board_failures: Vec<BoardFailure>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub cancelled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<ScrapeStats>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// success when everything attempted succeeded, error when nothing did,
/// warning for partial, empty or cancelled runs.
pub fn status_for(report: &BatchReport) -> Status {
    if report.cancelled || report.attempted == 0 {
        Status::Warning
    } else if report.failed == 0 && report.board_failures.is_empty() {
        Status::Success
    } else if report.succeeded == 0 {
        Status::Error
    } else {
        Status::Warning
    }
}

fn message_for(report: &BatchReport) -> String {
    if report.cancelled {
        format!("Cancelled after {} articles", report.attempted)
    } else if report.attempted == 0 {
        "No articles found".to_string()
    } else {
        format!(
            "Scraped {}/{} articles ({} failed)",
            report.succeeded, report.attempted, report.failed
        )
    }
}

impl ScrapeResponse {
    fn from_report(report: BatchReport, saved: Option<String>, stats: Option<ScrapeStats>) -> Self {
        Self {
            status: status_for(&report),
            message: message_for(&report),
            attempted: report.attempted,
            succeeded: report.succeeded,
            failed: report.failed,
            saved_csvs: saved.into_iter().collect(),
            results: report.details,
            filtered_out: report.filtered_out,
            board_failures: report.board_failures,
            cancelled: report.cancelled,
            stats,
        }
    }
}

/// Errors that end a request before any per-article accounting exists.
pub enum ApiError {
    Scrape(ScrapeError),
    BadRequest(String),
}

impl From<ScrapeError> for ApiError {
    fn from(e: ScrapeError) -> Self {
        ApiError::Scrape(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Scrape(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
        };
        error!("🔥 Request failed: {}", message);
        let body = serde_json::json!({
            "status": Status::Error,
            "message": message,
            "attempted": 0,
            "succeeded": 0,
            "failed": 0,
            "saved_csvs": [],
            "results": [],
        });
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

fn save(state: &AppState, details: &[ArticleDetail], batch_id: Option<&str>) -> Result<Option<String>, ApiError> {
    Ok(state
        .csv
        .write(details, batch_id)?
        .map(|p| p.display().to_string()))
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "ok": true }))
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub status: Status,
    pub state: SessionState,
    pub message: String,
}

pub async fn login_start(State(state): State<Arc<AppState>>) -> (StatusCode, Json<LoginResponse>) {
    let session_state = state.engine.lock().await.ensure_session().await;
    let (code, status, message) = match session_state {
        SessionState::Live => (StatusCode::OK, Status::Success, "Logged in"),
        SessionState::NeedsManualLogin => (
            StatusCode::OK,
            Status::Warning,
            "Login not completed; finish it in the browser window and retry",
        ),
        SessionState::Dead => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Status::Error,
            "Browser could not be started",
        ),
    };
    (
        code,
        Json(LoginResponse {
            status,
            state: session_state,
            message: message.to_string(),
        }),
    )
}

#[derive(Deserialize)]
pub struct ArticleRequest {
    pub url: String,
    pub cafe_id: Option<String>,
    #[serde(default)]
    pub comment_filter: NicknameFilter,
}

pub async fn scrape_article(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<ArticleRequest>,
) -> ApiResult<ScrapeResponse> {
    let mut engine = state.engine.lock().await;
    let mut report = BatchReport {
        attempted: 1,
        ..Default::default()
    };
    match engine.scrape_article(&payload.url, &payload.comment_filter).await {
        Ok(mut detail) => {
            if detail.cafe_id.is_empty() {
                detail.cafe_id = payload.cafe_id.clone().unwrap_or_default();
            }
            report.succeeded = 1;
            report.details.push(detail);
        }
        Err(e) if e.is_batch_fatal() => return Err(e.into()),
        Err(e) => {
            report.failed = 1;
            report.details.push(ArticleDetail::degraded(&payload.url, e.to_string()));
        }
    }
    drop(engine);
    let saved = save(&state, &report.details, None)?;
    Ok(Json(ScrapeResponse::from_report(report, saved, None)))
}

fn default_pages() -> u32 {
    1
}

fn default_articles() -> usize {
    50
}

#[derive(Deserialize)]
pub struct BoardRequest {
    pub board_url: String,
    #[serde(default = "default_pages")]
    pub max_pages: u32,
    #[serde(default)]
    pub comment_filter: NicknameFilter,
    #[serde(default = "default_articles")]
    pub max_articles: usize,
}

pub async fn scrape_board(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BoardRequest>,
) -> ApiResult<ScrapeResponse> {
    let mut engine = state.engine.lock().await;
    let cancel = state.fresh_token(&engine);
    let report = engine
        .scrape_board(
            &payload.board_url,
            payload.max_pages,
            payload.max_articles,
            payload.comment_filter,
            &cancel,
        )
        .await?;
    drop(engine);
    let saved = save(&state, &report.details, None)?;
    Ok(Json(ScrapeResponse::from_report(report, saved, None)))
}

#[derive(Deserialize)]
pub struct MultipleRequest {
    pub article_urls: Vec<String>,
    #[serde(default)]
    pub comment_filter: NicknameFilter,
}

pub async fn scrape_multiple(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<MultipleRequest>,
) -> ApiResult<ScrapeResponse> {
    let mut engine = state.engine.lock().await;
    let cancel = state.fresh_token(&engine);
    let report = engine
        .scrape_urls(&payload.article_urls, payload.comment_filter, &cancel)
        .await?;
    drop(engine);
    let saved = save(&state, &report.details, None)?;
    Ok(Json(ScrapeResponse::from_report(report, saved, None)))
}

#[derive(Deserialize)]
pub struct CafeRequest {
    pub cafe_url: String,
}

#[derive(Serialize)]
pub struct BoardsResponse {
    pub status: Status,
    pub message: String,
    pub boards: Vec<BoardRef>,
}

pub async fn cafe_boards(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CafeRequest>,
) -> ApiResult<BoardsResponse> {
    let boards = state.engine.lock().await.discover_boards(&payload.cafe_url).await?;
    Ok(Json(BoardsResponse {
        status: Status::Success,
        message: format!("Found {} boards", boards.len()),
        boards,
    }))
}

#[derive(Deserialize)]
pub struct CafeScrapeRequest {
    pub cafe_url: String,
    #[serde(default = "default_pages")]
    pub max_pages_per_board: u32,
    #[serde(default = "default_articles")]
    pub max_articles: usize,
    #[serde(default)]
    pub comment_filter: NicknameFilter,
}

pub async fn scrape_cafe(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CafeScrapeRequest>,
) -> ApiResult<ScrapeResponse> {
    let mut engine = state.engine.lock().await;
    let cancel = state.fresh_token(&engine);
    let mut request = engine.base_request(payload.max_articles, payload.max_pages_per_board);
    request.nicknames = payload.comment_filter;
    let report = engine
        .run_batch(&payload.cafe_url, request, None, None, &cancel)
        .await?;
    drop(engine);
    let saved = save(&state, &report.details, None)?;
    Ok(Json(ScrapeResponse::from_report(report, saved, None)))
}

/// A preset name (`1w`) or an explicit inclusive range.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum PeriodParam {
    Preset(String),
    Range {
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    },
}

impl PeriodParam {
    fn resolve(&self, today: NaiveDate) -> Result<Period, ApiError> {
        match self {
            PeriodParam::Preset(name) => Period::preset(name, today)
                .ok_or_else(|| ApiError::BadRequest(format!("unknown period preset {:?}", name))),
            PeriodParam::Range { start, end } => Ok(Period {
                start: *start,
                end: *end,
            }),
        }
    }
}

#[derive(Deserialize)]
pub struct BatchScrapeRequest {
    pub cafe_url: String,
    pub menu_ids: Option<Vec<String>>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub content_keywords: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    pub period: Option<PeriodParam>,
    #[serde(default)]
    pub image_mode: ImageMode,
    #[serde(default = "default_articles")]
    pub max_articles: usize,
    #[serde(default = "default_pages")]
    pub max_pages: u32,
    pub delay_min: Option<f64>,
    pub delay_max: Option<f64>,
    #[serde(default)]
    pub comment_filter: NicknameFilter,
    pub batch_id: Option<String>,
}

pub async fn scrape_batch(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<BatchScrapeRequest>,
) -> ApiResult<ScrapeResponse> {
    let period = match &payload.period {
        Some(p) => p.resolve(Local::now().date_naive())?,
        None => Period::all(),
    };
    let batch_id = payload
        .batch_id
        .clone()
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    info!("🚚 Batch {} for {}", batch_id, payload.cafe_url);

    let mut engine = state.engine.lock().await;
    let cancel = state.fresh_token(&engine);
    let mut request = engine.base_request(payload.max_articles, payload.max_pages);
    request.menu_ids = payload.menu_ids;
    request.image_mode = payload.image_mode;
    request.nicknames = payload.comment_filter;
    request.filters = FilterSpec {
        keywords: payload.keywords,
        content_keywords: payload.content_keywords,
        authors: payload.authors,
        period,
    };
    let report = engine
        .run_batch(&payload.cafe_url, request, payload.delay_min, payload.delay_max, &cancel)
        .await?;
    let stats = engine.stats();
    drop(engine);

    let saved = save(&state, &report.details, Some(&batch_id))?;
    Ok(Json(ScrapeResponse::from_report(report, saved, Some(stats))))
}

pub async fn cancel_scrape(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    state
        .cancel
        .lock()
        .unwrap_or_else(|p| p.into_inner())
        .cancel();
    info!("🛑 Cancellation requested");
    Json(serde_json::json!({ "status": Status::Success, "message": "Cancellation requested" }))
}

use thiserror::Error;

/// Failure modes of the session-and-extraction engine.
///
/// Transient misses (a selector candidate, one cookie, one image) never show up
/// here: they are logged and skipped where they happen.
#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("navigation to {url} failed after {attempts} attempts: {last}")]
    Navigation {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("browser session is dead and could not be recovered")]
    SessionDead,

    #[error("no authenticated session: {0}")]
    NotLoggedIn(String),

    #[error("no boards discovered at {0}")]
    NoBoards(String),

    #[error("extraction of {url} failed after {attempts} attempts: {last}")]
    Extraction {
        url: String,
        attempts: u32,
        last: String,
    },

    #[error("operation cancelled")]
    Cancelled,

    #[error(transparent)]
    Browser(#[from] anyhow::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Csv(#[from] csv::Error),
}

impl ScrapeError {
    /// Errors that must abort a whole batch instead of being recorded per unit.
    pub fn is_batch_fatal(&self) -> bool {
        matches!(
            self,
            ScrapeError::NoBoards(_) | ScrapeError::NotLoggedIn(_) | ScrapeError::SessionDead
        )
    }
}

pub type ScrapeResult<T> = std::result::Result<T, ScrapeError>;

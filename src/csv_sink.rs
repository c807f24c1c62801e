use chrono::{DateTime, Local, SecondsFormat};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ScrapeResult;
use crate::records::ArticleDetail;

pub const CSV_FIELDS: [&str; 11] = [
    "cafe_id",
    "article_id",
    "article_url",
    "title",
    "author_nickname",
    "posted_at",
    "content_text",
    "content_html",
    "images_base64_json",
    "comments_json",
    "scraped_at",
];

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    cafe_id: &'a str,
    article_id: &'a str,
    article_url: &'a str,
    title: &'a str,
    author_nickname: &'a str,
    posted_at: &'a str,
    content_text: &'a str,
    content_html: &'a str,
    images_base64_json: String,
    comments_json: String,
    scraped_at: String,
}

impl<'a> CsvRow<'a> {
    fn from_detail(detail: &'a ArticleDetail) -> ScrapeResult<Self> {
        Ok(Self {
            cafe_id: &detail.cafe_id,
            article_id: &detail.article_id,
            article_url: &detail.article_url,
            title: &detail.title,
            author_nickname: &detail.author_nickname,
            posted_at: detail.posted_at.as_deref().unwrap_or_default(),
            content_text: &detail.content_text,
            content_html: &detail.content_html,
            images_base64_json: serde_json::to_string(&detail.images)?,
            comments_json: serde_json::to_string(&detail.comments)?,
            scraped_at: detail
                .scraped_at
                .with_timezone(&Local)
                .to_rfc3339_opts(SecondsFormat::Secs, false),
        })
    }
}

/// Date-bucketed CSV output under `OUTPUTS_DIR/YYYY-MM-DD/`.
#[derive(Debug, Clone)]
pub struct CsvSink {
    base_dir: PathBuf,
}

impl CsvSink {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    /// Write `details` and return the file used, or `None` when there was
    /// nothing to write.
    pub fn write(&self, details: &[ArticleDetail], batch_id: Option<&str>) -> ScrapeResult<Option<PathBuf>> {
        self.write_at(details, batch_id, Local::now())
    }

    fn write_at(
        &self,
        details: &[ArticleDetail],
        batch_id: Option<&str>,
        now: DateTime<Local>,
    ) -> ScrapeResult<Option<PathBuf>> {
        if details.is_empty() {
            return Ok(None);
        }
        let dir = self.base_dir.join(now.format("%Y-%m-%d").to_string());
        fs::create_dir_all(&dir)?;
        let stem = format!("articles_{}", now.format("%Y%m%d"));

        let path = match batch_id.map(sanitize_batch_id).filter(|id| !id.is_empty()) {
            Some(id) => dir.join(format!("{}_{}.csv", stem, id)),
            None => free_name(&dir, &stem),
        };
        let needs_header = fs::metadata(&path).map(|m| m.len() == 0).unwrap_or(true);

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = csv::WriterBuilder::new().has_headers(false).from_writer(file);
        if needs_header {
            writer.write_record(CSV_FIELDS)?;
        }
        for detail in details {
            writer.serialize(CsvRow::from_detail(detail)?)?;
        }
        writer.flush()?;

        info!("💾 Wrote {} rows to {}", details.len(), path.display());
        Ok(Some(path))
    }
}

fn free_name(dir: &Path, stem: &str) -> PathBuf {
    let first = dir.join(format!("{}.csv", stem));
    if !first.exists() {
        return first;
    }
    (1..)
        .map(|n| dir.join(format!("{}_{}.csv", stem, n)))
        .find(|p| !p.exists())
        .unwrap_or(first)
}

fn sanitize_batch_id(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect()
}

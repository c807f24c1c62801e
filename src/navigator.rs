use std::path::Path;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::config::NavigatorSettings;
use crate::error::{ScrapeError, ScrapeResult};
use crate::session::SessionManager;

/// Navigation with a liveness check up front, bounded retries, a settle delay
/// after every attempt, and at most one session recovery per call.
#[derive(Debug, Clone)]
pub struct Navigator {
    settings: NavigatorSettings,
}

impl Navigator {
    pub fn new(settings: NavigatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &NavigatorSettings {
        &self.settings
    }

    pub async fn goto(&self, session: &mut SessionManager, url: &str) -> ScrapeResult<()> {
        self.goto_with_retries(session, url, self.settings.retries)
            .await
    }

    pub async fn goto_with_retries(
        &self,
        session: &mut SessionManager,
        url: &str,
        retries: u32,
    ) -> ScrapeResult<()> {
        let mut budget = retries.max(1);
        let mut recovered = false;

        if !session.check_liveness().await {
            session.recover().await?;
            recovered = true;
        }

        let mut last_error = String::new();
        let mut attempt = 0;
        while attempt < budget {
            attempt += 1;
            debug!("Navigating to {} (attempt {}/{})", url, attempt, budget);

            let outcome = match session.page() {
                Ok(page) => page
                    .navigate(url, self.settings.page_load_timeout)
                    .await
                    .map_err(|e| e.to_string()),
                Err(e) => Err(e.to_string()),
            };
            sleep(self.settings.settle_delay).await;

            let alive = session.check_liveness().await;
            match outcome {
                Ok(()) if alive => {
                    self.snapshot(session, url).await;
                    return Ok(());
                }
                Ok(()) => last_error = "browser died after navigation".to_string(),
                Err(e) => {
                    warn!("⚠️ Attempt {}/{} to load {} failed: {}", attempt, budget, url, e);
                    last_error = e;
                }
            }

            if !alive {
                if recovered {
                    return Err(ScrapeError::SessionDead);
                }
                session.recover().await?;
                recovered = true;
                // A recovery always earns the original navigation one more try.
                if attempt == budget {
                    budget += 1;
                }
            }
        }

        Err(ScrapeError::Navigation {
            url: url.to_string(),
            attempts: attempt,
            last: last_error,
        })
    }

    async fn snapshot(&self, session: &SessionManager, url: &str) {
        let Some(dir) = &self.settings.snapshots_dir else {
            return;
        };
        let Ok(page) = session.page() else {
            return;
        };
        match page.screenshot().await {
            Ok(png) => {
                let path = dir.join(format!("{}.png", snapshot_slug(url)));
                if let Err(e) = write_snapshot(&path, &png).await {
                    warn!("Could not write snapshot {}: {}", path.display(), e);
                } else {
                    info!("📸 Snapshot saved to {}", path.display());
                }
            }
            Err(e) => warn!("Screenshot of {} failed: {}", url, e),
        }
    }
}

async fn write_snapshot(path: &Path, png: &[u8]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, png).await
}

/// Filesystem-safe name for a URL.
pub fn snapshot_slug(url: &str) -> String {
    let decoded = urlencoding::decode(url)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| url.to_string());
    let stripped = decoded
        .trim_start_matches("https://")
        .trim_start_matches("http://");

    let mut slug = String::with_capacity(stripped.len());
    for c in stripped.chars() {
        if c.is_ascii_alphanumeric() || c == '-' {
            slug.push(c);
        } else if !slug.ends_with('_') {
            slug.push('_');
        }
    }
    let slug = slug.trim_matches('_');
    slug.chars().take(120).collect()
}

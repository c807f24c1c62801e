//! Injected event sinks for scrape runs.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub enum ScrapeEvent<'a> {
    RunStarted { label: &'a str },
    BoardStarted { menu_id: &'a str, menu_name: &'a str },
    BoardFailed { menu_id: &'a str, error: &'a str },
    Article { url: &'a str, elapsed: Duration, error: Option<&'a str> },
    RunFinished { attempted: usize, succeeded: usize, failed: usize },
}

pub trait ScrapeObserver: Send + Sync {
    fn on_event(&self, event: &ScrapeEvent<'_>);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl ScrapeObserver for TracingObserver {
    fn on_event(&self, event: &ScrapeEvent<'_>) {
        match event {
            ScrapeEvent::RunStarted { label } => info!(run = %label, "🚀 Scrape run started"),
            ScrapeEvent::BoardStarted { menu_id, menu_name } => {
                info!(menu_id = %menu_id, "📂 Board {} started", menu_name)
            }
            ScrapeEvent::BoardFailed { menu_id, error } => {
                warn!(menu_id = %menu_id, "⚠️ Board failed: {}", error)
            }
            ScrapeEvent::Article { url, elapsed, error: None } => {
                info!(elapsed_ms = elapsed.as_millis() as u64, "✅ {}", url)
            }
            ScrapeEvent::Article { url, elapsed, error: Some(e) } => {
                error!(elapsed_ms = elapsed.as_millis() as u64, "❌ {}: {}", url, e)
            }
            ScrapeEvent::RunFinished { attempted, succeeded, failed } => info!(
                attempted = *attempted,
                succeeded = *succeeded,
                failed = *failed,
                "🏁 Scrape run finished"
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OperationMetric {
    pub timestamp: DateTime<Utc>,
    pub operation: String,
    pub duration_secs: f64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScrapeStats {
    pub total_articles: usize,
    pub successful_articles: usize,
    pub failed_articles: usize,
    pub total_duration_secs: f64,
    pub average_duration_per_article: f64,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub operations: Vec<OperationMetric>,
}

#[derive(Debug, Default)]
struct StatsState {
    started: Option<DateTime<Utc>>,
    finished: Option<DateTime<Utc>>,
    metrics: Vec<OperationMetric>,
}

/// Collects per-article metrics for the run summary.
#[derive(Debug, Default)]
pub struct StatsObserver {
    state: Mutex<StatsState>,
}

impl StatsObserver {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn stats(&self) -> ScrapeStats {
        let state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let ok: Vec<&OperationMetric> = state.metrics.iter().filter(|m| m.success).collect();
        let average = if ok.is_empty() {
            0.0
        } else {
            ok.iter().map(|m| m.duration_secs).sum::<f64>() / ok.len() as f64
        };
        let total_duration = match (state.started, state.finished.or_else(|| state.started.map(|_| Utc::now()))) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as f64 / 1000.0,
            _ => 0.0,
        };
        ScrapeStats {
            total_articles: state.metrics.len(),
            successful_articles: ok.len(),
            failed_articles: state.metrics.len() - ok.len(),
            total_duration_secs: total_duration,
            average_duration_per_article: average,
            start_time: state.started,
            end_time: state.finished,
            operations: state.metrics.clone(),
        }
    }
}

impl ScrapeObserver for StatsObserver {
    fn on_event(&self, event: &ScrapeEvent<'_>) {
        let mut state = self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        match event {
            ScrapeEvent::RunStarted { .. } => {
                *state = StatsState {
                    started: Some(Utc::now()),
                    ..Default::default()
                };
            }
            ScrapeEvent::Article { url, elapsed, error } => state.metrics.push(OperationMetric {
                timestamp: Utc::now(),
                operation: format!("article:{}", url),
                duration_secs: elapsed.as_secs_f64(),
                success: error.is_none(),
                error_message: error.map(str::to_string),
            }),
            ScrapeEvent::RunFinished { .. } => state.finished = Some(Utc::now()),
            _ => {}
        }
    }
}

/// Forwards every event to each inner observer in order.
#[derive(Clone, Default)]
pub struct FanoutObserver {
    observers: Vec<Arc<dyn ScrapeObserver>>,
}

impl FanoutObserver {
    pub fn new(observers: Vec<Arc<dyn ScrapeObserver>>) -> Self {
        Self { observers }
    }

    pub fn with(mut self, observer: Arc<dyn ScrapeObserver>) -> Self {
        self.observers.push(observer);
        self
    }
}

impl ScrapeObserver for FanoutObserver {
    fn on_event(&self, event: &ScrapeEvent<'_>) {
        for observer in &self.observers {
            observer.on_event(event);
        }
    }
}

use std::thread::sleep;

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::info;

use crate::client::{FeedKind, WikiSource};
use crate::config::FetchConfig;
use crate::feeds::{FeedReport, FeedStatus, run_feed};
use crate::normalize::NormalizeOptions;
use crate::pipeline::{CategoryReport, CategoryStatus, run_category};
use crate::runtime::OutputLayout;

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub date: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub categories: Vec<CategoryReport>,
    pub featured: FeedReport,
    pub on_this_day: FeedReport,
    pub requests: usize,
}

impl RunReport {
    pub fn failed_categories(&self) -> usize {
        self.categories
            .iter()
            .filter(|report| report.is_failed())
            .count()
    }

    /// Artifacts whose bytes changed on disk during this run.
    pub fn changed_artifacts(&self) -> usize {
        let categories = self
            .categories
            .iter()
            .filter(|report| report.status == CategoryStatus::Written)
            .count();
        let feeds = [&self.featured, &self.on_this_day]
            .into_iter()
            .filter(|report| report.status == FeedStatus::Written)
            .count();
        categories + feeds
    }
}

/// Full run: every configured category in order, then the two daily feeds.
pub fn run<S: WikiSource + ?Sized>(
    config: &FetchConfig,
    layout: &OutputLayout,
    source: &mut S,
    date: NaiveDate,
) -> Result<RunReport> {
    let started_at = Utc::now();
    let requests_before = source.request_count();

    let created = layout
        .ensure_layout()
        .context("failed to prepare output directories")?;
    for dir in &created.created_dirs {
        info!(dir = %dir.display(), "created output directory");
    }

    let options = NormalizeOptions::from_config(config);
    let pause = config.category_pause();
    let mut categories = Vec::with_capacity(config.categories.len());
    for (index, spec) in config.categories.iter().enumerate() {
        if index > 0 && !pause.is_zero() {
            sleep(pause);
        }
        categories.push(run_category(source, spec, layout, &options));
    }

    let featured = run_feed(
        source,
        FeedKind::Featured,
        date,
        &layout.featured_path(date, config.featured_path),
        &options,
    );
    let on_this_day = run_feed(
        source,
        FeedKind::OnThisDay,
        date,
        &layout.on_this_day_path(date),
        &options,
    );

    let report = RunReport {
        date,
        started_at,
        finished_at: Utc::now(),
        categories,
        featured,
        on_this_day,
        requests: source.request_count().saturating_sub(requests_before),
    };
    info!(
        categories = report.categories.len(),
        failed = report.failed_categories(),
        changed = report.changed_artifacts(),
        requests = report.requests,
        "run finished"
    );
    Ok(report)
}

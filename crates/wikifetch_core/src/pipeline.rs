use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::client::{MemberRef, PageDetails, PageSource, WikiSource};
use crate::config::CategorySpec;
use crate::normalize::{ArticleRecord, NormalizeOptions, RawArticle, normalize_article};
use crate::runtime::OutputLayout;
use crate::writer::{WriteOutcome, write_if_changed};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStage {
    Idle,
    Enumerating,
    Fetching,
    Normalizing,
    Writing,
    Done,
}

impl CategoryStage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Enumerating => "enumerating",
            Self::Fetching => "fetching",
            Self::Normalizing => "normalizing",
            Self::Writing => "writing",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for CategoryStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CategoryStatus {
    Written,
    Unchanged,
    Empty,
    Failed,
}

impl CategoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Unchanged => "unchanged",
            Self::Empty => "empty",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryReport {
    pub slug: String,
    pub category: String,
    pub status: CategoryStatus,
    /// Last stage reached. For failures, the stage that failed.
    pub stage: CategoryStage,
    pub members: usize,
    pub articles: usize,
    pub dropped: usize,
    pub changed: bool,
    pub path: PathBuf,
    pub error: Option<String>,
    pub requests: usize,
}

impl CategoryReport {
    pub fn is_failed(&self) -> bool {
        self.status == CategoryStatus::Failed
    }
}

/// Envelope persisted as `categories/<slug>.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryCollection {
    pub category: String,
    pub slug: String,
    pub count: usize,
    pub articles: Vec<ArticleRecord>,
}

#[derive(Default)]
struct Progress {
    members: Vec<MemberRef>,
    details: BTreeMap<u64, PageDetails>,
    sources: BTreeMap<u64, PageSource>,
    articles: Vec<ArticleRecord>,
    dropped: usize,
    written: Option<WriteOutcome>,
}

/// Run one category through every stage. Never returns an error: failures are
/// captured in the report so the caller can move on to the next category.
pub fn run_category<S: WikiSource + ?Sized>(
    source: &mut S,
    spec: &CategorySpec,
    layout: &OutputLayout,
    options: &NormalizeOptions,
) -> CategoryReport {
    let path = layout.category_path(&spec.slug);
    let requests_before = source.request_count();
    let mut progress = Progress::default();
    let mut stage = CategoryStage::Idle;

    info!(category = %spec.name, slug = %spec.slug, "category started");

    let failure = loop {
        let step = match stage {
            CategoryStage::Idle => Ok(CategoryStage::Enumerating),
            CategoryStage::Enumerating => enumerate(source, spec, &mut progress),
            CategoryStage::Fetching => fetch(source, options, &mut progress),
            CategoryStage::Normalizing => Ok(normalize(source, options, &mut progress)),
            CategoryStage::Writing => write(spec, &path, &mut progress),
            CategoryStage::Done => break None,
        };
        match step {
            Ok(next) => stage = next,
            Err(err) => break Some(err),
        }
    };

    let requests = source.request_count().saturating_sub(requests_before);
    let mut report = CategoryReport {
        slug: spec.slug.clone(),
        category: spec.name.clone(),
        status: CategoryStatus::Empty,
        stage,
        members: progress.members.len(),
        articles: progress.articles.len(),
        dropped: progress.dropped,
        changed: false,
        path,
        error: None,
        requests,
    };

    if let Some(err) = failure {
        let message = format!("{err:#}");
        error!(category = %spec.name, stage = %stage, "category failed: {message}");
        report.status = CategoryStatus::Failed;
        report.error = Some(message);
        return report;
    }

    match progress.written {
        Some(outcome) => {
            report.changed = outcome.changed;
            report.status = if outcome.changed {
                CategoryStatus::Written
            } else {
                CategoryStatus::Unchanged
            };
            info!(
                category = %spec.name,
                articles = report.articles,
                dropped = report.dropped,
                changed = outcome.changed,
                path = %outcome.path.display(),
                "category saved"
            );
        }
        None => {
            warn!(category = %spec.name, "category has no members, nothing written");
        }
    }
    report
}

fn enumerate<S: WikiSource + ?Sized>(
    source: &mut S,
    spec: &CategorySpec,
    progress: &mut Progress,
) -> Result<CategoryStage> {
    progress.members = source.enumerate_category_members(&spec.name)?;
    debug!(category = %spec.name, members = progress.members.len(), "category enumerated");
    if progress.members.is_empty() {
        return Ok(CategoryStage::Done);
    }
    Ok(CategoryStage::Fetching)
}

fn fetch<S: WikiSource + ?Sized>(
    source: &mut S,
    options: &NormalizeOptions,
    progress: &mut Progress,
) -> Result<CategoryStage> {
    let page_ids = progress
        .members
        .iter()
        .map(|member| member.page_id)
        .collect::<Vec<_>>();
    progress.details = source.fetch_article_batch(&page_ids)?;
    if options.include_body {
        progress.sources = source.fetch_source_batch(&page_ids)?;
    }
    Ok(CategoryStage::Normalizing)
}

fn normalize<S: WikiSource + ?Sized>(
    source: &mut S,
    options: &NormalizeOptions,
    progress: &mut Progress,
) -> CategoryStage {
    let fetched_at = Utc::now();
    let mut articles = Vec::with_capacity(progress.members.len());
    let mut dropped = 0;
    for member in &progress.members {
        let raw = RawArticle {
            page_id: Some(member.page_id),
            fallback_title: Some(member.title.as_str()),
            details: progress.details.get(&member.page_id),
            source: progress.sources.get(&member.page_id),
        };
        match normalize_article(raw, options, source, fetched_at) {
            Ok(article) => articles.push(article),
            Err(rejection) => {
                dropped += 1;
                debug!(page_id = member.page_id, "dropping article: {rejection}");
            }
        }
    }
    progress.articles = articles;
    progress.dropped = dropped;
    CategoryStage::Writing
}

fn write(spec: &CategorySpec, path: &Path, progress: &mut Progress) -> Result<CategoryStage> {
    let collection = CategoryCollection {
        category: spec.name.clone(),
        slug: spec.slug.clone(),
        count: progress.articles.len(),
        articles: std::mem::take(&mut progress.articles),
    };
    let outcome = write_if_changed(path, &collection);
    progress.articles = collection.articles;
    progress.written = Some(outcome?);
    Ok(CategoryStage::Done)
}

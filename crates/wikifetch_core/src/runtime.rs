use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDate;

use crate::config::{FeaturedPathMode, FetchConfig};

pub const CATEGORIES_DIR: &str = "categories";
pub const FEATURED_DIR: &str = "featured";
pub const ONTHISDAY_DIR: &str = "onthisday";
pub const FEATURED_FIXED_FILENAME: &str = "article.json";

/// Where every artifact of a run lands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub root: PathBuf,
    pub categories_dir: PathBuf,
    pub featured_dir: PathBuf,
    pub onthisday_dir: PathBuf,
}

#[derive(Debug, Clone, Default)]
pub struct LayoutReport {
    pub created_dirs: Vec<PathBuf>,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            categories_dir: root.join(CATEGORIES_DIR),
            featured_dir: root.join(FEATURED_DIR),
            onthisday_dir: root.join(ONTHISDAY_DIR),
            root,
        }
    }

    pub fn from_config(config: &FetchConfig) -> Self {
        Self::new(&config.output_dir)
    }

    pub fn category_path(&self, slug: &str) -> PathBuf {
        self.categories_dir.join(format!("{slug}.json"))
    }

    pub fn featured_path(&self, date: NaiveDate, mode: FeaturedPathMode) -> PathBuf {
        match mode {
            FeaturedPathMode::Fixed => self.featured_dir.join(FEATURED_FIXED_FILENAME),
            FeaturedPathMode::Dated => self.featured_dir.join(dated_filename(date)),
        }
    }

    pub fn on_this_day_path(&self, date: NaiveDate) -> PathBuf {
        self.onthisday_dir.join(dated_filename(date))
    }

    /// Create the three artifact directories. Any failure here is fatal for the run.
    pub fn ensure_layout(&self) -> Result<LayoutReport> {
        let mut created_dirs = Vec::new();
        for dir in [&self.categories_dir, &self.featured_dir, &self.onthisday_dir] {
            if !dir.exists() {
                fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create {}", dir.display()))?;
                created_dirs.push(dir.clone());
            }
        }
        Ok(LayoutReport { created_dirs })
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "output_root={}\ncategories_dir={}\nfeatured_dir={}\nonthisday_dir={}",
            normalize_for_display(&self.root),
            normalize_for_display(&self.categories_dir),
            normalize_for_display(&self.featured_dir),
            normalize_for_display(&self.onthisday_dir)
        )
    }
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn dated_filename(date: NaiveDate) -> String {
    format!("{}.json", date.format("%Y-%m-%d"))
}

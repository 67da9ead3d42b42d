use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};

pub const DEFAULT_USER_AGENT: &str = "wikifetch/0.1 (+https://github.com/wikifetch/wikifetch)";
pub const DEFAULT_SITE_URL: &str = "https://ar.wikipedia.org";
pub const DEFAULT_ARTICLE_PATH: &str = "/wiki/$1";
pub const DEFAULT_OUTPUT_DIR: &str = "data/wikipedia";
pub const DEFAULT_CONFIG_FILENAME: &str = "wikifetch.toml";

const DEFAULT_PAGE_SIZE: usize = 500;
const DEFAULT_BATCH_SIZE: usize = 50;
const DEFAULT_THUMBNAIL_SIZE: u32 = 800;
const DEFAULT_REQUEST_DELAY_MS: u64 = 250;
const DEFAULT_CATEGORY_PAUSE_MS: u64 = 300;
const DEFAULT_MAX_RETRIES: usize = 2;
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
const DEFAULT_DESCRIPTION_LINES: usize = 2;

/// Namespace prefixes whose members never make it into a category collection.
pub const DEFAULT_DISALLOWED_PREFIXES: &[&str] = &[
    "User:",
    "User talk:",
    "Draft:",
    "Wikipedia:",
    "Template:",
    "Category:",
    "File:",
    "Portal:",
    "Help:",
    "مستخدم:",
    "نقاش المستخدم:",
    "مسودة:",
    "ويكيبيديا:",
    "قالب:",
    "تصنيف:",
    "ملف:",
    "بوابة:",
    "مساعدة:",
];

const DEFAULT_CATEGORIES: &[(&str, &str)] = &[
    ("علوم", "Science"),
    ("تكنولوجيا", "Technology"),
    ("ثقافة", "Culture"),
    ("تاريخ", "History"),
    ("جغرافيا", "Geography"),
    ("رياضة", "Sports"),
    ("طب", "Medicine"),
    ("ابتكار", "Innovation"),
    ("صحة_نفسية", "MentalHealth"),
    ("بيئة", "Environment"),
    ("تغذية", "Nutrition"),
    ("سياحة", "Tourism"),
    ("علوم_حياتية", "LifeSciences"),
];

/// A remote category and the slug its collection file is named after.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct CategorySpec {
    pub name: String,
    pub slug: String,
}

impl CategorySpec {
    pub fn new(name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            slug: slug.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum FeaturedPathMode {
    /// `featured/article.json`, overwritten in place.
    #[default]
    Fixed,
    /// `featured/YYYY-MM-DD.json`, one file per run date.
    Dated,
}

impl FeaturedPathMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fixed => "fixed",
            Self::Dated => "dated",
        }
    }
}

/// On-disk shape of `wikifetch.toml`. Every key is optional.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ConfigFile {
    #[serde(default)]
    pub wiki: WikiSection,
    #[serde(default)]
    pub fetch: FetchSection,
    #[serde(default)]
    pub output: OutputSection,
    #[serde(default)]
    pub categories: Vec<CategorySpec>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct WikiSection {
    pub site_url: Option<String>,
    pub api_url: Option<String>,
    pub rest_url: Option<String>,
    pub article_path: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FetchSection {
    pub page_size: Option<usize>,
    pub batch_size: Option<usize>,
    pub thumbnail_size: Option<u32>,
    pub request_delay_ms: Option<u64>,
    pub category_pause_ms: Option<u64>,
    pub max_retries: Option<usize>,
    pub timeout_ms: Option<u64>,
    pub description_lines: Option<usize>,
    pub include_body: Option<bool>,
    pub image_lookup: Option<bool>,
    pub disallowed_prefixes: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct OutputSection {
    pub dir: Option<PathBuf>,
    pub featured_path: Option<FeaturedPathMode>,
}

/// Values supplied on the command line; they win over file and env.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub output_dir: Option<PathBuf>,
}

/// Immutable run configuration, built once at startup and passed by reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchConfig {
    pub site_url: String,
    pub api_url: String,
    pub rest_url: String,
    pub article_path: String,
    pub user_agent: String,
    pub output_dir: PathBuf,
    pub featured_path: FeaturedPathMode,
    pub page_size: usize,
    pub batch_size: usize,
    pub thumbnail_size: u32,
    pub request_delay_ms: u64,
    pub category_pause_ms: u64,
    pub max_retries: usize,
    pub timeout_ms: u64,
    pub description_lines: usize,
    pub include_body: bool,
    pub image_lookup: bool,
    pub disallowed_prefixes: Vec<String>,
    pub categories: Vec<CategorySpec>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            site_url: DEFAULT_SITE_URL.to_string(),
            api_url: format!("{DEFAULT_SITE_URL}/w/api.php"),
            rest_url: format!("{DEFAULT_SITE_URL}/api/rest_v1"),
            article_path: DEFAULT_ARTICLE_PATH.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            featured_path: FeaturedPathMode::Fixed,
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            thumbnail_size: DEFAULT_THUMBNAIL_SIZE,
            request_delay_ms: DEFAULT_REQUEST_DELAY_MS,
            category_pause_ms: DEFAULT_CATEGORY_PAUSE_MS,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            description_lines: DEFAULT_DESCRIPTION_LINES,
            include_body: true,
            image_lookup: true,
            disallowed_prefixes: DEFAULT_DISALLOWED_PREFIXES
                .iter()
                .map(ToString::to_string)
                .collect(),
            categories: default_categories(),
        }
    }
}

impl FetchConfig {
    /// Resolve the effective config: defaults < file < env < flags.
    pub fn resolve(file: &ConfigFile, overrides: &ConfigOverrides) -> Result<Self> {
        Self::resolve_with_lookup(file, overrides, |key| env::var(key).ok())
    }

    fn resolve_with_lookup<F>(
        file: &ConfigFile,
        overrides: &ConfigOverrides,
        lookup_env: F,
    ) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let env_string = |key: &str| {
            lookup_env(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let env_parsed = |key: &str| -> Result<Option<u64>> {
            match env_string(key) {
                Some(value) => value
                    .parse::<u64>()
                    .map(Some)
                    .with_context(|| format!("{key} must be a non-negative integer, got {value}")),
                None => Ok(None),
            }
        };

        let api_url = env_string("WIKI_API_URL").or_else(|| file.wiki.api_url.clone());
        let site_url = file
            .wiki
            .site_url
            .clone()
            .or_else(|| api_url.as_deref().and_then(derive_site_url))
            .unwrap_or(defaults.site_url);
        let site_url = site_url.trim_end_matches('/').to_string();
        let api_url = api_url.unwrap_or_else(|| format!("{site_url}/w/api.php"));
        let rest_url = env_string("WIKI_REST_URL")
            .or_else(|| file.wiki.rest_url.clone())
            .unwrap_or_else(|| format!("{site_url}/api/rest_v1"));
        let user_agent = env_string("WIKI_USER_AGENT")
            .or_else(|| file.wiki.user_agent.clone())
            .unwrap_or(defaults.user_agent);
        let article_path = file
            .wiki
            .article_path
            .clone()
            .unwrap_or(defaults.article_path);

        let output_dir = overrides
            .output_dir
            .clone()
            .or_else(|| env_string("WIKIFETCH_OUTPUT_DIR").map(PathBuf::from))
            .or_else(|| file.output.dir.clone())
            .unwrap_or(defaults.output_dir);

        let fetch = &file.fetch;
        let timeout_ms = env_parsed("WIKI_HTTP_TIMEOUT_MS")?
            .or(fetch.timeout_ms)
            .unwrap_or(defaults.timeout_ms);
        let max_retries = env_parsed("WIKI_HTTP_RETRIES")?
            .map(|value| usize::try_from(value).unwrap_or(usize::MAX))
            .or(fetch.max_retries)
            .unwrap_or(defaults.max_retries);
        let request_delay_ms = env_parsed("WIKI_RATE_LIMIT_READ")?
            .or(fetch.request_delay_ms)
            .unwrap_or(defaults.request_delay_ms);

        let categories = if file.categories.is_empty() {
            defaults.categories
        } else {
            file.categories.clone()
        };

        let config = Self {
            site_url,
            api_url,
            rest_url: rest_url.trim_end_matches('/').to_string(),
            article_path,
            user_agent,
            output_dir,
            featured_path: file.output.featured_path.unwrap_or(defaults.featured_path),
            page_size: fetch.page_size.unwrap_or(defaults.page_size),
            batch_size: fetch.batch_size.unwrap_or(defaults.batch_size),
            thumbnail_size: fetch.thumbnail_size.unwrap_or(defaults.thumbnail_size),
            request_delay_ms,
            category_pause_ms: fetch
                .category_pause_ms
                .unwrap_or(defaults.category_pause_ms),
            max_retries,
            timeout_ms,
            description_lines: fetch
                .description_lines
                .unwrap_or(defaults.description_lines),
            include_body: fetch.include_body.unwrap_or(defaults.include_body),
            image_lookup: fetch.image_lookup.unwrap_or(defaults.image_lookup),
            disallowed_prefixes: fetch
                .disallowed_prefixes
                .clone()
                .unwrap_or(defaults.disallowed_prefixes),
            categories,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            bail!("fetch.page_size must be greater than zero");
        }
        if self.batch_size == 0 {
            bail!("fetch.batch_size must be greater than zero");
        }
        if self.categories.is_empty() {
            bail!("at least one category must be configured");
        }
        let mut slugs = HashSet::new();
        for category in &self.categories {
            if category.name.trim().is_empty() {
                bail!("category name cannot be empty (slug {})", category.slug);
            }
            if category.slug.trim().is_empty() {
                bail!("category slug cannot be empty (category {})", category.name);
            }
            if category.slug.contains(['/', '\\']) || category.slug.starts_with('.') {
                bail!("category slug is not a plain file name: {}", category.slug);
            }
            if !slugs.insert(category.slug.as_str()) {
                bail!("duplicate category slug: {}", category.slug);
            }
        }
        Ok(())
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    pub fn category_pause(&self) -> Duration {
        Duration::from_millis(self.category_pause_ms)
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "site_url={}\napi_url={}\nrest_url={}\narticle_path={}\nuser_agent={}\noutput_dir={}\nfeatured_path={}\npage_size={}\nbatch_size={}\nthumbnail_size={}\nrequest_delay_ms={}\ncategory_pause_ms={}\nmax_retries={}\ntimeout_ms={}\ninclude_body={}\nimage_lookup={}\ncategories={}",
            self.site_url,
            self.api_url,
            self.rest_url,
            self.article_path,
            self.user_agent,
            self.output_dir.to_string_lossy().replace('\\', "/"),
            self.featured_path.as_str(),
            self.page_size,
            self.batch_size,
            self.thumbnail_size,
            self.request_delay_ms,
            self.category_pause_ms,
            self.max_retries,
            self.timeout_ms,
            self.include_body,
            self.image_lookup,
            self.categories.len()
        )
    }
}

pub fn default_categories() -> Vec<CategorySpec> {
    DEFAULT_CATEGORIES
        .iter()
        .map(|(name, slug)| CategorySpec::new(*name, *slug))
        .collect()
}

/// Load and parse a config file. Returns the empty config if the file doesn't exist.
pub fn load_config_file(config_path: &Path) -> Result<ConfigFile> {
    if !config_path.exists() {
        return Ok(ConfigFile::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: ConfigFile = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

/// Derive the site root from an API URL by stripping `/w/api.php` or `/api.php`.
pub fn derive_site_url(api_url: &str) -> Option<String> {
    let trimmed = api_url.trim();
    let stripped = trimmed
        .strip_suffix("/w/api.php")
        .or_else(|| trimmed.strip_suffix("/api.php"))
        .unwrap_or(trimmed);
    let result = stripped.trim_end_matches('/').to_string();
    if result.is_empty() { None } else { Some(result) }
}

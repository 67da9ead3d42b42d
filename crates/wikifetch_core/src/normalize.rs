use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::client::{ImageLookup, PageDetails, PageSource};
use crate::config::FetchConfig;
use crate::titles::SiteUrls;
use crate::wikitext::wikitext_to_plain;

/// Canonical article shape written into category collections.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArticleRecord {
    pub id: u64,
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub images: Vec<String>,
    pub body: Option<String>,
    pub url: String,
    pub revision_id: Option<u64>,
    pub last_modified: Option<String>,
    #[serde(skip)]
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("page has no usable title")]
    MissingTitle,
    #[error("page {title:?} has no page id")]
    MissingId { title: String },
}

/// Inputs for one article. Any part may be missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct RawArticle<'a> {
    pub page_id: Option<u64>,
    pub fallback_title: Option<&'a str>,
    pub details: Option<&'a PageDetails>,
    pub source: Option<&'a PageSource>,
}

#[derive(Debug, Clone)]
pub struct NormalizeOptions {
    pub site: SiteUrls,
    pub description_lines: usize,
    pub image_lookup: bool,
    pub include_body: bool,
}

impl NormalizeOptions {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            site: SiteUrls::from_config(config),
            description_lines: config.description_lines,
            image_lookup: config.image_lookup,
            include_body: config.include_body,
        }
    }
}

pub fn normalize_article<L: ImageLookup + ?Sized>(
    raw: RawArticle<'_>,
    options: &NormalizeOptions,
    lookup: &mut L,
    fetched_at: DateTime<Utc>,
) -> Result<ArticleRecord, Rejection> {
    let details = raw.details;
    let title = details
        .and_then(|details| non_empty(details.title.as_deref()))
        .or_else(|| non_empty(raw.fallback_title))
        .ok_or(Rejection::MissingTitle)?;
    let id = raw
        .page_id
        .or_else(|| details.map(|details| details.page_id))
        .ok_or_else(|| Rejection::MissingId {
            title: title.to_string(),
        })?;

    let extract = details.and_then(|details| non_empty(details.extract.as_deref()));
    let description = details
        .and_then(|details| non_empty(details.description.as_deref()))
        .map(ToString::to_string)
        .or_else(|| extract.and_then(|text| leading_lines(text, options.description_lines)));

    let images = details
        .map(|details| details.images.clone())
        .unwrap_or_default();
    let image = match details
        .and_then(|details| non_empty(details.thumbnail.as_deref()))
        .or_else(|| images.first().map(String::as_str))
    {
        Some(image) => Some(image.to_string()),
        None if options.image_lookup => match lookup.first_image(id) {
            Ok(image) => image,
            Err(error) => {
                debug!(page_id = id, "image lookup failed: {error:#}");
                None
            }
        },
        None => None,
    };

    let body = if options.include_body {
        raw.source
            .and_then(|source| source.wikitext.as_deref())
            .map(wikitext_to_plain)
            .filter(|text| !text.is_empty())
            .or_else(|| extract.map(ToString::to_string))
    } else {
        extract.map(ToString::to_string)
    };

    let url = details
        .and_then(|details| non_empty(details.full_url.as_deref()))
        .map(ToString::to_string)
        .unwrap_or_else(|| options.site.article_url(title));

    Ok(ArticleRecord {
        id,
        title: title.to_string(),
        description,
        image,
        images,
        body,
        url,
        revision_id: details.and_then(|details| details.revision_id),
        last_modified: details
            .and_then(|details| details.last_modified.clone())
            .or_else(|| raw.source.and_then(|source| source.timestamp.clone())),
        fetched_at,
    })
}

/// First `count` non-empty lines of `text`, joined by a space.
pub fn leading_lines(text: &str, count: usize) -> Option<String> {
    let joined = text
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .take(count)
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() { None } else { Some(joined) }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use anyhow::{Result, bail};
    use chrono::{TimeZone, Utc};

    use super::*;

    #[derive(Default)]
    struct RecordingLookup {
        calls: Vec<u64>,
        image: Option<String>,
        fail: bool,
    }

    impl ImageLookup for RecordingLookup {
        fn first_image(&mut self, page_id: u64) -> Result<Option<String>> {
            self.calls.push(page_id);
            if self.fail {
                bail!("lookup unavailable");
            }
            Ok(self.image.clone())
        }
    }

    fn options() -> NormalizeOptions {
        NormalizeOptions {
            site: SiteUrls::new("https://ar.wikipedia.org", "/wiki/$1"),
            description_lines: 2,
            image_lookup: true,
            include_body: true,
        }
    }

    fn fetched_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 6, 0, 0).single().expect("timestamp")
    }

    fn details(title: &str) -> PageDetails {
        PageDetails {
            page_id: 42,
            title: Some(title.to_string()),
            ..PageDetails::default()
        }
    }

    fn raw<'a>(details: &'a PageDetails) -> RawArticle<'a> {
        RawArticle {
            page_id: Some(details.page_id),
            details: Some(details),
            ..RawArticle::default()
        }
    }

    #[test]
    fn prefers_explicit_fields_when_present() {
        let details = PageDetails {
            description: Some("Physicist".to_string()),
            extract: Some("Long extract".to_string()),
            thumbnail: Some("https://upload.example/thumb.jpg".to_string()),
            images: vec!["https://ar.wikipedia.org/wiki/Special:FilePath/Other.png".to_string()],
            full_url: Some("https://ar.wikipedia.org/wiki/Alpha".to_string()),
            revision_id: Some(7),
            ..details("Alpha")
        };
        let mut lookup = RecordingLookup::default();

        let record =
            normalize_article(raw(&details), &options(), &mut lookup, fetched_at()).expect("ok");

        assert_eq!(record.id, 42);
        assert_eq!(record.description.as_deref(), Some("Physicist"));
        assert_eq!(record.image.as_deref(), Some("https://upload.example/thumb.jpg"));
        assert_eq!(record.url, "https://ar.wikipedia.org/wiki/Alpha");
        assert_eq!(record.body.as_deref(), Some("Long extract"));
        assert_eq!(record.revision_id, Some(7));
        assert!(lookup.calls.is_empty());
    }

    #[test]
    fn description_falls_back_to_first_extract_lines() {
        let details = PageDetails {
            extract: Some("\nFirst line.\n\nSecond line.\nThird line.".to_string()),
            ..details("Alpha")
        };
        let record = normalize_article(
            raw(&details),
            &options(),
            &mut RecordingLookup::default(),
            fetched_at(),
        )
        .expect("ok");
        assert_eq!(record.description.as_deref(), Some("First line. Second line."));
    }

    #[test]
    fn missing_thumbnail_uses_first_in_body_image() {
        let details = PageDetails {
            images: vec![
                "https://ar.wikipedia.org/wiki/Special:FilePath/Map.png".to_string(),
                "https://ar.wikipedia.org/wiki/Special:FilePath/Flag.svg".to_string(),
            ],
            ..details("Alpha")
        };
        let mut lookup = RecordingLookup::default();
        let record =
            normalize_article(raw(&details), &options(), &mut lookup, fetched_at()).expect("ok");
        assert_eq!(
            record.image.as_deref(),
            Some("https://ar.wikipedia.org/wiki/Special:FilePath/Map.png")
        );
        assert!(lookup.calls.is_empty());
    }

    #[test]
    fn secondary_lookup_fills_image_when_batch_has_none() {
        let details = details("Alpha");
        let mut lookup = RecordingLookup {
            image: Some("https://ar.wikipedia.org/wiki/Special:FilePath/Late.jpg".to_string()),
            ..RecordingLookup::default()
        };
        let record =
            normalize_article(raw(&details), &options(), &mut lookup, fetched_at()).expect("ok");
        assert_eq!(lookup.calls, vec![42]);
        assert_eq!(
            record.image.as_deref(),
            Some("https://ar.wikipedia.org/wiki/Special:FilePath/Late.jpg")
        );
    }

    #[test]
    fn no_image_anywhere_yields_null_even_when_lookup_fails() {
        let details = details("Alpha");
        let mut lookup = RecordingLookup {
            fail: true,
            ..RecordingLookup::default()
        };
        let record =
            normalize_article(raw(&details), &options(), &mut lookup, fetched_at()).expect("ok");
        assert_eq!(record.image, None);

        let mut disabled = options();
        disabled.image_lookup = false;
        let mut untouched = RecordingLookup::default();
        let record = normalize_article(raw(&details), &disabled, &mut untouched, fetched_at())
            .expect("ok");
        assert_eq!(record.image, None);
        assert!(untouched.calls.is_empty());
    }

    #[test]
    fn title_less_pages_are_rejected() {
        let details = PageDetails {
            page_id: 9,
            title: Some("   ".to_string()),
            ..PageDetails::default()
        };
        let error = normalize_article(
            raw(&details),
            &options(),
            &mut RecordingLookup::default(),
            fetched_at(),
        )
        .expect_err("rejected");
        assert_eq!(error, Rejection::MissingTitle);
    }

    #[test]
    fn member_title_and_constructed_url_fill_gaps() {
        let mut lookup = RecordingLookup::default();
        let record = normalize_article(
            RawArticle {
                page_id: Some(5),
                fallback_title: Some("ابن سينا"),
                ..RawArticle::default()
            },
            &options(),
            &mut lookup,
            fetched_at(),
        )
        .expect("ok");
        assert_eq!(record.title, "ابن سينا");
        assert_eq!(
            record.url,
            "https://ar.wikipedia.org/wiki/%D8%A7%D8%A8%D9%86_%D8%B3%D9%8A%D9%86%D8%A7"
        );
        assert_eq!(record.description, None);
        assert_eq!(record.body, None);
    }

    #[test]
    fn missing_id_is_rejected() {
        let error = normalize_article(
            RawArticle {
                fallback_title: Some("Alpha"),
                ..RawArticle::default()
            },
            &options(),
            &mut RecordingLookup::default(),
            fetched_at(),
        )
        .expect_err("rejected");
        assert!(matches!(error, Rejection::MissingId { .. }));
    }

    #[test]
    fn body_is_projected_from_wikitext_with_extract_fallback() {
        let details = PageDetails {
            extract: Some("Plain extract".to_string()),
            ..details("Alpha")
        };
        let source = PageSource {
            wikitext: Some("'''Alpha''' is a [[Letter|letter]].{{Infobox}}".to_string()),
            timestamp: None,
        };
        let record = normalize_article(
            RawArticle {
                source: Some(&source),
                ..raw(&details)
            },
            &options(),
            &mut RecordingLookup::default(),
            fetched_at(),
        )
        .expect("ok");
        assert_eq!(record.body.as_deref(), Some("Alpha is a letter."));

        let mut no_body = options();
        no_body.include_body = false;
        let record = normalize_article(
            RawArticle {
                source: Some(&source),
                ..raw(&details)
            },
            &no_body,
            &mut RecordingLookup::default(),
            fetched_at(),
        )
        .expect("ok");
        assert_eq!(record.body.as_deref(), Some("Plain extract"));
    }

    #[test]
    fn fetch_timestamp_is_not_serialized() {
        let details = details("Alpha");
        let record = normalize_article(
            raw(&details),
            &options(),
            &mut RecordingLookup::default(),
            fetched_at(),
        )
        .expect("ok");
        let value = serde_json::to_value(&record).expect("json");
        assert!(value.get("fetched_at").is_none());
        let keys = value
            .as_object()
            .expect("object")
            .keys()
            .cloned()
            .collect::<Vec<_>>();
        assert_eq!(keys.len(), 9);
    }
}

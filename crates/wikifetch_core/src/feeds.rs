use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use serde::Serialize;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::client::{FeedKind, WikiSource};
use crate::normalize::{NormalizeOptions, leading_lines};
use crate::titles::decode_title;
use crate::wikitext::{strip_comments, strip_tags};
use crate::writer::write_if_changed;

/// Article summary as it appears in the REST feeds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedArticle {
    pub id: Option<u64>,
    pub title: String,
    pub description: Option<String>,
    pub image: Option<String>,
    pub url: String,
    pub last_modified: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PictureOfTheDay {
    pub title: String,
    pub image: Option<String>,
    pub thumbnail: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewsItem {
    pub story: String,
    pub links: Vec<FeedArticle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeaturedRecord {
    pub date: String,
    pub article: Option<FeedArticle>,
    pub most_read: Vec<FeedArticle>,
    pub picture: Option<PictureOfTheDay>,
    pub news: Vec<NewsItem>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnThisDayEvent {
    pub year: Option<i64>,
    pub text: String,
    pub pages: Vec<FeedArticle>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OnThisDayRecord {
    pub date: String,
    pub events: Vec<OnThisDayEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedStatus {
    Written,
    Unchanged,
    Skipped,
    Failed,
}

impl FeedStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Written => "written",
            Self::Unchanged => "unchanged",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedReport {
    pub kind: FeedKind,
    pub status: FeedStatus,
    pub path: PathBuf,
    pub error: Option<String>,
}

/// Fetch one daily feed, normalize it, and write it if it changed.
pub fn run_feed<S: WikiSource + ?Sized>(
    source: &mut S,
    kind: FeedKind,
    date: NaiveDate,
    path: &Path,
    options: &NormalizeOptions,
) -> FeedReport {
    let report = |status: FeedStatus, error: Option<String>| FeedReport {
        kind,
        status,
        path: path.to_path_buf(),
        error,
    };

    let Some(payload) = source.fetch_daily_feed(kind, date) else {
        warn!(feed = %kind, date = %date, "feed unavailable, keeping previous artifact");
        return report(FeedStatus::Skipped, None);
    };

    let written = match kind {
        FeedKind::Featured => write_if_changed(path, &normalize_featured(&payload, date, options)),
        FeedKind::OnThisDay => {
            write_if_changed(path, &normalize_on_this_day(&payload, date, options))
        }
    };

    match written {
        Ok(outcome) => {
            info!(feed = %kind, path = %path.display(), changed = outcome.changed, "feed saved");
            let status = if outcome.changed {
                FeedStatus::Written
            } else {
                FeedStatus::Unchanged
            };
            report(status, None)
        }
        Err(err) => {
            error!(feed = %kind, path = %path.display(), "feed write failed: {err:#}");
            report(FeedStatus::Failed, Some(format!("{err:#}")))
        }
    }
}

pub fn normalize_featured(
    payload: &Value,
    date: NaiveDate,
    options: &NormalizeOptions,
) -> FeaturedRecord {
    let article = payload
        .get("tfa")
        .and_then(|value| feed_article(value, options));
    let most_read = payload
        .get("mostread")
        .and_then(|value| value.get("articles"))
        .map(|articles| feed_articles(articles, options))
        .unwrap_or_default();
    let picture = payload.get("image").and_then(picture_of_the_day);
    let news = payload
        .get("news")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| news_item(item, options))
                .collect()
        })
        .unwrap_or_default();

    FeaturedRecord {
        date: date.format("%Y-%m-%d").to_string(),
        article,
        most_read,
        picture,
        news,
    }
}

pub fn normalize_on_this_day(
    payload: &Value,
    date: NaiveDate,
    options: &NormalizeOptions,
) -> OnThisDayRecord {
    let events = payload
        .get("events")
        .and_then(Value::as_array)
        .map(|events| {
            events
                .iter()
                .filter_map(|event| {
                    let text = string_field(event, "text")?;
                    Some(OnThisDayEvent {
                        year: event.get("year").and_then(Value::as_i64),
                        text,
                        pages: event
                            .get("pages")
                            .map(|pages| feed_articles(pages, options))
                            .unwrap_or_default(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    OnThisDayRecord {
        date: date.format("%Y-%m-%d").to_string(),
        events,
    }
}

/// Map one REST page summary. Returns `None` when no title can be found.
pub fn feed_article(value: &Value, options: &NormalizeOptions) -> Option<FeedArticle> {
    let title = value
        .get("titles")
        .and_then(|titles| string_field(titles, "normalized"))
        .or_else(|| string_field(value, "normalizedtitle"))
        .or_else(|| string_field(value, "title").map(|title| decode_title(&title)))?;

    let description = string_field(value, "description").or_else(|| {
        string_field(value, "extract")
            .and_then(|extract| leading_lines(&extract, options.description_lines))
    });
    let image = value
        .get("thumbnail")
        .and_then(|thumbnail| string_field(thumbnail, "source"))
        .or_else(|| {
            value
                .get("originalimage")
                .and_then(|image| string_field(image, "source"))
        });
    let url = value
        .get("content_urls")
        .and_then(|urls| urls.get("desktop"))
        .and_then(|desktop| string_field(desktop, "page"))
        .unwrap_or_else(|| options.site.article_url(&title));

    Some(FeedArticle {
        id: value.get("pageid").and_then(Value::as_u64),
        title,
        description,
        image,
        url,
        last_modified: string_field(value, "timestamp"),
    })
}

fn feed_articles(value: &Value, options: &NormalizeOptions) -> Vec<FeedArticle> {
    value
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|item| feed_article(item, options))
                .collect()
        })
        .unwrap_or_default()
}

fn picture_of_the_day(value: &Value) -> Option<PictureOfTheDay> {
    let title = string_field(value, "title")?;
    let description = value
        .get("description")
        .and_then(|description| {
            string_field(description, "text").or_else(|| description.as_str().map(str::to_string))
        })
        .map(|text| plain_html(&text))
        .filter(|text| !text.is_empty());
    Some(PictureOfTheDay {
        title: decode_title(&title),
        image: value
            .get("image")
            .and_then(|image| string_field(image, "source")),
        thumbnail: value
            .get("thumbnail")
            .and_then(|thumbnail| string_field(thumbnail, "source")),
        description,
    })
}

fn news_item(value: &Value, options: &NormalizeOptions) -> Option<NewsItem> {
    let story = string_field(value, "story")
        .map(|story| plain_html(&story))
        .filter(|story| !story.is_empty())?;
    Some(NewsItem {
        story,
        links: value
            .get("links")
            .map(|links| feed_articles(links, options))
            .unwrap_or_default(),
    })
}

fn plain_html(text: &str) -> String {
    strip_tags(&strip_comments(text))
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|text| !text.is_empty())
        .map(ToString::to_string)
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::NaiveDate;
    use serde_json::json;
    use tempfile::tempdir;

    use super::*;
    use crate::test_support::{MockSource, test_config};

    fn options() -> NormalizeOptions {
        NormalizeOptions::from_config(&test_config())
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, 19).expect("date")
    }

    fn featured_payload() -> Value {
        json!({
            "tfa": {
                "pageid": 11,
                "title": "ابن_سينا",
                "titles": { "canonical": "ابن_سينا", "normalized": "ابن سينا" },
                "extract": "First line.\nSecond line.\nThird line.",
                "originalimage": { "source": "https://upload.example/original.jpg" },
                "content_urls": { "desktop": { "page": "https://ar.wikipedia.org/wiki/ابن_سينا" } },
                "timestamp": "2026-10-18T10:00:00Z"
            },
            "mostread": { "articles": [
                { "pageid": 1, "normalizedtitle": "Alpha", "description": "first" },
                { "pageid": 2, "description": "no title at all" },
                { "pageid": 3, "title": "Beta_Gamma", "thumbnail": { "source": "https://upload.example/b.jpg" } }
            ] },
            "image": {
                "title": "File:Sunrise_over_sea.jpg",
                "thumbnail": { "source": "https://upload.example/thumb.jpg" },
                "image": { "source": "https://upload.example/full.jpg" },
                "description": { "text": "<b>Sunrise</b> over\nthe sea", "lang": "ar" }
            },
            "news": [
                { "story": "<!--x--><a href=\"./A\">Election</a> results announced", "links": [{ "title": "Election" }] },
                { "story": "   " }
            ]
        })
    }

    #[test]
    fn featured_payload_is_mapped_with_fallbacks() {
        let record = normalize_featured(&featured_payload(), date(), &options());

        assert_eq!(record.date, "2026-10-19");
        let article = record.article.expect("article");
        assert_eq!(article.id, Some(11));
        assert_eq!(article.title, "ابن سينا");
        assert_eq!(article.description.as_deref(), Some("First line. Second line."));
        assert_eq!(article.image.as_deref(), Some("https://upload.example/original.jpg"));
        assert_eq!(article.last_modified.as_deref(), Some("2026-10-18T10:00:00Z"));

        let titles = record
            .most_read
            .iter()
            .map(|article| article.title.as_str())
            .collect::<Vec<_>>();
        assert_eq!(titles, vec!["Alpha", "Beta Gamma"]);
        assert_eq!(
            record.most_read[1].url,
            "https://ar.wikipedia.org/wiki/Beta_Gamma"
        );

        let picture = record.picture.expect("picture");
        assert_eq!(picture.title, "File:Sunrise over sea.jpg");
        assert_eq!(picture.description.as_deref(), Some("Sunrise over the sea"));

        assert_eq!(record.news.len(), 1);
        assert_eq!(record.news[0].story, "Election results announced");
        assert_eq!(record.news[0].links[0].title, "Election");
    }

    #[test]
    fn on_this_day_events_keep_order_and_drop_untitled_pages() {
        let payload = json!({ "events": [
            { "year": 1969, "text": "Moon landing", "pages": [{ "title": "Apollo_11" }, { "pageid": 5 }] },
            { "text": "Undated event" },
            { "year": 2000 }
        ] });

        let record = normalize_on_this_day(&payload, date(), &options());

        assert_eq!(record.events.len(), 2);
        assert_eq!(record.events[0].year, Some(1969));
        assert_eq!(record.events[0].pages.len(), 1);
        assert_eq!(record.events[0].pages[0].title, "Apollo 11");
        assert_eq!(record.events[1].year, None);
    }

    #[test]
    fn missing_feed_is_skipped_without_touching_disk() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("featured").join("article.json");
        let mut source = MockSource::default();

        let report = run_feed(&mut source, FeedKind::Featured, date(), &path, &options());

        assert_eq!(report.status, FeedStatus::Skipped);
        assert!(!path.exists());
    }

    #[test]
    fn feed_is_written_once_then_reported_unchanged() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("onthisday").join("2026-10-19.json");
        let mut source = MockSource::default();
        source.feeds.insert(
            FeedKind::OnThisDay,
            json!({ "events": [{ "year": 1969, "text": "Moon landing" }] }),
        );

        let first = run_feed(&mut source, FeedKind::OnThisDay, date(), &path, &options());
        let second = run_feed(&mut source, FeedKind::OnThisDay, date(), &path, &options());

        assert_eq!(first.status, FeedStatus::Written);
        assert_eq!(second.status, FeedStatus::Unchanged);
        let content = fs::read_to_string(&path).expect("read");
        assert!(content.contains("\"Moon landing\""));
        assert!(content.ends_with("}\n"));
    }

    #[test]
    fn write_failure_is_reported_as_failed() {
        let temp = tempdir().expect("tempdir");
        let blocker = temp.path().join("featured");
        fs::write(&blocker, "file where a directory should be").expect("write");
        let mut source = MockSource::default();
        source.feeds.insert(FeedKind::Featured, featured_payload());

        let report = run_feed(
            &mut source,
            FeedKind::Featured,
            date(),
            &blocker.join("article.json"),
            &options(),
        );

        assert_eq!(report.status, FeedStatus::Failed);
        assert!(report.error.is_some());
    }
}

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::{Result, bail};
use chrono::NaiveDate;
use reqwest::StatusCode;
use serde_json::Value;

use crate::client::{
    FeedKind, HttpResponse, HttpTransport, ImageLookup, MemberRef, PageDetails, PageSource,
    WikiSource,
};
use crate::config::FetchConfig;

type Handler = Box<dyn FnMut(&str, &[(String, String)]) -> Result<HttpResponse>>;

pub fn test_config() -> FetchConfig {
    FetchConfig {
        request_delay_ms: 0,
        category_pause_ms: 0,
        ..FetchConfig::default()
    }
}

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub url: String,
    pub query: Vec<(String, String)>,
}

/// In-memory transport that answers every GET through a closure and records it.
pub struct ScriptedTransport {
    handler: Handler,
    requests: Vec<RecordedRequest>,
}

impl ScriptedTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: FnMut(&str, &[(String, String)]) -> Result<HttpResponse> + 'static,
    {
        Self {
            handler: Box::new(handler),
            requests: Vec::new(),
        }
    }

    pub fn json(body: Value) -> Result<HttpResponse> {
        Ok(HttpResponse {
            status: StatusCode::OK,
            body: body.to_string(),
        })
    }

    pub fn status(status: StatusCode) -> HttpResponse {
        HttpResponse {
            status,
            body: String::new(),
        }
    }

    pub fn requests(&self) -> &[RecordedRequest] {
        &self.requests
    }
}

impl HttpTransport for ScriptedTransport {
    fn get(&mut self, url: &str, query: &[(String, String)]) -> Result<HttpResponse> {
        self.requests.push(RecordedRequest {
            url: url.to_string(),
            query: query.to_vec(),
        });
        (self.handler)(url, query)
    }
}

/// Page ids carried by a `pageids=1|2|3` query parameter.
pub fn page_ids_param(query: &[(String, String)]) -> Vec<u64> {
    query
        .iter()
        .find(|(key, _)| key == "pageids")
        .map(|(_, value)| {
            value
                .split('|')
                .filter_map(|id| id.parse::<u64>().ok())
                .collect()
        })
        .unwrap_or_default()
}

pub fn member(page_id: u64, title: &str) -> MemberRef {
    MemberRef {
        page_id,
        title: title.to_string(),
        namespace: 0,
    }
}

pub fn details(page_id: u64, title: Option<&str>) -> PageDetails {
    PageDetails {
        page_id,
        title: title.map(ToString::to_string),
        extract: title.map(|title| format!("{title} is an article.\nIt has two lines.")),
        full_url: title.map(|title| format!("https://ar.wikipedia.org/wiki/{title}")),
        ..PageDetails::default()
    }
}

/// Canned wiki keyed by category name and page id.
#[derive(Default)]
pub struct MockSource {
    pub members: HashMap<String, Vec<MemberRef>>,
    pub details: BTreeMap<u64, PageDetails>,
    pub sources: BTreeMap<u64, PageSource>,
    pub images: HashMap<u64, String>,
    pub feeds: HashMap<FeedKind, Value>,
    pub fail_enumeration: HashSet<String>,
    pub enumerated: Vec<String>,
    requests: usize,
}

impl ImageLookup for MockSource {
    fn first_image(&mut self, page_id: u64) -> Result<Option<String>> {
        self.requests += 1;
        Ok(self.images.get(&page_id).cloned())
    }
}

impl WikiSource for MockSource {
    fn enumerate_category_members(&mut self, category: &str) -> Result<Vec<MemberRef>> {
        self.requests += 1;
        self.enumerated.push(category.to_string());
        if self.fail_enumeration.contains(category) {
            bail!("category listing for {category} failed with HTTP 503");
        }
        Ok(self.members.get(category).cloned().unwrap_or_default())
    }

    fn fetch_article_batch(&mut self, page_ids: &[u64]) -> Result<BTreeMap<u64, PageDetails>> {
        self.requests += 1;
        Ok(page_ids
            .iter()
            .filter_map(|id| self.details.get(id).map(|details| (*id, details.clone())))
            .collect())
    }

    fn fetch_source_batch(&mut self, page_ids: &[u64]) -> Result<BTreeMap<u64, PageSource>> {
        self.requests += 1;
        Ok(page_ids
            .iter()
            .filter_map(|id| self.sources.get(id).map(|source| (*id, source.clone())))
            .collect())
    }

    fn fetch_daily_feed(&mut self, kind: FeedKind, _date: NaiveDate) -> Option<Value> {
        self.requests += 1;
        self.feeds.get(&kind).cloned()
    }

    fn request_count(&self) -> usize {
        self.requests
    }
}

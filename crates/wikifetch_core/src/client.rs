use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::fmt;
use std::thread::sleep;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use chrono::NaiveDate;
use reqwest::blocking::Client;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::FetchConfig;
use crate::titles::{SiteUrls, category_title, is_disallowed_title};

/// One category member as listed by `list=categorymembers`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MemberRef {
    pub page_id: u64,
    pub title: String,
    pub namespace: i32,
}

/// Batch-detail payload for one page, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageDetails {
    pub page_id: u64,
    pub title: Option<String>,
    pub description: Option<String>,
    pub extract: Option<String>,
    pub thumbnail: Option<String>,
    pub images: Vec<String>,
    pub last_modified: Option<String>,
    pub revision_id: Option<u64>,
    pub full_url: Option<String>,
}

/// Raw markup of a page's main slot.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSource {
    pub wikitext: Option<String>,
    pub timestamp: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    Featured,
    OnThisDay,
}

impl FeedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Featured => "featured",
            Self::OnThisDay => "onthisday",
        }
    }

    /// Path below the REST base for the given date.
    pub fn feed_path(self, date: NaiveDate) -> String {
        match self {
            Self::Featured => format!("feed/featured/{}", date.format("%Y/%m/%d")),
            Self::OnThisDay => format!("feed/onthisday/events/{}", date.format("%m/%d")),
        }
    }
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Secondary image lookup used by the normalizer when a page has no thumbnail.
pub trait ImageLookup {
    fn first_image(&mut self, page_id: u64) -> Result<Option<String>>;
}

/// Everything the pipelines need from the remote wiki.
pub trait WikiSource: ImageLookup {
    fn enumerate_category_members(&mut self, category: &str) -> Result<Vec<MemberRef>>;
    fn fetch_article_batch(&mut self, page_ids: &[u64]) -> Result<BTreeMap<u64, PageDetails>>;
    fn fetch_source_batch(&mut self, page_ids: &[u64]) -> Result<BTreeMap<u64, PageSource>>;
    fn fetch_daily_feed(&mut self, kind: FeedKind, date: NaiveDate) -> Option<Value>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: String,
}

/// The single HTTP GET the client needs. Swapped for a scripted fake in tests.
pub trait HttpTransport {
    fn get(&mut self, url: &str, query: &[(String, String)]) -> Result<HttpResponse>;
}

pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build MediaWiki HTTP client")?;
        Ok(Self { client })
    }
}

impl HttpTransport for ReqwestTransport {
    fn get(&mut self, url: &str, query: &[(String, String)]) -> Result<HttpResponse> {
        let response = self
            .client
            .get(url)
            .header("Accept", "application/json")
            .query(query)
            .send()
            .with_context(|| format!("failed to call {url}"))?;
        let status = response.status();
        let body = response
            .text()
            .with_context(|| format!("failed to read response body from {url}"))?;
        Ok(HttpResponse { status, body })
    }
}

pub struct MediaWikiClient<T: HttpTransport = ReqwestTransport> {
    transport: T,
    api_url: String,
    rest_url: String,
    site: SiteUrls,
    page_size: usize,
    batch_size: usize,
    thumbnail_size: u32,
    request_delay: Duration,
    max_retries: usize,
    disallowed_prefixes: Vec<String>,
    request_count: usize,
}

impl MediaWikiClient<ReqwestTransport> {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        Ok(Self::with_transport(config, ReqwestTransport::new(config)?))
    }
}

impl<T: HttpTransport> MediaWikiClient<T> {
    pub fn with_transport(config: &FetchConfig, transport: T) -> Self {
        Self {
            transport,
            api_url: config.api_url.clone(),
            rest_url: config.rest_url.trim_end_matches('/').to_string(),
            site: SiteUrls::from_config(config),
            page_size: config.page_size.max(1),
            batch_size: config.batch_size.max(1),
            thumbnail_size: config.thumbnail_size,
            request_delay: config.request_delay(),
            max_retries: config.max_retries,
            disallowed_prefixes: config.disallowed_prefixes.clone(),
            request_count: 0,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Lazily walk every page of a category listing. Each call starts a new
    /// walk from the first page.
    pub fn category_members(&mut self, category: &str) -> CategoryMembers<'_, T> {
        CategoryMembers {
            cmtitle: category_title(category),
            client: self,
            continuation: None,
            buffered: VecDeque::new(),
            finished: false,
        }
    }

    fn fetch_member_page(
        &mut self,
        cmtitle: &str,
        continuation: Option<&str>,
    ) -> Result<MemberPage> {
        let mut params = vec![
            ("action", "query".to_string()),
            ("list", "categorymembers".to_string()),
            ("cmtitle", cmtitle.to_string()),
            ("cmtype", "page".to_string()),
            ("cmprop", "ids|title".to_string()),
            ("cmlimit", self.page_size.to_string()),
        ];
        if let Some(token) = continuation {
            params.push(("cmcontinue", token.to_string()));
        }

        let response = self.query(&params)?;
        let parsed: QueryResponse = serde_json::from_value(response)
            .context("failed to decode categorymembers API response")?;

        let mut members = Vec::new();
        for item in parsed.query.categorymembers {
            let Some(page_id) = item.pageid else {
                continue;
            };
            if is_disallowed_title(&item.title, &self.disallowed_prefixes) {
                debug!(title = %item.title, "skipping member with disallowed prefix");
                continue;
            }
            members.push(MemberRef {
                page_id,
                title: item.title,
                namespace: item.ns,
            });
        }

        Ok(MemberPage {
            members,
            continuation: parsed
                .continuation
                .and_then(|cont| cont.value("cmcontinue")),
        })
    }

    fn query(&mut self, params: &[(&str, String)]) -> Result<Value> {
        let mut pairs = Vec::with_capacity(params.len() + 2);
        pairs.push(("format".to_string(), "json".to_string()));
        pairs.push(("formatversion".to_string(), "2".to_string()));
        for (key, value) in params {
            if !value.is_empty() {
                pairs.push(((*key).to_string(), value.clone()));
            }
        }

        let api_url = self.api_url.clone();
        let response = self.send(&api_url, &pairs)?;
        if !response.status.is_success() {
            bail!(
                "MediaWiki API request failed with HTTP {} for {}",
                response.status,
                display_url(&api_url, &pairs)
            );
        }

        let payload: Value = serde_json::from_str(&response.body)
            .context("failed to decode MediaWiki API JSON response")?;
        if let Some(error) = payload.get("error") {
            let code = error
                .get("code")
                .and_then(Value::as_str)
                .unwrap_or("unknown_error");
            let info = error
                .get("info")
                .and_then(Value::as_str)
                .unwrap_or("unknown info");
            bail!("MediaWiki API error [{code}]: {info}");
        }
        Ok(payload)
    }

    /// Issue one logical request, retrying network failures and retryable
    /// statuses. Every attempt is followed by the pacing delay.
    fn send(&mut self, url: &str, pairs: &[(String, String)]) -> Result<HttpResponse> {
        for attempt in 0..=self.max_retries {
            let result = self.transport.get(url, pairs);
            self.pace();
            match result {
                Ok(response) => {
                    if !response.status.is_success()
                        && attempt < self.max_retries
                        && is_retryable_status(response.status)
                    {
                        debug!(status = %response.status, attempt, url, "retrying request");
                        continue;
                    }
                    return Ok(response);
                }
                Err(error) => {
                    if attempt < self.max_retries && is_retryable_error(&error) {
                        debug!(error = %error, attempt, url, "retrying request");
                        continue;
                    }
                    return Err(error);
                }
            }
        }

        bail!("request to {url} exhausted retry budget")
    }

    fn page_details(&self, page: PageQueryItem) -> Option<PageDetails> {
        if page.missing {
            return None;
        }
        let page_id = page.pageid?;
        let revision = page.revisions.first();
        let images = page
            .images
            .iter()
            .map(|image| image.title.trim())
            .filter(|title| !title.is_empty())
            .map(|title| self.site.file_path_url(title))
            .collect();
        Some(PageDetails {
            page_id,
            title: page.title,
            description: page.description,
            extract: page.extract,
            thumbnail: page.thumbnail.map(|thumbnail| thumbnail.source),
            images,
            last_modified: revision.and_then(|revision| revision.timestamp.clone()),
            revision_id: revision.and_then(|revision| revision.revid),
            full_url: page.fullurl,
        })
    }

    fn pace(&mut self) {
        self.request_count += 1;
        if !self.request_delay.is_zero() {
            sleep(self.request_delay);
        }
    }
}

impl<T: HttpTransport> ImageLookup for MediaWikiClient<T> {
    fn first_image(&mut self, page_id: u64) -> Result<Option<String>> {
        let params = vec![
            ("action", "query".to_string()),
            ("pageids", page_id.to_string()),
            ("prop", "images".to_string()),
            ("imlimit", "1".to_string()),
        ];
        let response = self.query(&params)?;
        let parsed: QueryResponse =
            serde_json::from_value(response).context("failed to decode images API response")?;
        let image = parsed
            .query
            .pages
            .iter()
            .filter(|page| page.pageid == Some(page_id))
            .flat_map(|page| page.images.iter())
            .map(|image| image.title.trim())
            .find(|title| !title.is_empty())
            .map(|title| self.site.file_path_url(title));
        Ok(image)
    }
}

impl<T: HttpTransport> WikiSource for MediaWikiClient<T> {
    /// Collect the whole listing, keeping the first occurrence of each page id.
    fn enumerate_category_members(&mut self, category: &str) -> Result<Vec<MemberRef>> {
        let mut seen = HashSet::new();
        let mut members = Vec::new();
        for member in self.category_members(category) {
            let member = member?;
            if seen.insert(member.page_id) {
                members.push(member);
            }
        }
        Ok(members)
    }

    /// Details for every id, one request per batch plus whatever prop
    /// continuations the API hands back within that batch.
    fn fetch_article_batch(&mut self, page_ids: &[u64]) -> Result<BTreeMap<u64, PageDetails>> {
        let mut details = BTreeMap::new();
        for batch in page_ids.chunks(self.batch_size) {
            let base = vec![
                ("action", "query".to_string()),
                ("pageids", join_ids(batch)),
                (
                    "prop",
                    "extracts|pageimages|images|revisions|info|description".to_string(),
                ),
                ("exlimit", "max".to_string()),
                ("explaintext", "1".to_string()),
                ("piprop", "thumbnail".to_string()),
                ("pithumbsize", self.thumbnail_size.to_string()),
                ("imlimit", "max".to_string()),
                ("inprop", "url".to_string()),
                ("rvprop", "timestamp|ids".to_string()),
            ];

            let mut continuation = Vec::<(String, String)>::new();
            loop {
                let mut params: Vec<(&str, String)> = base.clone();
                params.extend(
                    continuation
                        .iter()
                        .map(|(key, value)| (key.as_str(), value.clone())),
                );
                let response = self.query(&params)?;
                let parsed: QueryResponse = serde_json::from_value(response)
                    .context("failed to decode page details API response")?;

                for page in parsed.query.pages {
                    let Some(update) = self.page_details(page) else {
                        continue;
                    };
                    match details.entry(update.page_id) {
                        Entry::Vacant(slot) => {
                            slot.insert(update);
                        }
                        Entry::Occupied(mut slot) => merge_details(slot.get_mut(), update),
                    }
                }

                let next = parsed
                    .continuation
                    .map(ContinuationPayload::into_params)
                    .unwrap_or_default();
                if next.is_empty() {
                    break;
                }
                if next == continuation {
                    bail!("page details lookup repeated continuation {next:?}");
                }
                debug!(continuation = ?next, "continuing page details batch");
                continuation = next;
            }
        }
        Ok(details)
    }

    fn fetch_source_batch(&mut self, page_ids: &[u64]) -> Result<BTreeMap<u64, PageSource>> {
        let mut sources = BTreeMap::new();
        for batch in page_ids.chunks(self.batch_size) {
            let params = vec![
                ("action", "query".to_string()),
                ("pageids", join_ids(batch)),
                ("prop", "revisions".to_string()),
                ("rvprop", "content|timestamp".to_string()),
                ("rvslots", "main".to_string()),
            ];

            let response = self.query(&params)?;
            let parsed: QueryResponse = serde_json::from_value(response)
                .context("failed to decode page content API response")?;

            for page in parsed.query.pages {
                if page.missing {
                    continue;
                }
                let Some(page_id) = page.pageid else {
                    continue;
                };
                let revision = page.revisions.into_iter().next();
                let timestamp = revision
                    .as_ref()
                    .and_then(|revision| revision.timestamp.clone());
                let wikitext = revision
                    .and_then(|revision| revision.slots)
                    .and_then(|slots| slots.main)
                    .and_then(|slot| slot.content);
                sources.insert(
                    page_id,
                    PageSource {
                        wikitext,
                        timestamp,
                    },
                );
            }
        }
        Ok(sources)
    }

    fn fetch_daily_feed(&mut self, kind: FeedKind, date: NaiveDate) -> Option<Value> {
        let url = format!("{}/{}", self.rest_url, kind.feed_path(date));
        let response = match self.send(&url, &[]) {
            Ok(response) => response,
            Err(error) => {
                warn!(feed = %kind, url = %url, "feed request failed: {error:#}");
                return None;
            }
        };
        if !response.status.is_success() {
            warn!(feed = %kind, url = %url, status = %response.status, "feed request returned non-success status");
            return None;
        }
        match serde_json::from_str::<Value>(&response.body) {
            Ok(payload) => Some(payload),
            Err(error) => {
                warn!(feed = %kind, url = %url, "feed response is not valid JSON: {error}");
                None
            }
        }
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

/// Iterator over a category listing; see [`MediaWikiClient::category_members`].
pub struct CategoryMembers<'a, T: HttpTransport> {
    client: &'a mut MediaWikiClient<T>,
    cmtitle: String,
    continuation: Option<String>,
    buffered: VecDeque<MemberRef>,
    finished: bool,
}

impl<T: HttpTransport> Iterator for CategoryMembers<'_, T> {
    type Item = Result<MemberRef>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(member) = self.buffered.pop_front() {
                return Some(Ok(member));
            }
            if self.finished {
                return None;
            }
            match self
                .client
                .fetch_member_page(&self.cmtitle, self.continuation.as_deref())
            {
                Ok(page) => {
                    if let Some(token) = &page.continuation
                        && self.continuation.as_ref() == Some(token)
                    {
                        self.finished = true;
                        return Some(Err(anyhow!(
                            "category listing for {} repeated continuation token {token}",
                            self.cmtitle
                        )));
                    }
                    self.finished = page.continuation.is_none();
                    self.continuation = page.continuation;
                    self.buffered.extend(page.members);
                }
                Err(error) => {
                    self.finished = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

struct MemberPage {
    members: Vec<MemberRef>,
    continuation: Option<String>,
}

fn join_ids(ids: &[u64]) -> String {
    ids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("|")
}

fn display_url(url: &str, pairs: &[(String, String)]) -> String {
    Url::parse_with_params(url, pairs)
        .map(|url| url.to_string())
        .unwrap_or_else(|_| url.to_string())
}

/// Fields already known win; later continuation responses only fill gaps.
fn merge_details(target: &mut PageDetails, update: PageDetails) {
    target.title = target.title.take().or(update.title);
    target.description = target.description.take().or(update.description);
    target.extract = target.extract.take().or(update.extract);
    target.thumbnail = target.thumbnail.take().or(update.thumbnail);
    target.last_modified = target.last_modified.take().or(update.last_modified);
    target.revision_id = target.revision_id.or(update.revision_id);
    target.full_url = target.full_url.take().or(update.full_url);
    for image in update.images {
        if !target.images.contains(&image) {
            target.images.push(image);
        }
    }
}

fn is_retryable_error(error: &anyhow::Error) -> bool {
    error
        .chain()
        .filter_map(|cause| cause.downcast_ref::<reqwest::Error>())
        .any(|error| error.is_timeout() || error.is_connect() || error.is_request())
}

fn is_retryable_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::REQUEST_TIMEOUT
            | StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

#[derive(Debug, Deserialize, Default)]
struct QueryResponse {
    #[serde(default)]
    query: QueryPayload,
    #[serde(default, rename = "continue")]
    continuation: Option<ContinuationPayload>,
}

#[derive(Debug, Deserialize, Default)]
struct QueryPayload {
    #[serde(default)]
    categorymembers: Vec<MemberQueryItem>,
    #[serde(default)]
    pages: Vec<PageQueryItem>,
}

/// The `continue` object, kept whole so every key can be sent back.
#[derive(Debug, Deserialize, Default)]
struct ContinuationPayload {
    #[serde(flatten)]
    values: BTreeMap<String, Value>,
}

impl ContinuationPayload {
    fn value(&self, key: &str) -> Option<String> {
        self.values.get(key).and_then(continuation_value)
    }

    fn into_params(self) -> Vec<(String, String)> {
        self.values
            .into_iter()
            .filter_map(|(key, value)| Some((key, continuation_value(&value)?)))
            .collect()
    }
}

fn continuation_value(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct MemberQueryItem {
    pageid: Option<u64>,
    #[serde(default)]
    ns: i32,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct PageQueryItem {
    pageid: Option<u64>,
    title: Option<String>,
    #[serde(default)]
    missing: bool,
    description: Option<String>,
    extract: Option<String>,
    thumbnail: Option<ThumbnailQueryItem>,
    #[serde(default)]
    images: Vec<ImageQueryItem>,
    #[serde(default)]
    revisions: Vec<RevisionQueryItem>,
    fullurl: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ThumbnailQueryItem {
    source: String,
}

#[derive(Debug, Deserialize)]
struct ImageQueryItem {
    title: String,
}

#[derive(Debug, Deserialize)]
struct RevisionQueryItem {
    revid: Option<u64>,
    timestamp: Option<String>,
    slots: Option<RevisionSlotContainer>,
}

#[derive(Debug, Deserialize)]
struct RevisionSlotContainer {
    main: Option<RevisionMainSlot>,
}

#[derive(Debug, Deserialize)]
struct RevisionMainSlot {
    content: Option<String>,
}

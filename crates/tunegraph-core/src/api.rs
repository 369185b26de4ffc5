//! Remote catalog API access.
//!
//! [`CatalogApi`] is the single collaborator seam: one blocking call that
//! returns the raw body and its parsed JSON, plus raw byte downloads for cover
//! art and externally hosted audio. The three fetch strategies (single item,
//! bulk by ids, paginated collection) are built on top of it.

use std::io::Read;
use std::thread;
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{ApiError, Error, Result};
use crate::identifier::{ContentId, ContentKind};

/// Default catalog API root.
pub const DEFAULT_API_BASE: &str = "https://api.spotify.com/v1";

/// Lyrics endpoint, followed by the track id.
pub const LYRICS_API_BASE: &str = "https://spclient.wg.spotify.com/color-lyrics/v2/track";

/// Partner endpoint resolving where an externally hosted episode lives.
pub const PARTNER_API_URL: &str = "https://api-partner.spotify.com/pathfinder/v1/query";

const PARTNER_EPISODE_QUERY: &str = r#"{"persistedQuery":{"version":1,"sha256Hash":"224ba0fd89fcfdfb3a15fa2d82a6112d3f4e2ac88fba5c6713de04d1b72cf482"}}"#;

/// Pause between retries of a failed call.
pub const RETRY_WAIT: Duration = Duration::from_secs(5);

/// Query parameters, in order.
pub type Params = Vec<(String, String)>;

/// A successful API response.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse {
    /// Body as received.
    pub raw: String,
    /// Parsed body.
    pub json: Value,
}

/// Blocking access to the remote catalog.
///
/// Implementations must return an error for an empty body or an error
/// object, so callers can tell a failed call from a valid empty collection.
#[cfg_attr(test, mockall::automock)]
pub trait CatalogApi {
    /// GET `url` with the given query parameters.
    fn fetch(&self, url: &str, params: &[(String, String)]) -> Result<ApiResponse>;

    /// GET `url` as raw bytes, e.g. a cover image or an audio file.
    fn open_url(&self, url: &str) -> Result<Box<dyn Read + Send>>;
}

/// URL builders for catalog resources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    base: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self::new(DEFAULT_API_BASE)
    }
}

impl Endpoints {
    /// Endpoints rooted at `base`.
    pub fn new(base: impl Into<String>) -> Self {
        Self {
            base: base.into().trim_end_matches('/').to_string(),
        }
    }

    /// Single item, `{base}/{kind}s/{id}`.
    pub fn item(&self, content: &ContentId) -> String {
        format!("{}/{}/{}", self.base, content.kind().plural(), content.id())
    }

    /// Bulk lookup for a kind, `{base}/{kind}s`.
    pub fn collection(&self, kind: ContentKind) -> String {
        format!("{}/{}", self.base, kind.plural())
    }

    /// Nested collection of an item, e.g. an album's tracks.
    pub fn children(&self, content: &ContentId, key: &str) -> String {
        format!("{}/{key}", self.item(content))
    }

    /// A collection of the current user, e.g. `me/tracks`.
    pub fn user(&self, path: &str) -> String {
        format!("{}/me/{path}", self.base)
    }

    /// Lyrics of a track.
    pub fn lyrics(&self, track_id: &str) -> String {
        format!("{LYRICS_API_BASE}/{track_id}")
    }

    /// Partner lookup of an episode, as URL and query parameters.
    pub fn partner_episode(&self, episode_id: &str) -> (String, Params) {
        let variables = format!(r#"{{"uri":"spotify:episode:{episode_id}"}}"#);
        (
            PARTNER_API_URL.to_string(),
            vec![
                ("operationName".to_string(), "getEpisode".to_string()),
                ("variables".to_string(), variables),
                ("extensions".to_string(), PARTNER_EPISODE_QUERY.to_string()),
            ],
        )
    }
}

/// Market parameter sent with every metadata call.
pub fn market_param() -> (String, String) {
    ("market".to_string(), "from_token".to_string())
}

/// A paginated collection request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    /// First page URL.
    pub url: String,
    /// Key wrapping the paging object, e.g. `artists` for followed artists.
    pub wrapper: Option<String>,
    /// Page size.
    pub limit: usize,
    /// Items already known, used as the first offset.
    pub offset: usize,
    /// Stop once this many items were collected.
    pub stop: Option<usize>,
    /// Extra query parameters.
    pub params: Params,
}

impl PageRequest {
    /// Request starting at `offset` with pages of `limit`.
    pub fn new(url: impl Into<String>, limit: usize, offset: usize) -> Self {
        Self {
            url: url.into(),
            wrapper: None,
            limit,
            offset,
            stop: None,
            params: vec![market_param()],
        }
    }

    /// Read the paging object under `key`.
    #[must_use]
    pub fn with_wrapper(mut self, key: impl Into<String>) -> Self {
        self.wrapper = Some(key.into());
        self
    }

    /// Add a query parameter.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((key.into(), value.into()));
        self
    }

    /// Stop after `stop` items.
    #[must_use]
    pub const fn with_stop(mut self, stop: usize) -> Self {
        self.stop = Some(stop);
        self
    }
}

/// Items collected from a paginated collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    /// Items in server order.
    pub items: Vec<Value>,
    /// The server still had a `next` cursor when collection stopped.
    pub has_more: bool,
}

/// Fetch one item.
pub fn fetch_item(api: &dyn CatalogApi, url: &str) -> Result<Value> {
    Ok(api.fetch(url, &[market_param()])?.json)
}

/// Follow `next` cursors until the collection or the stop cap is exhausted.
pub fn fetch_paginated(api: &dyn CatalogApi, request: &PageRequest) -> Result<Page> {
    let mut params = request.params.clone();
    params.push(("limit".to_string(), request.limit.to_string()));
    params.push(("offset".to_string(), request.offset.to_string()));

    let mut page = Page::default();
    let mut url = request.url.clone();
    let mut first = true;
    loop {
        let response = if first {
            api.fetch(&url, &params)?
        } else {
            api.fetch(&url, &[])?
        };
        first = false;

        let body = match &request.wrapper {
            Some(key) => response.json.get(key).cloned().ok_or_else(|| {
                Error::Api(ApiError::MissingKey {
                    key: key.clone(),
                    url: url.clone(),
                })
            })?,
            None => response.json,
        };

        if let Some(items) = body.get("items").and_then(Value::as_array) {
            page.items.extend(items.iter().cloned());
        }
        let next = body.get("next").and_then(Value::as_str).map(str::to_string);
        page.has_more = next.is_some();
        debug!(url = %url, collected = page.items.len(), more = page.has_more, "Fetched page");

        match next {
            Some(next) if request.stop.is_none_or(|stop| page.items.len() < stop) => url = next,
            _ => break,
        }
    }

    if let Some(stop) = request.stop {
        page.items.truncate(stop);
    }
    Ok(page)
}

/// Download `url` into memory.
pub fn fetch_bytes(api: &dyn CatalogApi, url: &str) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    api.open_url(url)?.read_to_end(&mut bytes)?;
    debug!(url, bytes = bytes.len(), "Downloaded");
    Ok(bytes)
}

/// Direct audio URL of an externally hosted episode.
///
/// `None` when the partner endpoint has no data for the episode, which means
/// the catalog hosts it after all.
pub fn partner_audio_url(
    api: &dyn CatalogApi,
    endpoints: &Endpoints,
    episode_id: &str,
) -> Result<Option<String>> {
    let (url, params) = endpoints.partner_episode(episode_id);
    let response = api.fetch(&url, &params)?;
    let Some(episode) = response.json.pointer("/data/episode").filter(|e| !e.is_null()) else {
        return Ok(None);
    };
    Ok(episode
        .pointer("/audio/items")
        .and_then(Value::as_array)
        .and_then(|items| items.last())
        .and_then(|item| item.get("url"))
        .and_then(Value::as_str)
        .map(str::to_string))
}

/// Fetch many items of one kind in batches of at most `cap` ids.
///
/// The result is aligned with `ids`. A failed batch yields `None` for each of
/// its ids instead of failing the whole call.
pub fn fetch_bulk(
    api: &dyn CatalogApi,
    url: &str,
    ids: &[String],
    response_key: &str,
    cap: usize,
) -> Vec<Option<Value>> {
    let mut results = Vec::with_capacity(ids.len());
    for chunk in ids.chunks(cap.max(1)) {
        let params = vec![market_param(), ("ids".to_string(), chunk.join(","))];
        match api.fetch(url, &params) {
            Ok(response) => {
                let items = response
                    .json
                    .get(response_key)
                    .and_then(Value::as_array)
                    .cloned()
                    .unwrap_or_default();
                if items.len() != chunk.len() {
                    warn!(
                        url,
                        expected = chunk.len(),
                        received = items.len(),
                        "Bulk response size mismatch"
                    );
                }
                let mut items = items.into_iter();
                for _ in chunk {
                    results.push(items.next().filter(|item| !item.is_null()));
                }
            }
            Err(e) => {
                warn!(url, count = chunk.len(), error = %e, "Bulk fetch failed, items left without metadata");
                results.extend(std::iter::repeat_n(None, chunk.len()));
            }
        }
    }
    results
}

/// [`CatalogApi`] over HTTPS with a bearer token.
pub struct HttpCatalogApi {
    client: reqwest::blocking::Client,
    token: String,
    retry_attempts: u32,
}

impl HttpCatalogApi {
    /// Client authenticating with `token`.
    pub fn new(token: impl Into<String>, retry_attempts: u32) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .build()
            .map_err(|e| Error::Configuration(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            token: token.into(),
            retry_attempts,
        })
    }

    fn fetch_once(&self, url: &str, params: &[(String, String)]) -> Result<ApiResponse> {
        let response = self
            .client
            .get(url)
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .header("Accept-Language", "en")
            .query(params)
            .send()
            .map_err(|e| {
                Error::Api(ApiError::RequestFailed {
                    url: url.to_string(),
                    reason: e.to_string(),
                })
            })?;
        let raw = response.text().map_err(|e| {
            Error::Api(ApiError::RequestFailed {
                url: url.to_string(),
                reason: format!("Failed to read response: {e}"),
            })
        })?;
        parse_body(raw)
    }
}

impl CatalogApi for HttpCatalogApi {
    fn fetch(&self, url: &str, params: &[(String, String)]) -> Result<ApiResponse> {
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, params) {
                Ok(response) => return Ok(response),
                Err(e) if attempt < self.retry_attempts && e.is_retryable() => {
                    attempt += 1;
                    warn!(url, attempt, error = %e, "API call failed, retrying");
                    thread::sleep(RETRY_WAIT);
                }
                Err(e) if attempt > 0 => {
                    return Err(Error::Api(ApiError::RetryLimitExceeded {
                        url: url.to_string(),
                        attempts: attempt + 1,
                        last: e.to_string(),
                    }));
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn open_url(&self, url: &str) -> Result<Box<dyn Read + Send>> {
        let response = self.client.get(url).send().map_err(|e| {
            Error::Api(ApiError::RequestFailed {
                url: url.to_string(),
                reason: e.to_string(),
            })
        })?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Api(ApiError::ErrorResponse {
                status: status.as_u16().to_string(),
                message: format!("GET {url} failed"),
            }));
        }
        Ok(Box::new(response))
    }
}

/// Parse a response body, treating an empty body or an error object as a failure.
fn parse_body(raw: String) -> Result<ApiResponse> {
    if raw.trim().is_empty() {
        return Err(Error::Api(ApiError::ErrorResponse {
            status: "empty".to_string(),
            message: "Empty response body".to_string(),
        }));
    }
    let json: Value = serde_json::from_str(&raw)?;
    if let Some(error) = json.get("error") {
        let status = error
            .get("status")
            .map_or_else(|| "unknown".to_string(), ToString::to_string);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string);
        return Err(Error::Api(ApiError::ErrorResponse { status, message }));
    }
    Ok(ApiResponse { raw, json })
}

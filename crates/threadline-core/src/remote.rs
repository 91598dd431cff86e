//! Paginated reads of the remote conversation list.

use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

use threadline_auth::Credential;

use crate::Record;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("no credential available")]
    MissingCredential,

    #[error("invalid list endpoint {0:?}: {1}")]
    InvalidEndpoint(String, url::ParseError),

    #[error("list request failed: {0}")]
    Transport(#[from] reqwest::Error),
}

/// One page of the remote list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub records: Vec<Record>,
    /// Total the server claims to have; not guaranteed consistent across calls.
    pub total: usize,
}

/// Client for `GET <endpoint>?order=updated&offset=..&limit=..`.
#[derive(Debug, Clone)]
pub struct ConversationClient {
    http: reqwest::Client,
    endpoint: Url,
}

impl ConversationClient {
    /// Build a client with its own cookie store. No request timeout is set.
    pub fn new(endpoint: &str) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder().cookie_store(true).build()?;
        Self::with_client(http, endpoint)
    }

    pub fn with_client(http: reqwest::Client, endpoint: &str) -> Result<Self, RemoteError> {
        let endpoint = Url::parse(endpoint)
            .map_err(|err| RemoteError::InvalidEndpoint(endpoint.to_string(), err))?;
        Ok(Self { http, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    pub fn page_url(&self, offset: usize, limit: usize) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .append_pair("order", "updated")
            .append_pair("offset", &offset.to_string())
            .append_pair("limit", &limit.to_string());
        url
    }

    /// Fetch a single page in one round trip.
    ///
    /// Rejected or malformed responses come back as an empty page; only a
    /// missing credential or a transport failure is an error.
    pub async fn fetch_page(
        &self,
        credential: Option<&Credential>,
        offset: usize,
        limit: usize,
    ) -> Result<Page, RemoteError> {
        let credential = credential.ok_or(RemoteError::MissingCredential)?;

        let response = self
            .http
            .get(self.page_url(offset, limit))
            .header(AUTHORIZATION, credential.as_str())
            .header(ACCEPT, "*/*")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!(%status, offset, limit, "list request rejected");
            return Ok(Page::default());
        }

        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(err) => {
                warn!(offset, limit, "list response is not JSON: {}", err);
                return Ok(Page::default());
            }
        };

        let page = parse_page(body);
        debug!(offset, limit, fetched = page.records.len(), total = page.total, "fetched page");
        Ok(page)
    }

    /// Legacy "fetch everything" crawl.
    ///
    /// Walks pages of `limit` from offset 0 until the reported total is
    /// reached, a page comes back empty, or the next offset would reach
    /// `safety_cap`. No request is ever issued at an offset `>= safety_cap`.
    pub async fn fetch_all(
        &self,
        credential: Option<&Credential>,
        limit: usize,
        safety_cap: usize,
    ) -> Result<Vec<Record>, RemoteError> {
        let limit = limit.max(1);
        let mut all = Vec::new();
        let mut offset = 0;

        while offset < safety_cap {
            let page = match self.fetch_page(credential, offset, limit).await {
                Ok(page) => page,
                Err(err) if !all.is_empty() => {
                    warn!(offset, "stopping crawl early: {}", err);
                    break;
                }
                Err(err) => return Err(err),
            };
            if page.records.is_empty() {
                break;
            }

            all.extend(page.records);
            offset += limit;
            if all.len() >= page.total {
                break;
            }
        }

        info!(fetched = all.len(), last_offset = offset, "crawl finished");
        Ok(all)
    }
}

fn parse_page(body: Value) -> Page {
    let Value::Object(mut body) = body else {
        warn!("list response is not a JSON object");
        return Page::default();
    };

    let total = body.get("total").and_then(Value::as_u64).unwrap_or(0) as usize;
    let Some(Value::Array(items)) = body.remove("items") else {
        warn!("list response has no items");
        return Page::default();
    };

    let mut records = Vec::with_capacity(items.len());
    for item in items {
        match serde_json::from_value::<Record>(item) {
            Ok(record) => records.push(record),
            Err(err) => debug!("skipping unreadable record: {}", err),
        }
    }

    Page { records, total }
}

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::AUTHORIZATION;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use url::Url;

use crate::error::{AppError, Result};
use crate::models::Item;
use crate::services::Credentials;

pub const SEARCH_API: &str = "https://api.twitter.com/1.1/search/tweets.json";

/// Parameters of one page request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub query: String,
    pub count: u32,
    /// Inclusive upper bound on ids.
    pub max_id: Option<u64>,
    /// Exclusive lower bound on ids (the resume cursor).
    pub since_id: Option<u64>,
}

/// Result of one page request, as seen by the fetch loop.
#[derive(Debug)]
pub enum PageResult {
    Page(Vec<Item>),
    /// Worth retrying after a cooldown: rate limits, outages, garbled bodies.
    Retryable(String),
    /// Retrying cannot help; the run is aborted.
    Fatal(AppError),
}

#[async_trait]
pub trait SearchSource: Send + Sync {
    async fn search(&self, request: &SearchRequest) -> PageResult;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    statuses: Vec<Status>,
}

#[derive(Debug, Deserialize)]
struct Status {
    id: u64,
    created_at: String,
    full_text: Option<String>,
    text: Option<String>,
    user: User,
}

#[derive(Debug, Deserialize)]
struct User {
    name: String,
}

impl From<Status> for Item {
    fn from(status: Status) -> Self {
        Item {
            id: status.id,
            created_at: status.created_at,
            text: status.full_text.or(status.text).unwrap_or_default(),
            user: status.user.name,
        }
    }
}

/// Search API client with OAuth 1.0a signed requests.
pub struct TwitterSearch {
    client: Client,
    credentials: Credentials,
    endpoint: Url,
}

impl TwitterSearch {
    pub fn new(credentials: Credentials) -> Result<Self> {
        Self::with_endpoint(credentials, SEARCH_API)
    }

    pub fn with_endpoint(credentials: Credentials, endpoint: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent("tweet-search/1.0")
            .build()?;

        Ok(Self {
            client,
            credentials,
            endpoint: Url::parse(endpoint)?,
        })
    }

    fn request_url(&self, request: &SearchRequest) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("q", &request.query)
                .append_pair("count", &request.count.to_string())
                .append_pair("include_entities", "false")
                .append_pair("tweet_mode", "extended");
            if let Some(max_id) = request.max_id {
                query.append_pair("max_id", &max_id.to_string());
            }
            if let Some(since_id) = request.since_id {
                query.append_pair("since_id", &since_id.to_string());
            }
        }
        url
    }
}

#[async_trait]
impl SearchSource for TwitterSearch {
    async fn search(&self, request: &SearchRequest) -> PageResult {
        let url = self.request_url(request);
        tracing::debug!(url = %url, "Search request");

        let auth = match self.credentials.authorization_header("GET", &url) {
            Ok(auth) => auth,
            Err(e) => return PageResult::Fatal(e),
        };

        let response = match self.client.get(url).header(AUTHORIZATION, auth).send().await {
            Ok(response) => response,
            Err(e) => return PageResult::Retryable(e.to_string()),
        };

        let status = response.status();
        if matches!(
            status,
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN
        ) {
            let body = response.text().await.unwrap_or_default();
            return PageResult::Fatal(AppError::Api(format!("HTTP {}: {}", status, body)));
        }
        if !status.is_success() {
            return PageResult::Retryable(format!("HTTP {}", status));
        }

        let bytes = match response.bytes().await {
            Ok(bytes) => bytes,
            Err(e) => return PageResult::Retryable(e.to_string()),
        };

        match serde_json::from_slice::<SearchResponse>(&bytes) {
            Ok(body) => PageResult::Page(body.statuses.into_iter().map(Item::from).collect()),
            Err(e) => PageResult::Retryable(format!("unexpected response body: {}", e)),
        }
    }
}

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;

use crate::error::{AppError, Result};

/// Shortened links embedded in search results.
pub const SHORT_URL_PATTERN: &str = r"https://t\.co/[0-9a-zA-Z]+";

const REQUEST_TIMEOUT: Duration = Duration::from_millis(3100);
const WATCHDOG_TIMEOUT: Duration = Duration::from_secs(5);

/// One network hop from a shortened link to its destination.
#[async_trait]
pub trait LinkResolver: Send + Sync {
    async fn resolve(&self, url: &str) -> Result<String>;
}

/// Follows redirects with a plain GET and reports the final URL.
pub struct HttpLinkResolver {
    client: Client,
}

impl HttpLinkResolver {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(REQUEST_TIMEOUT)
            .user_agent("tweet-search/1.0")
            .redirect(reqwest::redirect::Policy::limited(10))
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl LinkResolver for HttpLinkResolver {
    async fn resolve(&self, url: &str) -> Result<String> {
        let response = self.client.get(url).send().await?;

        if !response.status().is_success() {
            return Err(AppError::Redirect(format!(
                "{} -> {} (HTTP {})",
                url,
                response.url(),
                response.status()
            )));
        }

        Ok(decode_url(response.url().as_str()))
    }
}

/// Percent-decode a URL for display, reading `+` as a space.
fn decode_url(url: &str) -> String {
    let plus_as_space = url.replace('+', " ");
    String::from_utf8_lossy(&urlencoding::decode_binary(plus_as_space.as_bytes())).into_owned()
}

/// Expands every shortened link in a piece of text.
///
/// Each link is resolved independently. A link that fails or outlives the
/// watchdog is left as it was.
#[derive(Clone)]
pub struct RedirectResolver {
    pattern: Regex,
    resolver: Arc<dyn LinkResolver>,
    watchdog: Duration,
}

impl RedirectResolver {
    pub fn new(resolver: Arc<dyn LinkResolver>) -> Self {
        Self {
            pattern: Regex::new(SHORT_URL_PATTERN).expect("short URL pattern is valid"),
            resolver,
            watchdog: WATCHDOG_TIMEOUT,
        }
    }

    pub fn with_pattern(pattern: &str, resolver: Arc<dyn LinkResolver>) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|source| AppError::Pattern {
            field: "short URL",
            source,
        })?;
        Ok(Self {
            pattern,
            resolver,
            watchdog: WATCHDOG_TIMEOUT,
        })
    }

    pub fn with_watchdog(mut self, watchdog: Duration) -> Self {
        self.watchdog = watchdog;
        self
    }

    pub async fn expand(&self, text: &str) -> String {
        let mut result = String::with_capacity(text.len());
        let mut prev = 0;

        for m in self.pattern.find_iter(text) {
            let token = m.as_str();
            match tokio::time::timeout(self.watchdog, self.resolver.resolve(token)).await {
                Ok(Ok(url)) => {
                    tracing::debug!(token, url = %url, "Resolved link");
                    result.push_str(&text[prev..m.start()]);
                    result.push_str(&url);
                    prev = m.end();
                }
                Ok(Err(e)) => {
                    tracing::warn!(token, error = %e, "Failed to resolve link");
                }
                Err(_) => {
                    tracing::warn!(token, timeout = ?self.watchdog, "Link resolution timed out");
                }
            }
        }

        result.push_str(&text[prev..]);
        result
    }
}

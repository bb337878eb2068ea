use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::models::Item;
use crate::services::RedirectResolver;

use super::clock::Sleeper;
use super::source::{PageResult, SearchRequest, SearchSource};

pub const PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct FetchConfig {
    pub page_size: u32,
    /// Stop after this many non-empty pages. `None` means no limit.
    pub max_pages: Option<u32>,
    /// Consecutive empty or failed responses before giving up.
    pub max_misses: u32,
    /// Wait before re-requesting after an empty page.
    pub retry_delay: Duration,
    /// Wait before re-requesting after a failed request.
    pub error_cooldown: Duration,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: PAGE_SIZE,
            max_pages: None,
            max_misses: 3,
            retry_delay: Duration::from_secs(5),
            error_cooldown: Duration::from_secs(15 * 60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// Ran out of results or out of retries.
    Exhausted,
    /// Reached the configured page limit.
    PageLimit,
}

#[derive(Debug)]
pub struct FetchOutcome {
    /// Items in fetch order, with links already expanded.
    pub items: Vec<Item>,
    pub pages: u32,
    pub stop: StopReason,
}

/// Walks result pages backward in id space, from the newest item down to the
/// resume cursor.
pub struct PaginatedFetcher {
    source: Arc<dyn SearchSource>,
    resolver: RedirectResolver,
    sleeper: Arc<dyn Sleeper>,
    config: FetchConfig,
}

impl PaginatedFetcher {
    pub fn new(
        source: Arc<dyn SearchSource>,
        resolver: RedirectResolver,
        sleeper: Arc<dyn Sleeper>,
        config: FetchConfig,
    ) -> Self {
        Self {
            source,
            resolver,
            sleeper,
            config,
        }
    }

    /// Fetch every item newer than `since_id`.
    ///
    /// Empty pages and failed requests retry the same bound; after
    /// `max_misses` in a row the items gathered so far are returned.
    pub async fn fetch(
        &self,
        query: &str,
        since_id: Option<u64>,
        cancel: &CancellationToken,
    ) -> Result<FetchOutcome> {
        let mut items: Vec<Item> = Vec::new();
        let mut pages = 0;
        let mut misses = 0;
        let mut max_id: Option<u64> = None;

        loop {
            let request = SearchRequest {
                query: query.to_string(),
                count: self.config.page_size,
                max_id,
                since_id,
            };
            tracing::info!(page = pages + 1, ?max_id, ?since_id, "Requesting page");

            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                result = self.source.search(&request) => result,
            };

            let delay = match result {
                PageResult::Page(page) if !page.is_empty() => {
                    misses = 0;
                    pages += 1;
                    tracing::info!(page = pages, count = page.len(), "Received page");

                    let resolved = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => return Err(AppError::Cancelled),
                        resolved = self.expand_links(page) => resolved,
                    };
                    items.extend(resolved);

                    if let Some(limit) = self.config.max_pages {
                        if pages >= limit {
                            tracing::info!(pages, "Page limit reached");
                            return Ok(FetchOutcome {
                                items,
                                pages,
                                stop: StopReason::PageLimit,
                            });
                        }
                    }

                    // Next page ends just below the oldest item seen so far.
                    max_id = items.iter().map(|item| item.id).min().and_then(|id| id.checked_sub(1));
                    let below_cursor = match (max_id, since_id) {
                        (None, _) => true,
                        (Some(max), Some(since)) => max <= since,
                        (Some(_), None) => false,
                    };
                    if below_cursor {
                        tracing::info!(pages, "Reached resume cursor");
                        return Ok(FetchOutcome {
                            items,
                            pages,
                            stop: StopReason::Exhausted,
                        });
                    }
                    continue;
                }
                PageResult::Page(_) => {
                    misses += 1;
                    tracing::info!(misses, "Empty page");
                    self.config.retry_delay
                }
                PageResult::Retryable(reason) => {
                    misses += 1;
                    tracing::warn!(misses, error = %reason, cooldown = ?self.config.error_cooldown, "Page request failed");
                    self.config.error_cooldown
                }
                PageResult::Fatal(e) => {
                    tracing::error!(error = %e, "Page request failed permanently");
                    return Err(e);
                }
            };

            if misses >= self.config.max_misses {
                tracing::info!(pages, count = items.len(), "No more results");
                return Ok(FetchOutcome {
                    items,
                    pages,
                    stop: StopReason::Exhausted,
                });
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(AppError::Cancelled),
                _ = self.sleeper.sleep(delay) => {}
            }
        }
    }

    async fn expand_links(&self, page: Vec<Item>) -> Vec<Item> {
        let mut resolved = Vec::with_capacity(page.len());
        for item in page {
            let text = self.resolver.expand(&item.text).await;
            resolved.push(Item { text, ..item });
        }
        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::LinkResolver;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted responses, then returns empty pages forever.
    #[derive(Default)]
    struct ScriptedSource {
        responses: Mutex<VecDeque<PageResult>>,
        requests: Mutex<Vec<SearchRequest>>,
    }

    impl ScriptedSource {
        fn new(responses: Vec<PageResult>) -> Arc<Self> {
            Arc::new(Self {
                responses: Mutex::new(responses.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn requests(&self) -> Vec<SearchRequest> {
            self.requests.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchSource for ScriptedSource {
        async fn search(&self, request: &SearchRequest) -> PageResult {
            self.requests.lock().unwrap().push(request.clone());
            self.responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(PageResult::Page(Vec::new()))
        }
    }

    #[derive(Default)]
    struct RecordingSleeper {
        delays: Mutex<Vec<Duration>>,
    }

    #[async_trait]
    impl Sleeper for RecordingSleeper {
        async fn sleep(&self, duration: Duration) {
            self.delays.lock().unwrap().push(duration);
        }
    }

    struct UpperCaseResolver;

    #[async_trait]
    impl LinkResolver for UpperCaseResolver {
        async fn resolve(&self, url: &str) -> Result<String> {
            Ok(url.to_uppercase())
        }
    }

    fn item(id: u64) -> Item {
        Item {
            id,
            created_at: "Wed Oct 10 20:19:24 +0000 2018".to_string(),
            text: format!("item {} https://t.co/x{}", id, id),
            user: "alice".to_string(),
        }
    }

    fn page(ids: &[u64]) -> PageResult {
        PageResult::Page(ids.iter().copied().map(item).collect())
    }

    fn fetcher(
        source: Arc<ScriptedSource>,
        sleeper: Arc<RecordingSleeper>,
        max_pages: Option<u32>,
    ) -> PaginatedFetcher {
        PaginatedFetcher::new(
            source,
            RedirectResolver::new(Arc::new(UpperCaseResolver)),
            sleeper,
            FetchConfig {
                max_pages,
                ..FetchConfig::default()
            },
        )
    }

    fn ids(outcome: &FetchOutcome) -> Vec<u64> {
        outcome.items.iter().map(|i| i.id).collect()
    }

    #[tokio::test]
    async fn test_empty_pages_stop_after_three_misses() {
        let source = ScriptedSource::new(Vec::new());
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = fetcher(source.clone(), sleeper.clone(), None)
            .fetch("q", None, &CancellationToken::new())
            .await
            .unwrap();

        assert!(outcome.items.is_empty());
        assert_eq!(outcome.stop, StopReason::Exhausted);
        assert_eq!(source.requests().len(), 3);
        let config = FetchConfig::default();
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![config.retry_delay, config.retry_delay]
        );
    }

    #[tokio::test]
    async fn test_walks_backward_from_oldest_seen() {
        let source = ScriptedSource::new(vec![page(&[30, 29, 28]), page(&[27, 25])]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = fetcher(source.clone(), sleeper, None)
            .fetch("rust", Some(20), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ids(&outcome), vec![30, 29, 28, 27, 25]);
        assert_eq!(outcome.pages, 2);

        let requests = source.requests();
        assert_eq!(requests.len(), 5);
        assert_eq!(requests[0].max_id, None);
        assert_eq!(requests[1].max_id, Some(27));
        assert_eq!(requests[2].max_id, Some(24));
        // Empty pages retry the same bound.
        assert_eq!(requests[3].max_id, Some(24));
        assert_eq!(requests[4].max_id, Some(24));
        assert!(requests.iter().all(|r| r.since_id == Some(20)));
        assert!(requests.iter().all(|r| r.count == PAGE_SIZE && r.query == "rust"));
    }

    #[tokio::test]
    async fn test_links_are_expanded_as_items_arrive() {
        let source = ScriptedSource::new(vec![page(&[7])]);
        let outcome = fetcher(source, Arc::new(RecordingSleeper::default()), None)
            .fetch("q", None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outcome.items[0].text, "item 7 HTTPS://T.CO/X7");
    }

    #[tokio::test]
    async fn test_page_limit() {
        let source = ScriptedSource::new(vec![page(&[9, 8]), page(&[7]), page(&[6])]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = fetcher(source.clone(), sleeper, Some(2))
            .fetch("q", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome.stop, StopReason::PageLimit);
        assert_eq!(ids(&outcome), vec![9, 8, 7]);
        assert_eq!(source.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_errors_cool_down_and_success_resets_misses() {
        let source = ScriptedSource::new(vec![
            PageResult::Retryable("HTTP 429".to_string()),
            PageResult::Retryable("HTTP 503".to_string()),
            page(&[50]),
            PageResult::Retryable("HTTP 429".to_string()),
            PageResult::Page(Vec::new()),
        ]);
        let sleeper = Arc::new(RecordingSleeper::default());
        let outcome = fetcher(source.clone(), sleeper.clone(), None)
            .fetch("q", None, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ids(&outcome), vec![50]);
        // Two misses before the page, three after it.
        assert_eq!(source.requests().len(), 6);
        let config = FetchConfig::default();
        assert_eq!(
            *sleeper.delays.lock().unwrap(),
            vec![
                config.error_cooldown,
                config.error_cooldown,
                config.error_cooldown,
                config.retry_delay,
            ]
        );
    }

    #[tokio::test]
    async fn test_stops_when_bound_reaches_cursor() {
        let source = ScriptedSource::new(vec![page(&[12, 11])]);
        let outcome = fetcher(source.clone(), Arc::new(RecordingSleeper::default()), None)
            .fetch("q", Some(10), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(ids(&outcome), vec![12, 11]);
        assert_eq!(source.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_fatal_aborts() {
        let source = ScriptedSource::new(vec![
            page(&[5]),
            PageResult::Fatal(AppError::Api("HTTP 401".to_string())),
        ]);
        let result = fetcher(source, Arc::new(RecordingSleeper::default()), None)
            .fetch("q", None, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AppError::Api(_))));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let source = ScriptedSource::new(vec![page(&[5])]);
        let result = fetcher(source.clone(), Arc::new(RecordingSleeper::default()), None)
            .fetch("q", None, &cancel)
            .await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(source.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_during_cooldown() {
        let source = ScriptedSource::new(vec![PageResult::Retryable("HTTP 503".to_string())]);
        let cancel = CancellationToken::new();
        let fetcher = PaginatedFetcher::new(
            source.clone(),
            RedirectResolver::new(Arc::new(UpperCaseResolver)),
            Arc::new(crate::feed::TokioSleeper),
            FetchConfig::default(),
        );

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            canceller.cancel();
        });

        let result = fetcher.fetch("q", None, &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert_eq!(source.requests().len(), 1);
    }
}

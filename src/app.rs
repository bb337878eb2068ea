use tokio_util::sync::CancellationToken;

use crate::config::{MergedState, SearchState};
use crate::error::Result;
use crate::feed::{PaginatedFetcher, StopReason};
use crate::filter::FilterPolicy;
use crate::models::Item;
use crate::store::{FilteredLog, OutputPaths, RawLog};

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Rebuild the filtered log from the whole raw log instead of appending.
    pub recreate_filtered: bool,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub fetched: usize,
    pub appended: usize,
    pub pages: u32,
    pub stop: StopReason,
    pub cursor: Option<u64>,
    pub query_changed: bool,
    /// Items that passed the filter policy this run.
    pub filtered: usize,
    /// Display lines written to the filtered log this run.
    pub accepted_lines: Vec<String>,
}

/// One fetch, filter and persist cycle for a single query.
pub struct App {
    paths: OutputPaths,
    state: SearchState,
    previous_keywords: Option<String>,
    policy: FilterPolicy,
    fetcher: PaginatedFetcher,
    options: RunOptions,
}

impl App {
    pub fn new(
        paths: OutputPaths,
        merged: MergedState,
        policy: FilterPolicy,
        fetcher: PaginatedFetcher,
        options: RunOptions,
    ) -> Self {
        Self {
            paths,
            state: merged.state,
            previous_keywords: merged.previous_keywords,
            policy,
            fetcher,
            options,
        }
    }

    pub fn state(&self) -> &SearchState {
        &self.state
    }

    fn log_configuration(&self) {
        let state = &self.state;
        tracing::info!(
            search_keywords = %state.search_keywords,
            accept_regexp_text = %state.accept_regexp_text,
            reject_regexp_text = %state.reject_regexp_text,
            accept_regexp_user = %state.accept_regexp_user,
            reject_regexp_user = %state.reject_regexp_user,
            credential_reference = %state.credential_reference.display(),
            latest_item_id = ?state.latest_item_id,
            "Search configuration"
        );
        if let Some(previous) = &self.previous_keywords {
            tracing::info!(
                "Search keywords changed from \"{}\" to \"{}\"",
                previous,
                state.search_keywords
            );
        }
        if self.options.recreate_filtered {
            tracing::info!(
                path = %self.paths.filtered.display(),
                "Will recreate the filtered log from the raw log"
            );
        }
    }

    /// Run the cycle. Nothing is written unless the fetch completes; the
    /// state file is written last, after both logs.
    pub async fn run(mut self, cancel: &CancellationToken) -> Result<RunSummary> {
        self.log_configuration();

        let outcome = self
            .fetcher
            .fetch(
                &self.state.search_keywords,
                self.state.latest_item_id,
                cancel,
            )
            .await?;

        let mut items = outcome.items;
        items.sort_by_key(|item| item.id);
        items.dedup_by_key(|item| item.id);
        let fetched = items.len();

        let raw_log = RawLog::new(&self.paths.raw);
        let appended = raw_log.append(&items)?;

        let filtered_log = FilteredLog::new(&self.paths.filtered);
        let accepted_lines = if self.options.recreate_filtered {
            let mut all = raw_log.read_all()?;
            all.sort_by_key(|item| item.id);
            all.dedup_by_key(|item| item.id);
            let accepted = self.policy.apply(&all);
            if all.is_empty() && !filtered_log.path().exists() {
                tracing::info!("Raw log is empty, nothing to recreate");
            } else {
                filtered_log.rebuild(&accepted)?;
            }
            display_lines(&accepted)
        } else {
            // All fetched items, including ones the raw log already held.
            let accepted = self.policy.apply(&items);
            let written = filtered_log.append(&accepted)?;
            display_lines(&written)
        };

        self.state.advance_cursor(items.iter().map(|item| item.id));
        self.state.save(&self.paths.state)?;
        tracing::info!(cursor = ?self.state.latest_item_id, "Saved search state");

        Ok(RunSummary {
            fetched,
            appended: appended.len(),
            pages: outcome.pages,
            stop: outcome.stop,
            cursor: self.state.latest_item_id,
            query_changed: self.previous_keywords.is_some(),
            filtered: accepted_lines.len(),
            accepted_lines,
        })
    }
}

fn display_lines(items: &[&Item]) -> Vec<String> {
    items.iter().map(|item| item.display_line()).collect()
}

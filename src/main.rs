use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use tweet_search::feed::{FetchConfig, PaginatedFetcher, TokioSleeper, TwitterSearch};
use tweet_search::services::{Credentials, HttpLinkResolver, RedirectResolver};
use tweet_search::store::OutputPaths;
use tweet_search::{App, AppError, FilterPolicy, RunOptions, SearchState, StateOverrides};

/// Fetch new search results, expand short links and keep filtered logs.
#[derive(Parser, Debug)]
#[command(name = "tweet-search")]
#[command(version)]
#[command(
    after_help = "Patterns use Rust regex syntax: lookaround and backreferences are not \
                  supported and abort the run before any request. The literal \"(?!)\" \
                  matches nothing."
)]
struct Cli {
    /// Search keywords (defaults to the saved query)
    search_keywords: Option<String>,

    /// Accept regexp for text, no lookaround (default: match everything)
    #[arg(short = 't', long)]
    accept_regexp_text: Option<String>,

    /// Reject regexp for text, no lookaround (default: match nothing)
    #[arg(short = 'r', long)]
    reject_regexp_text: Option<String>,

    /// Accept regexp for user, no lookaround (default: match everything)
    #[arg(short = 'u', long)]
    accept_regexp_user: Option<String>,

    /// Reject regexp for user, no lookaround (default: match nothing)
    #[arg(short = 'v', long)]
    reject_regexp_user: Option<String>,

    /// Rebuild filtered.txt by applying the filters to tweets.jsonl
    #[arg(short = 'f', long)]
    recreate_filtered_txt: bool,

    /// Credential file path (default: ./auth.json)
    #[arg(short = 'a', long)]
    auth_json_path: Option<PathBuf>,

    /// Max pages to fetch, 0 for no limit
    #[arg(short = 'p', long, default_value_t = 0)]
    max_pages: u32,

    /// Directory holding config.json, tweets.jsonl and filtered.txt
    #[arg(short = 'o', long, default_value = "./")]
    output_directory: PathBuf,
}

impl Cli {
    fn overrides(&self) -> StateOverrides {
        StateOverrides {
            search_keywords: self.search_keywords.clone(),
            accept_regexp_text: self.accept_regexp_text.clone(),
            reject_regexp_text: self.reject_regexp_text.clone(),
            accept_regexp_user: self.accept_regexp_user.clone(),
            reject_regexp_user: self.reject_regexp_user.clone(),
            credential_reference: self.auth_json_path.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let paths = OutputPaths::new(&cli.output_directory);

    // Everything up to the first request must succeed before touching the network.
    let persisted = SearchState::load(&paths.state)?;
    let merged = SearchState::merge(persisted, cli.overrides())?;
    let policy = FilterPolicy::from_state(&merged.state)?;
    let credentials = Credentials::load(&merged.state.credential_reference)?;

    let source = Arc::new(TwitterSearch::new(credentials)?);
    let resolver = RedirectResolver::new(Arc::new(HttpLinkResolver::new()?));
    let fetcher = PaginatedFetcher::new(
        source,
        resolver,
        Arc::new(TokioSleeper),
        FetchConfig {
            max_pages: (cli.max_pages > 0).then_some(cli.max_pages),
            ..FetchConfig::default()
        },
    );

    let app = App::new(
        paths,
        merged,
        policy,
        fetcher,
        RunOptions {
            recreate_filtered: cli.recreate_filtered_txt,
        },
    );

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, stopping at the next safe point");
            on_interrupt.cancel();
        }
    });

    let summary = match app.run(&cancel).await {
        Ok(summary) => summary,
        Err(AppError::Cancelled) => {
            eprintln!("Interrupted before anything was written");
            std::process::exit(130);
        }
        Err(e) => return Err(e).context("search run failed"),
    };

    for line in &summary.accepted_lines {
        println!("{}", line);
    }

    tracing::info!(
        fetched = summary.fetched,
        appended = summary.appended,
        filtered = summary.filtered,
        pages = summary.pages,
        stop = ?summary.stop,
        cursor = ?summary.cursor,
        query_changed = summary.query_changed,
        "Run complete"
    );

    Ok(())
}

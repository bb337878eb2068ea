mod clock;
mod fetcher;
mod source;

pub use clock::{Sleeper, TokioSleeper};
pub use fetcher::{FetchConfig, FetchOutcome, PaginatedFetcher, StopReason, PAGE_SIZE};
pub use source::{PageResult, SearchRequest, SearchSource, TwitterSearch, SEARCH_API};

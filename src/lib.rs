//! Incremental keyword search archiver.
//!
//! Pulls new results for a saved query page by page, expands shortened
//! links, appends every item to a raw JSONL log, and writes the items that
//! pass a four-way regex policy to a readable text log.

pub mod app;
pub mod config;
pub mod error;
pub mod feed;
pub mod filter;
pub mod models;
pub mod services;
pub mod store;

pub use app::{App, RunOptions, RunSummary};
pub use config::{MergedState, SearchState, StateOverrides};
pub use error::{AppError, Result};
pub use filter::FilterPolicy;
pub use models::Item;

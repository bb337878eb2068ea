//! Durable output: the raw item log and the filtered text log.

mod filtered;
mod raw;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use crate::error::Result;

pub use filtered::FilteredLog;
pub use raw::RawLog;

pub const STATE_FILE: &str = "config.json";
pub const RAW_LOG_FILE: &str = "tweets.jsonl";
pub const FILTERED_LOG_FILE: &str = "filtered.txt";

/// File locations inside one output directory.
#[derive(Debug, Clone)]
pub struct OutputPaths {
    pub state: PathBuf,
    pub raw: PathBuf,
    pub filtered: PathBuf,
}

impl OutputPaths {
    pub fn new(dir: &Path) -> Self {
        Self {
            state: dir.join(STATE_FILE),
            raw: dir.join(RAW_LOG_FILE),
            filtered: dir.join(FILTERED_LOG_FILE),
        }
    }
}

/// Drop a final line left without its newline by an interrupted write.
fn truncate_torn_tail(path: &Path) -> Result<()> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e.into()),
    };
    if bytes.is_empty() || bytes.ends_with(b"\n") {
        return Ok(());
    }

    let keep = bytes.iter().rposition(|&b| b == b'\n').map_or(0, |pos| pos + 1);
    tracing::warn!(
        path = %path.display(),
        dropped = bytes.len() - keep,
        "Truncating partial line"
    );
    let file = OpenOptions::new().write(true).open(path)?;
    file.set_len(keep as u64)?;
    file.sync_all()?;
    Ok(())
}

use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::models::Item;

use super::truncate_torn_tail;

/// Append-only log of fetched items, one JSON object per line.
#[derive(Debug, Clone)]
pub struct RawLog {
    path: PathBuf,
}

impl RawLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every readable record, in file order. A missing log reads as empty.
    pub fn read_all(&self) -> Result<Vec<Item>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut items = Vec::new();
        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<Item>(line) {
                Ok(item) => items.push(item),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), line = index + 1, error = %e, "Skipping unreadable record");
                }
            }
        }
        Ok(items)
    }

    /// Append `items` in ascending id order, skipping ids the log already
    /// holds. Returns the records actually written.
    pub fn append(&self, items: &[Item]) -> Result<Vec<Item>> {
        let known: HashSet<u64> = self.read_all()?.into_iter().map(|item| item.id).collect();

        let mut fresh: Vec<Item> = items
            .iter()
            .filter(|item| !known.contains(&item.id))
            .cloned()
            .collect();
        fresh.sort_by_key(|item| item.id);
        fresh.dedup_by_key(|item| item.id);

        if fresh.is_empty() {
            tracing::info!(path = %self.path.display(), "No new records");
            return Ok(fresh);
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        truncate_torn_tail(&self.path)?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        for item in &fresh {
            let mut line = serde_json::to_string(item)?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.sync_all()?;

        tracing::info!(path = %self.path.display(), count = fresh.len(), "Appended records");
        Ok(fresh)
    }
}

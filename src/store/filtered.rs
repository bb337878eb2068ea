use std::collections::HashSet;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};
use crate::models::{Item, PERMALINK_PREFIX};

use super::truncate_torn_tail;

/// Human-readable log of accepted items, one display line each.
#[derive(Debug, Clone)]
pub struct FilteredLog {
    path: PathBuf,
}

impl FilteredLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Ids already listed, read back from the permalink that starts each
    /// complete line. A missing log has none.
    pub fn known_ids(&self) -> Result<HashSet<u64>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(HashSet::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(content
            .split_inclusive('\n')
            .filter(|line| line.ends_with('\n'))
            .filter_map(|line| {
                line.strip_prefix(PERMALINK_PREFIX)?
                    .split(' ')
                    .next()?
                    .parse()
                    .ok()
            })
            .collect())
    }

    /// Append a line for each item the log does not list yet. Returns the
    /// items actually written.
    pub fn append<'a>(&self, items: &[&'a Item]) -> Result<Vec<&'a Item>> {
        let known = self.known_ids()?;
        let mut seen = HashSet::new();
        let fresh: Vec<&Item> = items
            .iter()
            .copied()
            .filter(|item| !known.contains(&item.id) && seen.insert(item.id))
            .collect();

        if fresh.is_empty() {
            tracing::info!(path = %self.path.display(), "No new filtered lines");
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
            let mut line = item.display_line();
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.sync_all()?;
        tracing::info!(path = %self.path.display(), count = fresh.len(), "Appended filtered lines");
        Ok(fresh)
    }

    /// Replace the whole log with `items`.
    pub fn rebuild(&self, items: &[&Item]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        for item in items {
            let mut line = item.display_line();
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.as_file().sync_all()?;
        file.persist(&self.path).map_err(|e| AppError::Io(e.error))?;

        tracing::info!(path = %self.path.display(), count = items.len(), "Rebuilt filtered log");
        Ok(())
    }
}

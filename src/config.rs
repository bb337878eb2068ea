use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{AppError, Result};

/// Accept pattern used when nothing else is configured. Matches every string.
pub const ACCEPT_ALL: &str = "";
/// Reject pattern used when nothing else is configured. Matches no string.
pub const REJECT_NONE: &str = "(?!)";

pub const DEFAULT_CREDENTIAL_REFERENCE: &str = "./auth.json";

/// Persisted run state: the query, the filter policy and the resume cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchState {
    pub search_keywords: String,
    #[serde(default = "default_accept")]
    pub accept_regexp_text: String,
    #[serde(default = "default_reject")]
    pub reject_regexp_text: String,
    #[serde(default = "default_accept")]
    pub accept_regexp_user: String,
    #[serde(default = "default_reject")]
    pub reject_regexp_user: String,
    #[serde(alias = "auth_json_path", default = "default_credential_reference")]
    pub credential_reference: PathBuf,
    #[serde(alias = "latest_tweet_id", default)]
    pub latest_item_id: Option<u64>,
}

fn default_accept() -> String {
    ACCEPT_ALL.to_string()
}

fn default_reject() -> String {
    REJECT_NONE.to_string()
}

fn default_credential_reference() -> PathBuf {
    PathBuf::from(DEFAULT_CREDENTIAL_REFERENCE)
}

/// Values supplied explicitly by the caller for this run. `None` defers to
/// the persisted value, then to the built-in default.
#[derive(Debug, Clone, Default)]
pub struct StateOverrides {
    pub search_keywords: Option<String>,
    pub accept_regexp_text: Option<String>,
    pub reject_regexp_text: Option<String>,
    pub accept_regexp_user: Option<String>,
    pub reject_regexp_user: Option<String>,
    pub credential_reference: Option<PathBuf>,
}

/// Outcome of [`SearchState::merge`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedState {
    pub state: SearchState,
    /// The persisted keywords, when the caller replaced them this run.
    pub previous_keywords: Option<String>,
}

impl MergedState {
    pub fn query_changed(&self) -> bool {
        self.previous_keywords.is_some()
    }
}

impl SearchState {
    /// Resolve the effective state for a run.
    ///
    /// Precedence per field is override > persisted > default. Supplying
    /// keywords that differ from the persisted ones drops the cursor so the
    /// new query is fetched in full.
    pub fn merge(persisted: Option<SearchState>, overrides: StateOverrides) -> Result<MergedState> {
        let Some(persisted) = persisted else {
            let search_keywords = overrides.search_keywords.ok_or_else(|| {
                AppError::Config(
                    "search keywords are required when no saved state exists".to_string(),
                )
            })?;
            let state = SearchState {
                search_keywords,
                accept_regexp_text: overrides.accept_regexp_text.unwrap_or_else(default_accept),
                reject_regexp_text: overrides.reject_regexp_text.unwrap_or_else(default_reject),
                accept_regexp_user: overrides.accept_regexp_user.unwrap_or_else(default_accept),
                reject_regexp_user: overrides.reject_regexp_user.unwrap_or_else(default_reject),
                credential_reference: overrides
                    .credential_reference
                    .unwrap_or_else(default_credential_reference),
                latest_item_id: None,
            };
            return Ok(MergedState {
                state,
                previous_keywords: None,
            });
        };

        let (search_keywords, latest_item_id, previous_keywords) =
            match overrides.search_keywords {
                Some(keywords) if keywords != persisted.search_keywords => {
                    (keywords, None, Some(persisted.search_keywords))
                }
                _ => (persisted.search_keywords, persisted.latest_item_id, None),
            };

        let state = SearchState {
            search_keywords,
            accept_regexp_text: overrides
                .accept_regexp_text
                .unwrap_or(persisted.accept_regexp_text),
            reject_regexp_text: overrides
                .reject_regexp_text
                .unwrap_or(persisted.reject_regexp_text),
            accept_regexp_user: overrides
                .accept_regexp_user
                .unwrap_or(persisted.accept_regexp_user),
            reject_regexp_user: overrides
                .reject_regexp_user
                .unwrap_or(persisted.reject_regexp_user),
            credential_reference: overrides
                .credential_reference
                .unwrap_or(persisted.credential_reference),
            latest_item_id,
        };

        Ok(MergedState {
            state,
            previous_keywords,
        })
    }

    /// Load the persisted state, or `None` when the file does not exist yet.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let state: SearchState = serde_json::from_str(&content)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(Some(state))
    }

    /// Write the state, replacing the previous file in one rename.
    pub fn save(&self, path: &Path) -> Result<()> {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        std::fs::create_dir_all(dir)?;

        let content = serde_json::to_string_pretty(self)?;
        let mut file = tempfile::NamedTempFile::new_in(dir)?;
        file.write_all(content.as_bytes())?;
        file.write_all(b"\n")?;
        file.as_file().sync_all()?;
        file.persist(path).map_err(|e| AppError::Io(e.error))?;
        Ok(())
    }

    /// Move the cursor forward to cover `ids`. Never moves it backward.
    pub fn advance_cursor(&mut self, ids: impl IntoIterator<Item = u64>) {
        let newest = ids.into_iter().max();
        self.latest_item_id = match (self.latest_item_id, newest) {
            (Some(current), Some(newest)) => Some(current.max(newest)),
            (current, newest) => current.or(newest),
        };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_err, assert_ok};

    fn persisted(keywords: &str, cursor: Option<u64>) -> SearchState {
        SearchState {
            search_keywords: keywords.to_string(),
            accept_regexp_text: "rust".to_string(),
            reject_regexp_text: "spam".to_string(),
            accept_regexp_user: ACCEPT_ALL.to_string(),
            reject_regexp_user: "bot".to_string(),
            credential_reference: PathBuf::from("/etc/auth.json"),
            latest_item_id: cursor,
        }
    }

    #[test]
    fn test_merge_without_state_or_keywords_is_fatal() {
        let err = assert_err!(SearchState::merge(None, StateOverrides::default()));
        assert!(matches!(err, AppError::Config(_)));
    }

    #[test]
    fn test_merge_fresh_state_uses_defaults() {
        let merged = SearchState::merge(
            None,
            StateOverrides {
                search_keywords: Some("test".to_string()),
                reject_regexp_user: Some("bot".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(!merged.query_changed());
        assert_eq!(merged.state.search_keywords, "test");
        assert_eq!(merged.state.accept_regexp_text, ACCEPT_ALL);
        assert_eq!(merged.state.reject_regexp_text, REJECT_NONE);
        assert_eq!(merged.state.reject_regexp_user, "bot");
        assert_eq!(
            merged.state.credential_reference,
            PathBuf::from(DEFAULT_CREDENTIAL_REFERENCE)
        );
        assert_eq!(merged.state.latest_item_id, None);
    }

    #[test]
    fn test_merge_keeps_cursor_for_same_keywords() {
        let merged = SearchState::merge(
            Some(persisted("foo", Some(500))),
            StateOverrides {
                search_keywords: Some("foo".to_string()),
                accept_regexp_text: Some("go".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(!merged.query_changed());
        assert_eq!(merged.state.latest_item_id, Some(500));
        assert_eq!(merged.state.accept_regexp_text, "go");
        assert_eq!(merged.state.reject_regexp_text, "spam");
        assert_eq!(merged.state.credential_reference, PathBuf::from("/etc/auth.json"));
    }

    #[test]
    fn test_merge_without_keywords_resumes_persisted_query() {
        let merged =
            SearchState::merge(Some(persisted("foo", Some(42))), StateOverrides::default())
                .unwrap();
        assert_eq!(merged.state, persisted("foo", Some(42)));
        assert!(!merged.query_changed());
    }

    #[test]
    fn test_merge_keyword_change_resets_cursor_only() {
        let merged = SearchState::merge(
            Some(persisted("foo", Some(500))),
            StateOverrides {
                search_keywords: Some("bar".to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert!(merged.query_changed());
        assert_eq!(merged.previous_keywords.as_deref(), Some("foo"));
        assert_eq!(merged.state.search_keywords, "bar");
        assert_eq!(merged.state.latest_item_id, None);
        assert_eq!(merged.state.reject_regexp_text, "spam");
    }

    #[test]
    fn test_advance_cursor_is_monotonic() {
        let mut state = persisted("foo", None);
        state.advance_cursor(Vec::new());
        assert_eq!(state.latest_item_id, None);

        state.advance_cursor([10, 11]);
        assert_eq!(state.latest_item_id, Some(11));

        state.advance_cursor([3]);
        assert_eq!(state.latest_item_id, Some(11));

        state.advance_cursor(Vec::new());
        assert_eq!(state.latest_item_id, Some(11));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");

        assert_eq!(SearchState::load(&path).unwrap(), None);

        let state = persisted("foo", Some(9));
        assert_ok!(state.save(&path));
        assert_eq!(assert_ok!(SearchState::load(&path)), Some(state));
    }

    #[test]
    fn test_load_accepts_legacy_field_names() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{
  "search_keywords": "rust lang",
  "accept_regexp_text": "",
  "reject_regexp_text": "(?!)",
  "accept_regexp_user": "",
  "reject_regexp_user": "(?!)",
  "auth_json_path": "./auth.json",
  "latest_tweet_id": 1234
}"#,
        )
        .unwrap();

        let state = SearchState::load(&path).unwrap().unwrap();
        assert_eq!(state.search_keywords, "rust lang");
        assert_eq!(state.credential_reference, PathBuf::from("./auth.json"));
        assert_eq!(state.latest_item_id, Some(1234));
    }

    #[test]
    fn test_load_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, "not json").unwrap();
        assert!(matches!(SearchState::load(&path), Err(AppError::Config(_))));
    }
}

use chrono::{DateTime, Duration, FixedOffset};
use serde::{Deserialize, Serialize};

pub const PERMALINK_PREFIX: &str = "https://twitter.com/i/web/status/";

/// Hours added to the source timestamp before it is printed.
const DISPLAY_OFFSET_HOURS: i64 = 9;

/// Timestamp layout used by the search API, e.g. `Wed Oct 10 20:19:24 +0000 2018`.
const API_TIMESTAMP_FORMAT: &str = "%a %b %d %H:%M:%S %z %Y";

/// One fetched search result. Identity and ordering are by `id` alone.
///
/// This is also the raw log record, so field order here is the order the
/// keys appear on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: u64,
    /// Kept verbatim as reported by the source.
    pub created_at: String,
    pub text: String,
    pub user: String,
}

impl Item {
    pub fn permalink(&self) -> String {
        format!("{}{}", PERMALINK_PREFIX, self.id)
    }

    pub fn timestamp(&self) -> Option<DateTime<FixedOffset>> {
        DateTime::parse_from_str(&self.created_at, API_TIMESTAMP_FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(&self.created_at))
            .ok()
    }

    /// Human-readable projection written to the filtered log.
    pub fn display_line(&self) -> String {
        let timestamp = match self.timestamp() {
            Some(dt) => (dt + Duration::hours(DISPLAY_OFFSET_HOURS))
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            None => {
                tracing::warn!(id = self.id, created_at = %self.created_at, "Unparseable timestamp");
                self.created_at.clone()
            }
        };

        [
            self.permalink(),
            timestamp,
            self.user.clone(),
            flatten(&self.text),
        ]
        .join(" ")
    }
}

fn flatten(text: &str) -> String {
    text.replace(['\t', '\n', '\r'], " ")
}

//! Four-predicate inclusion policy over item text and user name.
//!
//! Every predicate is an unanchored substring search (`Regex::is_match`)
//! against the plain `text` and `user` strings. Anchor the pattern with `^`
//! or `$` to get prefix or suffix matching.

use regex::Regex;

use crate::config::{SearchState, REJECT_NONE};
use crate::error::{AppError, Result};
use crate::models::Item;

/// A single compiled predicate.
#[derive(Debug, Clone)]
enum Matcher {
    Pattern(Regex),
    Never,
}

impl Matcher {
    fn accept(field: &'static str, pattern: &str) -> Result<Self> {
        if pattern == REJECT_NONE {
            return Ok(Matcher::Never);
        }
        compile(field, pattern).map(Matcher::Pattern)
    }

    /// An empty reject pattern disables the predicate rather than rejecting
    /// everything.
    fn reject(field: &'static str, pattern: &str) -> Result<Self> {
        if pattern.is_empty() || pattern == REJECT_NONE {
            return Ok(Matcher::Never);
        }
        compile(field, pattern).map(Matcher::Pattern)
    }

    fn is_match(&self, haystack: &str) -> bool {
        match self {
            Matcher::Pattern(re) => re.is_match(haystack),
            Matcher::Never => false,
        }
    }
}

fn compile(field: &'static str, pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| AppError::Pattern { field, source })
}

/// Compiled filter policy. Compile once per run and reuse for every item.
#[derive(Debug, Clone)]
pub struct FilterPolicy {
    accept_text: Matcher,
    reject_text: Matcher,
    accept_user: Matcher,
    reject_user: Matcher,
}

impl FilterPolicy {
    pub fn compile(
        accept_text: &str,
        reject_text: &str,
        accept_user: &str,
        reject_user: &str,
    ) -> Result<Self> {
        Ok(Self {
            accept_text: Matcher::accept("accept_regexp_text", accept_text)?,
            reject_text: Matcher::reject("reject_regexp_text", reject_text)?,
            accept_user: Matcher::accept("accept_regexp_user", accept_user)?,
            reject_user: Matcher::reject("reject_regexp_user", reject_user)?,
        })
    }

    pub fn from_state(state: &SearchState) -> Result<Self> {
        Self::compile(
            &state.accept_regexp_text,
            &state.reject_regexp_text,
            &state.accept_regexp_user,
            &state.reject_regexp_user,
        )
    }

    pub fn accepts(&self, item: &Item) -> bool {
        self.accept_text.is_match(&item.text)
            && !self.reject_text.is_match(&item.text)
            && self.accept_user.is_match(&item.user)
            && !self.reject_user.is_match(&item.user)
    }

    /// Accepted items, in input order.
    pub fn apply<'a>(&self, items: &'a [Item]) -> Vec<&'a Item> {
        items.iter().filter(|item| self.accepts(item)).collect()
    }
}

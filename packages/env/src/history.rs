//! The real browser location and session history.

use url::Url;

use crate::error::{EnvError, Result};
use crate::value::Value;

#[derive(Debug, Clone, PartialEq)]
struct HistoryEntry {
    url: Url,
    state: Value,
}

/// The one browser URL shared by the host and every guest.
///
/// Full navigations (cross-document loads and reloads) cannot be carried out
/// inside a single page, so they are recorded in [`BrowserHistory::navigations`]
/// for the embedder to act on.
#[derive(Debug, Clone)]
pub struct BrowserHistory {
    entries: Vec<HistoryEntry>,
    index: usize,
    navigations: Vec<Url>,
}

impl BrowserHistory {
    /// Start a history at `href`.
    pub fn new(href: &str) -> Result<Self> {
        Ok(Self {
            entries: vec![HistoryEntry {
                url: Url::parse(href)?,
                state: Value::Null,
            }],
            index: 0,
            navigations: Vec::new(),
        })
    }

    fn current(&self) -> &HistoryEntry {
        &self.entries[self.index]
    }

    /// The current URL.
    pub fn url(&self) -> &Url {
        &self.current().url
    }

    /// The current URL as a string.
    pub fn href(&self) -> String {
        self.current().url.to_string()
    }

    /// The state object of the current entry.
    pub fn state(&self) -> Value {
        self.current().state.clone()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if the history is empty (never, kept for API symmetry).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the current entry.
    pub fn index(&self) -> usize {
        self.index
    }

    /// Resolve `url` against the current URL and check same-origin.
    pub fn resolve_same_origin(&self, url: &str) -> Result<Url> {
        let target = self.url().join(url)?;
        if target.origin() != self.url().origin() {
            return Err(EnvError::CrossOrigin {
                from: self.href(),
                to: target.to_string(),
            });
        }
        Ok(target)
    }

    /// Push a new entry, truncating forward history.
    pub fn push_state(&mut self, state: Value, url: &str) -> Result<()> {
        let url = self.resolve_same_origin(url)?;
        self.entries.truncate(self.index + 1);
        self.entries.push(HistoryEntry { url, state });
        self.index += 1;
        Ok(())
    }

    /// Replace the current entry.
    pub fn replace_state(&mut self, state: Value, url: &str) -> Result<()> {
        let url = self.resolve_same_origin(url)?;
        self.entries[self.index] = HistoryEntry { url, state };
        Ok(())
    }

    /// Move by `delta` entries. Returns false if the target is out of range.
    pub fn traverse(&mut self, delta: i64) -> bool {
        let target = self.index as i64 + delta;
        if delta == 0 || target < 0 || target >= self.entries.len() as i64 {
            return false;
        }
        self.index = target as usize;
        true
    }

    /// Record a full navigation to `url` (cross-document or reload).
    pub fn navigate(&mut self, url: &str) -> Result<()> {
        let target = self.url().join(url)?;
        self.navigations.push(target.clone());
        self.entries.truncate(self.index + 1);
        self.entries.push(HistoryEntry {
            url: target,
            state: Value::Null,
        });
        self.index += 1;
        Ok(())
    }

    /// Record a reload of the current URL.
    pub fn reload(&mut self) {
        let url = self.url().clone();
        self.navigations.push(url);
    }

    /// Full navigations requested so far, oldest first.
    pub fn navigations(&self) -> &[Url] {
        &self.navigations
    }
}

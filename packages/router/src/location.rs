//! Guest-visible locations.

use serde::Serialize;
use url::Url;

use crate::error::Result;

/// The location a guest believes it is at.
///
/// `search` includes its leading `?` and `hash` its leading `#`, both empty
/// when absent, matching what a guest reads from `location`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShadowLocation {
    pub origin: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
}

impl ShadowLocation {
    /// Build from an absolute URL.
    pub fn from_url(url: &Url) -> Self {
        let search = match url.query() {
            Some(q) if !q.is_empty() => format!("?{q}"),
            _ => String::new(),
        };
        let hash = match url.fragment() {
            Some(f) if !f.is_empty() => format!("#{f}"),
            _ => String::new(),
        };
        Self {
            origin: url.origin().ascii_serialization(),
            pathname: url.path().to_string(),
            search,
            hash,
        }
    }

    /// Build from an origin and a full path such as `/x?y=1#z`.
    pub fn from_path(origin: &str, full_path: &str) -> Result<Self> {
        let base = Url::parse(origin)?;
        Ok(Self::from_url(&base.join(full_path)?))
    }

    /// Path, search and hash.
    pub fn full_path(&self) -> String {
        format!("{}{}{}", self.pathname, self.search, self.hash)
    }

    /// The absolute URL.
    pub fn href(&self) -> String {
        format!("{}{}", self.origin, self.full_path())
    }

    /// Parse [`href`](Self::href) back into a URL.
    pub fn to_url(&self) -> Result<Url> {
        Ok(Url::parse(&self.href())?)
    }

    /// Whether `other` differs from this location only in its hash.
    pub fn differs_only_in_hash(&self, other: &ShadowLocation) -> bool {
        self.origin == other.origin
            && self.pathname == other.pathname
            && self.search == other.search
            && self.hash != other.hash
    }
}

/// Snapshot handed to navigation guards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardLocation {
    pub name: String,
    pub full_path: String,
    pub href: String,
    pub origin: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
}

impl GuardLocation {
    /// Snapshot `location` for guest `name`.
    pub fn new(name: &str, location: &ShadowLocation) -> Self {
        Self {
            name: name.to_string(),
            full_path: location.full_path(),
            href: location.href(),
            origin: location.origin.clone(),
            pathname: location.pathname.clone(),
            search: location.search.clone(),
            hash: location.hash.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_full_path() {
        let loc = ShadowLocation::from_path("https://host.test", "/x?y=1#z").unwrap();
        assert_eq!(loc.pathname, "/x");
        assert_eq!(loc.search, "?y=1");
        assert_eq!(loc.hash, "#z");
        assert_eq!(loc.full_path(), "/x?y=1#z");
        assert_eq!(loc.href(), "https://host.test/x?y=1#z");
    }

    #[test]
    fn empty_parts_are_empty_strings() {
        let loc = ShadowLocation::from_path("https://host.test", "/only").unwrap();
        assert_eq!(loc.search, "");
        assert_eq!(loc.hash, "");
    }

    #[test]
    fn hash_only_difference() {
        let a = ShadowLocation::from_path("https://host.test", "/p#one").unwrap();
        let b = ShadowLocation::from_path("https://host.test", "/p#two").unwrap();
        let c = ShadowLocation::from_path("https://host.test", "/q#two").unwrap();
        assert!(a.differs_only_in_hash(&b));
        assert!(!a.differs_only_in_hash(&c));
        assert!(!a.differs_only_in_hash(&a));
    }

    #[test]
    fn guard_location_snapshots_fields() {
        let loc = ShadowLocation::from_path("https://host.test", "/a?b#c").unwrap();
        let guard = GuardLocation::new("app", &loc);
        assert_eq!(guard.full_path, "/a?b#c");
        assert_eq!(guard.name, "app");
    }
}

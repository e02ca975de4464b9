//! The history and location surface handed to one guest.

use std::rc::Rc;

use cohost_env::Value;

use crate::error::Result;
use crate::location::ShadowLocation;
use crate::router::{HistoryMode, NavigationKind, VirtualRouter};

/// A guest's view of `history` and `location`, backed by its shadow route.
#[derive(Debug, Clone)]
pub struct GuestHistory {
    router: Rc<VirtualRouter>,
    name: String,
}

impl GuestHistory {
    pub fn new(router: Rc<VirtualRouter>, name: &str) -> Self {
        Self {
            router,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// The guest's current location, if its route state is initialized.
    pub fn location(&self) -> Option<ShadowLocation> {
        self.router.location(&self.name)
    }

    pub fn state(&self) -> Value {
        self.router.state(&self.name)
    }

    pub fn push_state(&self, state: Value, url: Option<&str>) -> Result<()> {
        self.router.guest_push_state(&self.name, state, url)
    }

    pub fn replace_state(&self, state: Value, url: Option<&str>) -> Result<()> {
        self.router.guest_replace_state(&self.name, state, url)
    }

    /// `location.assign(url)`, also used for `location.href = url`.
    pub fn assign(&self, url: &str) -> Result<NavigationKind> {
        self.router.guest_navigate(&self.name, url, HistoryMode::Push)
    }

    /// `location.replace(url)`.
    pub fn replace(&self, url: &str) -> Result<NavigationKind> {
        self.router.guest_navigate(&self.name, url, HistoryMode::Replace)
    }

    /// `location.hash = hash`.
    pub fn set_hash(&self, hash: &str) -> Result<NavigationKind> {
        self.assign(&format!("#{}", hash.trim_start_matches('#')))
    }

    pub fn reload(&self) {
        self.router.guest_reload(&self.name);
    }

    pub fn go(&self, delta: i64) {
        self.router.go(delta);
    }

    pub fn back(&self) {
        self.router.back();
    }

    pub fn forward(&self) {
        self.router.forward();
    }
}

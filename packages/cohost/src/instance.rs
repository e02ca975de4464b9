//! Per-guest instance data.

use std::cell::Cell;
use std::fmt;
use std::rc::Rc;

use cohost_env::NodeId;
use cohost_sandbox::GlobalScopeSandbox;
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

/// Lifecycle state of an [`AppInstance`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AppState {
    Created,
    Loading,
    LoadFailed,
    Loaded,
    BeforeMount,
    Mounting,
    Mounted,
    Unmount,
}

impl AppState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppState::Created => "created",
            AppState::Loading => "loading",
            AppState::LoadFailed => "load-failed",
            AppState::Loaded => "loaded",
            AppState::BeforeMount => "before-mount",
            AppState::Mounting => "mounting",
            AppState::Mounted => "mounted",
            AppState::Unmount => "unmount",
        }
    }

    /// Whether sources are available.
    pub fn has_source(&self) -> bool {
        !matches!(self, AppState::Created | AppState::Loading | AppState::LoadFailed)
    }
}

impl fmt::Display for AppState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keep-alive overlay while mounted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeepAliveState {
    Show,
    Hidden,
}

/// Unique identifier of one instance. A name reused after destroy gets a
/// new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceId(Uuid);

impl InstanceId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One guest under host control.
///
/// The container is borrowed: the instance remembers which node it renders
/// into but never owns it.
pub struct AppInstance {
    id: InstanceId,
    name: String,
    url: Url,
    state: Cell<AppState>,
    keep_alive_state: Cell<Option<KeepAliveState>>,
    container: Cell<Option<NodeId>>,
    is_prefetch: Cell<bool>,
    is_prerender: Cell<bool>,
    use_virtual_router: Cell<bool>,
    umd_mode: Cell<bool>,
    sandbox: Option<Rc<GlobalScopeSandbox>>,
}

impl AppInstance {
    pub fn new(name: &str, url: Url, sandbox: Option<Rc<GlobalScopeSandbox>>) -> Self {
        Self {
            id: InstanceId::new(),
            name: name.to_string(),
            url,
            state: Cell::new(AppState::Created),
            keep_alive_state: Cell::new(None),
            container: Cell::new(None),
            is_prefetch: Cell::new(false),
            is_prerender: Cell::new(false),
            use_virtual_router: Cell::new(false),
            umd_mode: Cell::new(false),
            sandbox,
        }
    }

    pub fn id(&self) -> InstanceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn state(&self) -> AppState {
        self.state.get()
    }

    pub(crate) fn set_state(&self, state: AppState) {
        self.state.set(state);
    }

    pub fn keep_alive_state(&self) -> Option<KeepAliveState> {
        self.keep_alive_state.get()
    }

    pub(crate) fn set_keep_alive_state(&self, state: Option<KeepAliveState>) {
        self.keep_alive_state.set(state);
    }

    pub fn is_hidden(&self) -> bool {
        self.keep_alive_state.get() == Some(KeepAliveState::Hidden)
    }

    pub fn container(&self) -> Option<NodeId> {
        self.container.get()
    }

    pub(crate) fn set_container(&self, container: Option<NodeId>) {
        self.container.set(container);
    }

    pub fn is_prefetch(&self) -> bool {
        self.is_prefetch.get()
    }

    pub(crate) fn set_prefetch(&self, on: bool) {
        self.is_prefetch.set(on);
    }

    pub fn is_prerender(&self) -> bool {
        self.is_prerender.get()
    }

    pub(crate) fn set_prerender(&self, on: bool) {
        self.is_prerender.set(on);
    }

    pub fn use_sandbox(&self) -> bool {
        self.sandbox.is_some()
    }

    pub fn use_virtual_router(&self) -> bool {
        self.use_virtual_router.get()
    }

    pub(crate) fn set_use_virtual_router(&self, on: bool) {
        self.use_virtual_router.set(on);
    }

    pub fn umd_mode(&self) -> bool {
        self.umd_mode.get()
    }

    pub(crate) fn set_umd_mode(&self, on: bool) {
        self.umd_mode.set(on);
    }

    pub fn sandbox(&self) -> Option<&Rc<GlobalScopeSandbox>> {
        self.sandbox.as_ref()
    }
}

impl fmt::Debug for AppInstance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppInstance")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("url", &self.url.as_str())
            .field("state", &self.state.get())
            .field("keep_alive_state", &self.keep_alive_state.get())
            .field("umd_mode", &self.umd_mode.get())
            .finish()
    }
}

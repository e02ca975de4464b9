//! The per-guest global scope sandbox.
//!
//! A [`GlobalScopeSandbox`] gives one guest a private global record layered
//! over the shared window:
//!
//! - reads fall through to the shared window unless the key is private
//!   (present locally, internal, or a scope property)
//! - writes land on the private record; the first write to a key the shared
//!   window owns copies that key's descriptor first
//! - escape properties are additionally mirrored onto the shared window
//!
//! Every key created during an activation is recorded so [`stop`] can remove
//! exactly those keys again.
//!
//! [`stop`]: GlobalScopeSandbox::stop

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use cohost_env::{Function, GlobalObject, PropertyDescriptor, Value};
use cohost_router::{GuestHistory, RouteInit};
use tracing::{debug, warn};
use url::Url;

use crate::document::{DocumentEvents, DocumentMode, IsolatedDocumentView, NestedContextDocument, ScopedDocument};
use crate::effect::{EffectTracker, ReleaseOptions};
use crate::error::Result;
use crate::realm::SandboxRealm;
use crate::request::RequestPatch;

/// Keys that only ever resolve against the private record.
pub const STATIC_SCOPE_PROPERTIES: &[&str] = &["webpackJsonp", "Vue", "onpopstate", "onhashchange"];

/// Keys mirrored to the shared window when it does not already have them.
pub const STATIC_ESCAPE_PROPERTIES: &[&str] = &["System", "__cjsWrapper"];

/// Keys with this prefix always resolve privately.
pub const INTERNAL_PREFIX: &str = "__MICRO_APP_";

pub const ENVIRONMENT_KEY: &str = "__MICRO_APP_ENVIRONMENT__";
pub const NAME_KEY: &str = "__MICRO_APP_NAME__";
pub const PUBLIC_PATH_KEY: &str = "__MICRO_APP_PUBLIC_PATH__";
pub const BASE_ROUTE_KEY: &str = "__MICRO_APP_BASE_ROUTE__";
pub const UMD_MODE_KEY: &str = "__MICRO_APP_UMD_MODE__";
pub const BASE_APPLICATION_KEY: &str = "__MICRO_APP_BASE_APPLICATION__";

/// Cross-app data listeners kept alongside effects.
pub trait DataChannelHooks {
    /// Remember the listeners `app` holds now.
    fn record(&self, app: &str);
    /// Re-register what the last `record` remembered.
    fn rebuild(&self, app: &str);
    /// Unbind every listener `app` owns, dropping its cached data too when
    /// `clear_data` is set.
    fn release(&self, app: &str, clear_data: bool);
}

/// Construction options.
#[derive(Debug, Clone)]
pub struct SandboxOptions {
    /// Keys that never fall through to the shared window.
    pub scope_properties: Vec<String>,
    /// Keys whose writes go to the shared window as well.
    pub escape_properties: Vec<String>,
    pub document_mode: DocumentMode,
}

impl Default for SandboxOptions {
    fn default() -> Self {
        Self {
            scope_properties: Vec::new(),
            escape_properties: Vec::new(),
            document_mode: DocumentMode::Scoped,
        }
    }
}

/// Arguments to [`GlobalScopeSandbox::start`].
#[derive(Debug, Clone, Default)]
pub struct StartParams {
    /// The guest exposes mount/unmount hooks; globals survive a stop.
    pub umd_mode: bool,
    /// Published to the guest as its base route.
    pub base_route: Option<String>,
    /// Give the guest a route slot in the shared URL.
    pub use_virtual_router: bool,
    /// Initial guest path when the shared URL carries none.
    pub default_page: Option<String>,
    /// Skip installing the scoped network functions.
    pub disable_patch_request: bool,
    /// Keep the guest's route out of the shared URL.
    pub prerender: bool,
}

/// Arguments to [`GlobalScopeSandbox::stop`].
#[derive(Debug, Clone, Copy, Default)]
pub struct StopParams {
    /// Keep injected and escaped globals for the next activation.
    pub umd_mode: bool,
    /// Leave the guest's slot in the shared URL.
    pub keep_route_state: bool,
    /// Close event sources the guest opened.
    pub clear_event_source: bool,
    /// Drop data cached for the guest on the data channel.
    pub clear_data: bool,
    /// Clear the guest's timers. Listeners are always unbound.
    pub clear_timers: bool,
    /// Last stop of this sandbox. Overrides `umd_mode` and drops the route.
    pub destroy: bool,
}

/// One guest's isolated global scope. Reads fall through to the shared
/// window unless scoped; writes land locally unless escaped. Side effects
/// are tracked so a stop can undo them.
pub struct GlobalScopeSandbox {
    name: String,
    url: Url,
    realm: Rc<SandboxRealm>,
    local: RefCell<GlobalObject>,
    scope_properties: BTreeSet<String>,
    escape_properties: BTreeSet<String>,
    injected_keys: RefCell<BTreeSet<String>>,
    escape_keys: RefCell<BTreeSet<String>>,
    bound: RefCell<BTreeMap<usize, (Function, Function)>>,
    document: Rc<dyn IsolatedDocumentView>,
    effects: EffectTracker,
    request: RequestPatch,
    active: Cell<bool>,
    use_virtual_router: Cell<bool>,
    data_hooks: RefCell<Option<Rc<dyn DataChannelHooks>>>,
}

impl GlobalScopeSandbox {
    pub fn new(realm: Rc<SandboxRealm>, name: &str, url: Url, opts: SandboxOptions) -> Result<Self> {
        let env = realm.env();
        let (document, events): (Rc<dyn IsolatedDocumentView>, Rc<dyn DocumentEvents>) = match opts.document_mode {
            DocumentMode::Scoped => {
                let doc = Rc::new(ScopedDocument::new(Rc::clone(env), name));
                (doc.clone(), doc)
            }
            DocumentMode::NestedContext => {
                let doc = Rc::new(NestedContextDocument::new(Rc::clone(env), name));
                (doc.clone(), doc)
            }
        };
        let effects = EffectTracker::new(Rc::clone(env), name, Rc::clone(realm.clicks()), events);
        let request = RequestPatch::new(env.cache().clone(), url.clone());

        let mut local = GlobalObject::new();
        local.set(ENVIRONMENT_KEY, Value::from(true))?;
        local.set(NAME_KEY, Value::from(name))?;
        local.set(PUBLIC_PATH_KEY, Value::from(url.join("./")?.to_string()))?;

        let scope_properties = STATIC_SCOPE_PROPERTIES
            .iter()
            .map(|s| s.to_string())
            .chain(opts.scope_properties)
            .collect();

        Ok(Self {
            name: name.to_string(),
            url,
            realm,
            local: RefCell::new(local),
            scope_properties,
            escape_properties: opts.escape_properties.into_iter().collect(),
            injected_keys: RefCell::new(BTreeSet::new()),
            escape_keys: RefCell::new(BTreeSet::new()),
            bound: RefCell::new(BTreeMap::new()),
            document,
            effects,
            request,
            active: Cell::new(false),
            use_virtual_router: Cell::new(false),
            data_hooks: RefCell::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn realm(&self) -> &Rc<SandboxRealm> {
        &self.realm
    }

    pub fn document(&self) -> &Rc<dyn IsolatedDocumentView> {
        &self.document
    }

    pub fn effects(&self) -> &EffectTracker {
        &self.effects
    }

    pub fn request(&self) -> &RequestPatch {
        &self.request
    }

    /// The guest's `history`/`location`.
    pub fn history(&self) -> GuestHistory {
        GuestHistory::new(Rc::clone(self.realm.router()), &self.name)
    }

    pub fn is_active(&self) -> bool {
        self.active.get()
    }

    pub fn set_data_hooks(&self, hooks: Rc<dyn DataChannelHooks>) {
        *self.data_hooks.borrow_mut() = Some(hooks);
    }

    /// Keys created on the private record during this activation.
    pub fn injected_keys(&self) -> Vec<String> {
        self.injected_keys.borrow().iter().cloned().collect()
    }

    /// Keys created on the shared window during this activation.
    pub fn escape_keys(&self) -> Vec<String> {
        self.escape_keys.borrow().iter().cloned().collect()
    }

    /// Mark the guest as exposing mount hooks.
    pub fn set_umd_mode(&self, umd: bool) -> Result<()> {
        self.local.borrow_mut().set(UMD_MODE_KEY, Value::from(umd))?;
        Ok(())
    }

    fn resolves_privately(&self, key: &str) -> bool {
        key.starts_with(INTERNAL_PREFIX) || self.scope_properties.contains(key)
    }

    fn bind_to_shared(&self, f: &Function) -> Function {
        if f.is_constructor() || f.is_bound() {
            return f.clone();
        }
        let id = f.identity();
        if let Some((_, bound)) = self.bound.borrow().get(&id) {
            return bound.clone();
        }
        let bound = f.bind("window");
        self.bound.borrow_mut().insert(id, (f.clone(), bound.clone()));
        bound
    }

    // ---- interception ----

    /// Read a global as the guest sees it.
    pub fn get(&self, key: &str) -> Value {
        {
            let local = self.local.borrow();
            if local.has_own(key) || self.resolves_privately(key) {
                return local.get(key).unwrap_or_default();
            }
        }
        let shared = self.realm.env().window().get(key);
        match shared {
            Some(Value::Function(f)) => Value::Function(self.bind_to_shared(&f)),
            Some(v) => v,
            None => Value::Undefined,
        }
    }

    /// Assign a global as the guest.
    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        let env = self.realm.env();
        let scoped = self.scope_properties.contains(key);
        {
            let mut local = self.local.borrow_mut();
            let shared_desc = if scoped || local.has_own(key) {
                None
            } else {
                env.window().get_own_property(key).cloned()
            };
            match shared_desc {
                Some(desc) => {
                    local.define_property(key, desc.with_value(value.clone()))?;
                    self.injected_keys.borrow_mut().insert(key.to_string());
                }
                None => {
                    let is_new = !local.has_own(key);
                    local.set(key, value.clone())?;
                    if is_new {
                        self.injected_keys.borrow_mut().insert(key.to_string());
                    }
                }
            }
        }
        let escapes = self.escape_properties.contains(key)
            || (STATIC_ESCAPE_PROPERTIES.contains(&key) && !env.window().has_own(key));
        if escapes && !scoped {
            let mut window = env.window_mut();
            if !window.has_own(key) {
                self.escape_keys.borrow_mut().insert(key.to_string());
            }
            window.set(key, value)?;
        }
        Ok(())
    }

    /// `key in window` as the guest sees it.
    pub fn has(&self, key: &str) -> bool {
        let local = self.local.borrow();
        if self.resolves_privately(key) {
            return local.has_own(key);
        }
        local.has_own(key) || self.realm.env().window().has_own(key)
    }

    /// `delete window[key]`. Only private keys can be deleted.
    pub fn delete(&self, key: &str) -> Result<bool> {
        if !self.local.borrow().has_own(key) {
            return Ok(true);
        }
        self.injected_keys.borrow_mut().remove(key);
        if self.escape_keys.borrow_mut().remove(key) {
            self.realm.env().window_mut().delete(key)?;
        }
        Ok(self.local.borrow_mut().delete(key)?)
    }

    /// `Object.defineProperty(window, key, desc)`.
    pub fn define_property(&self, key: &str, desc: PropertyDescriptor) -> Result<()> {
        if !self.scope_properties.contains(key) && self.escape_properties.contains(key) {
            let mut window = self.realm.env().window_mut();
            if !window.has_own(key) {
                self.escape_keys.borrow_mut().insert(key.to_string());
            }
            window.define_property(key, desc)?;
            return Ok(());
        }
        let mut local = self.local.borrow_mut();
        let is_new = !local.has_own(key);
        local.define_property(key, desc)?;
        if is_new {
            self.injected_keys.borrow_mut().insert(key.to_string());
        }
        Ok(())
    }

    /// `Object.getOwnPropertyDescriptor(window, key)`.
    pub fn get_own_property(&self, key: &str) -> Option<PropertyDescriptor> {
        if let Some(desc) = self.local.borrow().get_own_property(key) {
            return Some(desc.clone());
        }
        if self.resolves_privately(key) {
            return None;
        }
        self.realm.env().window().get_own_property(key).cloned()
    }

    /// `Object.keys(window)`: private keys plus shared keys that are not
    /// private-only.
    pub fn own_keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<String> = self.local.borrow().own_keys().into_iter().collect();
        for key in self.realm.env().window().own_keys() {
            if !self.resolves_privately(&key) {
                keys.insert(key);
            }
        }
        keys.into_iter().collect()
    }

    // ---- activation ----

    /// Begin an activation. Returns false if already active.
    pub fn start(&self, params: StartParams) -> Result<bool> {
        if self.active.get() {
            return Ok(false);
        }
        let env = self.realm.env();
        {
            let mut local = self.local.borrow_mut();
            local.set(BASE_ROUTE_KEY, Value::from(params.base_route.clone().unwrap_or_default()))?;
            local.set(UMD_MODE_KEY, Value::from(params.umd_mode))?;
        }
        self.use_virtual_router.set(params.use_virtual_router);
        self.effects.set_use_virtual_router(params.use_virtual_router);
        if params.use_virtual_router {
            self.realm.router().init_route_state(
                &self.name,
                &self.url,
                RouteInit {
                    default_page: params.default_page.clone(),
                    prerender: params.prerender,
                },
            )?;
        }
        if !params.disable_patch_request {
            self.request.install(&mut self.local.borrow_mut())?;
        }
        env.patches().acquire(env);
        self.active.set(true);
        debug!(
            app = %self.name,
            umd = params.umd_mode,
            router = params.use_virtual_router,
            active_sandboxes = env.patches().active_count(),
            "sandbox started"
        );
        Ok(true)
    }

    /// End an activation. Returns false if not active.
    ///
    /// Unless the guest is in UMD mode (and not being destroyed), every key
    /// recorded in the injected and escape sets is removed again.
    pub fn stop(&self, params: StopParams) -> bool {
        if !self.active.get() {
            return false;
        }
        let env = self.realm.env();
        self.effects.release(ReleaseOptions {
            clear_timers: params.clear_timers,
        });
        if self.use_virtual_router.get() {
            let router = self.realm.router();
            let cleared = if params.destroy {
                router.remove_route(&self.name)
            } else {
                router.clear_route_state(&self.name, params.keep_route_state)
            };
            if let Err(e) = cleared {
                warn!(app = %self.name, error = %e, "failed to clear route state");
            }
        }
        if params.clear_event_source {
            self.request.close_event_sources();
        }
        if let Err(e) = self.request.uninstall(&mut self.local.borrow_mut()) {
            warn!(app = %self.name, error = %e, "failed to remove request globals");
        }
        let hooks = self.data_hooks.borrow().clone();
        if let Some(hooks) = hooks {
            hooks.release(&self.name, params.clear_data);
        }
        if !params.umd_mode || params.destroy {
            self.reverse_keys();
            self.effects.discard_snapshot();
        }
        env.patches().release(env);
        self.active.set(false);
        debug!(app = %self.name, destroy = params.destroy, "sandbox stopped");
        true
    }

    fn reverse_keys(&self) {
        let injected = std::mem::take(&mut *self.injected_keys.borrow_mut());
        let mut local = self.local.borrow_mut();
        for key in &injected {
            if let Err(e) = local.delete(key) {
                debug!(app = %self.name, key = %key, error = %e, "injected key kept");
            }
        }
        let escaped = std::mem::take(&mut *self.escape_keys.borrow_mut());
        let mut window = self.realm.env().window_mut();
        for key in &escaped {
            if let Err(e) = window.delete(key) {
                warn!(app = %self.name, key = %key, error = %e, "escaped key kept on shared window");
            }
        }
    }

    // ---- effects ----

    pub fn record_effect_snapshot(&self) {
        self.effects.record();
        let hooks = self.data_hooks.borrow().clone();
        if let Some(hooks) = hooks {
            hooks.record(&self.name);
        }
    }

    pub fn rebuild_effect_snapshot(&self) {
        self.effects.rebuild();
        let hooks = self.data_hooks.borrow().clone();
        if let Some(hooks) = hooks {
            hooks.rebuild(&self.name);
        }
    }

    /// Unbind listeners and data listeners without ending the activation
    /// (keep-alive hide, pre-render parking). Cached data is kept.
    pub fn release_effects(&self, clear_timers: bool) {
        self.effects.release(ReleaseOptions { clear_timers });
        let hooks = self.data_hooks.borrow().clone();
        if let Some(hooks) = hooks {
            hooks.release(&self.name, false);
        }
    }
}

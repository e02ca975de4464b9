//! The virtual router: one shadow location per guest, one real URL.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use cohost_env::{Env, Event, Listener, Value};
use tracing::{debug, warn};
use url::Url;

use crate::error::{Result, RouterError};
use crate::location::{GuardLocation, ShadowLocation};
use crate::slot::{get_micro_path, remove_micro_path, set_micro_path};

/// The guest-namespaced form of a reserved event type.
pub fn app_event_name(event_type: &str, name: &str) -> String {
    format!("{event_type}-{name}")
}

/// Navigation guard callback, invoked with `(to, from)`.
pub type GuardFn = Rc<dyn Fn(&GuardLocation, &GuardLocation)>;

/// Which guests a guard observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardScope {
    All,
    App(String),
}

impl GuardScope {
    fn matches(&self, name: &str) -> bool {
        match self {
            GuardScope::All => true,
            GuardScope::App(app) => app == name,
        }
    }
}

/// Handle returned by guard registration, used to remove the guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GuardId(u64);

struct Guard {
    id: GuardId,
    scope: GuardScope,
    f: GuardFn,
}

/// Whether a navigation adds a history entry or replaces the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryMode {
    Push,
    Replace,
}

/// What a guest location assignment turned into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NavigationKind {
    /// Target equals the current location.
    None,
    /// Only the hash changed; synthetic events were dispatched.
    Hash,
    /// Same origin, different path; the real page reloads.
    Reload,
    /// Cross-origin; the real page navigates away.
    Document,
}

/// Options for [`VirtualRouter::attach_all_to_url`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AttachOptions {
    pub include_hidden: bool,
    pub include_prerender: bool,
}

/// Options for [`VirtualRouter::init_route_state`].
#[derive(Debug, Clone, Default)]
pub struct RouteInit {
    pub default_page: Option<String>,
    pub prerender: bool,
}

#[derive(Debug, Clone)]
struct RouteEntry {
    location: ShadowLocation,
    initial_path: String,
    state: Value,
    active: bool,
    hidden: bool,
    prerender: bool,
}

/// Multiplexes every guest's shadow location into the shared browser URL.
pub struct VirtualRouter {
    env: Env,
    routes: RefCell<BTreeMap<String, RouteEntry>>,
    before: RefCell<Vec<Guard>>,
    after: RefCell<Vec<Guard>>,
    next_guard: Cell<u64>,
    default_pages: RefCell<BTreeMap<String, String>>,
    base_app_router: RefCell<Option<Value>>,
    popstate: RefCell<Option<Listener>>,
}

impl fmt::Debug for VirtualRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VirtualRouter")
            .field("routes", &self.routes.borrow().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Drop for VirtualRouter {
    fn drop(&mut self) {
        if let Some(listener) = self.popstate.get_mut().take() {
            self.env.remove_window_listener("popstate", &listener);
        }
    }
}

fn full_path_of(url: &Url) -> String {
    ShadowLocation::from_url(url).full_path()
}

impl VirtualRouter {
    /// Create the router and bind its single real `popstate` listener.
    pub fn new(env: Env) -> Rc<Self> {
        let router = Rc::new(Self {
            env,
            routes: RefCell::new(BTreeMap::new()),
            before: RefCell::new(Vec::new()),
            after: RefCell::new(Vec::new()),
            next_guard: Cell::new(1),
            default_pages: RefCell::new(BTreeMap::new()),
            base_app_router: RefCell::new(None),
            popstate: RefCell::new(None),
        });
        let weak = Rc::downgrade(&router);
        let listener = Listener::new(move |_| {
            if let Some(router) = weak.upgrade() {
                router.on_popstate();
            }
            Ok(())
        });
        router.env.add_window_listener("popstate", listener.clone());
        *router.popstate.borrow_mut() = Some(listener);
        router
    }

    /// The shared environment.
    pub fn env(&self) -> &Env {
        &self.env
    }

    fn origin(&self) -> String {
        self.env.history().url().origin().ascii_serialization()
    }

    fn entry(&self, name: &str) -> Result<RouteEntry> {
        self.routes
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| RouterError::UnknownApp(name.to_string()))
    }

    fn write_url(&self, url: &Url, mode: HistoryMode, state: Value) -> Result<()> {
        let mut history = self.env.history_mut();
        match mode {
            HistoryMode::Push => history.push_state(state, url.as_str())?,
            HistoryMode::Replace => history.replace_state(state, url.as_str())?,
        }
        Ok(())
    }

    fn replace_real_url(&self, url: &Url) -> Result<()> {
        let state = self.env.history().state();
        self.write_url(url, HistoryMode::Replace, state)
    }

    // ---- route state lifecycle ----

    /// Create (or reactivate) guest `name`'s route state.
    ///
    /// The initial path is taken from the guest's URL slot if present, then
    /// `init.default_page`, then the page set by [`set_default_page`], then
    /// the path of `app_url`. Unless pre-rendering, the location is attached
    /// to the real URL immediately.
    ///
    /// [`set_default_page`]: Self::set_default_page
    pub fn init_route_state(&self, name: &str, app_url: &Url, init: RouteInit) -> Result<ShadowLocation> {
        let origin = self.origin();
        let from_slot = get_micro_path(self.env.history().url(), name);
        let existing = self.routes.borrow().get(name).cloned();

        let initial_path = init
            .default_page
            .filter(|p| !p.is_empty())
            .or_else(|| self.get_default_page(name))
            .unwrap_or_else(|| full_path_of(app_url));

        let path = match (&from_slot, &existing) {
            (Some(path), _) => path.clone(),
            (None, Some(kept)) => kept.location.full_path(),
            (None, None) => initial_path.clone(),
        };
        let location = ShadowLocation::from_path(&origin, &path)?;
        debug!(app = name, path = %path, kept = existing.is_some(), "initializing route state");

        self.routes.borrow_mut().insert(
            name.to_string(),
            RouteEntry {
                location: location.clone(),
                initial_path,
                state: existing.map(|e| e.state).unwrap_or(Value::Null),
                active: true,
                hidden: false,
                prerender: init.prerender,
            },
        );
        if !init.prerender {
            self.attach_to_url(name)?;
        }
        Ok(location)
    }

    /// Tear down guest `name`'s route state on unmount.
    ///
    /// With `keep_route_state` the shadow location and URL slot survive and
    /// are picked up by the next [`init_route_state`](Self::init_route_state).
    pub fn clear_route_state(&self, name: &str, keep_route_state: bool) -> Result<()> {
        if keep_route_state {
            if let Some(entry) = self.routes.borrow_mut().get_mut(name) {
                entry.active = false;
            }
            return Ok(());
        }
        self.remove_route(name)
    }

    /// Drop guest `name`'s route state and URL slot entirely.
    pub fn remove_route(&self, name: &str) -> Result<()> {
        self.detach_from_url(name)?;
        self.routes.borrow_mut().remove(name);
        Ok(())
    }

    /// Mark a guest hidden (keep-alive) or shown. Hidden guests are detached
    /// from the real URL and ignore real `popstate`.
    pub fn set_hidden(&self, name: &str, hidden: bool) -> Result<()> {
        match self.routes.borrow_mut().get_mut(name) {
            Some(entry) => entry.hidden = hidden,
            None => return Err(RouterError::UnknownApp(name.to_string())),
        }
        if hidden {
            self.detach_from_url(name)
        } else {
            self.attach_to_url(name)
        }
    }

    /// Mark a guest as pre-rendering or not.
    pub fn set_prerender(&self, name: &str, prerender: bool) -> Result<()> {
        match self.routes.borrow_mut().get_mut(name) {
            Some(entry) => entry.prerender = prerender,
            None => return Err(RouterError::UnknownApp(name.to_string())),
        }
        Ok(())
    }

    /// Whether a guest has active route state.
    pub fn is_active(&self, name: &str) -> bool {
        self.routes.borrow().get(name).is_some_and(|e| e.active)
    }

    /// Whether route state exists for a guest (active or kept).
    pub fn has_route(&self, name: &str) -> bool {
        self.routes.borrow().contains_key(name)
    }

    /// The guest's shadow location.
    pub fn location(&self, name: &str) -> Option<ShadowLocation> {
        self.routes.borrow().get(name).map(|e| e.location.clone())
    }

    /// The guest's current history state.
    pub fn state(&self, name: &str) -> Value {
        self.routes
            .borrow()
            .get(name)
            .map(|e| e.state.clone())
            .unwrap_or(Value::Null)
    }

    // ---- URL attachment ----

    /// Write guest `name`'s location into the real URL without a new entry.
    pub fn attach_to_url(&self, name: &str) -> Result<()> {
        let entry = self.entry(name)?;
        let url = set_micro_path(self.env.history().url(), name, &entry.location.full_path());
        self.replace_real_url(&url)
    }

    /// Write every active guest's location into the real URL.
    pub fn attach_all_to_url(&self, opts: AttachOptions) -> Result<()> {
        let mut url = self.env.history().url().clone();
        for (name, entry) in self.routes.borrow().iter() {
            if !entry.active
                || (entry.hidden && !opts.include_hidden)
                || (entry.prerender && !opts.include_prerender)
            {
                continue;
            }
            url = set_micro_path(&url, name, &entry.location.full_path());
        }
        self.replace_real_url(&url)
    }

    /// Remove guest `name`'s slot from the real URL.
    pub fn detach_from_url(&self, name: &str) -> Result<()> {
        let current = self.env.history().url().clone();
        let url = remove_micro_path(&current, name);
        if url != current {
            self.replace_real_url(&url)?;
        }
        Ok(())
    }

    // ---- guards ----

    fn add_guard(&self, list: &RefCell<Vec<Guard>>, scope: GuardScope, f: GuardFn) -> GuardId {
        let id = GuardId(self.next_guard.get());
        self.next_guard.set(id.0 + 1);
        list.borrow_mut().push(Guard { id, scope, f });
        id
    }

    /// Register a guard run before a guest's full path changes.
    pub fn before_each(&self, scope: GuardScope, f: impl Fn(&GuardLocation, &GuardLocation) + 'static) -> GuardId {
        self.add_guard(&self.before, scope, Rc::new(f))
    }

    /// Register a guard run after a guest's full path changed.
    pub fn after_each(&self, scope: GuardScope, f: impl Fn(&GuardLocation, &GuardLocation) + 'static) -> GuardId {
        self.add_guard(&self.after, scope, Rc::new(f))
    }

    /// Remove a guard registered by either method.
    pub fn remove_guard(&self, id: GuardId) -> bool {
        for list in [&self.before, &self.after] {
            let mut guards = list.borrow_mut();
            if let Some(pos) = guards.iter().position(|g| g.id == id) {
                guards.remove(pos);
                return true;
            }
        }
        false
    }

    fn run_guards(&self, list: &RefCell<Vec<Guard>>, to: &GuardLocation, from: &GuardLocation) {
        let matching: Vec<GuardFn> = list
            .borrow()
            .iter()
            .filter(|g| g.scope.matches(&to.name))
            .map(|g| Rc::clone(&g.f))
            .collect();
        for guard in matching {
            guard(to, from);
        }
    }

    // ---- core update ----

    /// Move guest `name` to `target`, running guards if the full path
    /// changes and writing the real URL when `mode` is given.
    fn commit(&self, name: &str, target: ShadowLocation, state: Value, mode: Option<HistoryMode>) -> Result<bool> {
        let entry = self.entry(name)?;
        let changed = entry.location.full_path() != target.full_path();
        let to = GuardLocation::new(name, &target);
        let from = GuardLocation::new(name, &entry.location);

        if changed {
            self.run_guards(&self.before, &to, &from);
        }
        if let Some(e) = self.routes.borrow_mut().get_mut(name) {
            e.location = target.clone();
            e.state = state.clone();
        }
        if let Some(mode) = mode {
            if !entry.hidden {
                let url = set_micro_path(self.env.history().url(), name, &target.full_path());
                self.write_url(&url, mode, state)?;
            }
        }
        if changed {
            debug!(app = name, from = %from.full_path, to = %to.full_path, "route changed");
            self.run_guards(&self.after, &to, &from);
        }
        Ok(changed)
    }

    fn resolve(&self, name: &str, url: &str) -> Result<(ShadowLocation, Url)> {
        let entry = self.entry(name)?;
        let base = entry.location.to_url()?;
        let target = base.join(url)?;
        Ok((entry.location, target))
    }

    fn same_origin_target(&self, name: &str, url: Option<&str>) -> Result<ShadowLocation> {
        let entry = self.entry(name)?;
        let Some(url) = url else {
            return Ok(entry.location);
        };
        let (from, target) = self.resolve(name, url)?;
        if target.origin().ascii_serialization() != from.origin {
            return Err(RouterError::CrossOrigin {
                app: name.to_string(),
                from: from.href(),
                to: target.to_string(),
            });
        }
        Ok(ShadowLocation::from_url(&target))
    }

    fn dispatch_to_guest(&self, name: &str, from: &ShadowLocation, to: &ShadowLocation, state: Value) {
        self.env
            .dispatch_window_event(&Event::with_detail(app_event_name("popstate", name), state));
        if from.hash != to.hash {
            self.env
                .dispatch_window_event(&Event::new(app_event_name("hashchange", name)));
        }
    }

    // ---- guest-side interception ----

    /// Guest `history.pushState`.
    pub fn guest_push_state(&self, name: &str, state: Value, url: Option<&str>) -> Result<()> {
        let target = self.same_origin_target(name, url)?;
        self.commit(name, target, state, Some(HistoryMode::Push))?;
        Ok(())
    }

    /// Guest `history.replaceState`.
    pub fn guest_replace_state(&self, name: &str, state: Value, url: Option<&str>) -> Result<()> {
        let target = self.same_origin_target(name, url)?;
        self.commit(name, target, state, Some(HistoryMode::Replace))?;
        Ok(())
    }

    /// Guest `location.assign` / `location.replace` / `location.href = ...`.
    pub fn guest_navigate(&self, name: &str, url: &str, mode: HistoryMode) -> Result<NavigationKind> {
        let (from, target) = self.resolve(name, url)?;
        if target.origin().ascii_serialization() != from.origin {
            debug!(app = name, to = %target, "cross-origin navigation");
            self.env.history_mut().navigate(target.as_str())?;
            return Ok(NavigationKind::Document);
        }
        let to = ShadowLocation::from_url(&target);
        if from.differs_only_in_hash(&to) {
            self.commit(name, to.clone(), Value::Null, Some(mode))?;
            self.dispatch_to_guest(name, &from, &to, Value::Null);
            return Ok(NavigationKind::Hash);
        }
        if from == to && !to.hash.is_empty() {
            return Ok(NavigationKind::None);
        }
        self.commit(name, to, Value::Null, Some(mode))?;
        self.env.history_mut().reload();
        Ok(NavigationKind::Reload)
    }

    /// Guest `location.reload`.
    pub fn guest_reload(&self, name: &str) {
        debug!(app = name, "guest requested reload");
        self.env.history_mut().reload();
    }

    /// Recompute every attached guest after a real `popstate`.
    fn on_popstate(&self) {
        let origin = self.origin();
        let real = self.env.history().url().clone();
        let state = self.env.history().state();
        let attached: Vec<(String, RouteEntry)> = self
            .routes
            .borrow()
            .iter()
            .filter(|(_, e)| e.active && !e.hidden && !e.prerender)
            .map(|(n, e)| (n.clone(), e.clone()))
            .collect();

        for (name, entry) in attached {
            let path = get_micro_path(&real, &name).unwrap_or_else(|| entry.initial_path.clone());
            let target = match ShadowLocation::from_path(&origin, &path) {
                Ok(target) => target,
                Err(e) => {
                    warn!(app = %name, path = %path, error = %e, "unroutable path in url");
                    continue;
                }
            };
            if let Err(e) = self.commit(&name, target.clone(), state.clone(), None) {
                warn!(app = %name, error = %e, "popstate update failed");
                continue;
            }
            self.dispatch_to_guest(&name, &entry.location, &target, state.clone());
        }
    }

    // ---- host API ----

    /// Navigate guest `name` from the host side.
    pub fn navigate(&self, name: &str, path: &str, mode: HistoryMode) -> Result<()> {
        let entry = self.entry(name).map_err(|_| RouterError::NotActive(name.to_string()))?;
        if !entry.active || entry.hidden {
            return Err(RouterError::NotActive(name.to_string()));
        }
        let target = self.same_origin_target(name, Some(path))?;
        self.commit(name, target.clone(), Value::Null, Some(mode))?;
        self.dispatch_to_guest(name, &entry.location, &target, Value::Null);
        Ok(())
    }

    /// Host-side push.
    pub fn push(&self, name: &str, path: &str) -> Result<()> {
        self.navigate(name, path, HistoryMode::Push)
    }

    /// Host-side replace.
    pub fn replace(&self, name: &str, path: &str) -> Result<()> {
        self.navigate(name, path, HistoryMode::Replace)
    }

    /// Traverse the real history.
    pub fn go(&self, delta: i64) {
        self.env.history_go(delta);
    }

    pub fn back(&self) {
        self.go(-1);
    }

    pub fn forward(&self) {
        self.go(1);
    }

    /// Snapshot of guest `name`'s location.
    pub fn current(&self, name: &str) -> Option<GuardLocation> {
        self.location(name).map(|loc| GuardLocation::new(name, &loc))
    }

    pub fn encode(&self, path: &str) -> String {
        crate::codec::encode(path)
    }

    pub fn decode(&self, value: &str) -> String {
        crate::codec::decode(value)
    }

    /// Set the page a guest starts on when the URL carries no slot for it.
    pub fn set_default_page(&self, name: &str, path: &str) {
        self.default_pages
            .borrow_mut()
            .insert(name.to_string(), path.to_string());
    }

    pub fn get_default_page(&self, name: &str) -> Option<String> {
        self.default_pages.borrow().get(name).cloned()
    }

    pub fn remove_default_page(&self, name: &str) -> bool {
        self.default_pages.borrow_mut().remove(name).is_some()
    }

    /// Store the host's own router so guests can drive host navigation.
    pub fn set_base_app_router(&self, router: Value) {
        *self.base_app_router.borrow_mut() = Some(router);
    }

    pub fn base_app_router(&self) -> Option<Value> {
        self.base_app_router.borrow().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode;
    use cohost_env::SharedEnvironment;

    fn setup() -> Rc<VirtualRouter> {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        VirtualRouter::new(env)
    }

    fn app_url() -> Url {
        Url::parse("https://x.test/a").unwrap()
    }

    #[test]
    fn init_attaches_app_path() {
        let router = setup();
        let loc = router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        assert_eq!(loc.pathname, "/a");
        assert_eq!(loc.origin, "https://host.test");
        assert_eq!(router.env().history().url().query(), Some("app-a=%2Fa"));
    }

    #[test]
    fn init_prefers_url_slot_then_default_page() {
        let router = setup();
        router.set_default_page("a", "/home");
        let loc = router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        assert_eq!(loc.pathname, "/home");
        router.clear_route_state("a", false).unwrap();

        let url = set_micro_path(&Url::parse("https://host.test/").unwrap(), "a", "/deep");
        router
            .env()
            .history_mut()
            .replace_state(Value::Null, url.as_str())
            .unwrap();
        let loc = router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        assert_eq!(loc.pathname, "/deep");
    }

    #[test]
    fn prerender_does_not_touch_url() {
        let router = setup();
        router
            .init_route_state(
                "a",
                &app_url(),
                RouteInit {
                    prerender: true,
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(router.env().history().url().query(), None);
    }

    #[test]
    fn guest_push_state_updates_shadow_and_real_url() {
        let router = setup();
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        let before = router.env().history().len();
        router.guest_push_state("a", Value::from("s"), Some("/x?y=1#z")).unwrap();

        let loc = router.location("a").unwrap();
        assert_eq!(loc.pathname, "/x");
        assert_eq!(router.state("a"), Value::from("s"));
        let expected = format!("app-a={}", encode("/x?y=1#z"));
        assert_eq!(router.env().history().url().query(), Some(expected.as_str()));
        assert_eq!(router.env().history().len(), before + 1);
    }

    #[test]
    fn guest_cross_origin_push_state_is_rejected() {
        let router = setup();
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        let err = router
            .guest_push_state("a", Value::Null, Some("https://evil.test/"))
            .unwrap_err();
        assert!(matches!(err, RouterError::CrossOrigin { .. }));
    }

    #[test]
    fn hash_assignment_dispatches_without_reload() {
        let router = setup();
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        router.env().add_window_listener(
            "hashchange-a",
            Listener::new(move |_| {
                h.set(h.get() + 1);
                Ok(())
            }),
        );
        let kind = router.guest_navigate("a", "#section", HistoryMode::Push).unwrap();
        assert_eq!(kind, NavigationKind::Hash);
        assert_eq!(hits.get(), 1);
        assert!(router.env().history().navigations().is_empty());
    }

    #[test]
    fn path_assignment_reloads() {
        let router = setup();
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        let kind = router.guest_navigate("a", "/other", HistoryMode::Push).unwrap();
        assert_eq!(kind, NavigationKind::Reload);
        assert_eq!(router.env().history().navigations().len(), 1);
        assert_eq!(router.location("a").unwrap().pathname, "/other");
    }

    #[test]
    fn cross_origin_assignment_navigates_document() {
        let router = setup();
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        let kind = router
            .guest_navigate("a", "https://elsewhere.test/p", HistoryMode::Push)
            .unwrap();
        assert_eq!(kind, NavigationKind::Document);
        assert_eq!(
            router.env().history().navigations()[0].as_str(),
            "https://elsewhere.test/p"
        );
    }

    #[test]
    fn guards_run_in_order_and_skip_noops() {
        let router = setup();
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        router.init_route_state("b", &app_url(), RouteInit::default()).unwrap();
        let log = Rc::new(RefCell::new(Vec::new()));
        let l = Rc::clone(&log);
        router.before_each(GuardScope::All, move |to, _| l.borrow_mut().push(format!("all:{}", to.name)));
        let l = Rc::clone(&log);
        router.before_each(GuardScope::App("a".into()), move |to, from| {
            l.borrow_mut().push(format!("a:{}->{}", from.full_path, to.full_path))
        });

        router.guest_push_state("a", Value::Null, Some("/next")).unwrap();
        assert_eq!(*log.borrow(), vec!["all:a".to_string(), "a:/a->/next".to_string()]);

        router.guest_push_state("a", Value::Null, Some("/next")).unwrap();
        assert_eq!(log.borrow().len(), 2);

        router.guest_push_state("b", Value::Null, Some("/b2")).unwrap();
        assert_eq!(log.borrow().len(), 3);
    }

    #[test]
    fn removed_guard_no_longer_runs() {
        let router = setup();
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let id = router.after_each(GuardScope::All, move |_, _| h.set(h.get() + 1));
        assert!(router.remove_guard(id));
        router.guest_push_state("a", Value::Null, Some("/n")).unwrap();
        assert_eq!(hits.get(), 0);
    }

    #[test]
    fn popstate_restores_previous_guest_path() {
        let router = setup();
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        router.guest_push_state("a", Value::Null, Some("/one")).unwrap();
        router.guest_push_state("a", Value::Null, Some("/two#h")).unwrap();
        let events = Rc::new(RefCell::new(Vec::new()));
        for ty in ["popstate-a", "hashchange-a"] {
            let e = Rc::clone(&events);
            router.env().add_window_listener(
                ty,
                Listener::new(move |ev| {
                    e.borrow_mut().push(ev.event_type.clone());
                    Ok(())
                }),
            );
        }
        router.back();
        router.env().event_loop().run_until_idle();
        assert_eq!(router.location("a").unwrap().full_path(), "/one");
        assert_eq!(*events.borrow(), vec!["popstate-a", "hashchange-a"]);
    }

    #[test]
    fn hidden_guest_ignores_popstate_and_leaves_url() {
        let router = setup();
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        router.guest_push_state("a", Value::Null, Some("/one")).unwrap();
        router.guest_push_state("a", Value::Null, Some("/two")).unwrap();
        router.set_hidden("a", true).unwrap();
        assert_eq!(router.env().history().url().query(), None);
        router.back();
        router.env().event_loop().run_until_idle();
        assert_eq!(router.location("a").unwrap().pathname, "/two");

        router.set_hidden("a", false).unwrap();
        let expected = format!("app-a={}", encode("/two"));
        assert_eq!(router.env().history().url().query(), Some(expected.as_str()));
    }

    #[test]
    fn host_navigate_requires_active_guest() {
        let router = setup();
        assert!(matches!(router.push("a", "/x"), Err(RouterError::NotActive(_))));
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        let fired = Rc::new(Cell::new(false));
        let f = Rc::clone(&fired);
        router.env().add_window_listener(
            "popstate-a",
            Listener::new(move |_| {
                f.set(true);
                Ok(())
            }),
        );
        router.push("a", "/x").unwrap();
        assert!(fired.get());
        assert_eq!(router.current("a").unwrap().full_path, "/x");
    }

    #[test]
    fn keep_route_state_survives_unmount() {
        let router = setup();
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        router.guest_push_state("a", Value::Null, Some("/kept")).unwrap();
        router.clear_route_state("a", true).unwrap();
        assert!(!router.is_active("a"));
        assert!(router.has_route("a"));
        let loc = router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        assert_eq!(loc.pathname, "/kept");

        router.clear_route_state("a", false).unwrap();
        assert!(!router.has_route("a"));
        assert_eq!(router.env().history().url().query(), None);
    }

    #[test]
    fn attach_all_filters_hidden_and_prerender() {
        let router = setup();
        router.init_route_state("a", &app_url(), RouteInit::default()).unwrap();
        router
            .init_route_state(
                "p",
                &app_url(),
                RouteInit {
                    prerender: true,
                    ..Default::default()
                },
            )
            .unwrap();
        router.set_hidden("a", true).unwrap();
        router.attach_all_to_url(AttachOptions::default()).unwrap();
        assert_eq!(router.env().history().url().query(), None);
        router
            .attach_all_to_url(AttachOptions {
                include_hidden: true,
                include_prerender: true,
            })
            .unwrap();
        let query = router.env().history().url().query().unwrap().to_string();
        assert!(query.contains("app-a=") && query.contains("app-p="));
    }

    #[test]
    fn default_pages_and_base_router() {
        let router = setup();
        router.set_default_page("a", "/d");
        assert_eq!(router.get_default_page("a").as_deref(), Some("/d"));
        assert!(router.remove_default_page("a"));
        assert!(!router.remove_default_page("a"));
        assert!(router.base_app_router().is_none());
        router.set_base_app_router(Value::from("host-router"));
        assert_eq!(router.base_app_router(), Some(Value::from("host-router")));
    }
}

//! One guest's life: load, mount, keep-alive, pre-render, unmount, destroy.
//!
//! Work that continues on a later macrotask (load completion, fiber script
//! chains, the `mounted` dispatch) captures the controller's mount epoch.
//! Every mount and unmount bumps the epoch, so a continuation that outlives
//! its mount finds a different epoch and does nothing.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use cohost_env::{Event, Function, NodeId, NodeSpec, Object, Value};
use cohost_router::app_event_name;
use cohost_sandbox::{
    GlobalScopeSandbox, IsolatedDocumentView, SandboxOptions, ScopedDocument, StartParams, StopParams, BODY_TAG,
    HEAD_TAG,
};
use tracing::{debug, error, info, warn};

use crate::config::{AppConfig, TeardownPath};
use crate::css::scope_prefix;
use crate::error::{Error, Result};
use crate::events::{dispatch_app_state, dispatch_lifecycle, LifecycleEvent};
use crate::instance::{AppInstance, AppState, KeepAliveState};
use crate::loader::{LoadCallback, LoadError, LoadRequest, ScriptRecord, SourceBundle};
use crate::runtime::Runtime;
use crate::scope::{ExecutionFlags, GuestScope};

/// Guests expose their `mount`/`unmount` pair on the global
/// `<prefix><name>`.
pub const UMD_LIBRARY_PREFIX: &str = "micro-app-";

/// Arguments to [`AppLifecycleController::mount`].
#[derive(Debug, Clone)]
pub struct MountParams {
    /// Node the guest body is rendered into.
    pub container: NodeId,
    /// Run scripts as inline script elements.
    pub inline: bool,
    pub use_virtual_router: bool,
    /// Initial guest path when the shared URL carries none.
    pub default_page: Option<String>,
    /// Path prefix the guest's router is mounted under.
    pub base_route: Option<String>,
    /// Leave the host's network functions unscoped.
    pub disable_patch_request: bool,
    /// Yield a macrotask between scripts.
    pub fiber: bool,
    pub esmodule: bool,
}

impl MountParams {
    pub fn from_config(config: &AppConfig, container: NodeId) -> Self {
        Self {
            container,
            inline: config.inline,
            use_virtual_router: config.use_virtual_router,
            default_page: config.default_page.clone(),
            base_route: config.base_route.clone(),
            disable_patch_request: config.disable_patch_request,
            fiber: config.fiber,
            esmodule: config.esmodule,
        }
    }

    fn flags(&self) -> ExecutionFlags {
        ExecutionFlags {
            inline: self.inline,
            fiber: self.fiber,
            esmodule: self.esmodule,
        }
    }
}

/// Arguments to [`AppLifecycleController::unmount`].
#[derive(Default)]
pub struct UnmountParams {
    /// Also drop the instance from the registry.
    pub destroy: bool,
    /// Drop data the host sent to the guest.
    pub clear_data: bool,
    /// Keep the guest's slot in the shared URL.
    pub keep_route_state: bool,
    /// Runs once the teardown is finished.
    pub callback: Option<Box<dyn FnOnce()>>,
}

#[derive(Clone)]
struct UmdHooks {
    mount: Function,
    unmount: Function,
}

type Waiter = Box<dyn FnOnce(bool)>;

/// Drives one guest instance through load, mount, keep-alive and unmount.
/// Continuations from a superseded mount are dropped by epoch.
pub struct AppLifecycleController {
    this: Weak<AppLifecycleController>,
    runtime: Rc<Runtime>,
    config: AppConfig,
    instance: AppInstance,
    document: Rc<dyn IsolatedDocumentView>,
    source: RefCell<Option<Rc<SourceBundle>>>,
    template: Cell<Option<NodeId>>,
    pending_mount: RefCell<Option<MountParams>>,
    keep_alive_holder: Cell<Option<NodeId>>,
    umd_hooks: RefCell<Option<UmdHooks>>,
    deferred_events: RefCell<Vec<LifecycleEvent>>,
    waiters: RefCell<Vec<Waiter>>,
    epoch: Cell<u64>,
    destroyed: Cell<bool>,
}

impl fmt::Debug for AppLifecycleController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppLifecycleController")
            .field("name", &self.config.name)
            .field("id", &self.instance.id().to_string())
            .field("state", &self.instance.state())
            .field("keep_alive", &self.instance.keep_alive_state())
            .finish()
    }
}

impl AppLifecycleController {
    pub(crate) fn new(runtime: Rc<Runtime>, config: AppConfig, prefetch: bool, prerender: bool) -> Result<Rc<Self>> {
        let env = Rc::clone(&runtime.env);
        let sandbox = if config.use_sandbox {
            let sandbox = GlobalScopeSandbox::new(
                Rc::clone(&runtime.realm),
                &config.name,
                config.url.clone(),
                SandboxOptions {
                    document_mode: config.document_mode,
                    ..Default::default()
                },
            )?;
            sandbox.set_data_hooks(runtime.data.clone());
            Some(Rc::new(sandbox))
        } else {
            None
        };
        let document: Rc<dyn IsolatedDocumentView> = match &sandbox {
            Some(sandbox) => Rc::clone(sandbox.document()),
            None => Rc::new(ScopedDocument::new(env, &config.name)),
        };
        let instance = AppInstance::new(&config.name, config.url.clone(), sandbox);
        instance.set_prefetch(prefetch);
        instance.set_prerender(prerender);
        instance.set_use_virtual_router(config.use_virtual_router);

        Ok(Rc::new_cyclic(|this| Self {
            this: this.clone(),
            runtime,
            config,
            instance,
            document,
            source: RefCell::new(None),
            template: Cell::new(None),
            pending_mount: RefCell::new(None),
            keep_alive_holder: Cell::new(None),
            umd_hooks: RefCell::new(None),
            deferred_events: RefCell::new(Vec::new()),
            waiters: RefCell::new(Vec::new()),
            epoch: Cell::new(0),
            destroyed: Cell::new(false),
        }))
    }

    // ---- accessors ----

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn instance(&self) -> &AppInstance {
        &self.instance
    }

    pub fn get_app_state(&self) -> AppState {
        self.instance.state()
    }

    pub fn get_keep_alive_state(&self) -> Option<KeepAliveState> {
        self.instance.keep_alive_state()
    }

    pub fn sandbox(&self) -> Option<&Rc<GlobalScopeSandbox>> {
        self.instance.sandbox()
    }

    pub fn document(&self) -> &Rc<dyn IsolatedDocumentView> {
        &self.document
    }

    pub fn container(&self) -> Option<NodeId> {
        self.instance.container()
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed.get()
    }

    /// Call `f(true)` once the guest is visibly mounted, or `f(false)` if it
    /// fails to load or is unmounted first.
    pub fn when_mounted(&self, f: impl FnOnce(bool) + 'static) {
        match self.instance.state() {
            AppState::Mounted if !self.instance.is_prerender() && !self.instance.is_hidden() => f(true),
            AppState::LoadFailed => f(false),
            _ => self.waiters.borrow_mut().push(Box::new(f)),
        }
    }

    fn notify_waiters(&self, mounted: bool) {
        let waiters = std::mem::take(&mut *self.waiters.borrow_mut());
        for waiter in waiters {
            waiter(mounted);
        }
    }

    fn bump_epoch(&self) -> u64 {
        let epoch = self.epoch.get() + 1;
        self.epoch.set(epoch);
        epoch
    }

    fn is_current(&self, epoch: u64) -> bool {
        self.epoch.get() == epoch && !self.destroyed.get() && self.instance.state() != AppState::Unmount
    }

    fn dispatch(&self, event: LifecycleEvent) {
        if self.instance.is_prerender() && matches!(event, LifecycleEvent::BeforeMount | LifecycleEvent::Mounted) {
            self.deferred_events.borrow_mut().push(event);
            return;
        }
        self.dispatch_now(event, None);
    }

    fn dispatch_now(&self, event: LifecycleEvent, error: Option<&str>) {
        let lifecycles = self.runtime.options.borrow().lifecycles.clone();
        dispatch_lifecycle(
            &self.runtime.env,
            &lifecycles,
            self.name(),
            self.instance.container(),
            event,
            error,
        );
    }

    fn global(&self, key: &str) -> Value {
        match self.instance.sandbox() {
            Some(sandbox) => sandbox.get(key),
            None => self.runtime.env.window().get(key).unwrap_or_default(),
        }
    }

    fn call_hook(&self, hook: &str, f: &Function, args: &[Value]) -> Option<Value> {
        let result = {
            let _current = self.runtime.env.current_app().enter(self.name());
            f.call(args)
        };
        match result {
            Ok(value) => Some(value),
            Err(thrown) => {
                error!(app = %self.name(), hook = hook, error = %Error::hook(self.name(), hook, &thrown), "guest hook threw");
                None
            }
        }
    }

    /// Invoke the guest's `onmount`/`onunmount` global if it assigned one.
    fn call_window_hook(&self, key: &str) {
        if let Value::Function(f) = self.global(key) {
            let detail = Object::new();
            detail.set("name", self.name());
            self.call_hook(key, &f, &[Value::Object(detail)]);
        }
    }

    // ---- loading ----

    /// Dispatch `created` and start loading sources.
    pub(crate) fn begin(&self, container: Option<NodeId>) {
        self.instance.set_container(container);
        self.dispatch_now(LifecycleEvent::Created, None);
        self.load_source_code();
    }

    /// Request sources. Completion always arrives on a later macrotask.
    pub fn load_source_code(&self) {
        self.instance.set_state(AppState::Loading);
        let this = self.this.clone();
        if let Some(bundle) = self.runtime.sources.get(&self.config.url) {
            debug!(app = %self.name(), "using cached sources");
            self.runtime.env.event_loop().queue_task(move || {
                if let Some(app) = this.upgrade() {
                    app.on_load(bundle);
                }
            });
            return;
        }
        let request = LoadRequest {
            app: self.name().to_string(),
            url: self.config.url.clone(),
        };
        let done = LoadCallback::new(Rc::clone(&self.runtime.env), move |outcome| {
            let Some(app) = this.upgrade() else {
                return;
            };
            match outcome {
                Ok(bundle) => {
                    let bundle = Rc::new(bundle);
                    app.runtime.sources.insert(&app.config.url, Rc::clone(&bundle));
                    app.on_load(bundle);
                }
                Err(e) => app.on_load_error(e),
            }
        });
        self.runtime.loader.load(request, done);
    }

    fn on_load(&self, bundle: Rc<SourceBundle>) {
        if self.destroyed.get() {
            return;
        }
        self.runtime.sources.cache_inline(self.name(), &bundle);
        self.template.set(Some(self.build_template(&bundle)));
        *self.source.borrow_mut() = Some(bundle);

        if self.instance.state() == AppState::Unmount {
            debug!(app = %self.name(), "loaded after unmount");
            return;
        }
        self.instance.set_state(AppState::Loaded);
        info!(app = %self.name(), "sources loaded");

        let pending = self.pending_mount.borrow_mut().take();
        if let Some(params) = pending {
            self.mount(params);
        } else if self.instance.is_prefetch() && self.instance.is_prerender() {
            self.prerender_mount();
        }
    }

    fn on_load_error(&self, e: LoadError) {
        if self.destroyed.get() {
            return;
        }
        let e = Error::Load {
            app: self.name().to_string(),
            source: e,
        };
        error!(app = %self.name(), error = %e, "load failed");
        self.instance.set_state(AppState::LoadFailed);
        self.pending_mount.borrow_mut().take();
        self.dispatch_now(LifecycleEvent::Error, Some(&e.to_string()));
        self.notify_waiters(false);
    }

    /// Build the pristine guest DOM: scoped styles into the head stand-in,
    /// markup into head and body stand-ins.
    fn build_template(&self, bundle: &SourceBundle) -> NodeId {
        let prefix = scope_prefix(self.name());
        let mut head = NodeSpec::element(HEAD_TAG);
        head.children = bundle.head.clone();
        for style in &bundle.styles {
            let css = if self.config.scope_css {
                self.runtime.css.scope(&style.css, &prefix)
            } else {
                style.css.clone()
            };
            head = head.child(NodeSpec::element("style").child(NodeSpec::text(&css)));
        }
        let mut body = NodeSpec::element(BODY_TAG);
        body.children = bundle.body.clone();
        let spec = NodeSpec::element("micro-app-template").child(head).child(body);
        self.runtime.env.document_mut().build(&spec)
    }

    fn render_template(&self, container: NodeId) -> Result<()> {
        let Some(template) = self.template.get() else {
            return Ok(());
        };
        let mut doc = self.runtime.env.document_mut();
        doc.clear_children(container)?;
        let copy = doc.clone_subtree(template)?;
        doc.move_children(copy, container)?;
        Ok(())
    }

    fn scripts(&self) -> Vec<ScriptRecord> {
        let Some(source) = self.source.borrow().clone() else {
            return Vec::new();
        };
        let inline = self.runtime.sources.inline_scripts(self.name());
        source
            .scripts
            .iter()
            .map(|script| {
                inline
                    .iter()
                    .find(|cached| script.inline && cached.id == script.id)
                    .unwrap_or(script)
                    .clone()
            })
            .collect()
    }

    // ---- mounting ----

    /// Render into `params.container` and run the guest.
    ///
    /// Before sources arrive the request is stashed and replayed on load.
    pub fn mount(&self, params: MountParams) {
        if self.destroyed.get() {
            return;
        }
        let state = self.instance.state();
        if state == AppState::LoadFailed {
            warn!(app = %self.name(), "mount ignored: sources failed to load");
            return;
        }
        if !self.instance.is_prerender() {
            self.instance.set_prefetch(false);
        }
        if self.source.borrow().is_none() {
            self.instance.set_container(Some(params.container));
            *self.pending_mount.borrow_mut() = Some(params);
            return;
        }
        let in_flight = matches!(state, AppState::BeforeMount | AppState::Mounting | AppState::Mounted);
        if in_flight && self.instance.is_prerender() {
            self.adopt_prerendered(params);
            return;
        }
        if in_flight {
            debug!(app = %self.name(), state = %state, "mount ignored: already mounted");
            return;
        }

        let epoch = self.bump_epoch();
        let container = params.container;
        self.instance.set_container(Some(container));
        self.instance.set_use_virtual_router(params.use_virtual_router);
        self.document.set_container(Some(container));

        self.instance.set_state(AppState::BeforeMount);
        self.dispatch(LifecycleEvent::BeforeMount);
        if let Err(e) = self.render_template(container) {
            error!(app = %self.name(), error = %e, "failed to render guest markup");
        }
        self.instance.set_state(AppState::Mounting);

        if let Some(sandbox) = self.instance.sandbox() {
            let started = sandbox.start(StartParams {
                umd_mode: self.instance.umd_mode(),
                base_route: params.base_route.clone(),
                use_virtual_router: params.use_virtual_router,
                default_page: params.default_page.clone(),
                disable_patch_request: params.disable_patch_request,
                prerender: self.instance.is_prerender(),
            });
            if let Err(e) = started {
                error!(app = %self.name(), error = %e, "failed to start sandbox");
            }
        }

        let remount_umd = self.instance.umd_mode() && self.umd_hooks.borrow().is_some();
        if remount_umd {
            if let Some(sandbox) = self.instance.sandbox() {
                sandbox.rebuild_effect_snapshot();
                sandbox.record_effect_snapshot();
            }
            self.call_umd_mount(epoch);
            return;
        }

        let scope = self.guest_scope(&params);
        let scripts = self.scripts();
        if params.fiber {
            self.schedule_fiber(Rc::new(scripts), 0, scope, epoch);
        } else {
            let mut scope = scope;
            for script in &scripts {
                self.run_script(script, &mut scope);
            }
            self.after_execution(epoch);
        }
    }

    fn guest_scope(&self, params: &MountParams) -> GuestScope {
        let sandbox = self.instance.sandbox().cloned();
        let history = sandbox
            .as_ref()
            .filter(|_| params.use_virtual_router)
            .map(|sandbox| sandbox.history());
        GuestScope::new(
            Rc::clone(&self.runtime.realm),
            sandbox,
            Rc::clone(&self.document),
            history,
            self.runtime.data.guest(self.name()),
            params.flags(),
        )
    }

    fn run_script(&self, script: &ScriptRecord, scope: &mut GuestScope) {
        let runner = Rc::clone(&self.runtime.runner);
        let result = {
            let _current = self.runtime.env.current_app().enter(self.name());
            runner.run(script, scope)
        };
        if let Err(thrown) = result {
            error!(
                app = %self.name(),
                script = %script.id,
                error = %Error::hook(self.name(), "script", &thrown),
                "guest script threw"
            );
        }
    }

    /// Run one script per macrotask.
    fn schedule_fiber(&self, scripts: Rc<Vec<ScriptRecord>>, index: usize, scope: GuestScope, epoch: u64) {
        let this = self.this.clone();
        self.runtime.env.event_loop().queue_task(move || {
            let Some(app) = this.upgrade() else {
                return;
            };
            if !app.is_current(epoch) {
                return;
            }
            let mut scope = scope;
            match scripts.get(index) {
                Some(script) => {
                    app.run_script(script, &mut scope);
                    app.schedule_fiber(Rc::clone(&scripts), index + 1, scope, epoch);
                }
                None => app.after_execution(epoch),
            }
        });
    }

    fn detect_umd(&self) -> Option<UmdHooks> {
        let library = self.global(&format!("{UMD_LIBRARY_PREFIX}{}", self.name()));
        let library = library.as_object()?;
        let mount = library.get("mount").as_function()?.clone();
        let unmount = library.get("unmount").as_function()?.clone();
        Some(UmdHooks { mount, unmount })
    }

    fn after_execution(&self, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }
        let Some(hooks) = self.detect_umd() else {
            self.finish_mount(None, epoch);
            return;
        };
        info!(app = %self.name(), "guest exposes mount hooks");
        self.instance.set_umd_mode(true);
        *self.umd_hooks.borrow_mut() = Some(hooks);
        if let Some(sandbox) = self.instance.sandbox() {
            if let Err(e) = sandbox.set_umd_mode(true) {
                warn!(app = %self.name(), error = %e, "failed to flag umd mode");
            }
            sandbox.record_effect_snapshot();
        }
        self.call_umd_mount(epoch);
    }

    fn call_umd_mount(&self, epoch: u64) {
        let mount = self.umd_hooks.borrow().as_ref().map(|h| h.mount.clone());
        let Some(mount) = mount else {
            self.finish_mount(None, epoch);
            return;
        };
        let data = self
            .runtime
            .data
            .sent_data(self.name())
            .map(Value::Object)
            .unwrap_or_default();
        let result = self.call_hook("mount", &mount, &[data]);
        self.finish_mount(result, epoch);
    }

    fn finish_mount(&self, result: Option<Value>, epoch: u64) {
        if let Some(Value::Promise(promise)) = result {
            let this = self.this.clone();
            let name = self.name().to_string();
            promise.on_settle(move |outcome| {
                if let Err(reason) = outcome {
                    error!(app = %name, hook = "mount", reason = ?reason, "guest mount hook rejected");
                }
                if let Some(app) = this.upgrade() {
                    app.schedule_mounted(epoch);
                }
            });
            return;
        }
        self.schedule_mounted(epoch);
    }

    fn schedule_mounted(&self, epoch: u64) {
        let this = self.this.clone();
        self.runtime.env.event_loop().queue_task(move || {
            if let Some(app) = this.upgrade() {
                app.on_mounted(epoch);
            }
        });
    }

    fn on_mounted(&self, epoch: u64) {
        if !self.is_current(epoch) {
            return;
        }
        self.instance.set_state(AppState::Mounted);
        if self.instance.is_prerender() {
            if let Some(sandbox) = self.instance.sandbox() {
                sandbox.record_effect_snapshot();
                sandbox.release_effects(self.clears_timers(TeardownPath::Prerender));
            }
            self.dispatch(LifecycleEvent::Mounted);
            debug!(app = %self.name(), "pre-rendered");
            return;
        }
        self.dispatch(LifecycleEvent::Mounted);
        self.call_window_hook("onmount");
        self.notify_waiters(true);
    }

    fn clears_timers(&self, path: TeardownPath) -> bool {
        self.runtime.options.borrow().timer_policy.should_clear(path)
    }

    // ---- pre-render ----

    fn prerender_mount(&self) {
        let holder = {
            let mut doc = self.runtime.env.document_mut();
            let holder = doc.create_element("div");
            if let Err(e) = doc.set_attr(holder, "hidden", "") {
                warn!(app = %self.name(), error = %e, "failed to hide pre-render holder");
            }
            holder
        };
        info!(app = %self.name(), "pre-rendering");
        self.mount(MountParams::from_config(&self.config, holder));
    }

    /// First real mount of a pre-rendered guest: move its DOM over and
    /// replay the lifecycle events held back while pre-rendering.
    fn adopt_prerendered(&self, params: MountParams) {
        let placeholder = self.instance.container();
        self.instance.set_prerender(false);
        self.instance.set_prefetch(false);
        if let Some(placeholder) = placeholder {
            if let Err(e) = self
                .runtime
                .env
                .document_mut()
                .move_children(placeholder, params.container)
            {
                error!(app = %self.name(), error = %e, "failed to transplant pre-rendered DOM");
            }
        }
        self.instance.set_container(Some(params.container));
        self.document.set_container(Some(params.container));

        if self.instance.use_virtual_router() && self.instance.sandbox().is_some() {
            let router = self.runtime.realm.router();
            let attached = router
                .set_prerender(self.name(), false)
                .and_then(|_| router.attach_to_url(self.name()));
            if let Err(e) = attached {
                warn!(app = %self.name(), error = %e, "failed to attach pre-rendered route");
            }
        }
        let mounted = self.instance.state() == AppState::Mounted;
        if mounted {
            if let Some(sandbox) = self.instance.sandbox() {
                sandbox.rebuild_effect_snapshot();
            }
        }
        let deferred = std::mem::take(&mut *self.deferred_events.borrow_mut());
        for event in deferred {
            self.dispatch(event);
        }
        if mounted {
            self.call_window_hook("onmount");
            self.notify_waiters(true);
        }
    }

    // ---- unmounting ----

    /// Tear the guest down. A guest whose load failed is always destroyed.
    pub fn unmount(&self, params: UnmountParams) {
        let UnmountParams {
            mut destroy,
            clear_data,
            keep_route_state,
            callback,
        } = params;
        let state = self.instance.state();
        if state == AppState::LoadFailed {
            destroy = true;
        }

        let mounted = matches!(state, AppState::BeforeMount | AppState::Mounting | AppState::Mounted);
        if !mounted {
            self.pending_mount.borrow_mut().take();
            if matches!(state, AppState::Created | AppState::Loading) {
                self.instance.set_state(AppState::Unmount);
            }
            if destroy {
                self.destroy_completely();
            }
            if state == AppState::LoadFailed {
                self.dispatch_now(LifecycleEvent::Unmount, None);
            }
            self.notify_waiters(false);
            if let Some(callback) = callback {
                callback();
            }
            return;
        }

        self.bump_epoch();
        let umd = self.instance.umd_mode();
        let path = if destroy {
            TeardownPath::Destroy
        } else if umd {
            TeardownPath::Umd
        } else if self.instance.is_prerender() {
            TeardownPath::Prerender
        } else {
            TeardownPath::Default
        };
        debug!(app = %self.name(), destroy, ?path, "unmounting");
        let hidden = self.instance.is_hidden();
        self.instance.set_state(AppState::Unmount);
        self.instance.set_keep_alive_state(None);
        self.keep_alive_holder.set(None);

        let unmount_hook = self.umd_hooks.borrow().as_ref().map(|h| h.unmount.clone());
        if let (true, Some(unmount_hook)) = (umd, unmount_hook) {
            self.call_hook("unmount", &unmount_hook, &[]);
        }
        self.call_window_hook("onunmount");
        let signal = Event::new(app_event_name("unmount", self.name()));
        for thrown in self.runtime.env.dispatch_window_event(&signal) {
            error!(app = %self.name(), error = %Error::hook(self.name(), "unmount", &thrown), "guest listener threw");
        }

        match self.instance.sandbox() {
            Some(sandbox) => {
                sandbox.stop(StopParams {
                    umd_mode: umd,
                    keep_route_state: keep_route_state && !destroy,
                    clear_event_source: true,
                    clear_data: clear_data || destroy,
                    clear_timers: self.clears_timers(path),
                    destroy,
                });
            }
            None if clear_data || destroy => self.runtime.data.clear_data(self.name()),
            None => {}
        }

        let container = self.instance.container();
        if destroy {
            self.destroy_completely();
        }
        if let Some(container) = container {
            let has_content = !self.runtime.env.document().children(container).is_empty();
            // a hidden guest only owns its holder, which is dropped here
            let reset = if umd && !destroy && !hidden && has_content {
                self.render_template(container)
            } else {
                self.runtime
                    .env
                    .document_mut()
                    .clear_children(container)
                    .map_err(Error::from)
            };
            if let Err(e) = reset {
                warn!(app = %self.name(), error = %e, "failed to reset container");
            }
        }

        self.dispatch_now(LifecycleEvent::Unmount, None);
        self.instance.set_container(None);
        self.instance.set_prerender(false);
        self.instance.set_prefetch(false);
        self.document.set_container(None);
        self.deferred_events.borrow_mut().clear();
        self.notify_waiters(false);
        info!(app = %self.name(), destroy, "unmounted");
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Drop the instance from the registry along with its cached inline
    /// scripts and any kept route state.
    pub(crate) fn destroy_completely(&self) {
        if self.destroyed.replace(true) {
            return;
        }
        if let Some(registry) = self.runtime.registry.upgrade() {
            registry.remove(self.name(), self.instance.id());
        }
        self.runtime.sources.drop_inline(self.name());
        let router = self.runtime.realm.router();
        if router.has_route(self.name()) {
            if let Err(e) = router.remove_route(self.name()) {
                warn!(app = %self.name(), error = %e, "failed to drop route state");
            }
        }
        self.umd_hooks.borrow_mut().take();
        self.pending_mount.borrow_mut().take();
        info!(app = %self.name(), id = %self.instance.id(), "destroyed");
    }

    // ---- keep-alive ----

    /// Park a mounted keep-alive guest off-tree. Returns false if it is not
    /// mounted or already hidden.
    pub fn hidden_keep_alive_app(&self) -> bool {
        if self.instance.state() != AppState::Mounted || self.instance.is_hidden() {
            return false;
        }
        let Some(container) = self.instance.container() else {
            return false;
        };
        dispatch_app_state(&self.runtime.env, self.name(), LifecycleEvent::AfterHidden);
        self.instance.set_keep_alive_state(Some(KeepAliveState::Hidden));

        let moved = {
            let mut doc = self.runtime.env.document_mut();
            let holder = match self.keep_alive_holder.get() {
                Some(holder) => holder,
                None => doc.create_element("div"),
            };
            self.keep_alive_holder.set(Some(holder));
            doc.move_children(container, holder)
        };
        if let Err(e) = moved {
            error!(app = %self.name(), error = %e, "failed to park guest DOM");
        }
        // the host may hand the old container to another guest
        if let Some(holder) = self.keep_alive_holder.get() {
            self.instance.set_container(Some(holder));
            self.document.set_container(Some(holder));
        }

        if let Some(sandbox) = self.instance.sandbox() {
            sandbox.record_effect_snapshot();
            sandbox.release_effects(self.clears_timers(TeardownPath::KeepAliveHide));
        }
        self.set_route_hidden(true);
        self.dispatch_now(LifecycleEvent::AfterHidden, None);
        true
    }

    /// Bring a hidden keep-alive guest back into `container` without
    /// re-running its scripts.
    pub fn show_keep_alive_app(&self, container: NodeId) -> bool {
        if !self.instance.is_hidden() {
            return false;
        }
        if let Some(sandbox) = self.instance.sandbox() {
            sandbox.rebuild_effect_snapshot();
        }
        self.instance.set_container(Some(container));
        dispatch_app_state(&self.runtime.env, self.name(), LifecycleEvent::BeforeShow);
        self.dispatch_now(LifecycleEvent::BeforeShow, None);

        if let Some(holder) = self.keep_alive_holder.get() {
            if let Err(e) = self.runtime.env.document_mut().move_children(holder, container) {
                error!(app = %self.name(), error = %e, "failed to restore guest DOM");
            }
        }
        self.document.set_container(Some(container));
        self.instance.set_keep_alive_state(Some(KeepAliveState::Show));
        self.set_route_hidden(false);

        dispatch_app_state(&self.runtime.env, self.name(), LifecycleEvent::AfterShow);
        self.dispatch_now(LifecycleEvent::AfterShow, None);
        true
    }

    fn set_route_hidden(&self, hidden: bool) {
        if !self.instance.use_virtual_router() {
            return;
        }
        let router = self.runtime.realm.router();
        if !router.has_route(self.name()) {
            return;
        }
        if let Err(e) = router.set_hidden(self.name(), hidden) {
            warn!(app = %self.name(), error = %e, "failed to update route visibility");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppAttributes;
    use crate::host::{Host, UnmountAppOptions};
    use crate::loader::MemoryLoader;
    use crate::script::NativeScriptRunner;
    use cohost_env::SharedEnvironment;
    use std::cell::Cell;

    const URL: &str = "https://cdn.test/a/";

    fn host(bundle: SourceBundle) -> (Host, Rc<NativeScriptRunner>) {
        let env = SharedEnvironment::new("https://host.test/").unwrap();
        let loader = Rc::new(MemoryLoader::new());
        loader.insert(URL, bundle);
        let runner = Rc::new(NativeScriptRunner::new());
        let host = Host::new(env, loader, runner.clone());
        host.start(Default::default()).unwrap();
        (host, runner)
    }

    fn container(host: &Host) -> NodeId {
        host.env().document_mut().create_element("micro-app")
    }

    #[test]
    fn mount_params_follow_config() {
        let mut attrs = AppAttributes::new("a", URL);
        attrs.fiber = Some(true);
        attrs.base_route = Some("/base".to_string());
        let base = url::Url::parse("https://host.test/").unwrap();
        let config = attrs.resolve(&Default::default(), &base).unwrap();
        let (host, _) = host(SourceBundle::new());
        let params = MountParams::from_config(&config, container(&host));
        assert!(params.fiber);
        assert!(params.use_virtual_router);
        assert_eq!(params.base_route.as_deref(), Some("/base"));
        assert_eq!(
            params.flags(),
            ExecutionFlags {
                fiber: true,
                ..Default::default()
            }
        );
    }

    #[test]
    fn unmount_mid_fiber_drops_remaining_scripts() {
        let bundle = SourceBundle::new()
            .with_script(ScriptRecord::inline("one", ""))
            .with_script(ScriptRecord::inline("two", ""));
        let (host, runner) = host(bundle);
        runner.register("one", |_| Ok(()));
        runner.register("two", |_| Ok(()));

        let mut attrs = AppAttributes::new("a", URL);
        attrs.fiber = Some(true);
        let app = host.register(&attrs, container(&host)).unwrap();
        let turns = host.env().event_loop();
        // load completion, then the first script
        turns.run_one_turn();
        turns.run_one_turn();
        assert_eq!(runner.run_count("one"), 1);

        host.unmount_app("a", UnmountAppOptions::default());
        turns.run_until_idle();
        assert_eq!(runner.run_count("two"), 0);
        assert_eq!(app.get_app_state(), AppState::Unmount);
    }

    #[test]
    fn debug_names_the_guest() {
        let (host, _) = host(SourceBundle::new());
        let app = host.register(&AppAttributes::new("a", URL), container(&host)).unwrap();
        let shown = format!("{app:?}");
        assert!(shown.starts_with("AppLifecycleController"));
        assert!(shown.contains("name: \"a\""));
        assert!(shown.contains(&app.instance().id().to_string()));
    }

    #[test]
    fn waiters_hear_about_unmount() {
        let (host, _) = host(SourceBundle::new());
        let app = host.register(&AppAttributes::new("a", URL), container(&host)).unwrap();
        let heard = Rc::new(Cell::new(None));
        let h = Rc::clone(&heard);
        app.when_mounted(move |mounted| h.set(Some(mounted)));
        app.unmount(UnmountParams::default());
        assert_eq!(heard.get(), Some(false));
    }

    #[test]
    fn stale_mounted_continuation_is_ignored() {
        let (host, _) = host(SourceBundle::new());
        let app = host.register(&AppAttributes::new("a", URL), container(&host)).unwrap();
        let turns = host.env().event_loop();
        // load completion runs the (empty) scripts and queues `mounted`
        turns.run_one_turn();
        assert_eq!(app.get_app_state(), AppState::Mounting);

        app.unmount(UnmountParams::default());
        turns.run_until_idle();
        assert_eq!(app.get_app_state(), AppState::Unmount);
    }
}

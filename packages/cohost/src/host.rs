//! The host-facing surface: registration, pre-fetch, bulk unmount, reload.

use std::cell::Cell;
use std::rc::Rc;

use cohost_env::{Env, NodeId, Promise, Value};
use cohost_router::VirtualRouter;
use cohost_sandbox::{SandboxRealm, BASE_APPLICATION_KEY};
use serde::Deserialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::{AppAttributes, AppConfig, StartOptions};
use crate::controller::{AppLifecycleController, MountParams, UnmountParams};
use crate::css::{CssCache, CssScoper};
use crate::data::EventCenter;
use crate::error::{Error, Result};
use crate::instance::AppState;
use crate::loader::{SourceCache, SourceLoader};
use crate::registry::Registry;
use crate::runtime::Runtime;
use crate::script::ScriptRunner;

/// One entry of [`Host::pre_fetch`].
#[derive(Debug, Clone, Deserialize)]
pub struct PrefetchParam {
    #[serde(flatten)]
    pub attrs: AppAttributes,
    /// Mount into a hidden detached container once loaded.
    #[serde(default)]
    pub prerender: bool,
}

impl PrefetchParam {
    pub fn new(name: &str, url: &str) -> Self {
        Self {
            attrs: AppAttributes::new(name, url),
            prerender: false,
        }
    }

    pub fn prerender(mut self) -> Self {
        self.prerender = true;
        self
    }
}

/// Options for [`Host::unmount_app`] and [`Host::unmount_all_apps`].
#[derive(Debug, Clone, Copy, Default)]
pub struct UnmountAppOptions {
    pub destroy: bool,
    pub clear_alive_state: bool,
}

/// Filters for [`Host::get_active_apps`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ActiveAppsOptions {
    pub exclude_hidden: bool,
    pub exclude_prerender: bool,
}

/// Owns every guest of one page.
pub struct Host {
    runtime: Rc<Runtime>,
    registry: Rc<Registry>,
}

impl Host {
    pub fn new(env: Env, loader: Rc<dyn SourceLoader>, runner: Rc<dyn ScriptRunner>) -> Self {
        let registry = Rc::new(Registry::new());
        let runtime = Rc::new(Runtime {
            realm: SandboxRealm::new(Rc::clone(&env)),
            data: EventCenter::new(Rc::clone(&env)),
            env,
            options: Default::default(),
            loader,
            runner,
            css: CssCache::new(),
            sources: SourceCache::new(),
            registry: Rc::downgrade(&registry),
        });
        Self { runtime, registry }
    }

    pub fn with_css_scoper(self, scoper: Rc<dyn CssScoper>) -> Self {
        self.runtime.css.set_scoper(Some(scoper));
        self
    }

    /// Store global defaults and flag the page as a host.
    pub fn start(&self, options: StartOptions) -> Result<()> {
        *self.runtime.options.borrow_mut() = options;
        self.runtime
            .env
            .window_mut()
            .set(BASE_APPLICATION_KEY, Value::from(true))?;
        info!("host started");
        Ok(())
    }

    pub fn env(&self) -> &Env {
        &self.runtime.env
    }

    pub fn realm(&self) -> &Rc<SandboxRealm> {
        &self.runtime.realm
    }

    pub fn router(&self) -> &Rc<VirtualRouter> {
        self.runtime.realm.router()
    }

    pub fn data(&self) -> &Rc<EventCenter> {
        &self.runtime.data
    }

    pub fn css(&self) -> &CssCache {
        &self.runtime.css
    }

    pub fn sources(&self) -> &SourceCache {
        &self.runtime.sources
    }

    pub fn get_app(&self, name: &str) -> Option<Rc<AppLifecycleController>> {
        self.registry.get(name)
    }

    fn base_url(&self) -> Url {
        self.runtime.env.history().url().clone()
    }

    fn resolve(&self, attrs: &AppAttributes) -> Result<AppConfig> {
        attrs.resolve(&self.runtime.options.borrow(), &self.base_url())
    }

    fn create(&self, config: AppConfig, container: NodeId) -> Result<Rc<AppLifecycleController>> {
        let app = AppLifecycleController::new(Rc::clone(&self.runtime), config, false, false)?;
        self.registry.insert(Rc::clone(&app));
        app.begin(Some(container));
        app.mount(MountParams::from_config(app.config(), container));
        Ok(app)
    }

    /// A guest element connected to `container`.
    ///
    /// An existing instance with the same URL is reused when it is a
    /// pre-fetch, unmounted or hidden; one with a different URL is replaced
    /// under the same conditions. A live instance makes this a name
    /// conflict.
    pub fn register(&self, attrs: &AppAttributes, container: NodeId) -> Result<Rc<AppLifecycleController>> {
        let config = self.resolve(attrs)?;
        let Some(existing) = self.registry.get(&config.name) else {
            return self.create(config, container);
        };
        let instance = existing.instance();
        let same_url = instance.url() == &config.url;
        let state = instance.state();
        if same_url && instance.is_hidden() {
            existing.show_keep_alive_app(container);
            return Ok(existing);
        }
        let idle = instance.is_prefetch() || state == AppState::Unmount;
        if same_url && idle {
            debug!(app = %config.name, "reusing instance");
            existing.mount(MountParams::from_config(&config, container));
            return Ok(existing);
        }
        if idle || state == AppState::LoadFailed {
            debug!(app = %config.name, "replacing instance");
            existing.unmount(UnmountParams {
                destroy: true,
                ..Default::default()
            });
            return self.create(config, container);
        }
        let e = Error::NameConflict {
            name: config.name,
            url: config.url.to_string(),
        };
        warn!(error = %e, "registration rejected");
        Err(e)
    }

    /// A guest element left the page: hide it if keep-alive, else unmount.
    pub fn disconnect(&self, name: &str) -> bool {
        let Some(app) = self.registry.get(name) else {
            return false;
        };
        let config = app.config();
        if config.keep_alive && app.hidden_keep_alive_app() {
            return true;
        }
        app.unmount(UnmountParams {
            destroy: config.destroy,
            keep_route_state: config.keep_router_state,
            ..Default::default()
        });
        true
    }

    /// Load guests ahead of use. Every entry is validated before any load
    /// starts; names already registered are skipped.
    pub fn pre_fetch(&self, list: &[PrefetchParam]) -> Result<()> {
        let configs = list
            .iter()
            .map(|param| -> Result<(AppConfig, bool)> { Ok((self.resolve(&param.attrs)?, param.prerender)) })
            .collect::<Result<Vec<_>>>()?;
        for (config, prerender) in configs {
            if self.registry.contains(&config.name) {
                debug!(app = %config.name, "pre-fetch skipped: already registered");
                continue;
            }
            let app = AppLifecycleController::new(Rc::clone(&self.runtime), config, true, prerender)?;
            self.registry.insert(Rc::clone(&app));
            app.begin(None);
        }
        Ok(())
    }

    /// Unmount `name`. Resolves `false` for an unknown guest.
    pub fn unmount_app(&self, name: &str, opts: UnmountAppOptions) -> Promise {
        let (promise, resolver) = Promise::pending();
        let Some(app) = self.registry.get(name) else {
            warn!(app = %name, "unmount_app: no such app");
            resolver.resolve(false);
            return promise;
        };
        let done: Box<dyn FnOnce()> = {
            let resolver = resolver.clone();
            Box::new(move || {
                resolver.resolve(true);
            })
        };
        let instance = app.instance();
        let mounted = matches!(
            instance.state(),
            AppState::BeforeMount | AppState::Mounting | AppState::Mounted
        );

        if instance.is_hidden() {
            if opts.destroy || opts.clear_alive_state {
                app.unmount(UnmountParams {
                    destroy: opts.destroy,
                    clear_data: true,
                    keep_route_state: true,
                    callback: Some(done),
                });
            } else {
                resolver.resolve(true);
            }
        } else if mounted && app.config().keep_alive && !opts.destroy && !opts.clear_alive_state {
            app.hidden_keep_alive_app();
            resolver.resolve(true);
        } else {
            app.unmount(UnmountParams {
                destroy: opts.destroy,
                clear_data: opts.destroy,
                keep_route_state: false,
                callback: Some(done),
            });
        }
        promise
    }

    /// Unmount every registered guest. Resolves once all have.
    pub fn unmount_all_apps(&self, opts: UnmountAppOptions) -> Promise {
        let names = self.registry.names();
        if names.is_empty() {
            return Promise::resolved(Value::from(true));
        }
        let (promise, resolver) = Promise::pending();
        let remaining = Rc::new(Cell::new(names.len()));
        for name in names {
            let remaining = Rc::clone(&remaining);
            let resolver = resolver.clone();
            self.unmount_app(&name, opts).on_settle(move |_| {
                remaining.set(remaining.get() - 1);
                if remaining.get() == 0 {
                    resolver.resolve(true);
                }
            });
        }
        promise
    }

    /// Names of guests that are not unmounted, with pre-fetches, hidden
    /// guests and pre-renders filtered per `opts`.
    pub fn get_active_apps(&self, opts: ActiveAppsOptions) -> Vec<String> {
        self.registry
            .all()
            .into_iter()
            .filter(|app| {
                let instance = app.instance();
                instance.state() != AppState::Unmount
                    && (!instance.is_prefetch() || (instance.is_prerender() && !opts.exclude_prerender))
                    && !(opts.exclude_hidden && instance.is_hidden())
            })
            .map(|app| app.name().to_string())
            .collect()
    }

    pub fn get_all_apps(&self) -> Vec<String> {
        self.registry.names()
    }

    /// Unmount `name` and mount it again in the same container. Resolves
    /// `true` once it is mounted, `false` if it is unknown, hidden, has no
    /// container or fails to load.
    pub fn reload(&self, name: &str, destroy: bool) -> Promise {
        let (promise, resolver) = Promise::pending();
        let Some(app) = self.registry.get(name) else {
            warn!(app = %name, "reload: no such app");
            resolver.resolve(false);
            return promise;
        };
        if app.instance().is_hidden() {
            warn!(app = %name, "reload: app is hidden");
            resolver.resolve(false);
            return promise;
        }
        let Some(container) = app.container() else {
            warn!(app = %name, "reload: app has no container");
            resolver.resolve(false);
            return promise;
        };
        let recreate = destroy || app.get_app_state() == AppState::LoadFailed;
        let config = app.config().clone();
        app.unmount(UnmountParams {
            destroy: recreate,
            clear_data: recreate,
            ..Default::default()
        });

        let target = if recreate {
            match self.create(config, container) {
                Ok(app) => app,
                Err(e) => {
                    warn!(app = %name, error = %e, "reload failed");
                    resolver.resolve(false);
                    return promise;
                }
            }
        } else {
            app.mount(MountParams::from_config(&config, container));
            app
        };
        target.when_mounted(move |mounted| {
            resolver.resolve(mounted);
        });
        promise
    }

    /// Register and mount a guest in one step. Without a container one is
    /// appended to the page body. Resolves `true` once mounted, `false` if
    /// loading fails.
    pub fn render_app(&self, attrs: &AppAttributes, container: Option<NodeId>) -> Result<Promise> {
        let container = match container {
            Some(container) => container,
            None => {
                let mut doc = self.runtime.env.document_mut();
                let container = doc.create_element("div");
                let body = doc.body();
                doc.append_child(body, container)?;
                container
            }
        };
        let app = self.register(attrs, container)?;
        let (promise, resolver) = Promise::pending();
        app.when_mounted(move |mounted| {
            resolver.resolve(mounted);
        });
        Ok(promise)
    }
}

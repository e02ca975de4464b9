//! Run independently built guest applications inside one host page.
//!
//! A [`Host`] owns every guest of a page. Each guest gets an
//! [`AppLifecycleController`] that loads its sources through a
//! [`SourceLoader`], renders them into a container, and runs its scripts
//! through a [`ScriptRunner`] against a [`GuestScope`]: a sandboxed global,
//! a document view confined to the container, and a virtual history.
//!
//! Guests talk to the host and to each other over the [`EventCenter`].
//!
//! # Example
//!
//! ```rust
//! use std::rc::Rc;
//!
//! use cohost::{AppAttributes, AppState, Host, MemoryLoader, NativeScriptRunner, SourceBundle, StartOptions};
//! use cohost::ScriptRecord;
//! use cohost_env::{NodeSpec, SharedEnvironment, Value};
//!
//! let env = SharedEnvironment::new("https://host.test/").unwrap();
//! let loader = Rc::new(MemoryLoader::new());
//! loader.insert(
//!     "https://cdn.test/shop/",
//!     SourceBundle::new()
//!         .with_body(NodeSpec::element("div").attr("id", "root"))
//!         .with_script(ScriptRecord::inline("main", "")),
//! );
//! let runner = Rc::new(NativeScriptRunner::new());
//! runner.register("main", |scope| scope.set("cart", Value::from(0i64)));
//!
//! let host = Host::new(env.clone(), loader, runner);
//! host.start(StartOptions::default()).unwrap();
//!
//! let container = env.document_mut().create_element("micro-app");
//! let app = host.register(&AppAttributes::new("shop", "https://cdn.test/shop/"), container).unwrap();
//! env.event_loop().run_until_idle();
//!
//! assert_eq!(app.get_app_state(), AppState::Mounted);
//! assert!(!env.window().has_own("cart"));
//! ```

mod config;
mod controller;
mod css;
mod data;
mod error;
mod events;
mod host;
mod instance;
mod loader;
mod registry;
mod runtime;
mod scope;
mod script;

pub use config::{AppAttributes, AppConfig, StartOptions, TeardownPath, TimerPolicy};
pub use controller::{AppLifecycleController, MountParams, UnmountParams, UMD_LIBRARY_PREFIX};
pub use css::{scope_prefix, CssCache, CssScoper};
pub use data::{DataListener, DataMap, EventCenter, GuestData};
pub use error::{Error, Result};
pub use events::{LifecycleEvent, LifecycleHook, Lifecycles};
pub use host::{ActiveAppsOptions, Host, PrefetchParam, UnmountAppOptions};
pub use instance::{AppInstance, AppState, InstanceId, KeepAliveState};
pub use loader::{
    LoadCallback, LoadError, LoadRequest, MemoryLoader, ScriptRecord, SourceBundle, SourceCache, SourceLoader,
    StyleRecord,
};
pub use registry::Registry;
pub use scope::{ExecutionFlags, GuestScope};
pub use script::{NativeScriptRunner, ScriptFn, ScriptRunner};

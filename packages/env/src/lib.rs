//! Shared environment model.
//!
//! Every guest application mounted by a host ultimately runs inside one
//! global object, one document and one browser URL. This crate models that
//! shared environment:
//!
//! - [`Value`]: what lives in a global slot (data, functions, objects, promises)
//! - [`GlobalObject`]: a property table with descriptor semantics
//! - [`Document`]: an arena DOM with scoped queries and subtree transplanting
//! - [`EventTarget`]: identity-based listener tables
//! - [`EventLoop`]: a single-threaded macrotask queue with virtual timers
//! - [`BrowserHistory`]: the one real URL and session history
//! - [`SharedEnvironmentCache`]: pristine built-ins captured before patching
//! - [`CurrentApp`]: which guest is executing right now
//! - [`PatchManager`]: reference-counted install/uninstall of shared patches
//!
//! # Example
//!
//! ```rust
//! use cohost_env::{SharedEnvironment, Value};
//!
//! let env = SharedEnvironment::new("https://host.test/").unwrap();
//! env.window_mut().set("answer", Value::from(42i64)).unwrap();
//! assert_eq!(env.window().get("answer"), Some(Value::from(42i64)));
//! ```

mod cache;
mod current;
mod dom;
mod environment;
mod error;
mod event_loop;
mod events;
mod global;
mod history;
mod patch;
mod value;

pub use cache::{SharedEnvironmentCache, CACHED_BUILTINS};
pub use current::{CurrentApp, CurrentAppGuard};
pub use dom::{CreationHook, Document, NodeId, NodeKind, NodeSpec};
pub use environment::{Env, NetworkRequest, SharedEnvironment};
pub use error::{EnvError, Result, Thrown};
pub use event_loop::{EventLoop, Task, TimerId, TimerKind};
pub use events::{dispatch_to, Event, EventTarget, Listener};
pub use global::{GlobalObject, PropertyDescriptor};
pub use history::BrowserHistory;
pub use patch::{Patch, PatchManager};
pub use value::{CallResult, Function, NativeFn, Object, Promise, Resolver, Value};

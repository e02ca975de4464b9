//! Per-guest isolation over the shared environment.
//!
//! - [`GlobalScopeSandbox`]: a private global record layered over the shared
//!   window, with activation bookkeeping
//! - [`EffectTracker`]: listeners, timers and click handlers a guest leaves
//!   behind, with record/rebuild/release
//! - [`IsolatedDocumentView`]: document queries confined to the guest's
//!   container
//! - [`RequestPatch`]: request globals resolving relative URLs against the
//!   guest
//!
//! All sandboxes of one host share a [`SandboxRealm`].
//!
//! # Example
//!
//! ```rust
//! use cohost_env::{SharedEnvironment, Value};
//! use cohost_sandbox::{GlobalScopeSandbox, SandboxOptions, SandboxRealm, StartParams, StopParams};
//! use url::Url;
//!
//! let realm = SandboxRealm::new(SharedEnvironment::new("https://host.test/").unwrap());
//! let url = Url::parse("https://cdn.test/app/").unwrap();
//! let sandbox = GlobalScopeSandbox::new(realm.clone(), "app", url, SandboxOptions::default()).unwrap();
//!
//! sandbox.start(StartParams::default()).unwrap();
//! sandbox.set("leak", Value::from(1i64)).unwrap();
//! assert!(!realm.env().window().has_own("leak"));
//! sandbox.stop(StopParams::default());
//! assert!(!sandbox.has("leak"));
//! ```

mod click;
mod document;
mod effect;
mod error;
mod patches;
mod realm;
mod request;
mod sandbox;

pub use click::ClickTable;
pub use document::{
    DocumentEvents, DocumentMode, IsolatedDocumentView, NestedContextDocument, ScopedDocument, BODY_TAG, HEAD_TAG,
};
pub use effect::{EffectSnapshot, EffectTracker, ReleaseOptions, TimerCallback, RESERVED_EVENTS, ROUTER_EVENTS};
pub use error::{Result, SandboxError};
pub use patches::OwnerTagPatch;
pub use realm::SandboxRealm;
pub use request::{RequestPatch, REQUEST_GLOBALS};
pub use sandbox::{
    DataChannelHooks, GlobalScopeSandbox, SandboxOptions, StartParams, StopParams, BASE_APPLICATION_KEY,
    BASE_ROUTE_KEY, ENVIRONMENT_KEY, INTERNAL_PREFIX, NAME_KEY, PUBLIC_PATH_KEY, STATIC_ESCAPE_PROPERTIES,
    STATIC_SCOPE_PROPERTIES, UMD_MODE_KEY,
};

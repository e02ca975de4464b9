//! Virtual per-guest routing over one shared browser URL.
//!
//! Every guest keeps a [`ShadowLocation`]: the location it believes it is at.
//! The router multiplexes these into the real URL, one query parameter per
//! guest (`app-<name>`), using the reversible [`encode`]/[`decode`] pair.
//!
//! Guest history calls go through [`GuestHistory`]. The host drives guests
//! through [`VirtualRouter::push`], [`VirtualRouter::replace`] and friends,
//! and observes changes with [`VirtualRouter::before_each`] and
//! [`VirtualRouter::after_each`].
//!
//! # Example
//!
//! ```rust
//! use cohost_env::SharedEnvironment;
//! use cohost_router::{RouteInit, VirtualRouter};
//! use url::Url;
//!
//! let env = SharedEnvironment::new("https://host.test/").unwrap();
//! let router = VirtualRouter::new(env);
//! let app_url = Url::parse("https://cdn.test/shop/").unwrap();
//! router.init_route_state("shop", &app_url, RouteInit::default()).unwrap();
//! router.push("shop", "/cart").unwrap();
//! assert_eq!(router.current("shop").unwrap().full_path, "/cart");
//! ```

mod codec;
mod error;
mod guest;
mod location;
mod router;
mod slot;

pub use codec::{decode, decode_component, encode, encode_component};
pub use error::{Result, RouterError};
pub use guest::GuestHistory;
pub use location::{GuardLocation, ShadowLocation};
pub use router::{
    app_event_name, AttachOptions, GuardFn, GuardId, GuardScope, HistoryMode, NavigationKind,
    RouteInit, VirtualRouter,
};
pub use slot::{get_micro_path, is_hash_routed, remove_micro_path, set_micro_path, slot_key};

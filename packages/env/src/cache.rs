//! Snapshot of the pristine shared environment.

use std::collections::BTreeMap;

use crate::global::GlobalObject;
use crate::value::Value;

/// Built-ins captured before any patch runs.
pub const CACHED_BUILTINS: &[&str] = &[
    "fetch",
    "XMLHttpRequest",
    "EventSource",
    "Infinity",
    "NaN",
    "undefined",
    "localStorage",
    "sessionStorage",
];

/// Holds the original values of the shared global's built-ins.
///
/// Captured once at environment construction. Later patches (request
/// rewriting, document hooks) read the true primitives from here even after
/// the live global has been reassigned.
#[derive(Clone, Debug, Default)]
pub struct SharedEnvironmentCache {
    builtins: BTreeMap<String, Value>,
}

impl SharedEnvironmentCache {
    /// Capture [`CACHED_BUILTINS`] from `window`.
    pub fn capture(window: &GlobalObject) -> Self {
        let builtins = CACHED_BUILTINS
            .iter()
            .filter_map(|name| window.get(name).map(|v| (name.to_string(), v)))
            .collect();
        Self { builtins }
    }

    /// The original value of a built-in.
    pub fn raw(&self, name: &str) -> Option<&Value> {
        self.builtins.get(name)
    }

    /// Names that were captured.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.builtins.keys().map(String::as_str)
    }
}
